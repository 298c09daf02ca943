//! Session event surface
//!
//! Broadcast hub for the session's host-facing notifications. Subscribers
//! get an unbounded crossbeam receiver; publishing clones the event to every
//! live subscriber and prunes the ones whose receiver was dropped.

use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Notifications emitted by a streaming session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The driver issued the run command and streaming began.
    Started,
    /// The driver thread exited; no further samples will arrive.
    Stopped,
    /// Periodic progress marker, emitted every `frame_stride` samples.
    Frame {
        time: f64,
        samples: u64,
        step: f64,
        window: f64,
    },
    /// The export sink failed and was disabled. Emitted once per session.
    ExportError(String),
    /// One line of engine console output.
    OutputLine(String),
}

/// Publish/subscribe fan-out for [`SessionEvent`]s.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn publish(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
