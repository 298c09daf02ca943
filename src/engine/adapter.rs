//! Engine adapter seam
//!
//! The simulation engine is an external collaborator reached through a small
//! command/callback protocol. `SpiceEngine` is the command side (issued by
//! the session, always serialized behind one lock); `EngineEvents` is the
//! callback side the engine drives, possibly from its own internal thread.
//! Sessions are constructed against `Box<dyn SpiceEngine>`, so tests run the
//! full streaming path against a scripted fake.

use std::sync::Arc;

use crate::Result;

/// Callback sink the engine delivers into.
///
/// Implementations must be thread-safe: the engine may invoke these from the
/// driver thread or from an engine-internal background thread, and the
/// design must not assume which.
pub trait EngineEvents: Send + Sync {
    /// One line of engine console output.
    fn output_line(&self, _line: &str) {}

    /// Engine status text (progress percentage and phase).
    fn status(&self, _status: &str) {}

    /// The engine asked the host to exit.
    fn exit_requested(&self, _status: i32) {}

    /// Ordered vector names for the run about to produce data. Issued once
    /// at run start; indices from a prior run are invalid afterwards.
    fn metadata(&self, names: &[String]);

    /// One computed point, values aligned with the last `metadata` order.
    fn data(&self, values: &[f64]);

    /// Background-thread state change reported by the engine.
    fn background_state(&self, _running: bool) {}

    /// Value for a caller-controlled source, read by the engine mid-run.
    fn source_value(&self, _name: &str) -> f64 {
        0.0
    }
}

/// Command surface of the simulation engine.
///
/// The underlying engine is not safe for concurrent command issuance; all
/// calls must go through a single serialization gate (the session owns it).
pub trait SpiceEngine: Send {
    /// Register the callback sink. Must be called before any other method.
    fn init(&mut self, events: Arc<dyn EngineEvents>) -> Result<()>;

    /// Issue one interpreter command (`bg_tran …`, `bg_halt`, `reset`, …).
    fn command(&mut self, command: &str) -> Result<()>;

    /// Load a circuit from normalized deck lines.
    fn load_circuit(&mut self, lines: &[String]) -> Result<()>;

    /// Whether the engine's background run is still executing.
    fn is_running(&self) -> bool;
}
