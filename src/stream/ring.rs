//! Bounded sample buffer
//!
//! Fixed-capacity FIFO of timestamped sample rows. Pushing past capacity
//! evicts the oldest entry, so memory stays bounded no matter how long a
//! run streams. A separate consumer can drain incrementally with
//! [`SampleRing::pop_front`] without re-reading what it already took.

use std::collections::VecDeque;

/// One computed point: a timestamp plus the values of every buffered column.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSample {
    pub time: f64,
    pub values: Vec<f64>,
}

impl TimedSample {
    pub fn new(time: f64, values: Vec<f64>) -> Self {
        Self { time, values }
    }
}

/// Bounded double-ended sample queue with FIFO eviction.
#[derive(Debug)]
pub struct SampleRing {
    samples: VecDeque<TimedSample>,
    capacity: usize,
}

impl SampleRing {
    /// Create a ring holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample, evicting the oldest entry once full. Always succeeds.
    pub fn push(&mut self, sample: TimedSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// All buffered samples, oldest first, without removing them.
    pub fn snapshot(&self) -> Vec<TimedSample> {
        self.samples.iter().cloned().collect()
    }

    /// Remove and return up to `n` oldest samples.
    pub fn pop_front(&mut self, n: usize) -> Vec<TimedSample> {
        let take = n.min(self.samples.len());
        self.samples.drain(..take).collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Change capacity. Clears the buffer: a capacity change accompanies a
    /// reconfiguration, and buffered rows may no longer match its shape.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.samples.clear();
    }
}
