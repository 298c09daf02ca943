//! Live result streaming
//!
//! The continuous streaming session and its supporting pieces: the per-run
//! signal catalog, the bounded sample ring, the watermark-deduplicated CSV
//! sink, and the session event surface.

pub mod catalog;
pub mod csv_sink;
pub mod events;
pub mod ring;
pub mod session;

pub use catalog::SignalCatalog;
pub use csv_sink::{CsvSink, format_value};
pub use events::{EventHub, SessionEvent};
pub use ring::{SampleRing, TimedSample};
pub use session::{
    DEFAULT_FRAME_STRIDE, DEFAULT_RING_CAPACITY, SessionState, StreamConfig, StreamSession,
};
