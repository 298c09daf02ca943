//! Deck normalization and live result streaming for an embedded SPICE engine
//!
//! This library prepares circuit decks for batch execution by an external
//! simulation engine and streams the engine's time-series results back to
//! the caller in real time under bounded memory.
//!
//! # Architecture
//!
//! - **Netlist normalizer**: folds continuations, rewrites include/library
//!   paths (expanding a symbolic PDK root), strips the interactive
//!   `.control` block while harvesting the transient command and requested
//!   signals, and synthesizes the directives the batch loader needs
//! - **Streaming session**: one driver thread issues the engine's background
//!   run and polls for completion; engine callbacks feed a bounded ring
//!   buffer, an optional CSV mirror, and periodic progress events
//! - **Engine seam**: command/callback traits plus a dynamically loaded
//!   libngspice adapter, so the whole streaming path also runs against a
//!   scripted fake in tests
//!
//! # Example
//!
//! ```no_run
//! use spicestream::{NgspiceEngine, StreamConfig, StreamSession, normalize_file};
//! use std::path::Path;
//!
//! let deck = normalize_file(Path::new("ring_osc.spice"), "/pdk")?;
//! let session = StreamSession::new(Box::new(NgspiceEngine::load()?))?;
//! session.load_deck(&deck)?;
//! session.start(StreamConfig::new(1e-10, 2e-8))?;
//! # Ok::<(), spicestream::SpiceError>(())
//! ```

use thiserror::Error;

pub mod engine;
pub mod netlist;
pub mod sch;
pub mod stream;

// Re-export the normalizer surface
pub use netlist::{NormalizedDeck, normalize_deck, normalize_file};

// Re-export the streaming surface
pub use stream::{
    SampleRing, SessionEvent, SessionState, SignalCatalog, StreamConfig, StreamSession,
    TimedSample,
};

// Re-export the engine seam
pub use engine::{EngineEvents, NgspiceEngine, SpiceEngine};

#[derive(Error, Debug)]
pub enum SpiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine library error: {0}")]
    Library(String),

    #[error("missing engine entry point: {0}")]
    MissingSymbol(String),

    #[error("engine not initialized")]
    NotInitialized,

    #[error("engine command failed: {0}")]
    CommandFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SpiceError>;
