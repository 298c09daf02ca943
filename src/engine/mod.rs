//! Simulation engine boundary
//!
//! The engine itself is opaque; this module owns the seam: the command and
//! callback traits the rest of the crate programs against, the registry that
//! routes the engine's context-free C callbacks back to their session, and
//! the dynamically loaded libngspice adapter.

pub mod adapter;
pub mod ngspice;
pub mod registry;

pub use adapter::{EngineEvents, SpiceEngine};
pub use ngspice::NgspiceEngine;
pub use registry::SessionHandle;
