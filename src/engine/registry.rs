//! Callback dispatch registry
//!
//! The engine's callback registration is process-global: one set of function
//! pointers with an opaque user pointer and no other per-call context.
//! Rather than a single mutable global instance, sinks are registered here
//! under a numeric handle; the C-side trampolines carry the handle in the
//! user pointer and dispatch by lookup. Lookups clone the `Arc` out of the
//! table, so a callback never runs user code while the table lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use super::adapter::EngineEvents;

/// Opaque identifier tying engine callbacks back to their session sink.
pub type SessionHandle = u64;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static SINKS: OnceLock<Mutex<HashMap<SessionHandle, Arc<dyn EngineEvents>>>> = OnceLock::new();

fn table() -> &'static Mutex<HashMap<SessionHandle, Arc<dyn EngineEvents>>> {
    SINKS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a sink and return its handle.
pub fn register(events: Arc<dyn EngineEvents>) -> SessionHandle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    table().lock().unwrap().insert(handle, events);
    handle
}

/// Drop a registration. Callbacks arriving afterwards find no sink and are
/// ignored.
pub fn unregister(handle: SessionHandle) {
    table().lock().unwrap().remove(&handle);
}

/// Resolve a handle to its sink.
pub fn lookup(handle: SessionHandle) -> Option<Arc<dyn EngineEvents>> {
    table().lock().unwrap().get(&handle).cloned()
}
