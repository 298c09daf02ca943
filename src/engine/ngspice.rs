//! Dynamic libngspice adapter
//!
//! Loads the shared engine library at runtime from a short list of candidate
//! locations, resolves its entry points, and bridges the engine's C callback
//! set onto [`EngineEvents`] through the handle-keyed registry. The library
//! handle is kept alive for as long as any resolved function pointer may be
//! called.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use libloading::Library;
use tracing::{debug, info, warn};

use super::adapter::{EngineEvents, SpiceEngine};
use super::registry::{self, SessionHandle};
use crate::{Result, SpiceError};

// Engine ABI structs for the data and metadata callbacks. Every field is
// required for layout even where only a few are read here.

#[repr(C)]
#[allow(dead_code)]
struct VecValue {
    name: *mut c_char,
    creal: f64,
    cimag: f64,
    is_scale: bool,
    is_complex: bool,
}

#[repr(C)]
#[allow(dead_code)]
struct VecValuesAll {
    veccount: c_int,
    vecindex: c_int,
    vecsa: *mut *mut VecValue,
}

#[repr(C)]
#[allow(dead_code)]
struct VecInfo {
    number: c_int,
    vecname: *mut c_char,
    is_real: bool,
    pdvec: *mut c_void,
    pdvecscale: *mut c_void,
}

#[repr(C)]
#[allow(dead_code)]
struct VecInfoAll {
    name: *mut c_char,
    title: *mut c_char,
    date: *mut c_char,
    plot_type: *mut c_char,
    veccount: c_int,
    vecs: *mut *mut VecInfo,
}

type SendChar = extern "C" fn(*mut c_char, c_int, *mut c_void) -> c_int;
type SendStat = extern "C" fn(*mut c_char, c_int, *mut c_void) -> c_int;
type ControlledExit = extern "C" fn(c_int, bool, bool, c_int, *mut c_void) -> c_int;
type SendData = extern "C" fn(*mut VecValuesAll, c_int, c_int, *mut c_void) -> c_int;
type SendInitData = extern "C" fn(*mut VecInfoAll, c_int, *mut c_void) -> c_int;
type BgThreadRunning = extern "C" fn(bool, c_int, *mut c_void) -> c_int;
type GetVsrcData = extern "C" fn(*mut f64, f64, *mut c_char, c_int, *mut c_void) -> c_int;
type GetIsrcData = extern "C" fn(*mut f64, f64, *mut c_char, c_int, *mut c_void) -> c_int;
type GetSyncData =
    extern "C" fn(f64, *mut f64, f64, c_int, c_int, c_int, *mut c_void) -> c_int;

type NgInit = unsafe extern "C" fn(
    Option<SendChar>,
    Option<SendStat>,
    Option<ControlledExit>,
    Option<SendData>,
    Option<SendInitData>,
    Option<BgThreadRunning>,
    *mut c_void,
) -> c_int;
type NgInitSync = unsafe extern "C" fn(
    Option<GetVsrcData>,
    Option<GetIsrcData>,
    Option<GetSyncData>,
    *mut c_int,
    *mut c_void,
) -> c_int;
type NgCommand = unsafe extern "C" fn(*mut c_char) -> c_int;
type NgCirc = unsafe extern "C" fn(*mut *mut c_char) -> c_int;
type NgRunning = unsafe extern "C" fn() -> bool;

/// Owned copy of a C string callback argument.
fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
}

fn sink_for(user: *mut c_void) -> Option<Arc<dyn EngineEvents>> {
    registry::lookup(user as usize as SessionHandle)
}

extern "C" fn send_char(message: *mut c_char, _id: c_int, user: *mut c_void) -> c_int {
    if let Some(events) = sink_for(user) {
        events.output_line(&lossy(message));
    }
    0
}

extern "C" fn send_stat(status: *mut c_char, _id: c_int, user: *mut c_void) -> c_int {
    if let Some(events) = sink_for(user) {
        events.status(&lossy(status));
    }
    0
}

extern "C" fn controlled_exit(
    status: c_int,
    _immediate: bool,
    _exit_on_quit: bool,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    if let Some(events) = sink_for(user) {
        events.exit_requested(status);
    }
    0
}

extern "C" fn send_data(
    data: *mut VecValuesAll,
    _count: c_int,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    let Some(events) = sink_for(user) else {
        return 0;
    };
    if data.is_null() {
        return 0;
    }

    let mut values = Vec::new();
    unsafe {
        let all = &*data;
        if !all.vecsa.is_null() && all.veccount > 0 {
            let vecs = std::slice::from_raw_parts(all.vecsa, all.veccount as usize);
            values.reserve(vecs.len());
            for &vec in vecs {
                values.push(if vec.is_null() { 0.0 } else { (*vec).creal });
            }
        }
    }
    events.data(&values);
    0
}

extern "C" fn send_init_data(data: *mut VecInfoAll, _id: c_int, user: *mut c_void) -> c_int {
    let Some(events) = sink_for(user) else {
        return 0;
    };
    if data.is_null() {
        return 0;
    }

    let mut names = Vec::new();
    unsafe {
        let all = &*data;
        if !all.vecs.is_null() && all.veccount > 0 {
            let vecs = std::slice::from_raw_parts(all.vecs, all.veccount as usize);
            names.reserve(vecs.len());
            for &vec in vecs {
                names.push(if vec.is_null() {
                    String::new()
                } else {
                    lossy((*vec).vecname)
                });
            }
        }
    }
    events.metadata(&names);
    0
}

extern "C" fn bg_thread_running(running: bool, _id: c_int, user: *mut c_void) -> c_int {
    if let Some(events) = sink_for(user) {
        events.background_state(running);
    }
    0
}

extern "C" fn get_vsrc_data(
    voltage: *mut f64,
    _time: f64,
    node: *mut c_char,
    _id: c_int,
    user: *mut c_void,
) -> c_int {
    if let Some(events) = sink_for(user)
        && !voltage.is_null()
    {
        unsafe { *voltage = events.source_value(&lossy(node)) };
    }
    0
}

/// Dynamically loaded libngspice instance.
pub struct NgspiceEngine {
    // Must outlive every resolved function pointer below.
    _lib: Library,
    ng_init: NgInit,
    ng_init_sync: Option<NgInitSync>,
    ng_command: NgCommand,
    ng_circ: Option<NgCirc>,
    ng_running: Option<NgRunning>,
    handle: Option<SessionHandle>,
}

impl NgspiceEngine {
    /// Per-OS library names probed by [`NgspiceEngine::load`].
    pub fn candidate_paths() -> Vec<PathBuf> {
        let names: &[&str] = if cfg!(target_os = "windows") {
            &["ngspice.dll", "bin/ngspice.dll"]
        } else if cfg!(target_os = "macos") {
            &[
                "libngspice.dylib",
                "./libngspice.dylib",
                "./bin/libngspice.dylib",
                "libngspice.so",
                "./libngspice.so",
                "./bin/libngspice.so",
            ]
        } else {
            &["libngspice.so", "./libngspice.so", "./bin/libngspice.so"]
        };
        names.iter().map(PathBuf::from).collect()
    }

    /// Probe the candidate locations and load the first library that opens.
    pub fn load() -> Result<Self> {
        let mut attempted = Vec::new();
        for candidate in Self::candidate_paths() {
            match Self::load_from(&candidate) {
                Ok(engine) => {
                    info!(path = %candidate.display(), "loaded engine library");
                    return Ok(engine);
                }
                Err(err) => {
                    debug!(path = %candidate.display(), %err, "candidate rejected");
                    attempted.push(candidate.display().to_string());
                }
            }
        }
        Err(SpiceError::Library(format!(
            "no engine library found; tried {}",
            attempted.join(", ")
        )))
    }

    /// Load the engine library from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let lib =
            unsafe { Library::new(path) }.map_err(|e| SpiceError::Library(e.to_string()))?;

        unsafe {
            let ng_init: NgInit = *lib
                .get(b"ngSpice_Init\0")
                .map_err(|_| SpiceError::MissingSymbol("ngSpice_Init".into()))?;
            let ng_command: NgCommand = *lib
                .get(b"ngSpice_Command\0")
                .map_err(|_| SpiceError::MissingSymbol("ngSpice_Command".into()))?;
            let ng_init_sync = lib.get::<NgInitSync>(b"ngSpice_Init_Sync\0").ok().map(|s| *s);
            let ng_circ = lib.get::<NgCirc>(b"ngSpice_Circ\0").ok().map(|s| *s);
            let ng_running = lib.get::<NgRunning>(b"ngSpice_running\0").ok().map(|s| *s);

            Ok(Self {
                _lib: lib,
                ng_init,
                ng_init_sync,
                ng_command,
                ng_circ,
                ng_running,
                handle: None,
            })
        }
    }

    fn raw_command(&self, command: &str) -> Result<()> {
        let text = CString::new(command)
            .map_err(|_| SpiceError::CommandFailed(command.to_string()))?;
        let ret = unsafe { (self.ng_command)(text.as_ptr() as *mut c_char) };
        if ret != 0 {
            return Err(SpiceError::CommandFailed(command.to_string()));
        }
        Ok(())
    }
}

impl SpiceEngine for NgspiceEngine {
    fn init(&mut self, events: Arc<dyn EngineEvents>) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = registry::register(events);
        let user = handle as usize as *mut c_void;
        let ret = unsafe {
            (self.ng_init)(
                Some(send_char),
                Some(send_stat),
                Some(controlled_exit),
                Some(send_data),
                Some(send_init_data),
                Some(bg_thread_running),
                user,
            )
        };
        if ret != 0 {
            registry::unregister(handle);
            return Err(SpiceError::Library(format!(
                "engine init failed with code {ret}"
            )));
        }

        // Source-value callback for interactive control, when available.
        if let Some(ng_init_sync) = self.ng_init_sync {
            unsafe {
                ng_init_sync(Some(get_vsrc_data), None, None, std::ptr::null_mut(), user);
            }
        }

        self.handle = Some(handle);
        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<()> {
        if self.handle.is_none() {
            return Err(SpiceError::NotInitialized);
        }
        self.raw_command(command)
    }

    fn load_circuit(&mut self, lines: &[String]) -> Result<()> {
        if self.handle.is_none() {
            return Err(SpiceError::NotInitialized);
        }
        let Some(ng_circ) = self.ng_circ else {
            return Err(SpiceError::MissingSymbol("ngSpice_Circ".into()));
        };

        let storage: Vec<CString> = lines
            .iter()
            .map(|line| CString::new(line.as_str()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| SpiceError::CommandFailed("deck line with embedded NUL".into()))?;
        let mut pointers: Vec<*mut c_char> = storage
            .iter()
            .map(|line| line.as_ptr() as *mut c_char)
            .collect();
        pointers.push(std::ptr::null_mut());

        let ret = unsafe { ng_circ(pointers.as_mut_ptr()) };
        if ret != 0 {
            return Err(SpiceError::CommandFailed(
                "circuit load rejected by engine".into(),
            ));
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        if self.handle.is_none() {
            return false;
        }
        match self.ng_running {
            Some(ng_running) => unsafe { ng_running() },
            None => false,
        }
    }
}

impl Drop for NgspiceEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Embedded quit can crash some library builds during teardown;
            // halt the background thread and reset instead.
            if self.raw_command("bg_halt").is_err() {
                warn!("engine halt command failed during teardown");
            }
            if let Some(ng_running) = self.ng_running {
                for _ in 0..50 {
                    if !unsafe { ng_running() } {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
            let _ = self.raw_command("reset");
            registry::unregister(handle);
        }
    }
}
