//! Continuous streaming session
//!
//! Drives the engine's background transient run and fans every delivered
//! sample out to the ring buffer, the CSV sink and the event hub. One
//! long-lived driver thread per active session issues the brief engine
//! commands and polls for completion; the engine delivers samples through
//! [`EngineEvents`] callbacks on whatever thread it likes. Every piece of
//! shared state sits behind its own narrow lock, and no lock is held across
//! an engine call except the single command gate.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use super::catalog::SignalCatalog;
use super::csv_sink::CsvSink;
use super::events::{EventHub, SessionEvent};
use super::ring::{SampleRing, TimedSample};
use crate::engine::{EngineEvents, SpiceEngine};
use crate::netlist::NormalizedDeck;
use crate::{Result, SpiceError};

/// Default ring capacity when none is configured.
pub const DEFAULT_RING_CAPACITY: usize = 100_000;
/// Default sample stride between progress frames.
pub const DEFAULT_FRAME_STRIDE: u64 = 64;

const POLL_INTERVAL: Duration = Duration::from_millis(30);
// Polls granted for the engine's background thread to report in before a
// silent engine is treated as already finished.
const STARTUP_GRACE_POLLS: u32 = 100;

/// Parameters for one streaming run.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Transient step size in seconds.
    pub step: f64,
    /// Streaming window (stop time) in seconds. Must exceed `step`.
    pub window: f64,
    /// Emit a `Frame` event every this many samples. 0 disables frames.
    pub frame_stride: u64,
}

impl StreamConfig {
    pub fn new(step: f64, window: f64) -> Self {
        Self {
            step,
            window,
            frame_stride: DEFAULT_FRAME_STRIDE,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.step > 0.0) || !self.step.is_finite() {
            return Err(SpiceError::InvalidConfig(
                "step size must be strictly positive".into(),
            ));
        }
        if !(self.window > 0.0) || !self.window.is_finite() {
            return Err(SpiceError::InvalidConfig(
                "streaming window must be strictly positive".into(),
            ));
        }
        if self.window <= self.step {
            return Err(SpiceError::InvalidConfig(
                "streaming window must exceed the step size".into(),
            ));
        }
        Ok(())
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// A name-based column subset, re-resolved against each run's catalog.
#[derive(Debug, Default)]
struct NameFilter {
    requested: Option<Vec<String>>,
    resolved: Option<Vec<usize>>,
}

impl NameFilter {
    fn set(&mut self, requested: Option<Vec<String>>, catalog: &SignalCatalog) {
        self.requested = requested;
        self.resolve(catalog);
    }

    fn resolve(&mut self, catalog: &SignalCatalog) {
        self.resolved = self
            .requested
            .as_ref()
            .map(|names| catalog.resolve(names));
    }
}

// Lock order where several are needed:
// catalog → buffer_filter → export_filter → ring → sink.
// The engine gate is only ever taken on the control plane and the driver,
// never on the callback path.
struct Shared {
    engine: Mutex<Box<dyn SpiceEngine>>,
    catalog: Mutex<SignalCatalog>,
    buffer_filter: Mutex<NameFilter>,
    export_filter: Mutex<NameFilter>,
    ring: Mutex<SampleRing>,
    sink: Mutex<CsvSink>,
    sources: Mutex<HashMap<String, f64>>,
    config: Mutex<StreamConfig>,
    state: Mutex<SessionState>,
    last_time: Mutex<Option<f64>>,
    hub: EventHub,
    stop: AtomicBool,
    paused: AtomicBool,
    ingest_open: AtomicBool,
    export_enabled: AtomicBool,
    export_fault_reported: AtomicBool,
    samples: AtomicU64,
}

/// Callback sink handed to the engine; ingestion happens here, on whichever
/// thread the engine calls from.
struct SessionSink {
    shared: Arc<Shared>,
}

impl EngineEvents for SessionSink {
    fn output_line(&self, line: &str) {
        debug!(target: "spicestream::engine", "{line}");
        self.shared
            .hub
            .publish(SessionEvent::OutputLine(line.to_string()));
    }

    fn exit_requested(&self, status: i32) {
        warn!(status, "engine requested exit");
    }

    fn metadata(&self, names: &[String]) {
        let catalog = SignalCatalog::from_names(names);
        info!(vectors = catalog.len(), "run vector metadata received");

        let mut current = self.shared.catalog.lock().unwrap();
        self.shared
            .buffer_filter
            .lock()
            .unwrap()
            .resolve(&catalog);
        self.shared
            .export_filter
            .lock()
            .unwrap()
            .resolve(&catalog);
        // Indices from the previous run are invalid; drop its samples too.
        self.shared.ring.lock().unwrap().clear();
        *current = catalog;
        drop(current);

        self.shared.samples.store(0, Ordering::Release);
        *self.shared.last_time.lock().unwrap() = None;
    }

    fn data(&self, values: &[f64]) {
        let shared = &self.shared;
        if !shared.ingest_open.load(Ordering::Acquire) {
            return;
        }

        let (step, window, stride) = {
            let config = shared.config.lock().unwrap();
            (config.step, config.window, config.frame_stride)
        };

        // Timestamp: the catalog's time column when known, else the last
        // known timestamp advanced by one step.
        let reported = {
            let catalog = shared.catalog.lock().unwrap();
            catalog.time_index().and_then(|i| values.get(i).copied())
        };
        let time = {
            let mut last = shared.last_time.lock().unwrap();
            let time = match reported {
                Some(t) => t,
                None => last.map_or(0.0, |t| t + step),
            };
            *last = Some(time);
            time
        };

        {
            let filter = shared.buffer_filter.lock().unwrap();
            let row = match &filter.resolved {
                Some(indices) => indices
                    .iter()
                    .filter_map(|&i| values.get(i).copied())
                    .collect(),
                None => values.to_vec(),
            };
            drop(filter);
            shared.ring.lock().unwrap().push(TimedSample::new(time, row));
        }

        if shared.export_enabled.load(Ordering::Acquire) {
            let catalog = shared.catalog.lock().unwrap();
            let filter = shared.export_filter.lock().unwrap();
            let mut sink = shared.sink.lock().unwrap();
            if let Err(err) =
                sink.append(time, values, catalog.names(), filter.resolved.as_deref())
            {
                drop(sink);
                drop(filter);
                drop(catalog);
                // Degraded but non-fatal: buffering continues, one notice.
                shared.export_enabled.store(false, Ordering::Release);
                if !shared.export_fault_reported.swap(true, Ordering::AcqRel) {
                    shared
                        .hub
                        .publish(SessionEvent::ExportError(err.to_string()));
                }
            }
        }

        let count = shared.samples.fetch_add(1, Ordering::AcqRel) + 1;
        if stride > 0 && count % stride == 0 {
            shared.hub.publish(SessionEvent::Frame {
                time,
                samples: count,
                step,
                window,
            });
        }
    }

    fn background_state(&self, running: bool) {
        debug!(running, "engine background thread state");
    }

    fn source_value(&self, name: &str) -> f64 {
        self.shared
            .sources
            .lock()
            .unwrap()
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(0.0)
    }
}

/// Orchestrates one engine instance: deck loading, the background run, the
/// bounded sample buffer, CSV mirroring and the event surface.
pub struct StreamSession {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Wrap an engine adapter and register the session's callback sink.
    pub fn new(engine: Box<dyn SpiceEngine>) -> Result<Self> {
        let shared = Arc::new(Shared {
            engine: Mutex::new(engine),
            catalog: Mutex::new(SignalCatalog::default()),
            buffer_filter: Mutex::new(NameFilter::default()),
            export_filter: Mutex::new(NameFilter::default()),
            ring: Mutex::new(SampleRing::new(DEFAULT_RING_CAPACITY)),
            sink: Mutex::new(CsvSink::new()),
            sources: Mutex::new(HashMap::new()),
            config: Mutex::new(StreamConfig::new(1e-9, 1e-6)),
            state: Mutex::new(SessionState::Idle),
            last_time: Mutex::new(None),
            hub: EventHub::new(),
            stop: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            ingest_open: AtomicBool::new(false),
            export_enabled: AtomicBool::new(false),
            export_fault_reported: AtomicBool::new(false),
            samples: AtomicU64::new(0),
        });

        let sink: Arc<dyn EngineEvents> = Arc::new(SessionSink {
            shared: Arc::clone(&shared),
        });
        shared.engine.lock().unwrap().init(sink)?;

        Ok(Self {
            shared,
            driver: Mutex::new(None),
        })
    }

    /// Subscribe to the session's event stream.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.shared.hub.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn sample_count(&self) -> u64 {
        self.shared.samples.load(Ordering::Acquire)
    }

    /// Load a normalized deck into the engine.
    pub fn load_deck(&self, deck: &NormalizedDeck) -> Result<()> {
        self.load_circuit(&deck.lines)
    }

    /// Load raw circuit lines into the engine.
    pub fn load_circuit(&self, lines: &[String]) -> Result<()> {
        self.shared.engine.lock().unwrap().load_circuit(lines)
    }

    /// Begin streaming. Any active run is fully stopped and joined first.
    /// Parameters are validated before any thread is spawned; a failing
    /// setup command is returned here with the session back at `Idle`.
    pub fn start(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        self.stop();

        let shared = &self.shared;
        shared.stop.store(false, Ordering::Release);
        shared.paused.store(false, Ordering::Release);
        shared.ingest_open.store(true, Ordering::Release);
        shared.export_fault_reported.store(false, Ordering::Release);
        shared.samples.store(0, Ordering::Release);
        *shared.last_time.lock().unwrap() = None;
        *shared.config.lock().unwrap() = config;
        *shared.state.lock().unwrap() = SessionState::Running;

        let (setup_tx, setup_rx) = mpsc::channel();
        let worker = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("spicestream-driver".into())
            .spawn(move || driver_main(worker, config, setup_tx))
            .map_err(SpiceError::Io)?;

        match setup_rx.recv() {
            Ok(Ok(())) => {
                *self.driver.lock().unwrap() = Some(handle);
                shared.hub.publish(SessionEvent::Started);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                shared.ingest_open.store(false, Ordering::Release);
                *shared.state.lock().unwrap() = SessionState::Idle;
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                shared.ingest_open.store(false, Ordering::Release);
                *shared.state.lock().unwrap() = SessionState::Idle;
                Err(SpiceError::CommandFailed("driver setup aborted".into()))
            }
        }
    }

    /// Request a stop and block until the driver thread has joined.
    /// Idempotent; after it returns no further samples, export writes or
    /// frame events occur for this run.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == SessionState::Running {
                *state = SessionState::Stopping;
            }
        }
        self.shared.stop.store(true, Ordering::Release);

        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("driver thread panicked");
        }

        self.shared.ingest_open.store(false, Ordering::Release);
        let mut state = self.shared.state.lock().unwrap();
        if *state != SessionState::Stopped {
            *state = SessionState::Idle;
        }
    }

    /// Halt the engine without ending the session; `resume` continues.
    pub fn pause(&self) -> Result<()> {
        // Flag first, so the driver never mistakes the halt for completion.
        self.shared.paused.store(true, Ordering::Release);
        let result = self.shared.engine.lock().unwrap().command("bg_halt");
        if result.is_err() {
            self.shared.paused.store(false, Ordering::Release);
        }
        result
    }

    /// Resume a paused run.
    pub fn resume(&self) -> Result<()> {
        self.shared.engine.lock().unwrap().command("bg_resume")?;
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Tear the session down for good: stop, drop buffered samples, close
    /// the export sink. The state becomes terminal `Stopped`.
    pub fn shutdown(&self) {
        self.stop();
        self.shared.ring.lock().unwrap().clear();
        self.shared.sink.lock().unwrap().disable();
        self.shared.export_enabled.store(false, Ordering::Release);
        *self.shared.state.lock().unwrap() = SessionState::Stopped;
    }

    /// All buffered samples, oldest first.
    pub fn snapshot(&self) -> Vec<TimedSample> {
        self.shared.ring.lock().unwrap().snapshot()
    }

    /// Remove and return up to `n` oldest buffered samples.
    pub fn drain(&self, n: usize) -> Vec<TimedSample> {
        self.shared.ring.lock().unwrap().pop_front(n)
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.ring.lock().unwrap().len()
    }

    /// Resize the ring. Clears buffered samples.
    pub fn set_ring_capacity(&self, capacity: usize) {
        self.shared.ring.lock().unwrap().set_capacity(capacity);
    }

    /// Restrict buffering to the named signals (case-insensitive; unknown
    /// names are ignored). `None` buffers every column. Clears the ring:
    /// the row shape must not change mid-buffer.
    pub fn set_buffer_filter(&self, names: Option<&[&str]>) {
        let requested = names.map(|list| list.iter().map(|s| s.to_string()).collect());
        let catalog = self.shared.catalog.lock().unwrap();
        self.shared
            .buffer_filter
            .lock()
            .unwrap()
            .set(requested, &catalog);
        drop(catalog);
        self.shared.ring.lock().unwrap().clear();
    }

    /// Mirror samples to a CSV file, optionally restricted to the named
    /// signals. Fails synchronously on filesystem errors, leaving export
    /// disabled.
    pub fn configure_export(&self, path: &Path, names: Option<&[&str]>) -> Result<()> {
        let requested = names.map(|list| list.iter().map(|s| s.to_string()).collect());
        {
            let catalog = self.shared.catalog.lock().unwrap();
            self.shared
                .export_filter
                .lock()
                .unwrap()
                .set(requested, &catalog);
            self.shared.sink.lock().unwrap().configure(path)?;
        }
        self.shared.export_fault_reported.store(false, Ordering::Release);
        self.shared.export_enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop mirroring samples. Buffering is unaffected.
    pub fn disable_export(&self) {
        self.shared.export_enabled.store(false, Ordering::Release);
        self.shared.sink.lock().unwrap().disable();
    }

    /// Set the value the engine reads for a caller-controlled source.
    pub fn set_source_value(&self, name: &str, value: f64) {
        self.shared
            .sources
            .lock()
            .unwrap()
            .insert(name.to_ascii_lowercase(), value);
    }

    pub fn source_value(&self, name: &str) -> f64 {
        self.shared
            .sources
            .lock()
            .unwrap()
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(0.0)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn driver_main(
    shared: Arc<Shared>,
    config: StreamConfig,
    setup: mpsc::Sender<Result<()>>,
) {
    // The run command returns once the background thread is launched; the
    // gate is held only for its brief issuance, never for the run itself.
    let run_command = format!("bg_tran {:e} {:e}", config.step, config.window);
    let setup_result = shared.engine.lock().unwrap().command(&run_command);
    let failed = setup_result.is_err();
    let _ = setup.send(setup_result);
    if failed {
        return;
    }
    info!(command = %run_command, "streaming run started");

    let mut seen_running = false;
    let mut grace = STARTUP_GRACE_POLLS;
    loop {
        if shared.stop.load(Ordering::Acquire) {
            debug!("stop flag observed");
            break;
        }
        if shared.paused.load(Ordering::Acquire) {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        let running = shared.engine.lock().unwrap().is_running();
        if running {
            seen_running = true;
        } else if seen_running {
            debug!("engine reported completion");
            break;
        } else {
            grace -= 1;
            if grace == 0 {
                warn!("engine never reported a running background thread");
                break;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    // Best-effort halt, then wait briefly for the engine to quiesce.
    {
        let mut engine = shared.engine.lock().unwrap();
        let _ = engine.command("bg_halt");
        for _ in 0..50 {
            if !engine.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    {
        let mut state = shared.state.lock().unwrap();
        if *state != SessionState::Stopped {
            *state = SessionState::Idle;
        }
    }
    shared.hub.publish(SessionEvent::Stopped);
    info!("driver thread exiting");
}
