//! End-to-end demo: normalize an interactive deck, stream it through a
//! scripted engine, and mirror the samples to CSV.
//!
//! The engine here is a stand-in that synthesizes an RC step response on its
//! own background thread, over the same callback contract libngspice uses,
//! so the demo runs anywhere without the shared library installed.
//!
//! Run with: `cargo run --example live_stream`

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spicestream::{
    EngineEvents, SessionEvent, SpiceEngine, StreamConfig, StreamSession, normalize_deck,
};

struct ScriptedEngine {
    events: Option<Arc<dyn EngineEvents>>,
    running: Arc<AtomicBool>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self {
            events: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SpiceEngine for ScriptedEngine {
    fn init(&mut self, events: Arc<dyn EngineEvents>) -> spicestream::Result<()> {
        self.events = Some(events);
        Ok(())
    }

    fn command(&mut self, command: &str) -> spicestream::Result<()> {
        if let Some(args) = command.strip_prefix("bg_tran ") {
            let mut parts = args.split_whitespace();
            let step: f64 = parts.next().and_then(|t| t.parse().ok()).unwrap_or(1e-9);
            let window: f64 = parts.next().and_then(|t| t.parse().ok()).unwrap_or(1e-6);

            let events = self.events.clone().expect("engine initialized");
            let running = Arc::clone(&self.running);
            running.store(true, Ordering::Release);

            thread::spawn(move || {
                events.metadata(&[
                    "time".to_string(),
                    "v(in)".to_string(),
                    "v(out)".to_string(),
                ]);

                let tau = window / 10.0;
                let mut vout = 0.0;
                let total = (window / step) as u64;
                for i in 0..=total {
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let t = i as f64 * step;
                    // Square-wave input, first-order RC response.
                    let vin = if (t / (window / 4.0)) as u64 % 2 == 0 { 1.8 } else { 0.0 };
                    vout += (vin - vout) * (step / tau);
                    events.data(&[t, vin, vout]);
                    thread::sleep(Duration::from_micros(100));
                }
                running.store(false, Ordering::Release);
            });
        } else if command == "bg_halt" {
            self.running.store(false, Ordering::Release);
        }
        Ok(())
    }

    fn load_circuit(&mut self, lines: &[String]) -> spicestream::Result<()> {
        println!("engine received {} deck lines", lines.len());
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn main() -> spicestream::Result<()> {
    tracing_subscriber::fmt::init();

    let raw: Vec<String> = [
        "* rc demo deck",
        ".include \"$PDK_ROOT/models.inc\"",
        "V1 in 0 PULSE(0 1.8 0",
        "+ 1n 1n 5n 10n)",
        "R1 in out 1k",
        "C1 out 0 1p",
        ".control",
        "tran 0.1n 20n",
        "wrdata out.csv v(in) v(out)",
        ".endc",
    ]
    .iter()
    .map(|l| l.to_string())
    .collect();

    let deck = normalize_deck(&raw, Path::new("/tmp"), "/pdk");
    println!("normalized deck:\n{}", deck.to_text());

    let session = StreamSession::new(Box::new(ScriptedEngine::new()))?;
    session.load_deck(&deck)?;
    session.configure_export(Path::new("demo_export.csv"), Some(&["v(out)"]))?;

    let events = session.subscribe();
    let mut config = StreamConfig::new(1e-10, 2e-8);
    config.frame_stride = 50;
    session.start(config)?;

    for event in events.iter() {
        match event {
            SessionEvent::Frame { time, samples, .. } => {
                println!("frame: t={time:.3e}s samples={samples}");
            }
            SessionEvent::ExportError(message) => {
                eprintln!("export failed: {message}");
            }
            SessionEvent::Stopped => break,
            _ => {}
        }
    }

    let tail = session.snapshot();
    println!(
        "buffered {} samples; last v(out) = {:.4}",
        tail.len(),
        tail.last().map(|s| s.values[2]).unwrap_or(0.0)
    );
    session.stop();
    Ok(())
}
