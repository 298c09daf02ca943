//! CSV export sink
//!
//! Append-only mirror of the sample stream: one `time,signal,value` row per
//! non-time signal. A monotonic watermark drops duplicate or out-of-order
//! timestamps so the file never needs rewriting. Values use a 17-significant-
//! digit format, enough to round-trip a double.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Result, SpiceError};

/// Stable high-precision decimal text for a sample value.
pub fn format_value(value: f64) -> String {
    format!("{value:.16e}")
}

/// Append-only CSV writer with watermark de-duplication.
///
/// All failures are returned synchronously; a write failure additionally
/// disables the sink so one bad disk does not fail every following sample.
#[derive(Debug, Default)]
pub struct CsvSink {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    watermark: f64,
}

impl CsvSink {
    pub fn new() -> Self {
        Self {
            writer: None,
            path: None,
            watermark: f64::NEG_INFINITY,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open (truncating) the target file, creating parent directories as
    /// needed, write the header row, and reset the watermark.
    pub fn configure(&mut self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(SpiceError::InvalidConfig("empty export path".into()));
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(b"time,signal,value\n")?;
        writer.flush()?;

        debug!(path = %path.display(), "export sink configured");
        self.writer = Some(writer);
        self.path = Some(path.to_path_buf());
        self.watermark = f64::NEG_INFINITY;
        Ok(())
    }

    /// Mirror one sample: a row per non-time signal, provided `time` is
    /// strictly beyond the watermark. `columns` restricts which indices are
    /// written. On failure the sink disables itself and returns the error.
    pub fn append(
        &mut self,
        time: f64,
        values: &[f64],
        names: &[String],
        columns: Option<&[usize]>,
    ) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if !(time > self.watermark) {
            return Ok(());
        }

        let all: Vec<usize>;
        let selected: &[usize] = match columns {
            Some(indices) => indices,
            None => {
                all = (0..names.len()).collect();
                &all
            }
        };

        let mut wrote = false;
        let result: std::io::Result<()> = (|| {
            for &index in selected {
                let (Some(name), Some(value)) = (names.get(index), values.get(index)) else {
                    continue;
                };
                if name.eq_ignore_ascii_case("time") {
                    continue;
                }
                writeln!(
                    writer,
                    "{},{},{}",
                    format_value(time),
                    name,
                    format_value(*value)
                )?;
                wrote = true;
            }
            writer.flush()
        })();

        match result {
            Ok(()) => {
                if wrote {
                    self.watermark = time;
                }
                Ok(())
            }
            Err(err) => {
                warn!(%err, "export write failed; disabling sink");
                self.disable();
                Err(err)
            }
        }
    }

    /// Close the file handle and clear watermark state. Idempotent.
    pub fn disable(&mut self) {
        self.writer = None;
        self.path = None;
        self.watermark = f64::NEG_INFINITY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn watermark_drops_duplicate_and_stale_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new();
        sink.configure(&path).unwrap();

        let cols = names(&["time", "v(out)"]);
        sink.append(1.0, &[1.0, 0.5], &cols, None).unwrap();
        sink.append(1.0, &[1.0, 0.6], &cols, None).unwrap();
        sink.append(0.5, &[0.5, 0.7], &cols, None).unwrap();
        sink.append(2.0, &[2.0, 0.9], &cols, None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "time,signal,value");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with(&format_value(1.0)));
        assert!(lines[2].starts_with(&format_value(2.0)));
    }

    #[test]
    fn one_row_per_non_time_signal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new();
        sink.configure(&path).unwrap();

        let cols = names(&["time", "v(in)", "v(out)"]);
        sink.append(1e-9, &[1e-9, 1.8, 0.4], &cols, None).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(",v(in),"));
        assert!(lines[2].contains(",v(out),"));
    }

    #[test]
    fn column_filter_restricts_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new();
        sink.configure(&path).unwrap();

        let cols = names(&["time", "v(in)", "v(out)"]);
        sink.append(1.0, &[1.0, 1.8, 0.4], &cols, Some(&[2])).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(",v(out),"));
    }

    #[test]
    fn values_round_trip_through_the_text_format() {
        let third = 1.0_f64 / 3.0;
        let text = format_value(third);
        assert_eq!(text.parse::<f64>().unwrap(), third);
    }

    #[test]
    fn parent_directories_are_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs/latest/out.csv");
        let mut sink = CsvSink::new();
        sink.configure(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut sink = CsvSink::new();
        assert!(matches!(
            sink.configure(Path::new("")),
            Err(SpiceError::InvalidConfig(_))
        ));
        assert!(!sink.is_enabled());
    }

    #[test]
    fn disable_is_idempotent_and_appends_become_noops() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut sink = CsvSink::new();
        sink.configure(&path).unwrap();
        sink.disable();
        sink.disable();
        assert!(!sink.is_enabled());
        sink.append(1.0, &[1.0], &names(&["v(a)"]), None).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "time,signal,value\n");
    }
}
