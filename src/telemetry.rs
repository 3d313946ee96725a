//! Optional JSON-lines mirror of security events.
//!
//! The database is the durable record; this sink exists so operators can
//! tail or ship events without querying the store.  Writes never fail the
//! caller: errors are counted and logged.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use crate::config::RotationConfig;

/// Size-based rotating writer keeping `keep` numbered backups.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            let size = self.file.metadata().map(|m| m.len()).unwrap_or(0);
            if size >= limit {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    /// `<path>.<n>`, or `<path>.<n>.gz` when compressing.
    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        if self.compress {
            name.push(".gz");
        }
        PathBuf::from(name)
    }

    /// Shift backups up by one, dropping the one past `keep`, then move the
    /// live file into slot 1 and start a fresh one.
    fn rotate(&mut self) -> std::io::Result<()> {
        if self.keep > 0 {
            let oldest = self.backup(self.keep);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..self.keep).rev() {
                let from = self.backup(n);
                if from.exists() {
                    fs::rename(&from, self.backup(n + 1))?;
                }
            }
            if self.compress {
                let mut gz = GzEncoder::new(Vec::new(), Compression::default());
                gz.write_all(&fs::read(&self.path)?)?;
                fs::write(self.backup(1), gz.finish()?)?;
            } else {
                fs::rename(&self.path, self.backup(1))?;
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

/// Fields echoed to stdout for a mirrored event.
pub struct EventLogFields<'a> {
    pub kind: &'a str,
    pub client: Option<&'a str>,
    pub detail: &'a str,
}

#[derive(Clone, Default)]
pub struct EventSink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    log_sample_n: Option<u64>,
    sample_counter: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl EventSink {
    pub fn new(
        writer: Option<RotatingWriter>,
        log_stdout: bool,
        log_sample_n: Option<u64>,
    ) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            log_sample_n,
            ..Self::default()
        }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open `path` if configured; a failed open disables the mirror with a
    /// warning instead of aborting boot.
    pub fn from_path(
        path: Option<&str>,
        rotation: &RotationConfig,
        log_stdout: bool,
        log_sample_n: Option<u64>,
    ) -> Self {
        let writer = path.and_then(|p| match RotatingWriter::open(p, rotation) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %p, error = %e, "failed to open LOG_FILE; event mirror disabled");
                None
            }
        });
        Self::new(writer, log_stdout, log_sample_n)
    }

    pub fn emit(&self, payload: &serde_json::Value, log: &EventLogFields<'_>) {
        let wrote = self.write_line(payload);
        if (wrote || self.writer.is_none()) && self.should_log_stdout() {
            tracing::info!(
                target: "security",
                kind = log.kind,
                client = ?log.client,
                detail = log.detail,
                "security event"
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    fn write_line(&self, payload: &serde_json::Value) -> bool {
        let Some(target) = self.writer.as_ref() else {
            return false;
        };
        let line = payload.to_string();
        if let Ok(mut guard) = target.lock() {
            match guard.write_line(&line) {
                Ok(()) => {
                    self.lines_total.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to write security event line");
                    self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        false
    }

    fn should_log_stdout(&self) -> bool {
        if !self.log_stdout {
            return false;
        }
        match self.log_sample_n {
            Some(n) => self.sample_counter.fetch_add(1, Ordering::Relaxed) % n == 0,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields() -> EventLogFields<'static> {
        EventLogFields {
            kind: "RATE_LIMIT",
            client: Some("127.0.0.1"),
            detail: "IP 127.0.0.1 blocked",
        }
    }

    #[test]
    fn writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let rotation = RotationConfig {
            max_bytes: None,
            keep: 1,
            compress: false,
        };
        let sink = EventSink::from_path(path.to_str(), &rotation, false, None);
        sink.emit(&json!({"kind": "RATE_LIMIT"}), &fields());
        sink.emit(&json!({"kind": "SQLI"}), &fields());
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(sink.lines_total(), 2);
    }

    fn rotation(max_bytes: u64, keep: usize, compress: bool) -> RotationConfig {
        RotationConfig {
            max_bytes: Some(max_bytes),
            keep,
            compress,
        }
    }

    fn with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    #[test]
    fn rotates_and_compresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = EventSink::from_path(path.to_str(), &rotation(64, 1, true), false, None);
        for i in 0..10 {
            sink.emit(&json!({"kind": "SQLI", "n": i, "pad": "xxxxxxxxxxxxxxxx"}), &fields());
        }
        assert!(with_suffix(&path, ".1.gz").exists());
        assert!(!with_suffix(&path, ".2.gz").exists());
        assert_eq!(sink.write_errors_total(), 0);
    }

    #[test]
    fn compressed_backups_shift_instead_of_overwriting() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = EventSink::from_path(path.to_str(), &rotation(64, 3, true), false, None);
        for i in 0..20 {
            sink.emit(&json!({"kind": "SQLI", "n": i, "pad": "xxxxxxxxxxxxxxxx"}), &fields());
        }
        for n in 1..=3 {
            let backup = with_suffix(&path, &format!(".{}.gz", n));
            let mut text = String::new();
            GzDecoder::new(fs::File::open(&backup).unwrap())
                .read_to_string(&mut text)
                .unwrap();
            assert!(text.contains("\"kind\":\"SQLI\""), "{}: {}", n, text);
        }
        assert!(!with_suffix(&path, ".4.gz").exists());

        // newer backups hold later events
        let first_n = |n: usize| -> i64 {
            let mut text = String::new();
            GzDecoder::new(fs::File::open(with_suffix(&path, &format!(".{}.gz", n))).unwrap())
                .read_to_string(&mut text)
                .unwrap();
            let line: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
            line["n"].as_i64().unwrap()
        };
        assert!(first_n(1) > first_n(2));
        assert!(first_n(2) > first_n(3));
    }

    #[test]
    fn plain_backups_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = EventSink::from_path(path.to_str(), &rotation(64, 2, false), false, None);
        for i in 0..12 {
            sink.emit(&json!({"kind": "SQLI", "n": i, "pad": "xxxxxxxxxxxxxxxx"}), &fields());
        }
        assert!(with_suffix(&path, ".1").exists());
        assert!(with_suffix(&path, ".2").exists());
        assert!(!with_suffix(&path, ".3").exists());
        assert_eq!(sink.lines_total(), 12);
    }

    #[test]
    fn disabled_sink_is_a_no_op() {
        let sink = EventSink::disabled();
        sink.emit(&json!({}), &fields());
        assert_eq!(sink.lines_total(), 0);
    }
}
