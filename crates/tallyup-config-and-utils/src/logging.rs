//! Logging initialization.
//!
//! Every process writes structured JSONL to `~/.tallyup/logs/session.jsonl`
//! so auth lifecycle events from the CLI and embedding apps land in one
//! stream (`tail -f ~/.tallyup/logs/session.jsonl | jq`). The level comes
//! from `RUST_LOG` when set, otherwise from the configured default.

use crate::Paths;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Append-only writer for the central log file.
/// Flushes after every write so each line lands whole.
#[derive(Clone)]
struct CentralLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl CentralLogWriter {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for CentralLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock();
        let written = guard.write(buf)?;
        guard.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for CentralLogWriter {
    type Writer = CentralLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize logging to the central log file.
///
/// Falls back to stderr-only output when the home directory or log file is
/// unavailable. Calling this twice is harmless; the second call is ignored.
pub fn init_logging(level: &str) {
    match Paths::new() {
        Ok(paths) => init_logging_with_path(level, &paths.log_file(), false),
        Err(_) => init_logging_stderr(level),
    }
}

/// Initialize logging to a specific JSONL file, optionally mirrored to stderr.
pub fn init_logging_with_path(level: &str, log_path: &Path, also_stderr: bool) {
    let writer = match CentralLogWriter::new(log_path) {
        Ok(writer) => writer,
        Err(e) => {
            init_logging_stderr(level);
            tracing::warn!(
                log_path = %log_path.display(),
                error = %e,
                "Could not open log file, logging to stderr only"
            );
            return;
        }
    };

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_writer(writer)
        .with_filter(env_filter(level));

    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(level))
    });

    if tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok()
    {
        tracing::debug!(log_path = %log_path.display(), "logging initialized");
    }
}

fn init_logging_stderr(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
