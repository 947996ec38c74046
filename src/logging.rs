//! Logging setup for the render-pacer host.
//!
//! Configures tracing with JSON output to a daily-rotated log file under
//! the platform data directory (`~/.local/share/render-pacer/` on Linux)
//! and to stderr, either as JSON or human-readable.
//!
//! The library only emits events; installing a subscriber is left to the
//! binary.

use crate::config::{LoggingConfig, APP_DIR};
use crate::error::LoggingError;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, time::UtcTime, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log file name prefix
const LOG_FILE_PREFIX: &str = "render-pacer";
/// Maximum number of log files to retain
const MAX_LOG_FILES: usize = 3;

/// Guard that keeps the non-blocking writers alive.
/// Must be held for the lifetime of the application.
pub struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
    _stderr_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Default log directory (`<data dir>/render-pacer`).
pub fn log_directory() -> Result<PathBuf, LoggingError> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(LoggingError::HomeDirectoryNotFound)
}

/// Install the global subscriber writing to [`log_directory`].
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuard, LoggingError> {
    init_logging_in(&log_directory()?, config)
}

/// Install the global subscriber writing log files into `log_dir`.
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already installed.
pub fn init_logging_in(log_dir: &Path, config: &LoggingConfig) -> Result<LogGuard, LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|e| LoggingError::DirectoryCreationFailed {
        path: log_dir.display().to_string(),
        source: e,
    })?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| LoggingError::AppenderCreationFailed(e.to_string()))?;

    let filter = build_filter(&config.level)?;

    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let stderr_json = config
        .json_stderr
        .then(|| json_layer(stderr_writer.clone()));
    let stderr_text = (!config.json_stderr).then(|| {
        fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_writer(stderr_writer)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer(file_writer))
        .with(stderr_json)
        .with(stderr_text)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInstall(e.to_string()))?;

    Ok(LogGuard {
        _file_guard: file_guard,
        _stderr_guard: stderr_guard,
    })
}

/// JSON formatting layer shared by the file and stderr outputs.
fn json_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_current_span(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(writer)
}

fn build_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => parse_filter(&directives),
        _ => parse_filter(default_level),
    }
}

fn parse_filter(directives: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directives)
        .map_err(|e| LoggingError::InvalidFilter(format!("'{}': {}", directives, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CaptureWriter {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    #[test]
    fn test_json_layer_format() {
        let capture = CaptureWriter::default();
        let subscriber = tracing_subscriber::registry().with(json_layer(capture.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(delta_ms = 400.0, "Clamped tick delta");
        });

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        let entry = &lines[0];

        // RFC 3339: date and time separated by 'T'
        let timestamp = entry["timestamp"].as_str().unwrap();
        assert!(timestamp.contains('T') && timestamp.len() >= 20);
        assert_eq!(entry["level"], "WARN");
        assert_eq!(entry["fields"]["message"], "Clamped tick delta");
        assert_eq!(entry["fields"]["delta_ms"], 400.0);
        assert!(entry["target"].as_str().unwrap().starts_with("render_pacer"));
        assert!(entry["line_number"].is_u64());
    }

    #[test]
    fn test_parse_filter() {
        assert!(parse_filter("info").is_ok());
        assert!(parse_filter("warn,render_pacer::engine=debug").is_ok());
        assert!(matches!(
            parse_filter("render_pacer=loudest"),
            Err(LoggingError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_log_directory() {
        if let Ok(dir) = log_directory() {
            assert!(dir.ends_with(APP_DIR));
        }
    }

    #[test]
    fn test_init_logging_once() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig::default();

        let guard = init_logging_in(&log_dir, &config);
        assert!(guard.is_ok());
        assert!(log_dir.is_dir());

        // A second global subscriber is refused
        assert!(matches!(
            init_logging_in(&log_dir, &config),
            Err(LoggingError::SubscriberInstall(_))
        ));
    }
}
