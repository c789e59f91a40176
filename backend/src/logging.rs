//! Tracing subscriber setup.
//!
//! Console output is always enabled. When a log file is configured, a second
//! non-blocking layer writes plain (no ANSI) lines to that file.

use anyhow::{anyhow, Context};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Level used when neither the configuration nor `RUST_LOG` set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Build the filter: an explicit level wins, then `RUST_LOG`, then `info`.
pub fn build_filter(log_level: Option<&str>) -> anyhow::Result<EnvFilter> {
    match log_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level directive: {level}")),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))),
    }
}

/// Install the global subscriber.
///
/// The returned guard must be held for the lifetime of the process when a log
/// file is configured, otherwise buffered lines are lost on exit.
pub fn init_logging(
    log_level: Option<&str>,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = build_filter(log_level)?;

    let console_layer = fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::new(Rfc3339))
        .compact()
        .boxed();

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(UtcTime::new(Rfc3339))
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    if let Some(path) = log_file {
        tracing::info!("Logging to file {}", path.display());
    }

    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_is_used() {
        let filter = build_filter(Some("debug")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_module_directive_is_accepted() {
        let filter = build_filter(Some("mcp_sendmail=trace,info")).unwrap();
        assert!(filter.to_string().contains("mcp_sendmail=trace"));
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(build_filter(Some("mcp_sendmail=loud")).is_err());
    }

    #[test]
    fn test_file_writer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.log");

        let (_writer, _guard) = file_writer(&path).unwrap();

        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_file_writer_rejects_directory_path() {
        assert!(file_writer(Path::new("/")).is_err());
    }
}
