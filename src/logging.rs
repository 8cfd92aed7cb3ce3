//! Tracing setup: stderr plus a plain-text log file.

use std::fs::File;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::StartupError;

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter. The log file is truncated first and written from a background
/// thread.
///
/// Keep the returned guard alive until exit; dropping it flushes the file.
pub fn init(log_path: &Path) -> Result<WorkerGuard, StartupError> {
    let (file_writer, guard) = file_writer(log_path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|e| StartupError::Logging(e.to_string()))?;
    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), StartupError> {
    Ok(tracing_appender::non_blocking(open_log_file(path)?))
}

fn open_log_file(path: &Path) -> Result<File, StartupError> {
    File::create(path).map_err(|e| StartupError::Logging(format!("{}: {}", path.display(), e)))
}
