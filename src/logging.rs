//! tracing subscriber setup for the `swrf` binary.

use color_eyre::{eyre::eyre, Result};
use std::fs::OpenOptions;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const DEFAULT_LEVEL: &str = "warn";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the config's `log_level`. With a `log_file` the
/// output is appended there through a non-blocking writer; keep the returned
/// guard alive until exit so buffered lines are flushed.
pub fn init(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().or_else(|_| {
    EnvFilter::try_new(config.log_level.as_deref().unwrap_or(DEFAULT_LEVEL))
      .map_err(|e| eyre!("Invalid log_level in config: {}", e))
  })?;

  let builder = tracing_subscriber::fmt().with_env_filter(filter);

  match &config.log_file {
    Some(path) => {
      let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      builder
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      builder
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}
