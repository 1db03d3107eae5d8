//! Tracing setup. Logs go to a daily rolling file so command output stays
//! readable; `RUST_LOG` overrides the configured level.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "hrsync.log";

/// Directory for log files: the configured one, else the data directory.
pub fn log_directory(config: &LoggingConfig) -> Result<PathBuf> {
  if let Some(dir) = &config.directory {
    return Ok(dir.clone());
  }
  dirs::data_dir()
    .map(|dir| dir.join("hrsync").join("logs"))
    .ok_or_else(|| eyre!("Could not determine data directory for logs"))
}

fn filter(level: &str) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole run, otherwise buffered lines are lost on exit.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
  let directory = log_directory(config)?;
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(&directory, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  fmt()
    .with_env_filter(filter(&config.level))
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
