//! Engine configuration.
//!
//! Resolved once at startup and shared read-only by the scheduler and the
//! process executor.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::platform::paths::store_dir;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("invalid value {value:?} for {var}: {message}")]
  InvalidEnv {
    var: String,
    value: String,
    message: String,
  },
}

/// Configuration for the scheduler and process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// Root of the on-disk digest store.
  pub store_dir: PathBuf,

  /// Maximum number of processes to run in parallel.
  pub parallelism: usize,

  /// Cache successful process results keyed by request content.
  pub process_cache: bool,

  /// Leave sandboxes on disk after execution (for debugging).
  pub keep_sandboxes: bool,

  /// Timeout applied to processes whose request does not set one.
  pub default_timeout: Option<Duration>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      store_dir: store_dir(),
      parallelism: num_cpus(),
      process_cache: false,
      keep_sandboxes: false,
      default_timeout: None,
    }
  }
}

impl EngineConfig {
  /// Defaults overridden by `KILN_*` environment variables.
  ///
  /// - `KILN_STORE`: store directory (see [`store_dir`])
  /// - `KILN_PARALLELISM`: positive integer
  /// - `KILN_PROCESS_CACHE`: boolean
  /// - `KILN_KEEP_SANDBOXES`: boolean
  /// - `KILN_PROCESS_TIMEOUT_SECS`: positive integer
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(value) = env_var("KILN_PARALLELISM") {
      config.parallelism = parse_positive("KILN_PARALLELISM", &value)?;
    }
    if let Some(value) = env_var("KILN_PROCESS_CACHE") {
      config.process_cache = parse_bool("KILN_PROCESS_CACHE", &value)?;
    }
    if let Some(value) = env_var("KILN_KEEP_SANDBOXES") {
      config.keep_sandboxes = parse_bool("KILN_KEEP_SANDBOXES", &value)?;
    }
    if let Some(value) = env_var("KILN_PROCESS_TIMEOUT_SECS") {
      let secs = parse_positive("KILN_PROCESS_TIMEOUT_SECS", &value)?;
      config.default_timeout = Some(Duration::from_secs(secs as u64));
    }

    Ok(config)
  }

  pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.store_dir = dir.into();
    self
  }
}

fn env_var(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_positive(var: &str, value: &str) -> Result<usize, ConfigError> {
  match value.trim().parse::<usize>() {
    Ok(n) if n > 0 => Ok(n),
    Ok(_) => Err(invalid(var, value, "must be greater than zero")),
    Err(e) => Err(invalid(var, value, &e.to_string())),
  }
}

pub(crate) fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
  match value.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err(invalid(var, value, "expected a boolean")),
  }
}

fn invalid(var: &str, value: &str, message: &str) -> ConfigError {
  ConfigError::InvalidEnv {
    var: var.to_string(),
    value: value.to_string(),
    message: message.to_string(),
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
