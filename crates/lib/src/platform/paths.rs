use crate::consts::{APP_NAME, ENV_PREFIX};
use std::path::PathBuf;

/// Returns the user's home directory, if one is set.
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory, if one is set.
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  std::env::var_os("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".config")))
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
    .join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  std::env::var_os("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|h| h.join(".cache")))
    .unwrap_or_else(std::env::temp_dir)
    .join(APP_NAME)
}

/// Returns the root of the digest store.
///
/// `$KILN_STORE` wins when set and non-empty, otherwise `<cache_dir>/store`.
pub fn store_dir() -> PathBuf {
  let var = format!("{ENV_PREFIX}_STORE");
  match std::env::var_os(&var) {
    Some(dir) if !dir.is_empty() => PathBuf::from(dir),
    _ => cache_dir().join("store"),
  }
}
