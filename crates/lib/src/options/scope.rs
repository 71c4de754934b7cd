use std::fmt;

use serde::Serialize;

/// Display name of the root scope.
pub const GLOBAL_SCOPE: &str = "GLOBAL";

/// A hierarchical, `.`-separated namespace for options.
///
/// The empty name is the global scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Scope(String);

impl Scope {
  /// `""` and `"GLOBAL"` both name the global scope.
  pub fn new(name: impl Into<String>) -> Self {
    let name = name.into();
    if name == GLOBAL_SCOPE {
      Self::global()
    } else {
      Self(name)
    }
  }

  pub fn global() -> Self {
    Self(String::new())
  }

  pub fn is_global(&self) -> bool {
    self.0.is_empty()
  }

  pub fn name(&self) -> &str {
    &self.0
  }

  /// The enclosing scope; `None` for the global scope.
  pub fn parent(&self) -> Option<Scope> {
    if self.is_global() {
      return None;
    }
    match self.0.rsplit_once('.') {
      Some((parent, _)) => Some(Scope(parent.to_string())),
      None => Some(Scope::global()),
    }
  }

  /// Command-line flag for `option` in this scope, e.g. `--python-setup-platforms`.
  pub fn flag(&self, option: &str) -> String {
    if self.is_global() {
      format!("--{option}")
    } else {
      format!("--{}-{option}", self.0.replace('.', "-"))
    }
  }

  /// Environment variable for `option` in this scope, e.g. `KILN_PYTHON_SETUP_PLATFORMS`.
  pub fn env_var(&self, prefix: &str, option: &str) -> String {
    let raw = if self.is_global() {
      format!("{prefix}_{option}")
    } else {
      format!("{prefix}_{}_{option}", self.0)
    };
    raw.replace(['-', '.'], "_").to_ascii_uppercase()
  }

  /// Path of the config table holding this scope's options.
  pub fn config_path(&self) -> Vec<&str> {
    if self.is_global() {
      vec![GLOBAL_SCOPE]
    } else {
      self.0.split('.').collect()
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_global() {
      f.write_str(GLOBAL_SCOPE)
    } else {
      f.write_str(&self.0)
    }
  }
}
