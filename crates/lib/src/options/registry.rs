//! Declared options.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::options::error::OptionsError;
use crate::options::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
  Bool,
  Int,
  Str,
  List,
}

/// A resolved option value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
  Bool(bool),
  Int(i64),
  Str(String),
  List(Vec<String>),
}

impl OptionValue {
  pub fn kind(&self) -> OptionKind {
    match self {
      OptionValue::Bool(_) => OptionKind::Bool,
      OptionValue::Int(_) => OptionKind::Int,
      OptionValue::Str(_) => OptionKind::Str,
      OptionValue::List(_) => OptionKind::List,
    }
  }
}

impl fmt::Display for OptionValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OptionValue::Bool(b) => write!(f, "{b}"),
      OptionValue::Int(i) => write!(f, "{i}"),
      OptionValue::Str(s) => write!(f, "{s}"),
      OptionValue::List(items) => {
        let quoted: Vec<String> = items.iter().map(|i| format!("{i:?}")).collect();
        write!(f, "[{}]", quoted.join(", "))
      }
    }
  }
}

/// Declaration of a single option.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OptionSpec {
  /// Dashed name, e.g. `build-ignore`.
  pub name: String,
  pub default: OptionValue,
  /// Single-letter flag, e.g. `l` for `-ldebug`.
  pub short: Option<char>,
  pub help: String,
}

impl OptionSpec {
  fn new(name: impl Into<String>, default: OptionValue) -> Self {
    Self {
      name: name.into(),
      default,
      short: None,
      help: String::new(),
    }
  }

  pub fn bool(name: impl Into<String>, default: bool) -> Self {
    Self::new(name, OptionValue::Bool(default))
  }

  pub fn int(name: impl Into<String>, default: i64) -> Self {
    Self::new(name, OptionValue::Int(default))
  }

  pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
    Self::new(name, OptionValue::Str(default.into()))
  }

  pub fn list<I, S>(name: impl Into<String>, default: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self::new(name, OptionValue::List(default.into_iter().map(Into::into).collect()))
  }

  pub fn short(mut self, short: char) -> Self {
    self.short = Some(short);
    self
  }

  pub fn help(mut self, help: impl Into<String>) -> Self {
    self.help = help.into();
    self
  }

  pub fn kind(&self) -> OptionKind {
    self.default.kind()
  }
}

/// All declared options, by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OptionRegistry {
  scopes: BTreeMap<Scope, BTreeMap<String, OptionSpec>>,
}

impl OptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Options every kiln invocation understands.
  pub fn standard() -> Self {
    let global = Scope::global();
    let process = Scope::new("process");
    let mut registry = Self::new();
    let specs = [
      (&global, OptionSpec::string("level", "info").short('l').help("Log level.")),
      (&global, OptionSpec::bool("colors", true).help("Colorize output.")),
      (&global, OptionSpec::bool("process-cache", false).help("Reuse results of identical processes.")),
      (&global, OptionSpec::list("build-ignore", Vec::<String>::new()).help("Paths to ignore.")),
      (&process, OptionSpec::int("timeout-secs", 0).help("Default process timeout; 0 disables it.")),
      (&process, OptionSpec::bool("keep-sandboxes", false).help("Leave sandboxes on disk.")),
    ];
    for (scope, spec) in specs {
      // Names above are unique, so registration cannot fail.
      let _ = registry.register(scope.clone(), spec);
    }
    registry
  }

  pub fn register(&mut self, scope: Scope, spec: OptionSpec) -> Result<(), OptionsError> {
    let options = self.scopes.entry(scope.clone()).or_default();
    if options.contains_key(&spec.name) {
      return Err(OptionsError::Duplicate {
        scope: scope.to_string(),
        option: spec.name,
      });
    }
    options.insert(spec.name.clone(), spec);
    Ok(())
  }

  /// Chainable [`register`](Self::register).
  pub fn with(mut self, scope: Scope, spec: OptionSpec) -> Result<Self, OptionsError> {
    self.register(scope, spec)?;
    Ok(self)
  }

  pub fn scope(&self, scope: &Scope) -> Option<&BTreeMap<String, OptionSpec>> {
    self.scopes.get(scope)
  }

  pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
    self.scopes.keys()
  }

  /// The option a long flag (without any `=value`) refers to.
  pub(crate) fn find_flag(&self, flag: &str) -> Option<(&Scope, &OptionSpec)> {
    self.iter().find(|(scope, spec)| scope.flag(&spec.name) == flag)
  }

  pub(crate) fn find_short(&self, short: char) -> Option<(&Scope, &OptionSpec)> {
    self.iter().find(|(_, spec)| spec.short == Some(short))
  }

  fn iter(&self) -> impl Iterator<Item = (&Scope, &OptionSpec)> {
    self
      .scopes
      .iter()
      .flat_map(|(scope, options)| options.values().map(move |spec| (scope, spec)))
  }
}
