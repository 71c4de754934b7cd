//! Turning args, environment and config into scoped option values.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::consts::ENV_PREFIX;
use crate::options::error::OptionsError;
use crate::options::registry::{OptionKind, OptionRegistry, OptionSpec, OptionValue};
use crate::options::scope::Scope;

/// Where a resolved value came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
  Default,
  Config,
  Env,
  Flag,
}

impl fmt::Display for Rank {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Rank::Default => "default",
      Rank::Config => "config",
      Rank::Env => "env",
      Rank::Flag => "flag",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RankedValue {
  pub value: OptionValue,
  pub rank: Rank,
}

/// The options of one scope, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ScopedOptions {
  pub scope: Scope,
  pub options: BTreeMap<String, RankedValue>,
}

impl ScopedOptions {
  pub fn get(&self, name: &str) -> Option<&OptionValue> {
    self.options.get(name).map(|r| &r.value)
  }

  pub fn rank(&self, name: &str) -> Option<Rank> {
    self.options.get(name).map(|r| r.rank)
  }

  pub fn bool(&self, name: &str) -> Option<bool> {
    match self.get(name)? {
      OptionValue::Bool(b) => Some(*b),
      _ => None,
    }
  }

  pub fn int(&self, name: &str) -> Option<i64> {
    match self.get(name)? {
      OptionValue::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn str(&self, name: &str) -> Option<&str> {
    match self.get(name)? {
      OptionValue::Str(s) => Some(s),
      _ => None,
    }
  }

  pub fn list(&self, name: &str) -> Option<&[String]> {
    match self.get(name)? {
      OptionValue::List(items) => Some(items),
      _ => None,
    }
  }
}

/// Everything options are resolved from, captured once per invocation.
///
/// Equality and hashing cover the inputs (args, `KILN_*` environment
/// entries, config text and registry), so two bootstrappers built from the
/// same inputs are interchangeable as request params.
#[derive(Debug, Clone)]
pub struct OptionsBootstrapper {
  args: Vec<String>,
  env: BTreeMap<String, String>,
  config_text: Option<String>,
  registry: Arc<OptionRegistry>,
  config: toml::Table,
  flags: BTreeMap<(Scope, String), Vec<String>>,
  positional: Vec<String>,
}

impl PartialEq for OptionsBootstrapper {
  fn eq(&self, other: &Self) -> bool {
    self.args == other.args
      && self.env == other.env
      && self.config_text == other.config_text
      && self.registry == other.registry
  }
}

impl Eq for OptionsBootstrapper {}

impl Hash for OptionsBootstrapper {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.args.hash(state);
    self.env.hash(state);
    self.config_text.hash(state);
    self.registry.hash(state);
  }
}

/// Collects the inputs of an [`OptionsBootstrapper`].
#[derive(Debug, Clone)]
pub struct BootstrapperBuilder {
  registry: Arc<OptionRegistry>,
  args: Vec<String>,
  env: BTreeMap<String, String>,
  config_text: Option<String>,
}

impl BootstrapperBuilder {
  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Environment entries; anything not prefixed `KILN_` is dropped.
  pub fn env<I, K, V>(mut self, env: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    let prefix = format!("{ENV_PREFIX}_");
    self.env.extend(
      env
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .filter(|(k, _)| k.starts_with(&prefix)),
    );
    self
  }

  pub fn config_toml(mut self, text: impl Into<String>) -> Self {
    self.config_text = Some(text.into());
    self
  }

  pub fn build(self) -> Result<OptionsBootstrapper, OptionsError> {
    OptionsBootstrapper::create(self.args, self.env, self.config_text, self.registry)
  }
}

impl OptionsBootstrapper {
  pub fn builder(registry: impl Into<Arc<OptionRegistry>>) -> BootstrapperBuilder {
    BootstrapperBuilder {
      registry: registry.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      config_text: None,
    }
  }

  /// Parse and validate every input.
  ///
  /// Unknown flags and malformed config are rejected here rather than on
  /// first resolution.
  pub fn create(
    args: Vec<String>,
    env: BTreeMap<String, String>,
    config_text: Option<String>,
    registry: Arc<OptionRegistry>,
  ) -> Result<Self, OptionsError> {
    let config = match &config_text {
      Some(text) => text
        .parse::<toml::Table>()
        .map_err(|e| OptionsError::Config { message: e.to_string() })?,
      None => toml::Table::new(),
    };
    let (flags, positional) = parse_args(&args, &registry)?;
    debug!(flags = flags.len(), positional = positional.len(), "bootstrapped options");

    Ok(Self {
      args,
      env,
      config_text,
      registry,
      config,
      flags,
      positional,
    })
  }

  pub fn registry(&self) -> &OptionRegistry {
    &self.registry
  }

  /// Arguments that are not flags, in order.
  pub fn positional(&self) -> &[String] {
    &self.positional
  }

  /// Resolve every option of `scope`.
  ///
  /// Precedence, highest first: flag, `KILN_*` environment variable,
  /// config file, registered default.
  pub fn resolve(&self, scope: &Scope) -> Result<ScopedOptions, OptionsError> {
    let specs = self.registry.scope(scope).ok_or_else(|| OptionsError::UnknownScope {
      scope: scope.to_string(),
    })?;

    let mut options = BTreeMap::new();
    for (name, spec) in specs {
      let ranked = self.resolve_one(scope, spec)?;
      options.insert(name.clone(), ranked);
    }
    Ok(ScopedOptions {
      scope: scope.clone(),
      options,
    })
  }

  fn resolve_one(&self, scope: &Scope, spec: &OptionSpec) -> Result<RankedValue, OptionsError> {
    let invalid = |origin: &str, value: &str, message: String| OptionsError::InvalidValue {
      scope: scope.to_string(),
      option: spec.name.clone(),
      origin: origin.to_string(),
      value: value.to_string(),
      message,
    };

    if let Some(raw) = self.flags.get(&(scope.clone(), spec.name.clone())) {
      let value = if spec.kind() == OptionKind::List {
        let mut items = Vec::new();
        for r in raw {
          items.extend(parse_list(r).map_err(|m| invalid("flag", r, m))?);
        }
        OptionValue::List(items)
      } else {
        let last = raw.last().map(String::as_str).unwrap_or_default();
        parse_value(spec.kind(), last).map_err(|m| invalid("flag", last, m))?
      };
      return Ok(RankedValue { value, rank: Rank::Flag });
    }

    let var = scope.env_var(ENV_PREFIX, &spec.name);
    if let Some(raw) = self.env.get(&var) {
      let value = parse_value(spec.kind(), raw).map_err(|m| invalid(&var, raw, m))?;
      return Ok(RankedValue { value, rank: Rank::Env });
    }

    if let Some(raw) = self.config_value(scope, &spec.name) {
      let value = config_to_value(spec.kind(), raw).map_err(|m| invalid("config", &raw.to_string(), m))?;
      return Ok(RankedValue {
        value,
        rank: Rank::Config,
      });
    }

    Ok(RankedValue {
      value: spec.default.clone(),
      rank: Rank::Default,
    })
  }

  fn config_value(&self, scope: &Scope, name: &str) -> Option<&toml::Value> {
    let mut table = &self.config;
    for part in scope.config_path() {
      table = table.get(part)?.as_table()?;
    }
    table.get(&name.replace('-', "_")).or_else(|| table.get(name))
  }
}

type ParsedArgs = (BTreeMap<(Scope, String), Vec<String>>, Vec<String>);

fn parse_args(args: &[String], registry: &OptionRegistry) -> Result<ParsedArgs, OptionsError> {
  let mut flags: BTreeMap<(Scope, String), Vec<String>> = BTreeMap::new();
  let mut positional = Vec::new();
  let mut iter = args.iter().peekable();

  while let Some(arg) = iter.next() {
    if arg == "--" {
      positional.extend(iter.by_ref().cloned());
      break;
    }

    if let Some(long) = arg.strip_prefix("--") {
      let (name, inline) = match long.split_once('=') {
        Some((name, value)) => (name, Some(value.to_string())),
        None => (long, None),
      };
      let flag = format!("--{name}");

      let (scope, spec, value) = if let Some((scope, spec)) = registry.find_flag(&flag) {
        let value = match (spec.kind(), inline) {
          (_, Some(value)) => value,
          (OptionKind::Bool, None) => "true".to_string(),
          (_, None) => match iter.next_if(|next| !next.starts_with('-')) {
            Some(next) => next.clone(),
            None => return Err(OptionsError::MissingValue { flag }),
          },
        };
        (scope, spec, value)
      } else if let Some((scope, spec)) = negated_bool(registry, name) {
        if inline.is_some() {
          return Err(OptionsError::UnknownFlag { flag: arg.clone() });
        }
        (scope, spec, "false".to_string())
      } else {
        return Err(OptionsError::UnknownFlag { flag });
      };

      flags
        .entry((scope.clone(), spec.name.clone()))
        .or_default()
        .push(value);
      continue;
    }

    if let Some(short) = arg.strip_prefix('-').filter(|s| !s.is_empty()) {
      let mut chars = short.chars();
      let letter = chars.next().unwrap_or_default();
      let Some((scope, spec)) = registry.find_short(letter) else {
        return Err(OptionsError::UnknownFlag { flag: arg.clone() });
      };
      let rest: String = chars.collect();
      let value = if !rest.is_empty() {
        rest.strip_prefix('=').unwrap_or(&rest).to_string()
      } else if spec.kind() == OptionKind::Bool {
        "true".to_string()
      } else {
        match iter.next_if(|next| !next.starts_with('-')) {
          Some(next) => next.clone(),
          None => return Err(OptionsError::MissingValue { flag: arg.clone() }),
        }
      };
      flags
        .entry((scope.clone(), spec.name.clone()))
        .or_default()
        .push(value);
      continue;
    }

    positional.push(arg.clone());
  }

  Ok((flags, positional))
}

/// `--no-<name>` (or `--<scope>-no-<name>`) for a registered bool option.
fn negated_bool<'a>(registry: &'a OptionRegistry, name: &str) -> Option<(&'a Scope, &'a OptionSpec)> {
  let candidates = [
    name.strip_prefix("no-").map(|n| format!("--{n}")),
    name.split_once("-no-").map(|(scope, n)| format!("--{scope}-{n}")),
  ];
  candidates
    .into_iter()
    .flatten()
    .filter_map(|flag| registry.find_flag(&flag))
    .find(|(_, spec)| spec.kind() == OptionKind::Bool)
}

fn parse_value(kind: OptionKind, raw: &str) -> Result<OptionValue, String> {
  match kind {
    OptionKind::Bool => parse_bool(raw).map(OptionValue::Bool),
    OptionKind::Int => raw
      .trim()
      .parse::<i64>()
      .map(OptionValue::Int)
      .map_err(|e| e.to_string()),
    OptionKind::Str => Ok(OptionValue::Str(raw.to_string())),
    OptionKind::List => parse_list(raw).map(OptionValue::List),
  }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" => Ok(false),
    _ => Err("expected a boolean".to_string()),
  }
}

/// TOML array syntax (`["a", "b"]`) or comma-separated text.
fn parse_list(raw: &str) -> Result<Vec<String>, String> {
  let trimmed = raw.trim();
  if trimmed.starts_with('[') {
    let table: toml::Table = format!("value = {trimmed}").parse().map_err(|e: toml::de::Error| e.to_string())?;
    return match table.get("value") {
      Some(value) => toml_list(value),
      None => Err("expected a list".to_string()),
    };
  }
  Ok(
    trimmed
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
      .collect(),
  )
}

fn toml_list(value: &toml::Value) -> Result<Vec<String>, String> {
  let items = value.as_array().ok_or_else(|| "expected a list".to_string())?;
  Ok(
    items
      .iter()
      .map(|item| match item {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
      })
      .collect(),
  )
}

fn config_to_value(kind: OptionKind, value: &toml::Value) -> Result<OptionValue, String> {
  match (kind, value) {
    (_, toml::Value::String(s)) => parse_value(kind, s),
    (OptionKind::Bool, toml::Value::Boolean(b)) => Ok(OptionValue::Bool(*b)),
    (OptionKind::Int, toml::Value::Integer(i)) => Ok(OptionValue::Int(*i)),
    (OptionKind::List, toml::Value::Array(_)) => toml_list(value).map(OptionValue::List),
    (kind, _) => Err(format!("expected {kind:?}")),
  }
}
