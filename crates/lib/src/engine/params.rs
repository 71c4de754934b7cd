//! Typed root values of a request.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::rules::{ParamValue, TypeKey, Value};

/// An immutable set of values with distinct types.
///
/// Equality and hashing are structural: two sets holding equal values are
/// equal however they were built. Adding a value whose type is already
/// present replaces the old one.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Params {
  values: BTreeMap<TypeKey, Value>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Params holding a single value.
  pub fn of<T: ParamValue>(value: T) -> Self {
    Self::new().with(value)
  }

  pub fn with<T: ParamValue>(self, value: T) -> Self {
    self.with_value(Value::new(value))
  }

  pub fn with_value(mut self, value: Value) -> Self {
    self.values.insert(value.type_key(), value);
    self
  }

  pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
    values.into_iter().fold(Self::new(), Self::with_value)
  }

  pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.values.get(&TypeKey::of::<T>())?.downcast::<T>()
  }

  pub fn value(&self, key: &TypeKey) -> Option<&Value> {
    self.values.get(key)
  }

  pub fn contains(&self, key: &TypeKey) -> bool {
    self.values.contains_key(key)
  }

  pub fn type_keys(&self) -> BTreeSet<TypeKey> {
    self.values.keys().copied().collect()
  }

  /// Only the values whose types are in `keep`.
  pub fn restrict(&self, keep: &BTreeSet<TypeKey>) -> Self {
    Self {
      values: self
        .values
        .iter()
        .filter(|(k, _)| keep.contains(k))
        .map(|(k, v)| (*k, v.clone()))
        .collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

impl Hash for Params {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.values.len().hash(state);
    for value in self.values.values() {
      value.hash(state);
    }
  }
}

impl fmt::Debug for Params {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.values.values()).finish()
  }
}

impl fmt::Display for Params {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts: Vec<String> = self.values.values().map(|v| format!("{v:?}")).collect();
    write!(f, "Params({})", parts.join(", "))
  }
}
