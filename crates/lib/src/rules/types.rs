//! Type identities and type-erased values.
//!
//! Products and params are ordinary Rust types. The graph identifies them by
//! [`TypeKey`]; the scheduler moves them around as [`AnyProduct`] (any
//! shareable value) or [`Value`] (a value that can also be compared and
//! hashed, which params must be).

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A computed product of unknown static type.
pub type AnyProduct = Arc<dyn Any + Send + Sync>;

/// Identity of a product or param type.
#[derive(Clone, Copy)]
pub struct TypeKey {
  id: TypeId,
  name: &'static str,
}

impl TypeKey {
  pub fn of<T: Any>() -> Self {
    Self {
      id: TypeId::of::<T>(),
      name: std::any::type_name::<T>(),
    }
  }

  /// Fully qualified type name.
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Type name with module paths stripped, e.g. `Vec<Digest>`.
  pub fn short_name(&self) -> String {
    short_type_name(self.name)
  }
}

impl PartialEq for TypeKey {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl Ord for TypeKey {
  fn cmp(&self, other: &Self) -> Ordering {
    self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
  }
}

impl PartialOrd for TypeKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.short_name())
  }
}

impl fmt::Debug for TypeKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "TypeKey({})", self.short_name())
  }
}

fn short_type_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut segment = String::new();
  for c in name.chars() {
    if c.is_alphanumeric() || c == '_' || c == ':' {
      segment.push(c);
    } else {
      out.push_str(segment.rsplit("::").next().unwrap_or_default());
      segment.clear();
      out.push(c);
    }
  }
  out.push_str(segment.rsplit("::").next().unwrap_or_default());
  out
}

/// Object-safe equality and hashing for param values.
///
/// Implemented for every `Eq + Hash + Debug` type that can be shared across
/// threads.
pub trait ParamValue: Any + fmt::Debug + Send + Sync {
  fn as_any(&self) -> &dyn Any;
  fn into_any(self: Arc<Self>) -> AnyProduct;
  fn type_key(&self) -> TypeKey;
  fn dyn_eq(&self, other: &dyn ParamValue) -> bool;
  fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> ParamValue for T
where
  T: Any + fmt::Debug + Eq + Hash + Send + Sync,
{
  fn as_any(&self) -> &dyn Any {
    self
  }

  fn into_any(self: Arc<Self>) -> AnyProduct {
    self
  }

  fn type_key(&self) -> TypeKey {
    TypeKey::of::<T>()
  }

  fn dyn_eq(&self, other: &dyn ParamValue) -> bool {
    other.as_any().downcast_ref::<T>().is_some_and(|other| self == other)
  }

  fn dyn_hash(&self, mut state: &mut dyn Hasher) {
    self.type_key().hash(&mut state);
    self.hash(&mut state);
  }
}

/// A param value: shared, type-erased, compared and hashed by content.
#[derive(Clone)]
pub struct Value(Arc<dyn ParamValue>);

impl Value {
  pub fn new<T: ParamValue>(value: T) -> Self {
    Self(Arc::new(value))
  }

  pub fn from_arc<T: ParamValue>(value: Arc<T>) -> Self {
    Self(value)
  }

  pub fn type_key(&self) -> TypeKey {
    self.0.type_key()
  }

  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.0.as_any().downcast_ref::<T>()
  }

  pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.as_product().downcast::<T>().ok()
  }

  /// The same allocation, viewed as a product.
  pub fn as_product(&self) -> AnyProduct {
    self.0.clone().into_any()
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0) || self.0.dyn_eq(other.0.as_ref())
  }
}

impl Eq for Value {}

impl Hash for Value {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.dyn_hash(state);
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.0, f)
  }
}
