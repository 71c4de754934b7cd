//! Rule declarations.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::engine::{EngineError, RuleContext};
use crate::rules::types::{AnyProduct, ParamValue, TypeKey};

pub(crate) type RuleFuture = BoxFuture<'static, Result<AnyProduct, EngineError>>;
pub(crate) type RuleBody = Arc<dyn Fn(RuleContext, Inputs) -> RuleFuture + Send + Sync>;

/// A nested request a rule body may issue: a `product` computed for a
/// `subject` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GetDecl {
  pub product: TypeKey,
  pub subject: TypeKey,
}

impl GetDecl {
  pub fn of<P: Any, S: Any>() -> Self {
    Self {
      product: TypeKey::of::<P>(),
      subject: TypeKey::of::<S>(),
    }
  }
}

impl fmt::Display for GetDecl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Get({}, {})", self.product, self.subject)
  }
}

/// A named function from input product types to one output product type.
///
/// Build with [`Rule::builder`]:
///
/// ```ignore
/// let rule = Rule::builder("package_artifact")
///   .input::<SourceFiles>()
///   .input::<BuildOptions>()
///   .get::<Digest, CreateDigest>()
///   .returns(package_artifact);
/// ```
#[derive(Clone)]
pub struct Rule {
  pub(crate) name: String,
  pub(crate) output: TypeKey,
  pub(crate) inputs: Vec<TypeKey>,
  pub(crate) gets: Vec<GetDecl>,
  pub(crate) body: RuleBody,
}

impl Rule {
  pub fn builder(name: impl Into<String>) -> RuleBuilder {
    RuleBuilder {
      name: name.into(),
      inputs: Vec::new(),
      gets: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn output(&self) -> TypeKey {
    self.output
  }

  pub fn inputs(&self) -> &[TypeKey] {
    &self.inputs
  }

  pub fn gets(&self) -> &[GetDecl] {
    &self.gets
  }
}

impl fmt::Debug for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Rule")
      .field("name", &self.name)
      .field("output", &self.output)
      .field("inputs", &self.inputs)
      .field("gets", &self.gets)
      .finish_non_exhaustive()
  }
}

impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inputs: Vec<String> = self.inputs.iter().map(|t| t.to_string()).collect();
    write!(f, "{}({}) -> {}", self.name, inputs.join(", "), self.output)
  }
}

/// Declares a rule's inputs and gets before its body is attached.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
  name: String,
  inputs: Vec<TypeKey>,
  gets: Vec<GetDecl>,
}

impl RuleBuilder {
  /// Require a product of type `T`, computed from the rule's own params.
  pub fn input<T: Any + Send + Sync>(mut self) -> Self {
    let key = TypeKey::of::<T>();
    if !self.inputs.contains(&key) {
      self.inputs.push(key);
    }
    self
  }

  /// Declare that the body may request a `P` for a subject of type `S`.
  pub fn get<P: Any + Send + Sync, S: ParamValue>(mut self) -> Self {
    let decl = GetDecl::of::<P, S>();
    if !self.gets.contains(&decl) {
      self.gets.push(decl);
    }
    self
  }

  /// Attach the body, fixing the output type.
  pub fn returns<O, F, Fut>(self, body: F) -> Rule
  where
    O: Any + Send + Sync,
    F: Fn(RuleContext, Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, EngineError>> + Send + 'static,
  {
    let body: RuleBody = Arc::new(move |cx, inputs| {
      let fut = body(cx, inputs);
      async move { fut.await.map(|product| Arc::new(product) as AnyProduct) }.boxed()
    });
    Rule {
      name: self.name,
      output: TypeKey::of::<O>(),
      inputs: self.inputs,
      gets: self.gets,
      body,
    }
  }
}

/// The computed inputs handed to a rule body.
#[derive(Clone, Default)]
pub struct Inputs {
  values: Vec<(TypeKey, AnyProduct)>,
}

impl Inputs {
  pub(crate) fn new(values: Vec<(TypeKey, AnyProduct)>) -> Self {
    Self { values }
  }

  /// The input of type `T`.
  pub fn get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, EngineError> {
    let key = TypeKey::of::<T>();
    let (_, value) = self
      .values
      .iter()
      .find(|(k, _)| *k == key)
      .ok_or_else(|| EngineError::TypeMismatch {
        expected: key.to_string(),
        found: "no such input".to_string(),
      })?;
    value.clone().downcast::<T>().map_err(|_| EngineError::TypeMismatch {
      expected: key.to_string(),
      found: "a value of another type".to_string(),
    })
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

impl fmt::Debug for Inputs {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.values.iter().map(|(k, _)| k)).finish()
  }
}
