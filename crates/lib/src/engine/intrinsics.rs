//! Rules the engine provides for store and options access.

use crate::engine::context::RuleContext;
use crate::engine::error::EngineError;
use crate::options::{OptionsBootstrapper, Scope, ScopedOptions};
use crate::rules::{Inputs, Query, Rule, RuleGraphBuilder};
use crate::store::{CreateDigest, Digest, DigestContents, MergeDigests, Snapshot};

async fn create_digest(cx: RuleContext, inputs: Inputs) -> Result<Digest, EngineError> {
  let request = inputs.get::<CreateDigest>()?;
  cx.with_store(move |store| store.create_digest(&request.0)).await
}

async fn merge_digests(cx: RuleContext, inputs: Inputs) -> Result<Digest, EngineError> {
  let request = inputs.get::<MergeDigests>()?;
  cx.with_store(move |store| store.merge(&request.0)).await
}

async fn digest_contents(cx: RuleContext, inputs: Inputs) -> Result<DigestContents, EngineError> {
  let digest = *inputs.get::<Digest>()?;
  cx.with_store(move |store| store.load(digest).map(DigestContents)).await
}

async fn snapshot(cx: RuleContext, inputs: Inputs) -> Result<Snapshot, EngineError> {
  let digest = *inputs.get::<Digest>()?;
  cx.with_store(move |store| store.snapshot(digest)).await
}

async fn scoped_options(_cx: RuleContext, inputs: Inputs) -> Result<ScopedOptions, EngineError> {
  let scope = inputs.get::<Scope>()?;
  let bootstrapper = inputs.get::<OptionsBootstrapper>()?;
  Ok(bootstrapper.resolve(&scope)?)
}

/// The engine's built-in rules.
pub fn intrinsic_rules() -> Vec<Rule> {
  vec![
    Rule::builder("create_digest").input::<CreateDigest>().returns(create_digest),
    Rule::builder("merge_digests").input::<MergeDigests>().returns(merge_digests),
    Rule::builder("digest_contents").input::<Digest>().returns(digest_contents),
    Rule::builder("snapshot").input::<Digest>().returns(snapshot),
    Rule::builder("scoped_options")
      .input::<Scope>()
      .input::<OptionsBootstrapper>()
      .returns(scoped_options),
  ]
}

/// Root queries that expose the built-in rules directly.
pub fn intrinsic_queries() -> Vec<Query> {
  vec![
    Query::new::<Digest>().param::<CreateDigest>(),
    Query::new::<Digest>().param::<MergeDigests>(),
    Query::new::<DigestContents>().param::<Digest>(),
    Query::new::<Snapshot>().param::<Digest>(),
    Query::new::<ScopedOptions>().param::<Scope>().param::<OptionsBootstrapper>(),
  ]
}

impl RuleGraphBuilder {
  /// Register the built-in rules and their root queries.
  pub fn with_intrinsics(self) -> Self {
    self.rules(intrinsic_rules()).queries(intrinsic_queries())
  }
}
