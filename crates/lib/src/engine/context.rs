//! The handle a rule body uses to reach the engine.

use std::any::Any;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tracing::debug;

use crate::engine::error::EngineError;
use crate::engine::params::Params;
use crate::engine::scheduler::{NodeKey, Scheduler, child_failure, downcast};
use crate::process::{ProcessRequest, ProcessResult, ResultSource};
use crate::rules::{GetDecl, ParamValue};
use crate::store::{Store, StoreError};

/// Passed to every rule body.
///
/// Nested requests suspend the body until the product is available; while
/// suspended the body holds no worker thread. Errors from nested requests
/// arrive as [`EngineError::ChildFailure`] and may be handled or propagated
/// with `?`.
#[derive(Debug, Clone)]
pub struct RuleContext {
  scheduler: Scheduler,
  key: NodeKey,
  rule: String,
}

impl RuleContext {
  pub(crate) fn new(scheduler: Scheduler, key: NodeKey, rule: String) -> Self {
    Self { scheduler, key, rule }
  }

  /// Name of the rule this context belongs to.
  pub fn rule_name(&self) -> &str {
    &self.rule
  }

  /// The params this rule invocation was keyed on.
  pub fn params(&self) -> &Params {
    &self.key.params
  }

  pub fn store(&self) -> &Store {
    self.scheduler.store()
  }

  /// Request a `P` computed for `subject`.
  ///
  /// The rule must have declared `get::<P, S>()`.
  pub async fn get<P, S>(&self, subject: S) -> Result<Arc<P>, EngineError>
  where
    P: Any + Send + Sync,
    S: ParamValue,
  {
    let decl = GetDecl::of::<P, S>();
    let target = self
      .scheduler
      .graph()
      .get_target(self.key.entry, decl)
      .ok_or_else(|| EngineError::UndeclaredGet {
        rule: self.rule.clone(),
        product: decl.product.to_string(),
        subject: decl.subject.to_string(),
      })?;

    let params = self.key.params.clone().with(subject);
    let product = self
      .scheduler
      .resolve(target, &params, Some(&self.key))
      .await
      .map_err(|e| child_failure(&self.rule, &decl.product, e))?;
    downcast(product)
  }

  /// Request a `P` for each subject.
  ///
  /// Results come back in the order of `subjects`. The first failure fails
  /// the batch and abandons the remaining requests.
  pub async fn get_all<P, S>(&self, subjects: impl IntoIterator<Item = S>) -> Result<Vec<Arc<P>>, EngineError>
  where
    P: Any + Send + Sync,
    S: ParamValue,
  {
    try_join_all(subjects.into_iter().map(|subject| self.get::<P, S>(subject))).await
  }

  /// Request a `P` for each subject, keeping every outcome.
  ///
  /// Failed items do not fail the batch. Results are in the order of
  /// `subjects`.
  pub async fn get_all_settled<P, S>(&self, subjects: impl IntoIterator<Item = S>) -> Vec<Result<Arc<P>, EngineError>>
  where
    P: Any + Send + Sync,
    S: ParamValue,
  {
    join_all(subjects.into_iter().map(|subject| self.get::<P, S>(subject))).await
  }

  /// Run a process. A non-zero exit is returned as data.
  pub async fn execute_process(&self, request: ProcessRequest) -> Result<ProcessResult, EngineError> {
    debug!(rule = %self.rule, description = %request.description, "executing process");
    let result = self.scheduler.executor().execute(request).await?;
    if result.source == ResultSource::Ran {
      self.scheduler.record_process();
    }
    Ok(result)
  }

  /// Run a process, treating a non-zero exit or a timeout as failure.
  pub async fn execute_process_checked(&self, request: ProcessRequest) -> Result<ProcessResult, EngineError> {
    let description = request.description.clone();
    let timeout = request.timeout.or(self.scheduler.config().default_timeout);

    let result = self.execute_process(request).await?;
    if result.timed_out {
      return Err(EngineError::Timeout {
        description,
        timeout: timeout.unwrap_or_default(),
      });
    }
    if result.exit_code != 0 {
      return Err(EngineError::ProcessFailed {
        description,
        exit_code: result.exit_code,
        stderr: result.stderr_str().into_owned(),
      });
    }
    Ok(result)
  }

  /// Run a store operation off the async workers.
  pub async fn with_store<T, F>(&self, f: F) -> Result<T, EngineError>
  where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
  {
    let store = self.store().clone();
    let joined = tokio::task::spawn_blocking(move || f(&store)).await;
    match joined {
      Ok(result) => Ok(result?),
      Err(e) => Err(self.error(format!("store task failed: {e}"))),
    }
  }

  /// An error attributed to this rule.
  pub fn error(&self, message: impl Into<String>) -> EngineError {
    EngineError::Rule {
      rule: self.rule.clone(),
      message: message.into(),
    }
  }
}
