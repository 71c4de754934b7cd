//! Sandboxed process execution.
//!
//! A [`ProcessRequest`] names an argv, an environment, an input digest and
//! the outputs to capture. A [`ProcessExecutor`] turns it into a
//! [`ProcessResult`]. [`LocalExecutor`] runs processes on this machine and
//! [`CachingExecutor`] adds reuse of identical, previously successful runs.

pub mod cache;
pub mod local;
pub mod sandbox;
pub mod types;

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;

pub use cache::CachingExecutor;
pub use local::LocalExecutor;
pub use sandbox::Sandbox;
pub use types::{ExecutionError, ProcessRequest, ProcessResult, ResultSource};

use crate::config::EngineConfig;
use crate::store::Store;

/// Something that can run a [`ProcessRequest`].
///
/// Implementations must tolerate concurrent calls.
pub trait ProcessExecutor: Debug + Send + Sync {
  fn execute(&self, request: ProcessRequest) -> BoxFuture<'_, Result<ProcessResult, ExecutionError>>;
}

impl<T: ProcessExecutor + ?Sized> ProcessExecutor for Arc<T> {
  fn execute(&self, request: ProcessRequest) -> BoxFuture<'_, Result<ProcessResult, ExecutionError>> {
    (**self).execute(request)
  }
}

/// The executor described by `config`: local, optionally cached.
pub fn executor_for(store: &Store, config: &EngineConfig) -> Arc<dyn ProcessExecutor> {
  let local = LocalExecutor::new(store.clone(), config);
  if config.process_cache {
    Arc::new(CachingExecutor::new(local, store.clone()))
  } else {
    Arc::new(local)
  }
}
