//! Test helpers shared by unit tests.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::Scheduler;
use crate::process::{LocalExecutor, ProcessRequest};
use crate::rules::RuleGraph;
use crate::store::Store;

/// A scheduler over an in-memory store that runs processes locally.
pub fn in_memory_scheduler(graph: RuleGraph) -> Scheduler {
  let store = Store::in_memory();
  let config = EngineConfig::default();
  let executor = Arc::new(LocalExecutor::new(store.clone(), &config));
  Scheduler::new(graph, store, executor, config)
}

/// A request running `script` with the platform shell.
#[cfg(unix)]
pub fn shell(script: &str) -> ProcessRequest {
  ProcessRequest::new(["/bin/sh", "-c", script], script)
}

#[cfg(windows)]
pub fn shell(script: &str) -> ProcessRequest {
  ProcessRequest::new(["cmd.exe", "/C", script], script)
}
