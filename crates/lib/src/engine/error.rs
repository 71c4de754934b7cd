//! Errors surfaced by the scheduler.

use std::time::Duration;

use thiserror::Error;

use crate::options::OptionsError;
use crate::process::ExecutionError;
use crate::rules::GraphError;
use crate::store::StoreError;

/// Any failure of a product request.
///
/// Errors are plain values: they are memoized alongside successes and handed
/// to every subscriber of a failed computation, so they must be `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Execution(#[from] ExecutionError),

  #[error(transparent)]
  Options(#[from] OptionsError),

  #[error("dependency cycle: {}", .path.join(" -> "))]
  Cycle { path: Vec<String> },

  #[error("{rule} failed to get {product}")]
  ChildFailure {
    rule: String,
    product: String,
    #[source]
    source: Box<EngineError>,
  },

  #[error("process {description:?} timed out after {}ms", .timeout.as_millis())]
  Timeout { description: String, timeout: Duration },

  #[error("process {description:?} exited with code {exit_code}{}", format_stderr(.stderr))]
  ProcessFailed {
    description: String,
    exit_code: i32,
    stderr: String,
  },

  #[error("rule {rule} failed: {message}")]
  Rule { rule: String, message: String },

  #[error("rule {rule} requested {product} for {subject} without declaring it")]
  UndeclaredGet {
    rule: String,
    product: String,
    subject: String,
  },

  #[error("request for {product} was cancelled")]
  Cancelled { product: String },

  #[error("expected a value of type {expected}, found {found}")]
  TypeMismatch { expected: String, found: String },
}

fn format_stderr(stderr: &str) -> String {
  let stderr = stderr.trim();
  if stderr.is_empty() {
    String::new()
  } else {
    format!(":\n{stderr}")
  }
}

impl EngineError {
  /// The innermost error beneath any chain of child failures.
  pub fn root_cause(&self) -> &EngineError {
    let mut current = self;
    while let EngineError::ChildFailure { source, .. } = current {
      current = source;
    }
    current
  }

  pub fn is_cycle(&self) -> bool {
    matches!(self.root_cause(), EngineError::Cycle { .. })
  }

  /// One line per level, from the outermost request to the root cause.
  pub fn causal_chain(&self) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = self;
    loop {
      chain.push(current.to_string());
      match current {
        EngineError::ChildFailure { source, .. } => current = source,
        _ => break,
      }
    }
    chain
  }

  /// Multi-line rendering of [`causal_chain`](Self::causal_chain).
  pub fn render_chain(&self) -> String {
    self
      .causal_chain()
      .iter()
      .enumerate()
      .map(|(depth, line)| format!("{}{line}", "  ".repeat(depth)))
      .collect::<Vec<_>>()
      .join("\n")
  }
}
