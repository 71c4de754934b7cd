//! Process requests, results and execution errors.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Digest, EMPTY_DIGEST, StoreError};
use crate::util::hash::{Fingerprint, HashError, Hashable};

/// A request to run a process in a sandbox.
///
/// Requests are plain values: two requests with the same content are equal,
/// hash equally and share a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessRequest {
  /// Program followed by its arguments.
  pub argv: Vec<String>,
  /// The complete environment of the process; nothing is inherited.
  pub env: BTreeMap<String, String>,
  /// Tree materialized into the sandbox before the process starts.
  pub input_digest: Digest,
  /// Files captured into the output digest after exit.
  pub output_files: BTreeSet<String>,
  /// Directories captured (recursively) into the output digest after exit.
  pub output_directories: BTreeSet<String>,
  /// Sandbox-relative directory to run in.
  pub working_directory: Option<String>,
  /// Human readable description, for logs and errors.
  pub description: String,
  /// Upper bound on the run time; the process is killed on expiry.
  pub timeout: Option<Duration>,
}

/// The portion of a request that determines its result.
///
/// The description is deliberately absent: renaming a process does not
/// change what it computes.
#[derive(Serialize)]
struct CacheKey<'a> {
  argv: &'a [String],
  env: &'a BTreeMap<String, String>,
  input_digest: &'a Digest,
  output_files: &'a BTreeSet<String>,
  output_directories: &'a BTreeSet<String>,
  working_directory: &'a Option<String>,
  timeout: &'a Option<Duration>,
}

impl Hashable for CacheKey<'_> {}

impl ProcessRequest {
  pub fn new<I, S>(argv: I, description: impl Into<String>) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      argv: argv.into_iter().map(Into::into).collect(),
      env: BTreeMap::new(),
      input_digest: *EMPTY_DIGEST,
      output_files: BTreeSet::new(),
      output_directories: BTreeSet::new(),
      working_directory: None,
      description: description.into(),
      timeout: None,
    }
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn input_digest(mut self, digest: Digest) -> Self {
    self.input_digest = digest;
    self
  }

  pub fn output_file(mut self, path: impl Into<String>) -> Self {
    self.output_files.insert(path.into());
    self
  }

  pub fn output_directory(mut self, path: impl Into<String>) -> Self {
    self.output_directories.insert(path.into());
    self
  }

  pub fn working_directory(mut self, path: impl Into<String>) -> Self {
    self.working_directory = Some(path.into());
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Stable fingerprint of everything that affects the result.
  pub fn cache_key(&self) -> Result<Fingerprint, HashError> {
    CacheKey {
      argv: &self.argv,
      env: &self.env,
      input_digest: &self.input_digest,
      output_files: &self.output_files,
      output_directories: &self.output_directories,
      working_directory: &self.working_directory,
      timeout: &self.timeout,
    }
    .compute_hash()
  }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
  #[default]
  Ran,
  Cached,
}

/// Outcome of running a process.
///
/// A non-zero exit code is data, not an error; callers decide whether it
/// constitutes failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
  pub exit_code: i32,
  pub stdout: Vec<u8>,
  pub stderr: Vec<u8>,
  /// Captured declared outputs.
  pub output_digest: Digest,
  /// The process exceeded its timeout and was killed.
  pub timed_out: bool,
  pub elapsed: Duration,
  pub source: ResultSource,
}

impl ProcessResult {
  /// Exited with status zero within its timeout.
  pub fn is_success(&self) -> bool {
    self.exit_code == 0 && !self.timed_out
  }

  pub fn stdout_str(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.stdout)
  }

  pub fn stderr_str(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.stderr)
  }
}

/// Infrastructure failures while executing a process.
///
/// Distinct from a process exiting non-zero, which is reported through
/// [`ProcessResult::exit_code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
  #[error("process request has an empty argv")]
  EmptyArgv,

  #[error("failed to create sandbox: {message}")]
  Sandbox { message: String },

  #[error("failed to materialize input digest {digest}: {source}")]
  Materialize {
    digest: Digest,
    #[source]
    source: StoreError,
  },

  #[error("failed to spawn {program}: {message}")]
  Spawn { program: String, message: String },

  #[error("failed waiting for {program}: {message}")]
  Wait { program: String, message: String },

  #[error("failed to capture outputs of {description:?}: {source}")]
  Capture {
    description: String,
    #[source]
    source: StoreError,
  },

  #[error("process cache error: {message}")]
  Cache { message: String },

  #[error("executor unavailable: {message}")]
  Unavailable { message: String },
}
