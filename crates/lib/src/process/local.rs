//! Runs processes locally in per-request sandboxes.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::consts::SANDBOX_DIR;
use crate::process::ProcessExecutor;
use crate::process::sandbox::Sandbox;
use crate::process::types::{ExecutionError, ProcessRequest, ProcessResult, ResultSource};
use crate::store::{Digest, EMPTY_DIGEST, Store, StoreError};

/// Executes requests as child processes of the current process.
///
/// Each request gets a fresh sandbox with its input digest materialized, an
/// environment containing exactly the requested variables, and a null stdin.
/// At most `parallelism` processes run at once.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
  store: Store,
  permits: Arc<Semaphore>,
  sandbox_root: Option<PathBuf>,
  keep_sandboxes: bool,
  default_timeout: Option<Duration>,
}

impl LocalExecutor {
  pub fn new(store: Store, config: &EngineConfig) -> Self {
    let sandbox_root = store.root().map(|root| root.join(SANDBOX_DIR));
    Self {
      store,
      permits: Arc::new(Semaphore::new(config.parallelism.max(1))),
      sandbox_root,
      keep_sandboxes: config.keep_sandboxes,
      default_timeout: config.default_timeout,
    }
  }

  /// Create sandboxes beneath `root` instead of the default location.
  pub fn with_sandbox_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.sandbox_root = Some(root.into());
    self
  }

  async fn run(&self, request: ProcessRequest) -> Result<ProcessResult, ExecutionError> {
    let Some(program) = request.argv.first().cloned() else {
      return Err(ExecutionError::EmptyArgv);
    };

    let _permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|e| ExecutionError::Unavailable { message: e.to_string() })?;

    let sandbox = Sandbox::create(self.sandbox_root.as_deref(), self.keep_sandboxes)?;
    let workdir = sandbox.workdir(request.working_directory.as_deref())?;

    if request.input_digest != *EMPTY_DIGEST {
      let store = self.store.clone();
      let digest = request.input_digest;
      let dest = sandbox.path().to_path_buf();
      blocking(move || store.materialize(digest, &dest))
        .await
        .map_err(|source| ExecutionError::Materialize { digest, source })?;
    }

    let program_path = resolve_program(&program, &workdir);
    let mut command = Command::new(&program_path);
    command
      .args(&request.argv[1..])
      .current_dir(&workdir)
      .env_clear()
      .envs(&request.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    info!(description = %request.description, program = %program, "running process");
    let started = Instant::now();

    let child = command.spawn().map_err(|e| ExecutionError::Spawn {
      program: program.clone(),
      message: e.to_string(),
    })?;

    let timeout = request.timeout.or(self.default_timeout);
    let waited = match timeout {
      Some(limit) => tokio::time::timeout(limit, child.wait_with_output()).await.ok(),
      None => Some(child.wait_with_output().await),
    };
    let elapsed = started.elapsed();

    let Some(output) = waited else {
      // Dropping the wait future dropped the child, which kills it.
      let limit = timeout.unwrap_or_default();
      warn!(description = %request.description, timeout = ?limit, "process timed out");
      return Ok(ProcessResult {
        exit_code: -1,
        stdout: Vec::new(),
        stderr: format!("process timed out after {}ms\n", limit.as_millis()).into_bytes(),
        output_digest: *EMPTY_DIGEST,
        timed_out: true,
        elapsed,
        source: ResultSource::Ran,
      });
    };

    let output = output.map_err(|e| ExecutionError::Wait {
      program: program.clone(),
      message: e.to_string(),
    })?;
    let exit_code = exit_code(output.status);

    let output_digest = self.capture(&request, &workdir).await.map_err(|source| ExecutionError::Capture {
      description: request.description.clone(),
      source,
    })?;

    debug!(
      description = %request.description,
      exit_code,
      elapsed = ?elapsed,
      output = %output_digest,
      "process finished"
    );

    Ok(ProcessResult {
      exit_code,
      stdout: output.stdout,
      stderr: output.stderr,
      output_digest,
      timed_out: false,
      elapsed,
      source: ResultSource::Ran,
    })
  }

  async fn capture(&self, request: &ProcessRequest, workdir: &Path) -> Result<Digest, StoreError> {
    if request.output_files.is_empty() && request.output_directories.is_empty() {
      return Ok(*EMPTY_DIGEST);
    }
    let store = self.store.clone();
    let root = workdir.to_path_buf();
    let files = request.output_files.clone();
    let dirs = request.output_directories.clone();
    blocking(move || store.capture_paths(&root, &files, &dirs)).await
  }
}

impl ProcessExecutor for LocalExecutor {
  fn execute(&self, request: ProcessRequest) -> BoxFuture<'_, Result<ProcessResult, ExecutionError>> {
    self.run(request).boxed()
  }
}

/// Run store I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
  F: FnOnce() -> Result<T, StoreError> + Send + 'static,
  T: Send + 'static,
{
  tokio::task::spawn_blocking(f).await.map_err(|e| StoreError::Io {
    action: "join blocking task".to_string(),
    path: String::new(),
    message: e.to_string(),
  })?
}

/// Relative program paths containing a separator resolve against the workdir.
fn resolve_program(program: &str, workdir: &Path) -> PathBuf {
  let path = Path::new(program);
  if path.is_relative() && path.components().count() > 1 {
    workdir.join(path)
  } else {
    path.to_path_buf()
  }
}

/// Exit status as an integer. Death by signal N is reported as `-N`.
fn exit_code(status: ExitStatus) -> i32 {
  if let Some(code) = status.code() {
    return code;
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return -signal;
    }
  }
  -1
}
