use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use kiln_lib::process::{ProcessRequest, ProcessResult, ResultSource, executor_for};
use kiln_lib::store::{Digest, Store};
use serde::Serialize;
use tracing::debug;

use crate::cmd::engine_config;
use crate::output::{OutputFormat, format_duration, print_failure, print_json, print_stat, print_success};

/// Parsed arguments of `kiln run`.
#[derive(Debug)]
pub struct RunArgs {
  pub argv: Vec<String>,
  pub input: Option<Digest>,
  pub output_files: Vec<String>,
  pub output_dirs: Vec<String>,
  pub env: Vec<(String, String)>,
  pub workdir: Option<String>,
  pub timeout: Option<Duration>,
  pub cache: bool,
  pub keep_sandbox: bool,
}

impl RunArgs {
  fn into_request(self) -> ProcessRequest {
    let description = self.argv.join(" ");
    let mut request = ProcessRequest::new(self.argv, description);
    if let Some(digest) = self.input {
      request = request.input_digest(digest);
    }
    for path in self.output_files {
      request = request.output_file(path);
    }
    for path in self.output_dirs {
      request = request.output_directory(path);
    }
    for (key, value) in self.env {
      request = request.env(key, value);
    }
    if let Some(dir) = self.workdir {
      request = request.working_directory(dir);
    }
    if let Some(timeout) = self.timeout {
      request = request.timeout(timeout);
    }
    request
  }
}

#[derive(Debug, Serialize)]
struct RunOutput {
  exit_code: i32,
  timed_out: bool,
  cached: bool,
  output_digest: String,
  elapsed_ms: u128,
  stdout: String,
  stderr: String,
}

impl From<&ProcessResult> for RunOutput {
  fn from(result: &ProcessResult) -> Self {
    Self {
      exit_code: result.exit_code,
      timed_out: result.timed_out,
      cached: result.source == ResultSource::Cached,
      output_digest: result.output_digest.to_string(),
      elapsed_ms: result.elapsed.as_millis(),
      stdout: result.stdout_str().into_owned(),
      stderr: result.stderr_str().into_owned(),
    }
  }
}

/// The code `kiln run` exits with: the process's own code when it is a
/// failing code the shell can carry, else 1.
fn failure_code(result: &ProcessResult) -> u8 {
  u8::try_from(result.exit_code).ok().filter(|code| *code > 0).unwrap_or(1)
}

pub async fn cmd_run(store: Option<PathBuf>, args: RunArgs, output: OutputFormat) -> Result<ExitCode> {
  let mut config = engine_config(store)?;
  config.process_cache |= args.cache;
  config.keep_sandboxes |= args.keep_sandbox;

  let store = Store::open(&config.store_dir)?;
  let executor = executor_for(&store, &config);
  let request = args.into_request();
  debug!(argv = ?request.argv, "running process");

  let result = executor.execute(request).await?;
  let summary = RunOutput::from(&result);

  if output.is_json() {
    print_json(&summary)?;
  } else {
    print!("{}", summary.stdout);
    eprint!("{}", summary.stderr);
    if result.is_success() {
      print_success("Process succeeded");
    } else if result.timed_out {
      print_failure("Process timed out");
    } else {
      print_failure(&format!("Process exited with code {}", result.exit_code));
    }
    print_stat("Output digest", &summary.output_digest);
    print_stat("Duration", &format_duration(result.elapsed));
    if summary.cached {
      print_stat("Source", "process cache");
    }
  }

  if result.is_success() {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::from(failure_code(&result)))
  }
}
