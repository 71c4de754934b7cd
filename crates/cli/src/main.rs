mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use kiln_lib::store::Digest;
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// kiln - content-addressed build products with memoized rules
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Store directory (defaults to $KILN_STORE or the user cache directory)
  #[arg(long, global = true, value_name = "DIR")]
  store: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, global = true, value_enum, default_value = "text")]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Capture a directory into the store and print its digest
  Store {
    /// Directory to capture
    path: PathBuf,
  },

  /// List the files and directories of a stored tree
  Ls {
    /// Tree digest, written <fingerprint>/<size>
    digest: Digest,
  },

  /// Print one file of a stored tree
  Cat {
    /// Tree digest, written <fingerprint>/<size>
    digest: Digest,

    /// Path of the file within the tree
    path: String,
  },

  /// Run a process in a sandbox
  Run {
    /// Tree to materialize into the sandbox
    #[arg(long, value_name = "DIGEST")]
    input: Option<Digest>,

    /// File to capture after the process exits (repeatable)
    #[arg(long = "output-file", value_name = "PATH")]
    output_files: Vec<String>,

    /// Directory to capture after the process exits (repeatable)
    #[arg(long = "output-dir", value_name = "PATH")]
    output_dirs: Vec<String>,

    /// Environment entry KEY=VALUE (repeatable); nothing else is inherited
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = cmd::parse_env_pair)]
    env: Vec<(String, String)>,

    /// Sandbox-relative working directory
    #[arg(long, value_name = "PATH")]
    workdir: Option<String>,

    /// Kill the process after this long (e.g. "500ms", "30s")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Reuse and record successful results in the process cache
    #[arg(long)]
    cache: bool,

    /// Keep the sandbox directory after the process exits
    #[arg(long)]
    keep_sandbox: bool,

    /// Program and arguments
    #[arg(last = true, required = true)]
    argv: Vec<String>,
  },

  /// Resolve scoped options from flags, environment and config
  Options {
    /// Scope to resolve (repeatable; default: every registered scope)
    #[arg(short, long)]
    scope: Vec<String>,

    /// Config file (default: ./kiln.toml, then the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Option flags, e.g. -- --level=debug --process-timeout-secs=30
    #[arg(last = true)]
    args: Vec<String>,
  },

  /// Print the built-in rule graph in Graphviz DOT format
  Graph,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let store = cli.store;
  let output = cli.output;

  match cli.command {
    Commands::Store { path } => cmd::cmd_store(store, &path, output).await?,
    Commands::Ls { digest } => cmd::cmd_ls(store, digest, output).await?,
    Commands::Cat { digest, path } => cmd::cmd_cat(store, digest, &path).await?,
    Commands::Run {
      input,
      output_files,
      output_dirs,
      env,
      workdir,
      timeout,
      cache,
      keep_sandbox,
      argv,
    } => {
      let args = cmd::RunArgs {
        argv,
        input,
        output_files,
        output_dirs,
        env,
        workdir,
        timeout,
        cache,
        keep_sandbox,
      };
      return cmd::cmd_run(store, args, output).await;
    }
    Commands::Options { scope, config, args } => cmd::cmd_options(store, scope, config, args, output).await?,
    Commands::Graph => cmd::cmd_graph()?,
  }
  Ok(ExitCode::SUCCESS)
}
