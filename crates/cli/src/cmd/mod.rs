mod cat;
mod graph;
mod ls;
mod options;
mod run;
mod store;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use kiln_lib::engine::Scheduler;
use kiln_lib::rules::RuleGraph;
use kiln_lib::EngineConfig;

pub use cat::cmd_cat;
pub use graph::cmd_graph;
pub use ls::cmd_ls;
pub use options::cmd_options;
pub use run::{RunArgs, cmd_run};
pub use store::cmd_store;

/// Engine configuration from the environment, with an optional store override.
fn engine_config(store: Option<PathBuf>) -> Result<EngineConfig> {
  let config = EngineConfig::from_env().context("Invalid KILN_* environment")?;
  Ok(match store {
    Some(dir) => config.with_store_dir(dir),
    None => config,
  })
}

/// The graph of built-in rules every command runs against.
fn builtin_graph() -> Result<RuleGraph> {
  RuleGraph::builder()
    .with_intrinsics()
    .build()
    .context("Failed to build the built-in rule graph")
}

fn scheduler(store: Option<PathBuf>) -> Result<Scheduler> {
  let config = engine_config(store)?;
  Scheduler::from_config(builtin_graph()?, config).context("Failed to open the store")
}

/// Parse a `KEY=VALUE` pair.
pub fn parse_env_pair(raw: &str) -> Result<(String, String)> {
  match raw.split_once('=') {
    Some((key, _)) if key.is_empty() => bail!("empty variable name in {raw:?}"),
    Some((key, value)) => Ok((key.to_string(), value.to_string())),
    None => bail!("expected KEY=VALUE, got {raw:?}"),
  }
}
