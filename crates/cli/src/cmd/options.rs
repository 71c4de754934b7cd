use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use kiln_lib::consts::CONFIG_FILE_NAME;
use kiln_lib::engine::Params;
use kiln_lib::options::{OptionRegistry, OptionsBootstrapper, Scope, ScopedOptions};
use kiln_lib::platform::paths::config_dir;
use owo_colors::{OwoColorize, Stream};

use crate::cmd::scheduler;
use crate::output::{OutputFormat, print_heading, print_json};

/// The explicit config file, else `./kiln.toml`, else the user config dir.
fn read_config(explicit: Option<PathBuf>) -> Result<Option<String>> {
  let path = match explicit {
    Some(path) => path,
    None => {
      let candidates = [Path::new(CONFIG_FILE_NAME).to_path_buf(), config_dir().join(CONFIG_FILE_NAME)];
      match candidates.into_iter().find(|p| p.is_file()) {
        Some(path) => path,
        None => return Ok(None),
      }
    }
  };
  let text = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
  Ok(Some(text))
}

pub async fn cmd_options(
  store: Option<PathBuf>,
  scopes: Vec<String>,
  config: Option<PathBuf>,
  args: Vec<String>,
  output: OutputFormat,
) -> Result<()> {
  let registry = Arc::new(OptionRegistry::standard());
  let mut builder = OptionsBootstrapper::builder(registry.clone())
    .args(args)
    .env(std::env::vars());
  if let Some(text) = read_config(config)? {
    builder = builder.config_toml(text);
  }
  let bootstrapper = builder.build()?;

  let scopes: Vec<Scope> = if scopes.is_empty() {
    registry.scopes().cloned().collect()
  } else {
    scopes.into_iter().map(Scope::new).collect()
  };

  let scheduler = scheduler(store)?;
  let resolved: Vec<Arc<ScopedOptions>> = scheduler
    .request_all(
      scopes
        .into_iter()
        .map(|scope| Params::of(scope).with(bootstrapper.clone()))
        .collect(),
    )
    .await?;

  if output.is_json() {
    let plain: Vec<&ScopedOptions> = resolved.iter().map(|o| &**o).collect();
    return print_json(&plain);
  }

  for (i, scoped) in resolved.iter().enumerate() {
    if i > 0 {
      println!();
    }
    print_heading(&format!("[{}]", scoped.scope));
    for (name, ranked) in &scoped.options {
      let origin = format!("({})", ranked.rank);
      println!(
        "  {name} = {} {}",
        ranked.value,
        origin.if_supports_color(Stream::Stdout, |s| s.dimmed())
      );
    }
  }
  Ok(())
}
