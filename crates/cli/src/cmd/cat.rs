use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use kiln_lib::engine::Params;
use kiln_lib::store::{Digest, DigestContents, normalize_path};

use crate::cmd::scheduler;

pub async fn cmd_cat(store: Option<PathBuf>, digest: Digest, path: &str) -> Result<()> {
  let path = normalize_path(path)?;
  let scheduler = scheduler(store)?;
  let contents = scheduler.request::<DigestContents>(Params::of(digest)).await?;

  let Some(file) = contents.get(&path) else {
    bail!("No file {path} in {digest}");
  };
  std::io::stdout()
    .write_all(&file.content)
    .context("Failed to write to stdout")?;
  Ok(())
}
