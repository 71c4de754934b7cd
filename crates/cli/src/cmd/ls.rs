use std::path::PathBuf;

use anyhow::Result;
use kiln_lib::engine::Params;
use kiln_lib::store::{Digest, Snapshot};

use crate::cmd::scheduler;
use crate::output::{OutputFormat, print_dir, print_info, print_json};

pub async fn cmd_ls(store: Option<PathBuf>, digest: Digest, output: OutputFormat) -> Result<()> {
  let scheduler = scheduler(store)?;
  let snapshot = scheduler.request::<Snapshot>(Params::of(digest)).await?;

  if output.is_json() {
    return print_json(&*snapshot);
  }

  if snapshot.is_empty() {
    print_info("Empty tree");
    return Ok(());
  }
  for dir in &snapshot.dirs {
    print_dir(dir);
  }
  for file in &snapshot.files {
    println!("  {file}");
  }
  Ok(())
}
