use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cmd::scheduler;
use crate::output::{OutputFormat, format_bytes, format_duration, print_json, print_stat, print_success};

#[derive(Debug, Serialize)]
struct StoreOutput {
  digest: String,
  files: usize,
  dirs: usize,
  bytes: u64,
}

pub async fn cmd_store(store: Option<PathBuf>, path: &Path, output: OutputFormat) -> Result<()> {
  if !path.is_dir() {
    bail!("Not a directory: {}", path.display());
  }
  let start = Instant::now();
  let scheduler = scheduler(store)?;

  let captured = {
    let store = scheduler.store().clone();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<_> {
      let digest = store.capture_directory(&path)?;
      let contents = store.load(digest)?;
      let dirs = store.snapshot(digest)?.dirs.len();
      let bytes = contents.iter().map(|f| f.content.len() as u64).sum();
      Ok(StoreOutput {
        digest: digest.to_string(),
        files: contents.len(),
        dirs,
        bytes,
      })
    })
    .await
    .context("Capture task failed")??
  };
  info!(path = %path.display(), digest = %captured.digest, "captured directory");

  if output.is_json() {
    print_json(&captured)?;
  } else {
    print_success(&format!("Stored {}", path.display()));
    print_stat("Digest", &captured.digest);
    print_stat("Files", &captured.files.to_string());
    print_stat("Directories", &captured.dirs.to_string());
    print_stat("Size", &format_bytes(captured.bytes));
    print_stat("Duration", &format_duration(start.elapsed()));
  }
  Ok(())
}
