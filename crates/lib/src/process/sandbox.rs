//! Isolated working directories for process execution.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::process::types::ExecutionError;
use crate::store::normalize_path;

/// A temporary directory that one process runs in.
///
/// The directory is removed when the sandbox is dropped, whether the process
/// succeeded, failed or was cancelled. With `keep` set it is left on disk for
/// debugging instead.
#[derive(Debug)]
pub struct Sandbox {
  dir: Option<TempDir>,
  path: PathBuf,
  keep: bool,
}

impl Sandbox {
  /// Create a sandbox beneath `parent`, or the system temp dir.
  pub fn create(parent: Option<&Path>, keep: bool) -> Result<Self, ExecutionError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("kiln-sandbox-");

    let dir = match parent {
      Some(parent) => {
        std::fs::create_dir_all(parent).map_err(|e| ExecutionError::Sandbox {
          message: format!("{}: {e}", parent.display()),
        })?;
        builder.tempdir_in(parent)
      }
      None => builder.tempdir(),
    }
    .map_err(|e| ExecutionError::Sandbox { message: e.to_string() })?;

    let path = dir.path().to_path_buf();
    debug!(sandbox = ?path, "created sandbox");
    Ok(Self {
      dir: Some(dir),
      path,
      keep,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Resolve (and create) the working directory inside the sandbox.
  pub fn workdir(&self, working_directory: Option<&str>) -> Result<PathBuf, ExecutionError> {
    let Some(rel) = working_directory else {
      return Ok(self.path.clone());
    };
    let rel = normalize_path(rel).map_err(|e| ExecutionError::Sandbox { message: e.to_string() })?;
    let dir = self.path.join(rel);
    std::fs::create_dir_all(&dir).map_err(|e| ExecutionError::Sandbox {
      message: format!("{}: {e}", dir.display()),
    })?;
    Ok(dir)
  }
}

impl Drop for Sandbox {
  fn drop(&mut self) {
    let Some(dir) = self.dir.take() else {
      return;
    };
    if self.keep {
      let path = dir.keep();
      info!(sandbox = ?path, "preserving sandbox");
    } else {
      debug!(sandbox = ?self.path, "removing sandbox");
      drop(dir);
    }
  }
}
