//! Moving trees between the store and the filesystem.
//!
//! Used by the process executor to materialize sandbox inputs and capture
//! declared outputs, and by the CLI to snapshot a directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::store::Store;
use crate::store::digest::Digest;
use crate::store::tree::{FileEntry, FlatTree};
use crate::store::types::{StoreError, normalize_path};

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
  use std::os::unix::fs::PermissionsExt;
  metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
  false
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), StoreError> {
  use std::os::unix::fs::PermissionsExt;
  fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| StoreError::io("chmod", path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), StoreError> {
  Ok(())
}

/// Relative `/`-separated form of `path` under `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let parts: Vec<String> = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  if parts.is_empty() { None } else { Some(parts.join("/")) }
}

impl Store {
  /// Write the tree named by `digest` beneath `dest`.
  ///
  /// `dest` is created if missing. Existing files at the same paths are
  /// overwritten.
  pub fn materialize(&self, digest: Digest, dest: &Path) -> Result<(), StoreError> {
    let tree = self.flatten(digest)?;
    fs::create_dir_all(dest).map_err(|e| StoreError::io("create directory", dest, e))?;

    for dir in &tree.dirs {
      let path = dest.join(dir);
      fs::create_dir_all(&path).map_err(|e| StoreError::io("create directory", &path, e))?;
    }

    for (rel, entry) in &tree.files {
      let path = dest.join(rel);
      let content = self.load_bytes(entry.digest)?;
      fs::write(&path, &content).map_err(|e| StoreError::io("write", &path, e))?;
      if entry.is_executable {
        set_executable(&path)?;
      }
    }

    debug!(digest = %digest, dest = ?dest, files = tree.files.len(), "materialized digest");
    Ok(())
  }

  /// Capture an entire directory into the store.
  pub fn capture_directory(&self, root: &Path) -> Result<Digest, StoreError> {
    let mut tree = FlatTree::default();
    self.capture_walk(root, root, &mut tree)?;
    self.build_tree(&tree)
  }

  /// Capture selected paths beneath `root`.
  ///
  /// `files` are individual files, `dirs` are directories captured with all
  /// their content. Declared paths that do not exist are skipped.
  pub fn capture_paths(&self, root: &Path, files: &BTreeSet<String>, dirs: &BTreeSet<String>) -> Result<Digest, StoreError> {
    let mut tree = FlatTree::default();

    for rel in files {
      let rel = normalize_path(rel)?;
      let path = root.join(&rel);
      match fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => {
          let entry = self.capture_file(&path, &metadata)?;
          tree.insert_file(&rel, entry)?;
        }
        Ok(_) => debug!(path = %rel, "declared output file is not a regular file, skipping"),
        Err(_) => debug!(path = %rel, "declared output file missing, skipping"),
      }
    }

    for rel in dirs {
      let rel = normalize_path(rel)?;
      let path = root.join(&rel);
      if path.is_dir() {
        tree.insert_dir(&rel)?;
        self.capture_walk(root, &path, &mut tree)?;
      } else {
        debug!(path = %rel, "declared output directory missing, skipping");
      }
    }

    self.build_tree(&tree)
  }

  fn capture_file(&self, path: &Path, metadata: &fs::Metadata) -> Result<FileEntry, StoreError> {
    let content = fs::read(path).map_err(|e| StoreError::io("read", path, e))?;
    let digest = self.store_bytes(&content)?;
    Ok(FileEntry {
      digest,
      is_executable: is_executable(metadata),
    })
  }

  fn capture_walk(&self, root: &Path, start: &Path, tree: &mut FlatTree) -> Result<(), StoreError> {
    for entry in WalkDir::new(start).follow_links(true).sort_by_file_name() {
      let entry = entry.map_err(|e| StoreError::Io {
        action: "walk".to_string(),
        path: start.display().to_string(),
        message: e.to_string(),
      })?;

      let Some(rel) = relative_path(root, entry.path()) else {
        continue;
      };

      let file_type = entry.file_type();
      if file_type.is_dir() {
        tree.insert_dir(&rel)?;
      } else if file_type.is_file() {
        let metadata = entry.metadata().map_err(|e| StoreError::Io {
          action: "stat".to_string(),
          path: entry.path().display().to_string(),
          message: e.to_string(),
        })?;
        let file = self.capture_file(entry.path(), &metadata)?;
        tree.insert_file(&rel, file)?;
      }
      // Sockets, devices and dangling links are not representable.
    }
    Ok(())
  }
}
