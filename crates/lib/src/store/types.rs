//! Value types and errors of the digest store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::digest::Digest;

/// Errors produced by store operations.
///
/// Messages are captured as strings so that errors can be cloned into every
/// consumer of a memoized failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
  /// The digest is not present in the store.
  #[error("digest not found in store: {0}")]
  NotFound(Digest),

  /// Two inputs define different content at the same path.
  #[error("conflicting content at path {path}")]
  Collision { path: String },

  /// A relative store path was malformed.
  #[error("invalid path {path:?}: {message}")]
  InvalidPath { path: String, message: String },

  /// A digest string could not be parsed.
  #[error("invalid digest {input:?}: {message}")]
  InvalidDigest { input: String, message: String },

  /// Stored bytes no longer match their digest.
  #[error("stored object {digest} is corrupt: {message}")]
  Corrupt { digest: Digest, message: String },

  /// A digest named a file where a directory was expected, or vice versa.
  #[error("digest {digest} is not a directory: {message}")]
  NotADirectory { digest: Digest, message: String },

  /// Filesystem failure while reading or writing the store.
  #[error("failed to {action} {path}: {message}")]
  Io {
    action: String,
    path: String,
    message: String,
  },
}

impl StoreError {
  pub(crate) fn io(action: &str, path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
    StoreError::Io {
      action: action.to_string(),
      path: path.as_ref().display().to_string(),
      message: err.to_string(),
    }
  }
}

/// The content of a single file, addressed by its relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileContent {
  pub path: String,
  pub content: Vec<u8>,
  #[serde(default)]
  pub is_executable: bool,
}

impl FileContent {
  pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
    Self {
      path: path.into(),
      content: content.into(),
      is_executable: false,
    }
  }

  pub fn executable(mut self) -> Self {
    self.is_executable = true;
    self
  }
}

/// Request to build a directory tree out of file contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreateDigest(pub Vec<FileContent>);

/// Request to merge several directory trees into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeDigests(pub Vec<Digest>);

/// All files of a tree, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DigestContents(pub Vec<FileContent>);

impl DigestContents {
  pub fn get(&self, path: &str) -> Option<&FileContent> {
    self.0.iter().find(|f| f.path == path)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Read-only listing of a stored directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Snapshot {
  pub digest: Digest,
  /// Every file path, sorted.
  pub files: Vec<String>,
  /// Every directory path (including intermediate ones), sorted.
  pub dirs: Vec<String>,
}

impl Snapshot {
  pub fn is_empty(&self) -> bool {
    self.files.is_empty() && self.dirs.is_empty()
  }
}

/// Normalize a relative, `/`-separated path.
///
/// Empty and `.` components are dropped. Absolute paths and `..` components
/// are rejected, as is a path that normalizes to nothing.
pub fn normalize_path(path: &str) -> Result<String, StoreError> {
  let invalid = |message: &str| StoreError::InvalidPath {
    path: path.to_string(),
    message: message.to_string(),
  };

  if path.starts_with('/') || path.starts_with('\\') {
    return Err(invalid("absolute paths are not allowed"));
  }

  let mut parts = Vec::new();
  for component in path.split('/') {
    match component {
      "" | "." => continue,
      ".." => return Err(invalid("parent components are not allowed")),
      other => parts.push(other),
    }
  }

  if parts.is_empty() {
    return Err(invalid("path is empty"));
  }

  Ok(parts.join("/"))
}
