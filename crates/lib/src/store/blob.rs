//! Blob backends for the digest store.
//!
//! A blob backend maps fingerprints to immutable bytes. The [`Store`] layers
//! file trees on top of it; backends only ever see opaque blobs, which keeps
//! digests location independent (a local directory, process memory, or a
//! remote CAS can all serve the same digest).
//!
//! [`Store`]: crate::store::Store

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::store::types::StoreError;
use crate::util::hash::Fingerprint;

/// Storage backend for content-addressed blobs.
///
/// Implementations must be write-once: storing bytes under a fingerprint that
/// already exists is a no-op.
pub trait BlobStore: Send + Sync + std::fmt::Debug {
  /// Store `bytes` under `fingerprint`.
  fn put(&self, fingerprint: Fingerprint, bytes: &[u8]) -> Result<(), StoreError>;

  /// Load the bytes stored under `fingerprint`, if any.
  fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<[u8]>>, StoreError>;

  /// Whether a blob exists for `fingerprint`.
  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

  /// On-disk root of the backend, if it has one.
  fn root(&self) -> Option<&Path> {
    None
  }
}

/// On-disk blob storage.
///
/// # Layout
///
/// ```text
/// <root>/
/// ├── blobs/
/// │   └── <first two hex chars>/
/// │       └── <full hex fingerprint>
/// └── tmp/                     # staging area for atomic writes
/// ```
#[derive(Debug)]
pub struct LocalBlobStore {
  root: PathBuf,
}

impl LocalBlobStore {
  /// Open (creating if needed) a blob store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    for dir in [root.join("blobs"), root.join("tmp")] {
      fs::create_dir_all(&dir).map_err(|e| StoreError::io("create directory", &dir, e))?;
    }
    Ok(Self { root })
  }

  fn blob_path(&self, fingerprint: &Fingerprint) -> PathBuf {
    let hex = fingerprint.to_hex();
    self.root.join("blobs").join(&hex[..2]).join(hex)
  }
}

impl BlobStore for LocalBlobStore {
  fn put(&self, fingerprint: Fingerprint, bytes: &[u8]) -> Result<(), StoreError> {
    let path = self.blob_path(&fingerprint);
    if path.exists() {
      return Ok(());
    }

    let Some(parent) = path.parent() else {
      return Err(StoreError::InvalidPath {
        path: path.display().to_string(),
        message: "blob path has no parent".to_string(),
      });
    };
    fs::create_dir_all(parent).map_err(|e| StoreError::io("create directory", parent, e))?;

    // Stage in tmp/ and rename so readers never observe a partial blob.
    let staging = self.root.join("tmp");
    let mut file = NamedTempFile::new_in(&staging).map_err(|e| StoreError::io("create temp file in", &staging, e))?;
    file
      .write_all(bytes)
      .map_err(|e| StoreError::io("write", file.path(), e))?;
    file
      .persist(&path)
      .map_err(|e| StoreError::io("persist", &path, e.error))?;

    debug!(fingerprint = %fingerprint, size = bytes.len(), "stored blob");
    Ok(())
  }

  fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<[u8]>>, StoreError> {
    let path = self.blob_path(fingerprint);
    match fs::read(&path) {
      Ok(bytes) => Ok(Some(Arc::from(bytes))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(StoreError::io("read", &path, e)),
    }
  }

  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    Ok(self.blob_path(fingerprint).exists())
  }

  fn root(&self) -> Option<&Path> {
    Some(&self.root)
  }
}

/// In-process blob storage, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
  blobs: RwLock<HashMap<Fingerprint, Arc<[u8]>>>,
}

impl MemoryBlobStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of distinct blobs held.
  pub fn len(&self) -> usize {
    self.blobs.read().map(|b| b.len()).unwrap_or_default()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl BlobStore for MemoryBlobStore {
  fn put(&self, fingerprint: Fingerprint, bytes: &[u8]) -> Result<(), StoreError> {
    let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
    blobs.entry(fingerprint).or_insert_with(|| Arc::from(bytes));
    Ok(())
  }

  fn get(&self, fingerprint: &Fingerprint) -> Result<Option<Arc<[u8]>>, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    Ok(blobs.get(fingerprint).cloned())
  }

  fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
    let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
    Ok(blobs.contains_key(fingerprint))
  }
}
