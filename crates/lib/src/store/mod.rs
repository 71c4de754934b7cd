//! Content-addressed digest store.
//!
//! The store maps digests to immutable content. Files are stored as blobs;
//! directories are stored as directory nodes (see [`tree`]). All operations
//! are pure functions of content: storing the same bytes twice yields the
//! same digest and writes nothing new.
//!
//! Backends are pluggable through [`BlobStore`]; [`LocalBlobStore`] persists
//! under a directory, [`MemoryBlobStore`] keeps everything in process.

pub mod blob;
pub mod digest;
pub mod fs;
pub mod tree;
pub mod types;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

pub use blob::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use digest::{Digest, EMPTY_DIGEST, EMPTY_FILE_DIGEST};
pub use tree::{DirectoryNode, Entry, FileEntry, FlatTree};
pub use types::{CreateDigest, DigestContents, FileContent, MergeDigests, Snapshot, StoreError, normalize_path};

use crate::util::hash::Fingerprint;

/// Handle to a digest store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Store {
  blobs: Arc<dyn BlobStore>,
}

impl Store {
  /// Open an on-disk store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    Ok(Self::with_backend(Arc::new(LocalBlobStore::open(root)?)))
  }

  /// Create an ephemeral in-memory store.
  pub fn in_memory() -> Self {
    Self::with_backend(Arc::new(MemoryBlobStore::new()))
  }

  pub fn with_backend(blobs: Arc<dyn BlobStore>) -> Self {
    Self { blobs }
  }

  /// On-disk root of the store, if it is backed by a directory.
  pub fn root(&self) -> Option<&Path> {
    self.blobs.root()
  }

  /// Store raw bytes, returning their digest.
  pub fn store_bytes(&self, bytes: &[u8]) -> Result<Digest, StoreError> {
    let digest = Digest::of_bytes(bytes);
    self.blobs.put(digest.fingerprint, bytes)?;
    Ok(digest)
  }

  /// Load raw bytes, verifying them against the digest.
  pub fn load_bytes(&self, digest: Digest) -> Result<Arc<[u8]>, StoreError> {
    let bytes = self
      .blobs
      .get(&digest.fingerprint)?
      .ok_or(StoreError::NotFound(digest))?;

    if bytes.len() != digest.size_bytes {
      return Err(StoreError::Corrupt {
        digest,
        message: format!("expected {} bytes, found {}", digest.size_bytes, bytes.len()),
      });
    }
    if Fingerprint::of(&bytes) != digest.fingerprint {
      return Err(StoreError::Corrupt {
        digest,
        message: "fingerprint mismatch".to_string(),
      });
    }
    Ok(bytes)
  }

  /// Whether the store holds the object named by `digest`.
  pub fn contains(&self, digest: Digest) -> Result<bool, StoreError> {
    if digest == *EMPTY_DIGEST {
      return Ok(true);
    }
    self.blobs.contains(&digest.fingerprint)
  }

  /// Whether every object reachable from a tree digest is present.
  pub fn contains_tree(&self, digest: Digest) -> Result<bool, StoreError> {
    let tree = match self.flatten(digest) {
      Ok(tree) => tree,
      Err(StoreError::NotFound(_)) => return Ok(false),
      Err(e) => return Err(e),
    };
    for file in tree.files.values() {
      if !self.contains(file.digest)? {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Build a directory tree out of file contents.
  ///
  /// Two entries for the same path with different content collide.
  pub fn create_digest(&self, files: &[FileContent]) -> Result<Digest, StoreError> {
    let mut tree = FlatTree::default();
    for file in files {
      let digest = self.store_bytes(&file.content)?;
      tree.insert_file(
        &file.path,
        FileEntry {
          digest,
          is_executable: file.is_executable,
        },
      )?;
    }
    self.build_tree(&tree)
  }

  /// Load every file of a tree, sorted by path.
  pub fn load(&self, digest: Digest) -> Result<Vec<FileContent>, StoreError> {
    let tree = self.flatten(digest)?;
    let mut files = Vec::with_capacity(tree.files.len());
    for (path, entry) in tree.files {
      let content = self.load_bytes(entry.digest)?;
      files.push(FileContent {
        path,
        content: content.to_vec(),
        is_executable: entry.is_executable,
      });
    }
    Ok(files)
  }

  /// Load the content of a single file within a tree.
  pub fn load_file(&self, digest: Digest, path: &str) -> Result<Arc<[u8]>, StoreError> {
    let path = normalize_path(path)?;
    let tree = self.flatten(digest)?;
    let entry = tree.files.get(&path).ok_or_else(|| StoreError::InvalidPath {
      path: path.clone(),
      message: format!("no such file in {digest}"),
    })?;
    self.load_bytes(entry.digest)
  }

  /// Merge several trees into one.
  ///
  /// Fails with [`StoreError::Collision`] when two inputs hold different
  /// content at the same path.
  pub fn merge(&self, digests: &[Digest]) -> Result<Digest, StoreError> {
    match digests {
      [] => return Ok(*EMPTY_DIGEST),
      [single] => {
        self.load_directory_node(*single)?;
        return Ok(*single);
      }
      _ => {}
    }

    let mut merged = FlatTree::default();
    for digest in digests {
      merged.merge(self.flatten(*digest)?)?;
    }
    let digest = self.build_tree(&merged)?;
    debug!(inputs = digests.len(), digest = %digest, "merged digests");
    Ok(digest)
  }

  /// List the files and directories of a tree.
  pub fn snapshot(&self, digest: Digest) -> Result<Snapshot, StoreError> {
    let tree = self.flatten(digest)?;
    Ok(Snapshot {
      digest,
      files: tree.files.into_keys().collect(),
      dirs: tree.dirs.into_iter().collect(),
    })
  }

  /// Nest a tree under `prefix`.
  pub fn add_prefix(&self, digest: Digest, prefix: &str) -> Result<Digest, StoreError> {
    let prefix = normalize_path(prefix)?;
    let tree = self.flatten(digest)?;
    let mut prefixed = FlatTree::default();
    prefixed.insert_dir(&prefix)?;
    for dir in tree.dirs {
      prefixed.insert_dir(&format!("{prefix}/{dir}"))?;
    }
    for (path, entry) in tree.files {
      prefixed.insert_file(&format!("{prefix}/{path}"), entry)?;
    }
    self.build_tree(&prefixed)
  }

  /// Select part of a tree.
  ///
  /// `files` names individual files; `dirs` names directories that are kept
  /// with everything beneath them. Paths that do not exist are skipped.
  pub fn subset(&self, digest: Digest, files: &BTreeSet<String>, dirs: &BTreeSet<String>) -> Result<Digest, StoreError> {
    let tree = self.flatten(digest)?;
    let files = files
      .iter()
      .map(|p| normalize_path(p))
      .collect::<Result<BTreeSet<_>, _>>()?;
    let dirs = dirs
      .iter()
      .map(|p| normalize_path(p))
      .collect::<Result<BTreeSet<_>, _>>()?;

    let under_selected_dir = |path: &str| {
      dirs
        .iter()
        .any(|d| path == d || path.strip_prefix(d.as_str()).is_some_and(|r| r.starts_with('/')))
    };

    let mut selected = FlatTree::default();
    for dir in &tree.dirs {
      if under_selected_dir(dir) {
        selected.insert_dir(dir)?;
      }
    }
    for (path, entry) in &tree.files {
      if files.contains(path) || under_selected_dir(path) {
        selected.insert_file(path, *entry)?;
      }
    }
    self.build_tree(&selected)
  }
}
