//! Directory trees in the store.
//!
//! A directory is stored as a node blob: the canonical JSON encoding of its
//! entries, keyed by name. Since entries are sorted and refer to children by
//! digest, a directory's digest is a deterministic function of its children's
//! digests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::store::Store;
use crate::store::digest::{Digest, EMPTY_DIGEST};
use crate::store::types::{StoreError, normalize_path};

/// One entry of a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
  File { digest: Digest, is_executable: bool },
  Directory { digest: Digest },
}

/// A single directory level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
  pub entries: BTreeMap<String, Entry>,
}

impl DirectoryNode {
  /// Canonical encoding of the node.
  pub fn to_bytes(&self) -> Vec<u8> {
    // BTreeMap keys serialize in order; a map of plain data cannot fail.
    serde_json::to_vec(self).unwrap_or_default()
  }

  pub fn digest(&self) -> Digest {
    Digest::of_bytes(&self.to_bytes())
  }
}

/// A file in a flattened tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
  pub digest: Digest,
  pub is_executable: bool,
}

/// A tree flattened to full paths.
///
/// `dirs` holds every directory path, including intermediate ones, so that
/// empty directories survive a flatten/rebuild round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTree {
  pub files: BTreeMap<String, FileEntry>,
  pub dirs: BTreeSet<String>,
}

impl FlatTree {
  /// Add a file, registering its parent directories.
  pub fn insert_file(&mut self, path: &str, entry: FileEntry) -> Result<(), StoreError> {
    let path = normalize_path(path)?;
    if self.dirs.contains(&path) {
      return Err(StoreError::Collision { path });
    }
    if let Some(existing) = self.files.get(&path) {
      if *existing != entry {
        return Err(StoreError::Collision { path });
      }
      return Ok(());
    }
    self.insert_parents(&path)?;
    self.files.insert(path, entry);
    Ok(())
  }

  /// Add a directory (and its parents).
  pub fn insert_dir(&mut self, path: &str) -> Result<(), StoreError> {
    let path = normalize_path(path)?;
    if self.files.contains_key(&path) {
      return Err(StoreError::Collision { path });
    }
    self.insert_parents(&path)?;
    self.dirs.insert(path);
    Ok(())
  }

  fn insert_parents(&mut self, path: &str) -> Result<(), StoreError> {
    let mut current = String::new();
    let components: Vec<&str> = path.split('/').collect();
    for component in &components[..components.len() - 1] {
      if !current.is_empty() {
        current.push('/');
      }
      current.push_str(component);
      if self.files.contains_key(&current) {
        return Err(StoreError::Collision { path: current });
      }
      self.dirs.insert(current.clone());
    }
    Ok(())
  }

  /// Merge another tree into this one.
  pub fn merge(&mut self, other: FlatTree) -> Result<(), StoreError> {
    for dir in other.dirs {
      self.insert_dir(&dir)?;
    }
    for (path, entry) in other.files {
      self.insert_file(&path, entry)?;
    }
    Ok(())
  }
}

impl Store {
  pub(crate) fn store_directory_node(&self, node: &DirectoryNode) -> Result<Digest, StoreError> {
    self.store_bytes(&node.to_bytes())
  }

  pub(crate) fn load_directory_node(&self, digest: Digest) -> Result<DirectoryNode, StoreError> {
    if digest == *EMPTY_DIGEST {
      return Ok(DirectoryNode::default());
    }
    let bytes = self.load_bytes(digest)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::NotADirectory {
      digest,
      message: e.to_string(),
    })
  }

  /// Flatten a stored tree into full paths.
  pub fn flatten(&self, digest: Digest) -> Result<FlatTree, StoreError> {
    let mut tree = FlatTree::default();
    self.flatten_into(digest, "", &mut tree)?;
    Ok(tree)
  }

  fn flatten_into(&self, digest: Digest, prefix: &str, tree: &mut FlatTree) -> Result<(), StoreError> {
    let node = self.load_directory_node(digest)?;
    for (name, entry) in node.entries {
      let path = if prefix.is_empty() {
        name
      } else {
        format!("{prefix}/{name}")
      };
      match entry {
        Entry::File { digest, is_executable } => {
          tree.files.insert(path, FileEntry { digest, is_executable });
        }
        Entry::Directory { digest } => {
          tree.dirs.insert(path.clone());
          self.flatten_into(digest, &path, tree)?;
        }
      }
    }
    Ok(())
  }

  /// Store a flattened tree, returning the digest of its root directory.
  pub fn build_tree(&self, tree: &FlatTree) -> Result<Digest, StoreError> {
    self.build_level(tree, "")
  }

  fn build_level(&self, tree: &FlatTree, prefix: &str) -> Result<Digest, StoreError> {
    let mut node = DirectoryNode::default();

    for (path, file) in &tree.files {
      if let Some(name) = direct_child(prefix, path) {
        node.entries.insert(
          name.to_string(),
          Entry::File {
            digest: file.digest,
            is_executable: file.is_executable,
          },
        );
      }
    }

    for dir in &tree.dirs {
      if let Some(name) = direct_child(prefix, dir) {
        let digest = self.build_level(tree, dir)?;
        node.entries.insert(name.to_string(), Entry::Directory { digest });
      }
    }

    self.store_directory_node(&node)
  }
}

/// If `path` is an immediate child of `prefix`, return its final component.
fn direct_child<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
  let rest = if prefix.is_empty() {
    path
  } else {
    path.strip_prefix(prefix)?.strip_prefix('/')?
  };
  if rest.is_empty() || rest.contains('/') {
    None
  } else {
    Some(rest)
  }
}
