//! Digests: location-independent identifiers of stored content.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::store::tree::DirectoryNode;
use crate::store::types::StoreError;
use crate::util::hash::Fingerprint;

/// A content fingerprint plus the size of the fingerprinted bytes.
///
/// Identifies either a file blob or a directory node. Two equal digests
/// always denote the same bytes, wherever they are stored.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest {
  pub fingerprint: Fingerprint,
  pub size_bytes: usize,
}

impl Digest {
  pub fn new(fingerprint: Fingerprint, size_bytes: usize) -> Self {
    Self {
      fingerprint,
      size_bytes,
    }
  }

  /// Digest of the given bytes.
  pub fn of_bytes(bytes: &[u8]) -> Self {
    Self::new(Fingerprint::of(bytes), bytes.len())
  }
}

/// Digest of the empty directory.
pub static EMPTY_DIGEST: LazyLock<Digest> = LazyLock::new(|| DirectoryNode::default().digest());

/// Digest of the empty file.
pub static EMPTY_FILE_DIGEST: LazyLock<Digest> = LazyLock::new(|| Digest::of_bytes(&[]));

impl fmt::Display for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.fingerprint, self.size_bytes)
  }
}

impl fmt::Debug for Digest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Digest({}/{})", self.fingerprint, self.size_bytes)
  }
}

impl FromStr for Digest {
  type Err = StoreError;

  /// Parses the `<hex>/<size>` form produced by `Display`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = |message: String| StoreError::InvalidDigest {
      input: s.to_string(),
      message,
    };
    let (hex, size) = s
      .split_once('/')
      .ok_or_else(|| invalid("expected <fingerprint>/<size>".to_string()))?;
    let fingerprint = Fingerprint::from_hex(hex).map_err(|e| invalid(e.to_string()))?;
    let size_bytes = size.parse::<usize>().map_err(|e| invalid(e.to_string()))?;
    Ok(Digest::new(fingerprint, size_bytes))
  }
}
