//! Hashing utilities for content-addressed storage and cache keys.
//!
//! This module provides:
//! - `Fingerprint`: a full SHA-256 fingerprint with hex formatting
//! - `Hashable`: stable fingerprints of serializable values (cache keys)
//! - `hash_bytes()`: arbitrary byte hashing

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

pub type HashError = serde_json::Error;

/// Length in bytes of a SHA-256 fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// A SHA-256 fingerprint of some content.
///
/// Displayed and serialized as a 64-character lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
  /// Fingerprint of the given bytes.
  pub fn of(data: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Fingerprint(hasher.finalize().into())
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }

  pub fn from_hex(s: &str) -> Result<Self, FingerprintParseError> {
    let bytes = hex::decode(s).map_err(|e| FingerprintParseError::InvalidHex {
      input: s.to_string(),
      message: e.to_string(),
    })?;
    let array: [u8; FINGERPRINT_LEN] = bytes
      .try_into()
      .map_err(|bytes: Vec<u8>| FingerprintParseError::WrongLength {
        input: s.to_string(),
        len: bytes.len(),
      })?;
    Ok(Fingerprint(array))
  }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_hex())
  }
}

impl fmt::Debug for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Fingerprint({})", self.to_hex())
  }
}

impl FromStr for Fingerprint {
  type Err = FingerprintParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Fingerprint::from_hex(s)
  }
}

impl Serialize for Fingerprint {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Fingerprint {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    Fingerprint::from_hex(&s).map_err(serde::de::Error::custom)
  }
}

/// Error parsing a fingerprint from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintParseError {
  #[error("invalid hex in fingerprint {input}: {message}")]
  InvalidHex { input: String, message: String },

  #[error("fingerprint {input} has {len} bytes, expected 32")]
  WrongLength { input: String, len: usize },
}

/// Values that can be fingerprinted through their JSON serialization.
///
/// Serialization must be deterministic (use `BTreeMap`/`BTreeSet` for maps
/// and sets) for the fingerprint to be a stable cache key.
pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<Fingerprint, HashError> {
    let serialized = serde_json::to_vec(self)?;
    Ok(Fingerprint::of(&serialized))
  }
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> Fingerprint {
  Fingerprint::of(data)
}
