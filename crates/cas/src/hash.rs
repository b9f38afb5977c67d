//! ContentHash: a lowercase-hex content hash with directory sharding helpers.
//!
//! Two algorithms are supported: BLAKE3 truncated to 128 bits (32 hex chars,
//! the default - fast and plenty for content addressing) and full SHA-256
//! (64 hex chars). The algorithm is fixed per pool via configuration;
//! a pool written with one algorithm is incompatible with the other and
//! there is deliberately no migration logic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Hash algorithm used for content addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 truncated to 128 bits (32 hex chars).
    #[default]
    Blake3,
    /// SHA-256, full 256 bits (64 hex chars).
    Sha256,
}

impl HashAlgorithm {
    /// Expected hex length of a hash produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Blake3 => 32,
            HashAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Blake3 => write!(f, "blake3"),
            HashAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            other => Err(HashError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Errors that can occur when working with content hashes.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid hash length: expected 32 or 64 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,

    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// A content hash as lowercase hex.
///
/// The first two characters are used as a shard directory, the remainder
/// as the object filename (`objects/ab/cdef...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash data with the given algorithm.
    pub fn from_data(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = IncrementalHasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }

    /// Create from an existing hash string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.len() != 32 && s.len() != 64 {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Get the first 2 characters (used for directory sharding).
    pub fn prefix(&self) -> &str {
        &self.0[0..2]
    }

    /// Get the remainder after the prefix (used as filename).
    pub fn remainder(&self) -> &str {
        &self.0[2..]
    }

    /// Get the full hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental hasher for streaming large files without buffering them.
pub struct IncrementalHasher {
    inner: HasherInner,
}

enum HasherInner {
    Blake3(blake3::Hasher),
    Sha256(Sha256),
}

impl IncrementalHasher {
    /// Start a new hash computation.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Blake3 => HasherInner::Blake3(blake3::Hasher::new()),
            HashAlgorithm::Sha256 => HasherInner::Sha256(Sha256::new()),
        };
        Self { inner }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            HasherInner::Blake3(h) => {
                h.update(data);
            }
            HasherInner::Sha256(h) => h.update(data),
        }
    }

    /// Finish and produce the content hash.
    pub fn finish(self) -> ContentHash {
        match self.inner {
            HasherInner::Blake3(h) => {
                let digest = h.finalize();
                // Truncate to 16 bytes (128 bits)
                ContentHash(hex::encode(&digest.as_bytes()[..16]))
            }
            HasherInner::Sha256(h) => ContentHash(hex::encode(h.finalize())),
        }
    }
}
