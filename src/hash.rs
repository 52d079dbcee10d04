// src/hash.rs

//! Streaming checksums for archive verification
//!
//! Conda metadata carries two digests: MD5 (legacy, still embedded in URL
//! fragments and repodata) and SHA-256. Both are computed by streaming the
//! file, never by loading it into memory.

use crate::error::{Error, Result};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Buffer size for streaming hash computation (8 KB)
const HASH_BUFFER_SIZE: usize = 8192;

/// Digest algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5 (128-bit). Legacy, kept for URL fragments and old repodata.
    Md5,
    /// SHA-256 (256-bit). Preferred when both are available.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Digest length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Algorithm name as used in record keys
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Classify a hex digest by its length (32 = md5, 64 = sha256)
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let state = match algorithm {
            ChecksumAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(h) => format!("{:x}", h.finalize()),
            HasherState::Sha256(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Hash all data from a reader
pub fn hash_reader<R: Read>(algorithm: ChecksumAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file by streaming its content
pub fn hash_file(algorithm: ChecksumAlgorithm, path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    Ok(hash_reader(algorithm, &mut file)?)
}

/// Hash a byte slice (convenience, mostly for tests and small payloads)
pub fn hash_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Verify a file against an expected hex digest.
///
/// The algorithm is inferred from the digest length. Comparison is
/// case-insensitive.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let algorithm = ChecksumAlgorithm::from_hex_len(expected.len()).ok_or_else(|| {
        Error::InvalidIdentity(format!(
            "checksum {expected:?} is neither a 32- nor 64-char hex digest"
        ))
    })?;

    let actual = hash_file(algorithm, path)?;
    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
