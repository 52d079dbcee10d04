// src/cache/mod.rs

//! Package cache directories
//!
//! A cache root is one filesystem directory holding downloaded archives
//! next to their extracted trees. For an archive `pkg-1.0-abc.conda` the
//! layout is:
//!
//! ```text
//! <root>/pkg-1.0-abc.conda            the archive
//! <root>/pkg-1.0-abc/                 the extracted tree
//! <root>/pkg-1.0-abc/info/index.json  archive-embedded metadata
//! <root>/pkg-1.0-abc/info/repodata_record.json   written after extraction
//! <root>/pkg-1.0-abc/.mamba_extract_lock         advisory sentinel
//! ```
//!
//! `MultiCache` is an ordered list of roots: reads consult every root in
//! order, writes go to the first writable one.

mod validate;

pub use validate::{
    archive_is_valid, inspect, is_legacy_corrupted, read_record, validate_extracted, CacheEntry,
    Validity,
};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::identity::PackageIdentity;
use crate::record::RepodataRecord;
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Name of the advisory lock sentinel inside an extracted tree
pub const EXTRACT_LOCK_NAME: &str = ".mamba_extract_lock";

/// One cache root with its filename conventions
#[derive(Debug, Clone)]
pub struct CacheDirectory {
    root: PathBuf,
    writable: OnceLock<bool>,
}

impl CacheDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the archive file for this package
    pub fn archive_path(&self, identity: &PackageIdentity) -> PathBuf {
        self.root.join(&identity.filename)
    }

    /// Path of the extracted tree (archive filename minus its extension)
    pub fn extract_dir(&self, identity: &PackageIdentity) -> Result<PathBuf> {
        Ok(self.root.join(identity.extract_dir_name()?))
    }

    /// Path of the embedded `info/index.json` inside the extracted tree
    pub fn index_path(&self, identity: &PackageIdentity) -> Result<PathBuf> {
        Ok(self.extract_dir(identity)?.join("info").join("index.json"))
    }

    /// Path of the canonical record inside the extracted tree
    pub fn record_path(&self, identity: &PackageIdentity) -> Result<PathBuf> {
        Ok(self
            .extract_dir(identity)?
            .join("info")
            .join("repodata_record.json"))
    }

    /// Path of the advisory extract-lock sentinel
    pub fn lock_path(&self, identity: &PackageIdentity) -> Result<PathBuf> {
        Ok(self.extract_dir(identity)?.join(EXTRACT_LOCK_NAME))
    }

    /// Whether this root accepts writes. Probed once by creating the root
    /// and a scratch file in it; the answer is cached for the lifetime of
    /// the handle.
    pub fn is_writable(&self) -> bool {
        *self.writable.get_or_init(|| {
            if std::fs::create_dir_all(&self.root).is_err() {
                return false;
            }
            match tempfile::Builder::new()
                .prefix(".writable-probe-")
                .tempfile_in(&self.root)
            {
                Ok(_probe) => true,
                Err(e) => {
                    debug!("cache root {} is read-only: {e}", self.root.display());
                    false
                }
            }
        })
    }
}

/// Exclusive advisory lock over an extracted tree, taken before the tree
/// is deleted for re-extraction. Held for the lifetime of the value.
#[derive(Debug)]
pub struct ExtractLock {
    _file: File,
}

impl ExtractLock {
    /// Take the lock, blocking until any other holder releases it
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    /// Try to take the lock; `Ok(None)` means another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Ordered list of cache roots with read-all / write-first-writable
/// semantics
#[derive(Debug, Clone)]
pub struct MultiCache {
    caches: Vec<CacheDirectory>,
}

impl MultiCache {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            caches: roots.into_iter().map(CacheDirectory::new).collect(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.pkgs_dirs.iter().cloned())
    }

    pub fn caches(&self) -> &[CacheDirectory] {
        &self.caches
    }

    /// First root that accepts writes; downloads and extractions land here
    pub fn first_writable(&self) -> Result<&CacheDirectory> {
        self.caches
            .iter()
            .find(|c| c.is_writable())
            .ok_or(Error::NoWritableCache)
    }

    /// First root holding a usable extracted tree for this package
    pub fn find_valid_extracted(
        &self,
        identity: &PackageIdentity,
    ) -> Option<(&CacheDirectory, RepodataRecord)> {
        self.caches.iter().find_map(|cache| {
            match validate_extracted(cache, identity) {
                Validity::Valid(record) => Some((cache, record)),
                _ => None,
            }
        })
    }

    /// First root holding a checksum-valid archive for this package
    pub fn find_valid_archive(&self, identity: &PackageIdentity) -> Option<&CacheDirectory> {
        self.caches
            .iter()
            .find(|cache| archive_is_valid(cache, identity))
    }
}
