// src/cache/validate.rs

//! Cache entry validation and corruption healing
//!
//! Decides whether a cache root already holds a usable extracted copy of a
//! package. A usable entry has a parseable `repodata_record.json` that
//! agrees with the identity (url, filename, checksum) and does not carry
//! the legacy corruption signature.
//!
//! The signature: `timestamp == 0` AND `license == ""`, both fields
//! present. Records like that were written by earlier broken
//! implementations that confused placeholder values with authoritative
//! empties. Either condition alone is legitimate upstream metadata; the
//! conjunction never is. A flagged record invalidates the entry so the
//! fetcher re-extracts, letting the archive's own `info/index.json` supply
//! correct values through the merge.

use crate::error::{Error, Result};
use crate::hash;
use crate::identity::PackageIdentity;
use crate::record::RepodataRecord;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::CacheDirectory;

/// Logical state of one package inside one cache root. Computed on
/// demand, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheEntry {
    /// Archive file exists and matches the identity's checksum
    pub archive_present: bool,
    /// Extracted tree exists with a readable `info` subdirectory
    pub extracted_present: bool,
    /// `repodata_record.json` exists and parses
    pub record_present: bool,
    /// Record url / filename / checksum agree with the identity
    pub record_consistent: bool,
    /// Record does not exhibit the legacy corruption signature
    pub record_non_corrupted: bool,
}

/// Outcome of validating one cache root for one package
#[derive(Debug)]
pub enum Validity {
    /// Usable extracted tree; carries the parsed record
    Valid(RepodataRecord),
    /// No extracted tree at all
    Absent,
    /// Tree exists but is unusable and must be re-extracted
    Invalid(String),
}

/// Detect the legacy corruption signature on a raw record document.
///
/// Missing fields are not corruption, and either condition alone is not
/// corruption.
pub fn is_legacy_corrupted(record: &Value) -> bool {
    let timestamp_zero = matches!(record.get("timestamp").and_then(Value::as_u64), Some(0));
    let license_empty = matches!(record.get("license").and_then(Value::as_str), Some(""));
    timestamp_zero && license_empty
}

/// Compute the full entry state for one package in one cache root
pub fn inspect(cache: &CacheDirectory, identity: &PackageIdentity) -> CacheEntry {
    let mut entry = CacheEntry {
        archive_present: archive_is_valid(cache, identity),
        ..CacheEntry::default()
    };

    let Ok(extract_dir) = cache.extract_dir(identity) else {
        return entry;
    };
    entry.extracted_present = extract_dir.join("info").is_dir();
    if !entry.extracted_present {
        return entry;
    }

    let Ok(record_path) = cache.record_path(identity) else {
        return entry;
    };
    let Some(raw) = read_raw_record(&record_path) else {
        return entry;
    };
    entry.record_present = true;
    entry.record_non_corrupted = !is_legacy_corrupted(&raw);

    if let Ok(record) = serde_json::from_value::<RepodataRecord>(raw) {
        entry.record_consistent = record_matches_identity(&record, identity);
    }

    entry
}

/// Decide whether this cache root already holds a usable extracted copy
pub fn validate_extracted(cache: &CacheDirectory, identity: &PackageIdentity) -> Validity {
    let Ok(extract_dir) = cache.extract_dir(identity) else {
        return Validity::Invalid("unrecognized archive filename".to_string());
    };
    if !extract_dir.exists() {
        return Validity::Absent;
    }

    let Ok(record_path) = cache.record_path(identity) else {
        return Validity::Invalid("unrecognized archive filename".to_string());
    };
    let Some(raw) = read_raw_record(&record_path) else {
        return Validity::Invalid("missing or unparseable repodata record".to_string());
    };

    if is_legacy_corrupted(&raw) {
        warn!(
            "cache entry {} carries the legacy corruption signature, forcing re-extraction",
            extract_dir.display()
        );
        return Validity::Invalid("legacy-corrupted repodata record".to_string());
    }

    let record: RepodataRecord = match serde_json::from_value(raw) {
        Ok(record) => record,
        Err(e) => return Validity::Invalid(format!("malformed repodata record: {e}")),
    };

    if !record_matches_identity(&record, identity) {
        return Validity::Invalid("repodata record does not match the requested package".to_string());
    }

    debug!("cache hit: {}", extract_dir.display());
    Validity::Valid(record)
}

/// Whether the cache holds a usable archive file for this package: the
/// checksum must verify when the identity carries one, otherwise any
/// nonzero file is accepted (there is nothing to compare against).
pub fn archive_is_valid(cache: &CacheDirectory, identity: &PackageIdentity) -> bool {
    let path = cache.archive_path(identity);
    let Ok(meta) = fs::metadata(&path) else {
        return false;
    };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }

    match identity.checksum() {
        Some(expected) => match hash::verify_file(&path, expected) {
            Ok(()) => true,
            Err(e) => {
                debug!("cached archive {} rejected: {e}", path.display());
                false
            }
        },
        None => true,
    }
}

/// Load a cache entry's record without healing rights.
///
/// Read-only consumers (listing installed packages, re-deriving an
/// identity) get `CacheCorrupt` where a fetcher would re-extract instead.
pub fn read_record(cache: &CacheDirectory, identity: &PackageIdentity) -> Result<RepodataRecord> {
    let path = cache.record_path(identity)?;
    let raw: Value = serde_json::from_slice(&fs::read(&path)?)?;
    if is_legacy_corrupted(&raw) {
        return Err(Error::CacheCorrupt(identity.filename.clone()));
    }
    Ok(serde_json::from_value(raw)?)
}

fn read_raw_record(path: &Path) -> Option<Value> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Record/identity agreement: url and filename must match, and when the
/// identity carries a checksum at least one of them must match too.
fn record_matches_identity(record: &RepodataRecord, identity: &PackageIdentity) -> bool {
    if record.url != identity.package_url || record.filename != identity.filename {
        return false;
    }

    let md5_matches = identity
        .md5
        .as_deref()
        .is_some_and(|h| !record.md5.is_empty() && record.md5.eq_ignore_ascii_case(h));
    let sha256_matches = identity
        .sha256
        .as_deref()
        .is_some_and(|h| !record.sha256.is_empty() && record.sha256.eq_ignore_ascii_case(h));

    if identity.md5.is_none() && identity.sha256.is_none() {
        // Nothing to compare against
        return true;
    }
    md5_matches || sha256_matches
}
