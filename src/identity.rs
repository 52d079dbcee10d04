// src/identity.rs

//! Package identity with per-field trust
//!
//! A `PackageIdentity` describes one package as known by the caller, before
//! the archive has been opened. Identities come from three places: an
//! explicit URL (or lockfile line), a solver result, or a cache record
//! being re-read. The three paths differ in how much they actually know,
//! and that difference is recorded explicitly in `defaulted_keys` rather
//! than inferred from empty values: an empty `depends` from a repodata
//! patch is authoritative, an empty `depends` from a URL is a placeholder.

use crate::error::{Error, Result};
use crate::record::RepodataRecord;
use std::collections::BTreeSet;
use url::Url;

/// Fields a URL cannot provide. URL-sourced identities stub all of these
/// and name them in `defaulted_keys`.
pub const SOLVER_DERIVED_FIELDS: [&str; 9] = [
    "build_number",
    "license",
    "timestamp",
    "track_features",
    "size",
    "depends",
    "constrains",
    "noarch",
    "python_site_packages_path",
];

/// Archive extensions the cache understands
pub const ARCHIVE_EXTENSIONS: [&str; 2] = [".conda", ".tar.bz2"];

/// Platform directory names recognized when splitting channel from subdir
const KNOWN_SUBDIRS: [&str; 19] = [
    "noarch",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-riscv64",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "zos-z",
    "emscripten-wasm32",
    "wasi-wasm32",
    "freebsd-64",
];

/// One package as known by the caller, with per-field trust.
///
/// Treated as immutable after construction: enrichment produces a new
/// identity, nothing mutates one in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
    pub build_string: String,
    /// Archive filename, e.g. `pkg-1.0-abc.conda`
    pub filename: String,
    /// Platform directory, e.g. `linux-64`; empty when unknown
    pub subdir: String,
    /// Channel URL up to (excluding) the subdir segment
    pub channel: String,
    /// Full download URL without fragment
    pub package_url: String,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    pub build_number: u64,
    pub license: String,
    pub timestamp: u64,
    pub track_features: String,
    pub size: u64,
    pub depends: Vec<String>,
    pub constrains: Vec<String>,
    pub noarch: Option<String>,
    pub python_site_packages_path: Option<String>,
    /// Names of fields filled with placeholders because the construction
    /// path could not obtain them. A field not named here is authoritative
    /// even when its value is empty or zero.
    pub defaulted_keys: BTreeSet<String>,
}

impl PackageIdentity {
    /// Parse an identity from an explicit package URL.
    ///
    /// The filename must carry a recognized archive extension and parse as
    /// `<name>-<version>-<build_string>`. A `#<hex>` fragment is read as a
    /// checksum: 32 hex chars mean md5, 64 mean sha256. All
    /// solver-derivable fields are stubbed and recorded in
    /// `defaulted_keys`.
    pub fn from_url(raw_url: &str) -> Result<Self> {
        let mut url = Url::parse(raw_url)
            .map_err(|e| Error::InvalidIdentity(format!("unparseable url {raw_url:?}: {e}")))?;

        let fragment = url.fragment().map(str::to_string);
        url.set_fragment(None);

        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let filename = segments
            .last()
            .cloned()
            .ok_or_else(|| Error::InvalidIdentity(format!("url {raw_url:?} has no filename")))?;

        let (name, version, build_string) = parse_archive_filename(&filename)?;

        // Channel/subdir split: the parent directory is the subdir only
        // when it names a known platform.
        let parent = if segments.len() >= 2 {
            segments[segments.len() - 2].as_str()
        } else {
            ""
        };
        let subdir = if KNOWN_SUBDIRS.contains(&parent) {
            parent.to_string()
        } else {
            String::new()
        };

        let mut channel_url = url.clone();
        if let Ok(mut path) = channel_url.path_segments_mut() {
            path.pop();
            if !subdir.is_empty() {
                path.pop();
            }
        }
        let channel = channel_url.to_string().trim_end_matches('/').to_string();

        let (md5, sha256) = match fragment.as_deref() {
            None | Some("") => (None, None),
            Some(frag) => parse_hash_fragment(frag)?,
        };

        Ok(Self {
            name,
            version,
            build_string,
            filename,
            subdir,
            channel,
            package_url: url.to_string(),
            md5,
            sha256,
            defaulted_keys: SOLVER_DERIVED_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Self::default()
        })
    }

    /// Rebuild an identity from a cache record.
    ///
    /// Every field present in the record is authoritative, so
    /// `defaulted_keys` is empty. Checksums that round-tripped as empty
    /// strings count as not carried.
    ///
    /// Exception: a record carrying the legacy corruption signature
    /// (`timestamp == 0` and `license == ""`) was written by a broken
    /// implementation that stored placeholders as if they were real
    /// values. Its metadata fields are marked as stubs so a re-merge
    /// against the archive index heals them instead of preserving the
    /// corruption.
    pub fn from_record(record: &RepodataRecord) -> Self {
        let defaulted_keys = if record.timestamp == 0 && record.license.is_empty() {
            SOLVER_DERIVED_FIELDS.iter().map(|s| s.to_string()).collect()
        } else {
            BTreeSet::new()
        };
        Self {
            name: record.name.clone(),
            version: record.version.clone(),
            build_string: record.build_string.clone(),
            filename: record.filename.clone(),
            subdir: record.subdir.clone(),
            channel: record.channel.clone(),
            package_url: record.url.clone(),
            md5: non_empty(&record.md5),
            sha256: non_empty(&record.sha256),
            build_number: record.build_number,
            license: record.license.clone(),
            timestamp: record.timestamp,
            track_features: record.track_features.clone(),
            size: record.size,
            depends: record.depends.clone(),
            constrains: record.constrains.clone(),
            noarch: record.noarch.clone(),
            python_site_packages_path: record.python_site_packages_path.clone(),
            defaulted_keys,
        }
    }

    /// Whether `field` was filled with a placeholder by construction
    pub fn is_stub(&self, field: &str) -> bool {
        self.defaulted_keys.contains(field)
    }

    /// Best available checksum, preferring sha256
    pub fn checksum(&self) -> Option<&str> {
        self.sha256.as_deref().or(self.md5.as_deref())
    }

    /// Archive directory name: the filename minus its archive extension
    pub fn extract_dir_name(&self) -> Result<String> {
        strip_archive_extension(&self.filename)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Strip a recognized archive extension, or fail
pub fn strip_archive_extension(filename: &str) -> Result<String> {
    for ext in ARCHIVE_EXTENSIONS {
        if let Some(stem) = filename.strip_suffix(ext) {
            if !stem.is_empty() {
                return Ok(stem.to_string());
            }
        }
    }
    Err(Error::InvalidIdentity(format!(
        "filename {filename:?} does not end in a recognized archive extension"
    )))
}

/// Parse `<name>-<version>-<build_string><ext>`. The name may itself
/// contain dashes, so version and build are split from the right.
fn parse_archive_filename(filename: &str) -> Result<(String, String, String)> {
    let stem = strip_archive_extension(filename)?;

    let mut parts = stem.rsplitn(3, '-');
    let build_string = parts.next().unwrap_or_default();
    let version = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();

    if name.is_empty() || version.is_empty() || build_string.is_empty() {
        return Err(Error::InvalidIdentity(format!(
            "filename {filename:?} does not parse as <name>-<version>-<build>"
        )));
    }

    Ok((name.to_string(), version.to_string(), build_string.to_string()))
}

/// Classify a URL hash fragment by length: 32 hex chars = md5, 64 = sha256
fn parse_hash_fragment(fragment: &str) -> Result<(Option<String>, Option<String>)> {
    let hex = fragment.to_lowercase();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidIdentity(format!(
            "url fragment {fragment:?} is not a hex checksum"
        )));
    }
    match hex.len() {
        32 => Ok((Some(hex), None)),
        64 => Ok((None, Some(hex))),
        _ => Err(Error::InvalidIdentity(format!(
            "url fragment {fragment:?} has neither md5 nor sha256 length"
        ))),
    }
}
