// src/record.rs

//! The canonical per-package metadata record
//!
//! `repodata_record.json` is written into each extracted tree and is the
//! single source of truth for downstream installers. Its key names follow
//! the upstream wire format (`build`, `fn`, `url`); struct declaration
//! order doubles as the stable serialization order. Writes are always
//! temp-then-rename so readers see either the previous record or the new
//! one, never a torn file.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

/// Merged package metadata as serialized into the extracted tree.
///
/// Invariants on the written form:
/// - `depends` and `constrains` are always arrays, possibly empty.
/// - `md5` and `sha256` are always present, empty string when unknown.
/// - `track_features` is omitted when empty.
/// - `arch`/`platform` are omitted when the archive index had them null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepodataRecord {
    pub name: String,
    pub version: String,
    #[serde(rename = "build")]
    pub build_string: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub subdir: String,
    #[serde(default)]
    pub channel: String,
    #[serde(rename = "fn", default)]
    pub filename: String,
    #[serde(alias = "package_url", default)]
    pub url: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub license: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub track_features: String,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub constrains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noarch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_site_packages_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl RepodataRecord {
    /// Read a record back from an extracted tree
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Write the record atomically: `<final>.tmp-<rand>` then rename.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            Error::InvalidIdentity(format!("record path {} has no parent", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repodata_record.json");

        let mut temp = tempfile::Builder::new()
            .prefix(&format!("{file_name}.tmp-"))
            .tempfile_in(parent)?;
        serde_json::to_writer_pretty(temp.as_file_mut(), self)?;
        temp.as_file_mut().write_all(b"\n")?;
        temp.as_file().sync_all()?;
        temp.persist(path)
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
