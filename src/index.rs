// src/index.rs

//! Archive-embedded metadata (`info/index.json`)
//!
//! Every conda archive ships its own metadata file inside the extracted
//! tree. All fields are optional, and a missing key is distinct from a key
//! whose value is empty. For `arch` and `platform` the distinction is
//! three-way: absent, explicit `null`, or a value. Upstream index files
//! contain all three and the merge treats them differently.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Parsed view of an archive's `info/index.json`.
///
/// Unknown keys are ignored. Read once from the extracted tree, consumed
/// by the merge, then discarded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveIndex {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "build")]
    pub build_string: Option<String>,
    pub build_number: Option<u64>,
    pub license: Option<String>,
    pub timestamp: Option<u64>,
    pub depends: Option<Vec<String>>,
    pub constrains: Option<Vec<String>>,
    pub track_features: Option<String>,
    pub noarch: Option<String>,
    pub python_site_packages_path: Option<String>,
    pub size: Option<u64>,
    /// `None` = key absent, `Some(None)` = explicit null, `Some(Some(v))` = value
    #[serde(default, deserialize_with = "tri_state")]
    pub arch: Option<Option<String>>,
    #[serde(default, deserialize_with = "tri_state")]
    pub platform: Option<Option<String>>,
}

/// Keep `null` distinguishable from an absent key: a present key always
/// deserializes to `Some`, with the inner option carrying the null.
fn tri_state<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl ArchiveIndex {
    /// Load the index from an extracted tree's `info/index.json`.
    ///
    /// A missing or unparseable file surfaces `ArchiveCorrupt`: an archive
    /// without readable embedded metadata cannot be merged.
    pub fn load(index_path: &Path) -> Result<Self> {
        let file = File::open(index_path).map_err(|e| Error::ArchiveCorrupt {
            path: index_path.to_path_buf(),
            reason: format!("cannot open embedded index: {e}"),
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::ArchiveCorrupt {
            path: index_path.to_path_buf(),
            reason: format!("cannot parse embedded index: {e}"),
        })
    }
}
