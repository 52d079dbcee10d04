// src/merge.rs

//! The metadata merge
//!
//! Reconciles a `PackageIdentity` with the archive's embedded index into
//! the canonical `RepodataRecord`. The rule is per-field: the identity
//! value is used if and only if the field is not named in
//! `defaulted_keys`; otherwise the archive's value is used when present,
//! else a type-appropriate empty. Trust is read from the witness set, never
//! inferred from a value being empty: an intentionally-empty `depends`
//! (repodata patch) survives, a placeholder-empty `depends` yields.
//!
//! The merge is a pure function: identical inputs produce byte-identical
//! records.

use crate::identity::PackageIdentity;
use crate::index::ArchiveIndex;
use crate::record::RepodataRecord;

/// Merge identity and archive metadata into the canonical record.
///
/// `archive_size` is the byte length of the archive file on disk, 0 when
/// unknown. It backfills `size` so the record never claims 0 for a file
/// that has a real size.
pub fn merge_repodata_record(
    identity: &PackageIdentity,
    index: &ArchiveIndex,
    archive_size: u64,
) -> RepodataRecord {
    // URL-derivable fields: the identity is always authoritative, the
    // archive never overrides them.
    RepodataRecord {
        name: identity.name.clone(),
        version: identity.version.clone(),
        build_string: identity.build_string.clone(),
        subdir: identity.subdir.clone(),
        channel: identity.channel.clone(),
        filename: identity.filename.clone(),
        url: identity.package_url.clone(),
        // A hash carried by the identity (URL fragment, solver repodata)
        // wins over anything the archive claims about itself.
        md5: identity.md5.clone().unwrap_or_default(),
        sha256: identity.sha256.clone().unwrap_or_default(),

        build_number: if identity.is_stub("build_number") {
            index.build_number.unwrap_or(0)
        } else {
            identity.build_number
        },
        license: if identity.is_stub("license") {
            index.license.clone().unwrap_or_default()
        } else {
            identity.license.clone()
        },
        timestamp: if identity.is_stub("timestamp") {
            index.timestamp.unwrap_or(0)
        } else {
            identity.timestamp
        },
        track_features: if identity.is_stub("track_features") {
            index.track_features.clone().unwrap_or_default()
        } else {
            identity.track_features.clone()
        },
        depends: if identity.is_stub("depends") {
            index.depends.clone().unwrap_or_default()
        } else {
            identity.depends.clone()
        },
        constrains: if identity.is_stub("constrains") {
            index.constrains.clone().unwrap_or_default()
        } else {
            identity.constrains.clone()
        },
        noarch: if identity.is_stub("noarch") {
            index.noarch.clone()
        } else {
            identity.noarch.clone()
        },
        python_site_packages_path: if identity.is_stub("python_site_packages_path") {
            index.python_site_packages_path.clone()
        } else {
            identity.python_site_packages_path.clone()
        },

        // On-disk size beats every claim; the archive index is only
        // consulted when neither the identity nor the filesystem knows.
        size: if identity.size != 0 {
            identity.size
        } else if archive_size != 0 {
            archive_size
        } else {
            index.size.unwrap_or(0)
        },

        // Tri-state from the archive: a value is kept, an explicit null is
        // dropped, absent stays absent.
        arch: index.arch.clone().flatten(),
        platform: index.platform.clone().flatten(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SOLVER_DERIVED_FIELDS;
    use std::collections::BTreeSet;

    fn url_identity() -> PackageIdentity {
        PackageIdentity::from_url("https://host/ch/linux-64/pkg-1.0-abc.conda").unwrap()
    }

    fn solver_identity() -> PackageIdentity {
        PackageIdentity {
            name: "pkg".into(),
            version: "1.0".into(),
            build_string: "abc".into(),
            filename: "pkg-1.0-abc.conda".into(),
            subdir: "linux-64".into(),
            channel: "https://host/ch".into(),
            package_url: "https://host/ch/linux-64/pkg-1.0-abc.conda".into(),
            build_number: 42,
            license: "MIT".into(),
            timestamp: 1_700_000_000,
            track_features: "feature1".into(),
            size: 12345,
            depends: vec!["python >=3.8".into()],
            constrains: vec!["other >=2.0".into()],
            md5: Some("abc123abc123abc123abc123abc123ab".into()),
            sha256: None,
            noarch: None,
            python_site_packages_path: None,
            defaulted_keys: BTreeSet::new(),
        }
    }

    fn rich_index() -> ArchiveIndex {
        serde_json::from_str(
            r#"{
                "license": "BSD-3-Clause",
                "timestamp": 123456,
                "build_number": 7,
                "depends": ["python >=3.11"],
                "constrains": ["pip >=24"],
                "track_features": "mkl"
            }"#,
        )
        .unwrap()
    }

    // Stub fields yield to the archive; this is scenario S1.
    #[test]
    fn test_url_identity_takes_archive_metadata() {
        let record = merge_repodata_record(&url_identity(), &rich_index(), 123);

        assert_eq!(record.license, "BSD-3-Clause");
        assert_eq!(record.timestamp, 123456);
        assert_eq!(record.build_number, 7);
        assert_eq!(record.depends, vec!["python >=3.11"]);
        assert_eq!(record.constrains, vec!["pip >=24"]);
        assert_eq!(record.track_features, "mkl");
        assert_eq!(record.size, 123);
    }

    // Authoritative preservation: every solver field survives any index.
    #[test]
    fn test_solver_identity_is_authoritative() {
        let identity = solver_identity();
        let record = merge_repodata_record(&identity, &rich_index(), 123);

        assert_eq!(record.build_number, 42);
        assert_eq!(record.license, "MIT");
        assert_eq!(record.timestamp, 1_700_000_000);
        assert_eq!(record.track_features, "feature1");
        assert_eq!(record.depends, identity.depends);
        assert_eq!(record.constrains, identity.constrains);
    }

    // Channel patches set depends=[] on purpose; this is scenario S2.
    #[test]
    fn test_solver_empty_arrays_survive() {
        let mut identity = solver_identity();
        identity.depends = vec![];
        identity.constrains = vec![];
        identity.timestamp = 1717;

        let index: ArchiveIndex = serde_json::from_str(
            r#"{"depends": ["should_be_ignored"], "constrains": ["should_be_ignored"]}"#,
        )
        .unwrap();

        let record = merge_repodata_record(&identity, &index, 10);
        assert!(record.depends.is_empty());
        assert!(record.constrains.is_empty());
    }

    // URL hash supremacy; this is scenario S3.
    #[test]
    fn test_url_hash_wins_over_archive_claim() {
        let identity = PackageIdentity::from_url(
            "https://host/ch/linux-64/pkg-1.0-abc.conda#7dbaa197d7ba6032caf7ae7f32c1efa0",
        )
        .unwrap();
        // The index may claim anything; it has no say over hashes.
        let index = rich_index();

        let record = merge_repodata_record(&identity, &index, 3);
        assert_eq!(record.md5, "7dbaa197d7ba6032caf7ae7f32c1efa0");
        assert_eq!(record.sha256, "");
    }

    #[test]
    fn test_stub_yields_to_empty_when_index_silent() {
        let record = merge_repodata_record(&url_identity(), &ArchiveIndex::default(), 0);

        assert_eq!(record.build_number, 0);
        assert_eq!(record.license, "");
        assert_eq!(record.timestamp, 0);
        assert!(record.depends.is_empty());
        assert!(record.constrains.is_empty());
        assert_eq!(record.noarch, None);
    }

    #[test]
    fn test_noarch_backfilled_from_index() {
        let index: ArchiveIndex = serde_json::from_str(
            r#"{"noarch": "python", "python_site_packages_path": "lib/python3.11/site-packages"}"#,
        )
        .unwrap();
        let record = merge_repodata_record(&url_identity(), &index, 5);

        assert_eq!(record.noarch.as_deref(), Some("python"));
        assert_eq!(
            record.python_site_packages_path.as_deref(),
            Some("lib/python3.11/site-packages")
        );
    }

    // Size healing; this is scenario S6.
    #[test]
    fn test_size_backfilled_from_disk() {
        // Index has size 0
        let index: ArchiveIndex = serde_json::from_str(r#"{"size": 0}"#).unwrap();
        let record = merge_repodata_record(&url_identity(), &index, 77);
        assert_eq!(record.size, 77);

        // Index has no size at all
        let record = merge_repodata_record(&url_identity(), &ArchiveIndex::default(), 77);
        assert_eq!(record.size, 77);
    }

    #[test]
    fn test_size_precedence() {
        // Authoritative nonzero identity size wins over disk and index
        let identity = solver_identity();
        let index: ArchiveIndex = serde_json::from_str(r#"{"size": 999}"#).unwrap();
        assert_eq!(merge_repodata_record(&identity, &index, 55).size, 12345);

        // Disk size beats the index claim
        let url_id = url_identity();
        assert_eq!(merge_repodata_record(&url_id, &index, 55).size, 55);

        // Index claim is the last resort
        assert_eq!(merge_repodata_record(&url_id, &index, 0).size, 999);
    }

    #[test]
    fn test_arch_platform_tri_state() {
        let null_index: ArchiveIndex =
            serde_json::from_str(r#"{"arch": null, "platform": null}"#).unwrap();
        let record = merge_repodata_record(&url_identity(), &null_index, 1);
        assert_eq!(record.arch, None);
        assert_eq!(record.platform, None);

        let value_index: ArchiveIndex =
            serde_json::from_str(r#"{"arch": "x86_64", "platform": "linux"}"#).unwrap();
        let record = merge_repodata_record(&url_identity(), &value_index, 1);
        assert_eq!(record.arch.as_deref(), Some("x86_64"));
        assert_eq!(record.platform.as_deref(), Some("linux"));
    }

    // The merge never overrides URL-derivable fields from the archive.
    #[test]
    fn test_identity_core_fields_never_overridden() {
        let index: ArchiveIndex = serde_json::from_str(
            r#"{"name": "evil", "version": "9.9", "build": "zzz"}"#,
        )
        .unwrap();
        let record = merge_repodata_record(&url_identity(), &index, 1);

        assert_eq!(record.name, "pkg");
        assert_eq!(record.version, "1.0");
        assert_eq!(record.build_string, "abc");
    }

    // Round-trip: write, re-read as identity, merge again -> identical.
    #[test]
    fn test_merge_round_trip_is_stable() {
        let index = rich_index();
        let first = merge_repodata_record(&url_identity(), &index, 123);

        let reread = PackageIdentity::from_record(&first);
        let second = merge_repodata_record(&reread, &index, 123);

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    // Determinism: same inputs, byte-identical output.
    #[test]
    fn test_merge_is_deterministic() {
        let a = merge_repodata_record(&url_identity(), &rich_index(), 123);
        let b = merge_repodata_record(&url_identity(), &rich_index(), 123);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_every_solver_field_covered_by_stub_rules() {
        // Guard: a URL identity must treat exactly the solver-derived set
        // as stubs, so the merge table stays in sync with the field list.
        let identity = url_identity();
        for field in SOLVER_DERIVED_FIELDS {
            assert!(identity.is_stub(field));
        }
    }
}
