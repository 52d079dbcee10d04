// src/lib.rs

//! Pantry Package Cache
//!
//! Download-and-extract cache for conda packages: fetch an archive if
//! absent, extract it into a shared local cache, and write the canonical
//! `repodata_record.json` that downstream installers rely on.
//!
//! # Architecture
//!
//! - Per-field trust: a `PackageIdentity` records which of its fields are
//!   placeholders (`defaulted_keys`) so the metadata merge never confuses
//!   a stub with an authoritative empty value
//! - Pure merge: `merge_repodata_record` reconciles identity and
//!   archive-embedded metadata deterministically
//! - Healing caches: records written by earlier broken implementations
//!   are detected by their corruption signature and rebuilt from the
//!   archive
//! - Atomic layout: extracted trees and records appear via temp-then-
//!   rename only, so readers never observe partial state
//! - Bounded extraction: one process-wide semaphore caps concurrent
//!   archive extractions; downloads overlap freely

pub mod cache;
pub mod config;
mod error;
pub mod extract;
pub mod fetch;
pub mod hash;
pub mod identity;
pub mod index;
pub mod merge;
pub mod record;

pub use cache::{CacheDirectory, CacheEntry, ExtractLock, MultiCache, Validity};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use extract::{
    extract_archive, extract_into_cache, ArchiveFormat, CancelToken, ExtractPermit,
    ExtractionScheduler,
};
pub use fetch::{
    fetch_all, DownloadRequest, FetchOutcome, FetchState, LocalTransport, PackageFetcher,
    Transport, TransportError,
};
pub use hash::ChecksumAlgorithm;
pub use identity::PackageIdentity;
pub use index::ArchiveIndex;
pub use merge::merge_repodata_record;
pub use record::RepodataRecord;
