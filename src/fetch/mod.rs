// src/fetch/mod.rs

//! Per-package fetch orchestration
//!
//! One `PackageFetcher` drives a single package through
//! download → verify → extract → merge → write → validate. Fetchers are
//! independent: they share only the extraction scheduler and the cache
//! directories, both read-mostly handles, so any number of packages can be
//! fetched concurrently and a failure in one never aborts its siblings.

mod transport;

pub use transport::{LocalTransport, Transport, TransportError};

use crate::cache::{self, CacheDirectory, ExtractLock, MultiCache, Validity};
use crate::config::{CacheConfig, DEFAULT_DOWNLOAD_RETRIES, RETRY_DELAY_MS};
use crate::error::{Error, Result};
use crate::extract::{self, CancelToken, ExtractionScheduler};
use crate::hash;
use crate::identity::PackageIdentity;
use crate::index::ArchiveIndex;
use crate::merge::merge_repodata_record;
use crate::record::RepodataRecord;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fetch progress for one package. Transitions are strictly sequential
/// within a package; there is no ordering across packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Downloading,
    Downloaded,
    Extracting,
    Merging,
    Written,
    Done,
    Failed,
}

/// What a download would look like, for callers wiring an external
/// transport ahead of time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub filename: String,
}

/// Result of a completed fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The canonical record now present in the cache
    pub record: RepodataRecord,
    /// Cache root holding the extracted tree
    pub cache_root: PathBuf,
    /// True when a valid extracted tree already existed and no work was done
    pub was_cached: bool,
}

/// Per-package orchestrator
pub struct PackageFetcher {
    identity: PackageIdentity,
    caches: MultiCache,
    scheduler: ExtractionScheduler,
    max_retries: u32,
    state: FetchState,
}

impl PackageFetcher {
    pub fn new(
        identity: PackageIdentity,
        caches: MultiCache,
        scheduler: ExtractionScheduler,
    ) -> Self {
        Self {
            identity,
            caches,
            scheduler,
            max_retries: DEFAULT_DOWNLOAD_RETRIES,
            state: FetchState::Pending,
        }
    }

    pub fn with_config(
        identity: PackageIdentity,
        config: &CacheConfig,
        caches: MultiCache,
        scheduler: ExtractionScheduler,
    ) -> Self {
        let mut fetcher = Self::new(identity, caches, scheduler);
        fetcher.max_retries = config.max_download_retries;
        fetcher
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    /// The request an external transport would have to serve
    pub fn download_request(&self) -> DownloadRequest {
        DownloadRequest {
            url: self.identity.package_url.clone(),
            filename: self.identity.filename.clone(),
        }
    }

    fn set_state(&mut self, state: FetchState) {
        debug!("{}: {:?} -> {:?}", self.identity.name, self.state, state);
        self.state = state;
    }

    /// Drive the package to `Done`, performing only the work that is
    /// actually missing. Safe to call concurrently for the same package
    /// from several fetchers: a completed entry is observed and left
    /// untouched.
    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        let result = self.execute(transport, cancel).await;
        match &result {
            Ok(outcome) => {
                self.set_state(FetchState::Done);
                if !outcome.was_cached {
                    info!(
                        "fetched {} into {}",
                        self.identity.filename,
                        outcome.cache_root.display()
                    );
                }
            }
            Err(e) => {
                warn!("fetch of {} failed: {e}", self.identity.filename);
                self.set_state(FetchState::Failed);
            }
        }
        result
    }

    async fn execute(
        &mut self,
        transport: &dyn Transport,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        cancel.check()?;

        // A usable extracted tree anywhere means there is nothing to do.
        if let Some((cache, record)) = self.caches.find_valid_extracted(&self.identity) {
            debug!("{} already extracted, skipping", self.identity.filename);
            return Ok(FetchOutcome {
                record,
                cache_root: cache.root().to_path_buf(),
                was_cached: true,
            });
        }

        // Make sure some cache holds a checksum-valid archive.
        let cached_archive = self.caches.find_valid_archive(&self.identity).cloned();
        let cache = match cached_archive {
            Some(cache) => {
                debug!("{} archive already cached", self.identity.filename);
                cache
            }
            None => {
                let cache = self.caches.first_writable()?.clone();
                self.download(transport, &cache, cancel).await?;
                cache
            }
        };
        self.set_state(FetchState::Downloaded);

        // Extraction slots are bounded process-wide.
        let _permit = self.scheduler.acquire(cancel).await?;
        self.set_state(FetchState::Extracting);

        // Another fetcher may have completed the entry while we waited.
        if let Validity::Valid(record) = cache::validate_extracted(&cache, &self.identity) {
            return Ok(FetchOutcome {
                record,
                cache_root: cache.root().to_path_buf(),
                was_cached: true,
            });
        }

        let extract_dir = cache.extract_dir(&self.identity)?;
        let archive_path = cache.archive_path(&self.identity);

        // Replacing an invalid tree: honor the advisory sentinel, and
        // check once more under the lock in case another process healed
        // the entry while we blocked on it.
        if extract_dir.exists() {
            let lock_path = cache.lock_path(&self.identity)?;
            let lock = run_blocking(move || ExtractLock::acquire(&lock_path)).await?;
            if let Validity::Valid(record) = cache::validate_extracted(&cache, &self.identity) {
                return Ok(FetchOutcome {
                    record,
                    cache_root: cache.root().to_path_buf(),
                    was_cached: true,
                });
            }
            debug!("removing stale tree {}", extract_dir.display());
            tokio::fs::remove_dir_all(&extract_dir).await?;
            drop(lock);
        }
        cancel.check()?;

        {
            let archive = archive_path.clone();
            let dest = extract_dir.clone();
            run_blocking(move || extract::extract_into_cache(&archive, &dest)).await?;
        }
        cancel.check()?;

        self.set_state(FetchState::Merging);
        let written = self.merge_and_write(&cache, &archive_path).await;
        let record = match written {
            Ok(record) => record,
            Err(e) => {
                // A tree without its record is useless; remove it so the
                // next attempt starts clean.
                let _ = tokio::fs::remove_dir_all(&extract_dir).await;
                return Err(e);
            }
        };
        self.set_state(FetchState::Written);

        Ok(FetchOutcome {
            record,
            cache_root: cache.root().to_path_buf(),
            was_cached: false,
        })
    }

    async fn merge_and_write(
        &mut self,
        cache: &CacheDirectory,
        archive_path: &std::path::Path,
    ) -> Result<RepodataRecord> {
        let index = ArchiveIndex::load(&cache.index_path(&self.identity)?)?;
        let archive_size = std::fs::metadata(archive_path).map(|m| m.len()).unwrap_or(0);

        let record = merge_repodata_record(&self.identity, &index, archive_size);
        record.write_to(&cache.record_path(&self.identity)?)?;
        Ok(record)
    }

    async fn download(
        &mut self,
        transport: &dyn Transport,
        cache: &CacheDirectory,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.set_state(FetchState::Downloading);
        let url = self.identity.package_url.clone();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            cancel.check()?;

            let error = match self.download_once(transport, cache, &url).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            warn!("download attempt {attempt} for {url} failed: {error}, retrying");
            tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt))).await;
        }
    }

    /// One download attempt: fetch to a temp sibling, verify, rename.
    /// Partial or mismatching files are dropped with the temp path and
    /// never become visible under the archive name.
    async fn download_once(
        &self,
        transport: &dyn Transport,
        cache: &CacheDirectory,
        url: &str,
    ) -> Result<()> {
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}.tmp-", self.identity.filename))
            .tempfile_in(cache.root())?;
        let temp_path = temp.into_temp_path();

        debug!("downloading {url} via {} transport", transport.name());
        transport
            .download(url, &temp_path)
            .await
            .map_err(|e| match e {
                TransportError::Transient(message) => Error::Transport {
                    url: url.to_string(),
                    message,
                    transient: true,
                },
                TransportError::Permanent(message) => Error::Transport {
                    url: url.to_string(),
                    message,
                    transient: false,
                },
            })?;

        match self.identity.checksum() {
            Some(expected) => {
                let expected = expected.to_string();
                let path = temp_path.to_path_buf();
                run_blocking(move || hash::verify_file(&path, &expected)).await?;
            }
            None => {
                if std::fs::metadata(&temp_path)?.len() == 0 {
                    return Err(Error::Transport {
                        url: url.to_string(),
                        message: "transport produced an empty file".to_string(),
                        transient: true,
                    });
                }
            }
        }

        temp_path
            .persist(cache.archive_path(&self.identity))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

/// Fetch a batch of packages concurrently.
///
/// Downloads overlap freely (the transport is the only bound) while
/// extractions stay bounded by the shared scheduler. Per-package failures
/// are returned in place; they never abort sibling fetches. Results carry
/// the input identities and preserve input order, but completion order
/// across packages is unspecified.
pub async fn fetch_all(
    identities: impl IntoIterator<Item = PackageIdentity>,
    config: &CacheConfig,
    caches: &MultiCache,
    scheduler: &ExtractionScheduler,
    transport: &dyn Transport,
    cancel: &CancelToken,
) -> Vec<(PackageIdentity, Result<FetchOutcome>)> {
    let tasks = identities.into_iter().map(|identity| {
        let mut fetcher = PackageFetcher::with_config(
            identity.clone(),
            config,
            caches.clone(),
            scheduler.clone(),
        );
        async move {
            let result = fetcher.run(transport, cancel).await;
            (identity, result)
        }
    });

    futures::future::join_all(tasks).await
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
