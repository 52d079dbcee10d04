// src/config.rs

//! Cache configuration
//!
//! Explicit configuration threaded through constructors. There is no
//! process-wide context: callers build a `CacheConfig`, validate it once,
//! and hand it to the pieces that need it.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Default bound on concurrent archive extractions
pub const DEFAULT_EXTRACT_CONCURRENCY: usize = 4;

/// Default retry attempts for transient download failures
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 3;

/// Retry backoff unit in milliseconds (multiplied by the attempt number)
pub const RETRY_DELAY_MS: u64 = 1000;

/// Configuration for a set of package caches
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Ordered cache roots. Reads consult all of them in order; downloads
    /// and extractions go to the first writable one.
    pub pkgs_dirs: Vec<PathBuf>,
    /// Process-wide bound on concurrent archive extractions
    pub max_extract_concurrency: usize,
    /// Retry attempts for transient download failures and checksum mismatches
    pub max_download_retries: u32,
}

impl CacheConfig {
    /// Create a configuration with default concurrency and retry settings
    pub fn new(pkgs_dirs: Vec<PathBuf>) -> Self {
        Self {
            pkgs_dirs,
            max_extract_concurrency: DEFAULT_EXTRACT_CONCURRENCY,
            max_download_retries: DEFAULT_DOWNLOAD_RETRIES,
        }
    }

    /// Check the configuration for values the pipeline cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.pkgs_dirs.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one cache root is required".to_string(),
            ));
        }
        if self.max_extract_concurrency == 0 {
            return Err(Error::InvalidConfig(
                "max_extract_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
