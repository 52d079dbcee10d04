// src/extract/scheduler.rs

//! Process-wide extraction bound and cooperative cancellation
//!
//! Archive extraction is CPU- and I/O-bound; unbounded concurrency
//! degrades throughput on both and exhausts file descriptors. One
//! `ExtractionScheduler` is created per process from the configuration and
//! a handle is cloned into every fetcher. There is no global lookup.

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Cooperative cancellation flag, cheap to clone and share.
///
/// Fetchers check it between suspension points and race it against permit
/// acquisition, so a cancelled waiter drops its request without starving
/// others.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every holder of this token
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Permit for one running extraction; released on drop, including when the
/// holder is cancelled mid-extraction.
#[derive(Debug)]
pub struct ExtractPermit {
    _permit: OwnedSemaphorePermit,
}

/// Process-wide semaphore bounding concurrent archive extractions
#[derive(Debug, Clone)]
pub struct ExtractionScheduler {
    semaphore: Arc<Semaphore>,
}

impl ExtractionScheduler {
    /// Create a scheduler allowing `max_concurrent` simultaneous
    /// extractions. Zero is rejected: it would deadlock every fetcher.
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(Error::InvalidConfig(
                "extraction concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.max_extract_concurrency)
    }

    /// Wait for an extraction slot, racing against cancellation
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<ExtractPermit> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                // The semaphore is never closed
                let permit = permit.expect("extraction semaphore closed");
                Ok(ExtractPermit { _permit: permit })
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
