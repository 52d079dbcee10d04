// src/fetch/transport.rs

//! Download transport abstraction
//!
//! The cache core does not speak HTTP. It hands a URL and a destination
//! path to a `Transport` and expects a complete file or an error. HTTP(S)
//! transports with mirrors, auth and resume live outside this crate; the
//! built-in `LocalTransport` covers `file://` channels and plain paths,
//! which is all local installs and the test suite need.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Transport failures, split by whether a retry can help
#[derive(Error, Debug)]
pub enum TransportError {
    /// Worth retrying with backoff (timeouts, resets, busy resources)
    #[error("transient transport failure: {0}")]
    Transient(String),
    /// Retrying cannot help (bad URL, missing source, permission denied)
    #[error("permanent transport failure: {0}")]
    Permanent(String),
}

/// Fetch a URL to a local path.
///
/// Idempotent on success; may be invoked concurrently on disjoint
/// destinations. Implementations must either produce the complete file at
/// `dest` or fail.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), TransportError>;

    /// Human-readable name for logging
    fn name(&self) -> &str;
}

/// Transport for `file://` URLs and plain filesystem paths
#[derive(Debug, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }

    fn source_path(url: &str) -> Result<PathBuf, TransportError> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                return parsed
                    .to_file_path()
                    .map_err(|()| TransportError::Permanent(format!("bad file url: {url}")));
            }
            if parsed.scheme().len() > 1 {
                // A real remote scheme; not ours to handle
                return Err(TransportError::Permanent(format!(
                    "local transport cannot fetch {url}"
                )));
            }
        }
        Ok(PathBuf::from(url))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn download(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
        let source = Self::source_path(url)?;
        debug!("copying {} -> {}", source.display(), dest.display());

        match tokio::fs::copy(&source, dest).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TransportError::Permanent(format!(
                "source {} does not exist",
                source.display()
            ))),
            Err(e) => Err(TransportError::Transient(format!(
                "copy from {} failed: {e}",
                source.display()
            ))),
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copies_plain_path() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.conda");
        let dest = dir.path().join("dest.conda");
        std::fs::write(&src, b"archive").unwrap();

        let transport = LocalTransport::new();
        transport
            .download(src.to_str().unwrap(), &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive");
    }

    #[tokio::test]
    async fn test_copies_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.conda");
        let dest = dir.path().join("dest.conda");
        std::fs::write(&src, b"archive").unwrap();

        let url = Url::from_file_path(&src).unwrap().to_string();
        LocalTransport::new().download(&url, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive");
    }

    #[tokio::test]
    async fn test_missing_source_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.conda");

        let err = LocalTransport::new()
            .download("/nonexistent/pkg.conda", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_remote_scheme_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest.conda");

        let err = LocalTransport::new()
            .download("https://host/ch/linux-64/pkg-1.0-abc.conda", &dest)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Permanent(_)));
    }
}
