// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! Builds real conda archives (both container formats) around a given
//! `info/index.json`, and fake upstream channels served over `file://`.

use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

/// Install a tracing subscriber once, honoring RUST_LOG
#[allow(dead_code)]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tarball carrying `info/index.json` plus a small payload file
pub fn tar_bytes(index_json: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_size(index_json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "info/index.json", index_json.as_bytes())
        .unwrap();

    let payload = b"payload bytes";
    let mut header = tar::Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "lib/libpkg.so", payload.as_slice())
        .unwrap();

    builder.into_inner().unwrap()
}

/// Write an archive at `path`, choosing the container format from the
/// extension (`.conda` or `.tar.bz2`)
pub fn make_archive(path: &Path, index_json: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let filename = path.file_name().unwrap().to_string_lossy();

    if filename.ends_with(".conda") {
        let file = std::fs::File::create(path).unwrap();
        let mut container = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        container.start_file("metadata.json", options).unwrap();
        container
            .write_all(br#"{"conda_pkg_format_version": 2}"#)
            .unwrap();

        let stem = filename.trim_end_matches(".conda");
        let compressed = zstd::encode_all(tar_bytes(index_json).as_slice(), 0).unwrap();
        container
            .start_file(format!("info-{stem}.tar.zst"), options)
            .unwrap();
        container.write_all(&compressed).unwrap();
        container.finish().unwrap();
    } else if filename.ends_with(".tar.bz2") {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        encoder.write_all(&tar_bytes(index_json)).unwrap();
        encoder.finish().unwrap();
    } else {
        panic!("unsupported fixture extension: {filename}");
    }
}

/// A fake upstream channel on the local filesystem
pub struct FakeChannel {
    root: PathBuf,
}

impl FakeChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    /// Add an archive under `<root>/<subdir>/<filename>` and return its
    /// `file://` URL
    pub fn add_package(&self, subdir: &str, filename: &str, index_json: &str) -> String {
        let path = self.root.join(subdir).join(filename);
        make_archive(&path, index_json);
        Url::from_file_path(&path).unwrap().to_string()
    }

    /// Path of a previously added archive
    pub fn archive_path(&self, subdir: &str, filename: &str) -> PathBuf {
        self.root.join(subdir).join(filename)
    }
}
