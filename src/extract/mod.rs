// src/extract/mod.rs

//! Archive extraction
//!
//! Two archive formats exist: `.tar.bz2` (a single bzip2 tarball) and
//! `.conda` (a zip container holding zstd-compressed inner tarballs plus a
//! small `metadata.json`). Extraction always lands in a temp sibling of
//! the target directory and is renamed into place on success, so readers
//! see either no tree or a fully-formed one, never a half-extracted one.

mod scheduler;

pub use scheduler::{CancelToken, ExtractPermit, ExtractionScheduler};

use crate::error::{Error, Result};
use bzip2::read::BzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Recognized archive container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.conda`: zip container with zstd-compressed inner tarballs
    Conda,
    /// `.tar.bz2`: single bzip2-compressed tarball
    TarBz2,
}

impl ArchiveFormat {
    /// Detect the format from a filename
    pub fn from_filename(filename: &str) -> Result<Self> {
        if filename.ends_with(".conda") {
            Ok(Self::Conda)
        } else if filename.ends_with(".tar.bz2") {
            Ok(Self::TarBz2)
        } else {
            Err(Error::InvalidIdentity(format!(
                "unsupported archive format: {filename:?}"
            )))
        }
    }
}

/// Unpack an archive into `dest`, which must already exist.
///
/// Produces a complete tree or fails; callers get atomicity by pointing
/// `dest` at a temp sibling and renaming afterwards (see
/// [`extract_into_cache`]).
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let format = ArchiveFormat::from_filename(filename)?;

    debug!("extracting {} into {}", archive.display(), dest.display());
    match format {
        ArchiveFormat::TarBz2 => extract_tar_bz2(archive, dest),
        ArchiveFormat::Conda => extract_conda(archive, dest),
    }
}

fn corrupt(archive: &Path, reason: impl std::fmt::Display) -> Error {
    Error::ArchiveCorrupt {
        path: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn extract_tar_bz2(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let decoder = BzDecoder::new(file);
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| corrupt(archive, format!("bad tarball: {e}")))
}

fn extract_conda(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut container =
        zip::ZipArchive::new(file).map_err(|e| corrupt(archive, format!("bad zip container: {e}")))?;

    let mut inner_tarballs = 0;
    for i in 0..container.len() {
        let entry = container
            .by_index(i)
            .map_err(|e| corrupt(archive, format!("bad zip entry: {e}")))?;
        let name = entry.name().to_string();

        // The container carries info-*.tar.zst, pkg-*.tar.zst and a
        // metadata.json we have no use for.
        if !name.ends_with(".tar.zst") {
            continue;
        }
        inner_tarballs += 1;
        unpack_zstd_tarball(archive, entry, dest)?;
    }

    if inner_tarballs == 0 {
        return Err(corrupt(archive, "no inner tarballs in conda container"));
    }
    Ok(())
}

fn unpack_zstd_tarball<R: Read>(archive: &Path, reader: R, dest: &Path) -> Result<()> {
    let decoder =
        zstd::Decoder::new(reader).map_err(|e| corrupt(archive, format!("bad zstd stream: {e}")))?;
    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| corrupt(archive, format!("bad inner tarball: {e}")))
}

/// Extract an archive into its final cache location.
///
/// The tree is built in a `<extract-dir>.tmp-<rand>` sibling and renamed
/// into place; a failed extraction removes the temp tree and leaves the
/// destination untouched. The extracted tree must carry a readable
/// `info/index.json` or the archive is considered corrupt.
pub fn extract_into_cache(archive: &Path, extract_dir: &Path) -> Result<()> {
    let parent = extract_dir.parent().ok_or_else(|| {
        Error::InvalidIdentity(format!("extract dir {} has no parent", extract_dir.display()))
    })?;
    let dir_name = extract_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("package");

    let temp = tempfile::Builder::new()
        .prefix(&format!("{dir_name}.tmp-"))
        .tempdir_in(parent)?;

    // Any error from here on drops `temp` and removes the partial tree.
    extract_archive(archive, temp.path())?;

    if !temp.path().join("info").join("index.json").is_file() {
        return Err(corrupt(archive, "extracted tree has no info/index.json"));
    }

    let temp_path = temp.keep();
    if let Err(e) = std::fs::rename(&temp_path, extract_dir) {
        let _ = std::fs::remove_dir_all(&temp_path);
        // A concurrent extraction of the same archive may have renamed its
        // tree first. The trees are equivalent, so the loser succeeds too.
        if extract_dir.join("info").join("index.json").is_file() {
            debug!("{} already extracted by a concurrent builder", extract_dir.display());
            return Ok(());
        }
        return Err(e.into());
    }
    debug!("extracted {} -> {}", archive.display(), extract_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Build a tarball carrying `info/index.json` and one payload file
    fn tar_bytes(index_json: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut header = tar::Header::new_gnu();
        header.set_size(index_json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "info/index.json", index_json.as_bytes())
            .unwrap();

        let payload = b"payload";
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "lib/libpkg.so", payload.as_slice())
            .unwrap();

        builder.into_inner().unwrap()
    }

    fn write_tar_bz2(path: &Path, index_json: &str) {
        let file = File::create(path).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        encoder.write_all(&tar_bytes(index_json)).unwrap();
        encoder.finish().unwrap();
    }

    fn write_conda(path: &Path, index_json: &str) {
        let file = File::create(path).unwrap();
        let mut container = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        container.start_file("metadata.json", options).unwrap();
        container
            .write_all(br#"{"conda_pkg_format_version": 2}"#)
            .unwrap();

        let compressed = zstd::encode_all(tar_bytes(index_json).as_slice(), 0).unwrap();
        container.start_file("info-pkg-1.0-abc.tar.zst", options).unwrap();
        container.write_all(&compressed).unwrap();

        container.finish().unwrap();
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ArchiveFormat::from_filename("pkg-1.0-abc.conda").unwrap(),
            ArchiveFormat::Conda
        );
        assert_eq!(
            ArchiveFormat::from_filename("pkg-1.0-abc.tar.bz2").unwrap(),
            ArchiveFormat::TarBz2
        );
        assert!(ArchiveFormat::from_filename("pkg-1.0-abc.zip").is_err());
    }

    #[test]
    fn test_extract_tar_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-abc.tar.bz2");
        write_tar_bz2(&archive, r#"{"name": "pkg"}"#);

        let dest = dir.path().join("pkg-1.0-abc");
        extract_into_cache(&archive, &dest).unwrap();

        assert!(dest.join("info/index.json").is_file());
        assert!(dest.join("lib/libpkg.so").is_file());
    }

    #[test]
    fn test_extract_conda() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-abc.conda");
        write_conda(&archive, r#"{"name": "pkg"}"#);

        let dest = dir.path().join("pkg-1.0-abc");
        extract_into_cache(&archive, &dest).unwrap();

        assert!(dest.join("info/index.json").is_file());
        assert!(dest.join("lib/libpkg.so").is_file());
    }

    #[test]
    fn test_garbage_archive_leaves_no_tree() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-abc.tar.bz2");
        std::fs::write(&archive, b"definitely not bzip2").unwrap();

        let dest = dir.path().join("pkg-1.0-abc");
        let err = extract_into_cache(&archive, &dest).unwrap_err();
        assert!(matches!(err, Error::ArchiveCorrupt { .. }));

        // No destination and no temp litter
        assert!(!dest.exists());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_tree_without_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-abc.tar.bz2");

        // A valid tarball that lacks info/index.json
        let file = File::create(&archive).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        let mut builder = tar::Builder::new(&mut encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "a.txt", b"hi".as_slice()).unwrap();
        builder.finish().unwrap();
        drop(builder);
        encoder.finish().unwrap();

        let dest = dir.path().join("pkg-1.0-abc");
        let err = extract_into_cache(&archive, &dest).unwrap_err();
        assert!(matches!(err, Error::ArchiveCorrupt { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_conda_without_inner_tarballs_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg-1.0-abc.conda");

        let file = File::create(&archive).unwrap();
        let mut container = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        container.start_file("metadata.json", options).unwrap();
        container.write_all(b"{}").unwrap();
        container.finish().unwrap();

        let dest = dir.path().join("pkg-1.0-abc");
        assert!(matches!(
            extract_into_cache(&archive, &dest),
            Err(Error::ArchiveCorrupt { .. })
        ));
    }
}
