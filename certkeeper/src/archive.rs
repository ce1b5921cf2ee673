//! Backup archive codec
//!
//! Archives are gzip-compressed tarballs with entries named relative to the
//! archive root. Symlinks are dereferenced when packing so certbot's `live/`
//! links are captured by value.

use certkeeper_core::{ArchiveMetadata, METADATA_FILE_NAME};
use std::path::{Component, Path};
use thiserror::Error;

/// Errors that can occur while packing or unpacking an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to add {0} to archive: {1}")]
    Append(String, std::io::Error),

    #[error("Failed to finish archive: {0}")]
    Finish(std::io::Error),

    #[error("Failed to extract {0}: {1}")]
    Extract(String, std::io::Error),

    #[error("Archive entry escapes destination: {0}")]
    UnsafeEntry(String),

    #[error("Invalid archive metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pack `names` (relative to `source_dir`) into a gzip tarball at `output`.
///
/// Returns the size of the written archive.
pub fn pack(source_dir: &Path, names: &[&str], output: &Path) -> Result<u64, ArchiveError> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(true);

    for name in names {
        let full_path = source_dir.join(name);
        archive
            .append_path_with_name(&full_path, name)
            .map_err(|e| ArchiveError::Append(full_path.display().to_string(), e))?;
    }

    let encoder = archive.into_inner().map_err(ArchiveError::Finish)?;
    encoder.finish().map_err(ArchiveError::Finish)?;

    Ok(std::fs::metadata(output)?.len())
}

/// Extract `archive_path` into `dest`, replacing whatever sits at each entry's path.
pub fn unpack(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
    use flate2::read::GzDecoder;

    std::fs::create_dir_all(dest)?;

    let file = std::fs::File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Extract(archive_path.display().to_string(), e))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| ArchiveError::Extract(archive_path.display().to_string(), e))?;
        let name = entry
            .path()
            .map_err(|e| ArchiveError::Extract(archive_path.display().to_string(), e))?
            .into_owned();
        if !stays_inside(&name) {
            return Err(ArchiveError::UnsafeEntry(name.display().to_string()));
        }

        let target = dest.join(&name);
        if let Ok(meta) = std::fs::symlink_metadata(&target)
            && !meta.is_dir()
        {
            std::fs::remove_file(&target)?;
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| ArchiveError::Extract(name.display().to_string(), e))?;
        if !unpacked {
            return Err(ArchiveError::UnsafeEntry(name.display().to_string()));
        }
    }

    Ok(())
}

/// Only plain relative names may be joined onto the destination.
fn stays_inside(name: &Path) -> bool {
    name.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Read the metadata file from an unpacked archive, if present.
pub fn read_metadata(dir: &Path) -> Result<Option<ArchiveMetadata>, ArchiveError> {
    let path = dir.join(METADATA_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(ArchiveMetadata::from_json(&raw)?))
}
