//! Object-store backends for certificate backups
//!
//! The backup archive always lives under the key `certs.tgz` in the configured
//! bucket. Downloads land in the base-domain certificate folder so the archive
//! can be unpacked in place.

mod gcs;
mod s3;

pub use gcs::GcsStore;
pub use s3::S3Store;

use crate::config::{Config, ObjectStoreKind};
use async_trait::async_trait;
use certkeeper_core::ARCHIVE_FILE_NAME;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while talking to an object store
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("No bucket configured")]
    NoBucket,

    #[error("Missing credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Object store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("S3 request failed: {0}")]
    S3(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A locally available copy of the backup archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    /// Directory the archive sits in
    pub dir: PathBuf,
    /// Path of the archive file
    pub file: PathBuf,
}

impl ArchiveHandle {
    pub fn for_file(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let dir = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { dir, file }
    }
}

/// Download/upload of the backup archive
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the archive into the base certificate folder.
    ///
    /// `Ok(None)` means the bucket holds no archive.
    async fn download_file(&self, config: &Config) -> Result<Option<ArchiveHandle>, BucketError>;

    /// Upload `file` as the bucket's archive.
    async fn upload_file(&self, config: &Config, file: &Path)
    -> Result<ArchiveHandle, BucketError>;
}

/// Build the backend selected by `config.object_store`.
pub async fn object_store(config: &Config) -> Result<Arc<dyn ObjectStore>, BucketError> {
    match config.object_store {
        ObjectStoreKind::S3 => Ok(Arc::new(S3Store::from_settings(&config.s3).await?)),
        ObjectStoreKind::Gcs => Ok(Arc::new(GcsStore::from_settings(&config.gcs)?)),
    }
}

/// Create the base certificate folder and return where the archive goes.
pub(crate) fn prepare_download_target(config: &Config) -> Result<PathBuf, BucketError> {
    let dir = config.base_cert_dir();
    if !dir.exists() {
        tracing::info!(dir = %dir.display(), "Certificate folder is missing, creating it");
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir.join(ARCHIVE_FILE_NAME))
}

pub(crate) fn bucket_name(config: &Config) -> Result<&str, BucketError> {
    config
        .bucket
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or(BucketError::NoBucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn handle_dir_is_parent_of_file() {
        let handle = ArchiveHandle::for_file("/tmp/certs/test.io/certs.tgz");
        assert_eq!(handle.dir, PathBuf::from("/tmp/certs/test.io"));
    }

    #[test]
    fn download_target_creates_base_folder() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::new("test.io", vec!["test.io".to_string()]);
        config.cert_path = temp.path().to_path_buf();

        let target = prepare_download_target(&config).unwrap();
        assert_eq!(target, temp.path().join("test.io").join("certs.tgz"));
        assert!(temp.path().join("test.io").is_dir());
    }

    #[test]
    fn empty_bucket_name_is_rejected() {
        let mut config = Config::new("test.io", vec!["test.io".to_string()]);
        config.bucket = Some(String::new());
        assert!(matches!(bucket_name(&config), Err(BucketError::NoBucket)));
    }
}
