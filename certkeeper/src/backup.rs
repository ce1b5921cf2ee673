//! Backup/restore of the live certificate folder
//!
//! `restore` decides whether the archived certificates can be reused or
//! whether fresh issuance has to run; `create` archives freshly issued
//! certificates and uploads them.

use crate::archive;
use crate::bucket::{ArchiveHandle, BucketError, ObjectStore};
use crate::config::Config;
use certkeeper_core::{
    ARCHIVE_FILE_NAME, ArchiveMetadata, ArtifactKind, BundleLayout, CertificateBundle,
    METADATA_FILE_NAME, bundles_for_domains,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a restore attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Certificates were unpacked from the archive; issuance did not run.
    Cached(Vec<CertificateBundle>),
    /// Issuance ran and succeeded.
    Issued,
    /// Issuance ran and failed.
    Unavailable,
}

impl RestoreOutcome {
    pub fn is_usable(&self) -> bool {
        !matches!(self, RestoreOutcome::Unavailable)
    }
}

/// Coordinates the object store and the local certificate folder
pub struct Backup {
    store: Arc<dyn ObjectStore>,
    config: Arc<Config>,
    /// Where new archives are written before upload
    work_dir: PathBuf,
}

impl Backup {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<Config>) -> Self {
        let work_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            store,
            config,
            work_dir,
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    fn cert_dir(&self) -> PathBuf {
        self.config.base_cert_dir()
    }

    /// Reuse archived certificates or fall back to `issue`.
    ///
    /// The certificate folder is removed before `issue` runs; certbot refuses
    /// to write into a folder that already exists. If it cannot be removed,
    /// `issue` is not called and the outcome is `Unavailable`.
    pub async fn restore<F, Fut>(&self, issue: F) -> RestoreOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        match self.store.download_file(&self.config).await {
            Ok(Some(handle)) => match self.unpack(&handle) {
                Some(bundles) if !self.config.renew => {
                    tracing::info!(
                        domains = %self.config.domains.join(", "),
                        "Restoring certificates from tarball"
                    );
                    return RestoreOutcome::Cached(bundles);
                }
                Some(_) => {
                    tracing::info!("Renewal forced, ignoring certs from tarball - running certbot")
                }
                None => tracing::info!("Ignoring certs from tarball - running certbot"),
            },
            Ok(None) => tracing::info!("No backup found in configured object store"),
            Err(e) => tracing::info!("Failed to download file:\n\t{}", e),
        }

        if let Err(e) = self.clear_cert_dir() {
            tracing::error!(
                dir = %self.cert_dir().display(),
                "Failed to remove certificate folder, not running certbot: {}",
                e
            );
            return RestoreOutcome::Unavailable;
        }
        if issue().await {
            RestoreOutcome::Issued
        } else {
            RestoreOutcome::Unavailable
        }
    }

    fn unpack(&self, handle: &ArchiveHandle) -> Option<Vec<CertificateBundle>> {
        tracing::info!(dir = %handle.dir.display(), "Attempting to unpack tarball");
        if let Err(e) = archive::unpack(&handle.file, &handle.dir) {
            tracing::error!("Unpacking tarball failed with error:\n\t{}", e);
            return None;
        }
        tracing::info!(dir = %handle.dir.display(), "Unpacked tarball");

        match archive::read_metadata(&handle.dir) {
            Ok(Some(meta)) => tracing::info!(created_on = %meta.created_on, "Archive metadata"),
            Ok(None) => tracing::debug!("Archive carries no metadata"),
            Err(e) => tracing::warn!("Archive metadata unreadable: {}", e),
        }

        let bundles = bundles_for_domains(
            &self.config.cert_path,
            &self.config.base,
            &self.config.domains,
            BundleLayout::SharedBase,
        );
        if let Some(incomplete) = bundles.iter().find(|b| !b.is_complete()) {
            tracing::error!(
                folder = %incomplete.folder.display(),
                "Tarball did not contain a complete certificate bundle"
            );
            return None;
        }
        Some(bundles)
    }

    fn clear_cert_dir(&self) -> std::io::Result<()> {
        let dir = self.cert_dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!(dir = %dir.display(), "Removed certificate folder");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Archive the live certificates and upload them.
    ///
    /// Archive creation failures are logged and yield `Ok(None)`; only upload
    /// failures are returned.
    pub async fn create(&self) -> Result<Option<ArchiveHandle>, BucketError> {
        let file = match self.zip_certs() {
            Ok(file) => file,
            Err(e) => {
                tracing::error!("Cert backup failed: {}", e);
                return Ok(None);
            }
        };
        self.store.upload_file(&self.config, &file).await.map(Some)
    }

    fn zip_certs(&self) -> Result<PathBuf, archive::ArchiveError> {
        let dir = self.cert_dir();
        self.write_metadata(&dir);

        let names = [
            METADATA_FILE_NAME,
            ArtifactKind::Crt.file_name(),
            ArtifactKind::Key.file_name(),
            ArtifactKind::Pem.file_name(),
        ];
        let output = self.work_dir.join(ARCHIVE_FILE_NAME);
        let size = archive::pack(&dir, &names, &output)?;
        tracing::info!(
            archive = %output.display(),
            bytes = size,
            "Created tarball with certs"
        );
        Ok(output)
    }

    fn write_metadata(&self, dir: &Path) {
        let file = dir.join(METADATA_FILE_NAME);
        let metadata = ArchiveMetadata {
            created_on: chrono::Utc::now().to_rfc2822(),
            base: self.config.base.clone(),
            domains: self.config.domains.clone(),
            bucket: self.config.bucket.clone(),
            cert_path: self.config.cert_path.display().to_string(),
            renew: self.config.renew,
            staging: self.config.staging,
            email: self.config.email.clone(),
            namespace: self.config.namespace.clone(),
        };
        let written = metadata
            .to_json()
            .map_err(std::io::Error::from)
            .and_then(|json| std::fs::write(&file, json));
        if let Err(e) = written {
            tracing::error!(
                file = %file.display(),
                "Failed to write cert metadata (archive creation and upload will fail): {}",
                e
            );
        }
    }
}
