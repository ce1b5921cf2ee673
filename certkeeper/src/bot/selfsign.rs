//! Self-signed placeholder certificates
//!
//! Every domain gets its own folder under the certificate root. The batch is
//! all-or-nothing: if openssl fails for any domain nothing is published.

use crate::config::Config;
use crate::etcd::{KvStore, StoreError};
use crate::exec::{CommandRunner, Echo, ExecError};
use crate::writer;
use certkeeper_core::{ArtifactKind, CertificateBundle};
use futures::future::try_join_all;
use std::path::Path;
use thiserror::Error;

pub const OPENSSL: &str = "openssl";

const VALID_DAYS: u32 = 365;
const KEY_SPEC: &str = "rsa:2048";

/// Errors that can occur during self-signed cert generation
#[derive(Debug, Error)]
pub enum SelfSignError {
    #[error("Failed to generate certificate for {domain}: {source}")]
    Generate {
        domain: String,
        #[source]
        source: ExecError,
    },

    #[error("IO error for {domain}: {source}")]
    Io {
        domain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to publish self-signed certificates: {0}")]
    Store(#[from] StoreError),
}

/// Certificate subject for `domain`.
pub fn subject(config: &Config, domain: &str) -> String {
    format!(
        "/C={}/ST={}/L={}/O={}/OU={}/CN={}/emailAddress={}",
        config.country,
        config.state,
        config.local,
        config.organization,
        config.unit,
        domain,
        config.email
    )
}

pub fn openssl_args(config: &Config, domain: &str, key: &Path, crt: &Path) -> Vec<String> {
    vec![
        "req".into(),
        "-x509".into(),
        "-nodes".into(),
        "-days".into(),
        VALID_DAYS.to_string(),
        "-newkey".into(),
        KEY_SPEC.into(),
        "-keyout".into(),
        key.display().to_string(),
        "-out".into(),
        crt.display().to_string(),
        "-subj".into(),
        subject(config, domain),
    ]
}

/// Generate certificates for every domain, then publish them.
pub async fn self_sign_all(
    config: &Config,
    store: &dyn KvStore,
    exec: &dyn CommandRunner,
) -> Result<Vec<CertificateBundle>, SelfSignError> {
    let certs = try_join_all(
        config
            .domains
            .iter()
            .map(|domain| self_sign(config, exec, domain)),
    )
    .await?;

    tracing::info!(count = certs.len(), "Generated self-signed certificates");
    writer::write_certs(config, store, &certs).await?;
    Ok(certs)
}

async fn self_sign(
    config: &Config,
    exec: &dyn CommandRunner,
    domain: &str,
) -> Result<CertificateBundle, SelfSignError> {
    let cert = CertificateBundle::in_folder(domain, config.cert_path.join(domain));
    let io_err = |source| SelfSignError::Io {
        domain: domain.to_string(),
        source,
    };

    tokio::fs::create_dir_all(&cert.folder).await.map_err(io_err)?;

    let key = cert.path(ArtifactKind::Key);
    let crt = cert.path(ArtifactKind::Crt);
    exec.exec(OPENSSL, &openssl_args(config, domain, key, crt), Echo::Silent)
        .await
        .map_err(|source| SelfSignError::Generate {
            domain: domain.to_string(),
            source,
        })?;

    combine(crt, key, cert.path(ArtifactKind::Pem))
        .await
        .map_err(io_err)?;

    tracing::info!(domain, folder = %cert.folder.display(), "Self-signed certificate created");
    Ok(cert)
}

/// Full chain = certificate followed by key
async fn combine(crt: &Path, key: &Path, pem: &Path) -> std::io::Result<()> {
    let mut chain = tokio::fs::read(crt).await?;
    chain.extend(tokio::fs::read(key).await?);
    tokio::fs::write(pem, chain).await
}
