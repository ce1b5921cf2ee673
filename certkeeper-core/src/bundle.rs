//! Certificate bundles: the three artifacts published for every domain

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One of the three artifacts that make up a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Leaf certificate
    Crt,
    /// Private key
    Key,
    /// Full chain
    Pem,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Crt, ArtifactKind::Key, ArtifactKind::Pem];

    /// Suffix appended to the distributed-store key
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Crt => "crt",
            ArtifactKind::Key => "key",
            ArtifactKind::Pem => "pem",
        }
    }

    /// File name inside a certificate folder (certbot's live layout)
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Crt => "cert.pem",
            ArtifactKind::Key => "privkey.pem",
            ArtifactKind::Pem => "fullchain.pem",
        }
    }
}

/// Where a bundle's artifacts are resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleLayout {
    /// Every domain shares the base-domain folder (one multi-SAN certificate).
    SharedBase,
    /// Every domain has its own folder (self-signed placeholders).
    PerDomain,
}

/// Filesystem paths to the artifacts for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    /// Domain the bundle is published for
    pub domain: String,
    /// Folder the artifacts were resolved from
    pub folder: PathBuf,
    /// Leaf certificate path
    pub crt: PathBuf,
    /// Private key path
    pub key: PathBuf,
    /// Full chain path
    pub pem: PathBuf,
}

impl CertificateBundle {
    /// Resolve the standard artifact names inside `folder`.
    pub fn in_folder(domain: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        Self {
            domain: domain.into(),
            crt: folder.join(ArtifactKind::Crt.file_name()),
            key: folder.join(ArtifactKind::Key.file_name()),
            pem: folder.join(ArtifactKind::Pem.file_name()),
            folder,
        }
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Crt => &self.crt,
            ArtifactKind::Key => &self.key,
            ArtifactKind::Pem => &self.pem,
        }
    }

    /// Artifacts in publishing order
    pub fn artifacts(&self) -> impl Iterator<Item = (ArtifactKind, &Path)> {
        ArtifactKind::ALL.into_iter().map(|kind| (kind, self.path(kind)))
    }

    /// A bundle is publishable only once all three artifacts exist.
    pub fn is_complete(&self) -> bool {
        self.artifacts().all(|(_, path)| path.exists())
    }
}

/// Build bundles for every domain under `cert_root`.
pub fn bundles_for_domains(
    cert_root: &Path,
    base: &str,
    domains: &[String],
    layout: BundleLayout,
) -> Vec<CertificateBundle> {
    domains
        .iter()
        .map(|domain| {
            let folder = match layout {
                BundleLayout::SharedBase => cert_root.join(base),
                BundleLayout::PerDomain => cert_root.join(domain),
            };
            CertificateBundle::in_folder(domain.clone(), folder)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains() -> Vec<String> {
        vec!["test.io".to_string(), "www.test.io".to_string()]
    }

    #[test]
    fn shared_layout_points_every_domain_at_base_folder() {
        let bundles = bundles_for_domains(
            Path::new("/etc/letsencrypt/live"),
            "test.io",
            &domains(),
            BundleLayout::SharedBase,
        );
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[1].domain, "www.test.io");
        assert_eq!(
            bundles[1].crt,
            PathBuf::from("/etc/letsencrypt/live/test.io/cert.pem")
        );
        assert_eq!(
            bundles[1].pem,
            PathBuf::from("/etc/letsencrypt/live/test.io/fullchain.pem")
        );
    }

    #[test]
    fn per_domain_layout_uses_domain_folder() {
        let bundles =
            bundles_for_domains(Path::new("certs"), "test.io", &domains(), BundleLayout::PerDomain);
        assert_eq!(bundles[1].folder, PathBuf::from("certs/www.test.io"));
        assert_eq!(bundles[1].key, PathBuf::from("certs/www.test.io/privkey.pem"));
    }

    #[test]
    fn artifacts_are_listed_in_publish_order() {
        let bundle = CertificateBundle::in_folder("test.io", "/x");
        let kinds: Vec<_> = bundle.artifacts().map(|(kind, _)| kind.suffix()).collect();
        assert_eq!(kinds, vec!["crt", "key", "pem"]);
    }

    #[test]
    fn missing_artifact_makes_bundle_incomplete() {
        let bundle = CertificateBundle::in_folder("test.io", "/nonexistent/certkeeper");
        assert!(!bundle.is_complete());
    }
}
