//! Metadata embedded in every backup archive

use serde::{Deserialize, Serialize};

/// Written next to the certificates right before an archive is created.
///
/// `created_on` is an RFC 2822 UTC timestamp; the remaining fields are a
/// snapshot of the configuration that produced the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub created_on: String,
    pub base: String,
    pub domains: Vec<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    pub cert_path: String,
    #[serde(default)]
    pub renew: bool,
    #[serde(default)]
    pub staging: bool,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub namespace: String,
}

impl ArchiveMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
