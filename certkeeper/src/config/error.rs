use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No domains configured (set CERT_DOMAINS)")]
    NoDomains,

    #[error("Domain list contains an empty entry")]
    EmptyDomain,

    #[error("Base domain '{0}' is not related to any configured domain")]
    UnrelatedBase(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid etcd URL '{0}': {1}")]
    InvalidEtcdUrl(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
