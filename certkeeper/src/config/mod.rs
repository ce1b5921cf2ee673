//! Runtime configuration
//!
//! Every setting is read from the environment (with a matching long flag) and
//! validated once before a workflow starts.

mod error;

pub use error::*;

use clap::builder::FalseyValueParser;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CERT_PATH: &str = "/etc/letsencrypt/live";
pub const DEFAULT_CERTBOT_LOG: &str = "/var/log/letsencrypt/letsencrypt.log";

/// Object store used for certificate backups
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ObjectStoreKind {
    S3,
    Gcs,
}

/// Distributed store API flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EtcdApi {
    V2,
    V3,
}

/// Which workflow a configuration is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Acquire,
    SelfSign,
}

/// Environment-backed settings shared by every subcommand
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Domains to acquire certificates for (comma separated)
    #[arg(long, env = "CERT_DOMAINS", value_delimiter = ',')]
    pub domains: Vec<String>,

    /// Base domain; owns the certificate folder and the store key layout
    #[arg(long, env = "CERT_BASE_DOMAIN", default_value = "")]
    pub base: String,

    /// Certificate subject: country
    #[arg(long, env = "CERT_COUNTRY", default_value = "")]
    pub country: String,

    /// Certificate subject: state
    #[arg(long, env = "CERT_STATE", default_value = "")]
    pub state: String,

    /// Certificate subject: locality
    #[arg(long, env = "CERT_LOCAL", default_value = "")]
    pub local: String,

    /// Certificate subject: organization
    #[arg(long, env = "CERT_ORG", default_value = "")]
    pub organization: String,

    /// Certificate subject: organizational unit
    #[arg(long, env = "CERT_UNIT", default_value = "")]
    pub unit: String,

    /// Contact email (ACME account and certificate subject)
    #[arg(long, env = "CERT_EMAIL", default_value = "")]
    pub email: String,

    /// etcd endpoint certificates are published to
    #[arg(long, env = "CERT_ECTD_URL", default_value = "")]
    pub etcd: String,

    /// etcd API flavour
    #[arg(long, env = "CERT_ETCD_API", value_enum, default_value_t = EtcdApi::V2)]
    pub etcd_api: EtcdApi,

    /// Key namespace in etcd
    #[arg(long, env = "CERT_ETCD_NAMESPACE", default_value = "")]
    pub namespace: String,

    /// Bucket holding the certificate backup
    #[arg(long, env = "CERT_BUCKET")]
    pub bucket: Option<String>,

    /// Object store backend for backups
    #[arg(long, env = "CERT_OBJECT_STORE", value_enum, default_value_t = ObjectStoreKind::S3)]
    pub object_store: ObjectStoreKind,

    /// Root of the live certificate folders
    #[arg(long, env = "CERT_PATH", default_value = DEFAULT_CERT_PATH)]
    pub cert_path: PathBuf,

    /// Directory served by the challenge server and passed to certbot
    #[arg(long, env = "CERT_WEBROOT", default_value = "./")]
    pub webroot: PathBuf,

    /// Use the Let's Encrypt staging directory
    #[arg(long, env = "CERT_STAGING", value_parser = FalseyValueParser::new())]
    pub staging: bool,

    /// Ignore any backup and issue fresh certificates
    #[arg(long, env = "CERT_RENEW", value_parser = FalseyValueParser::new())]
    pub renew: bool,

    /// Seconds to wait after the challenge server starts
    #[arg(long, env = "CERT_WAIT", default_value_t = 10)]
    pub wait: u64,

    /// Port for the HTTP-01 challenge server
    #[arg(long, env = "CERT_HTTP_PORT", default_value_t = 80)]
    pub port: u16,

    /// Certbot log dumped when issuance fails
    #[arg(long, env = "CERT_LOG_PATH")]
    pub log_path: Option<PathBuf>,

    #[command(flatten)]
    pub s3: S3Settings,

    #[command(flatten)]
    pub gcs: GcsSettings,
}

/// S3 credentials and endpoint
#[derive(Debug, Clone, Default, Args)]
pub struct S3Settings {
    #[arg(long = "aws-region", env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long = "aws-access-key-id", env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    #[arg(long = "aws-secret-access-key", env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    #[arg(long = "aws-session-token", env = "AWS_SESSION_TOKEN", hide_env_values = true)]
    pub session_token: Option<String>,

    /// Override for S3-compatible endpoints
    #[arg(long = "s3-endpoint", env = "CERT_S3_ENDPOINT")]
    pub endpoint: Option<String>,
}

/// Google Cloud Storage service account
#[derive(Debug, Clone, Default, Args)]
pub struct GcsSettings {
    #[arg(long = "gcs-project-id", env = "GS_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Service account email
    #[arg(long = "gcs-client-email", env = "GS_USER_ID")]
    pub client_email: Option<String>,

    /// Path to the service account's PEM private key
    #[arg(long = "gcs-key-file", env = "GS_USER_KEY")]
    pub key_file: Option<PathBuf>,
}

impl Config {
    /// Configuration with the given domains and defaults for everything else.
    pub fn new(base: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            domains,
            base: base.into(),
            country: String::new(),
            state: String::new(),
            local: String::new(),
            organization: String::new(),
            unit: String::new(),
            email: String::new(),
            etcd: String::new(),
            etcd_api: EtcdApi::V2,
            namespace: String::new(),
            bucket: None,
            object_store: ObjectStoreKind::S3,
            cert_path: PathBuf::from(DEFAULT_CERT_PATH),
            webroot: PathBuf::from("./"),
            staging: false,
            renew: false,
            wait: 10,
            port: 80,
            log_path: None,
            s3: S3Settings::default(),
            gcs: GcsSettings::default(),
        }
    }

    /// Trim whitespace left over from comma splitting.
    pub fn normalize(mut self) -> Self {
        self.domains = self
            .domains
            .iter()
            .map(|d| d.trim().to_string())
            .collect();
        self.base = self.base.trim().to_string();
        self
    }

    /// Folder the ACME-issued certificates live in.
    pub fn base_cert_dir(&self) -> PathBuf {
        self.cert_path.join(&self.base)
    }

    pub fn wait_duration(&self) -> Duration {
        Duration::from_secs(self.wait)
    }

    pub fn certbot_log(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CERTBOT_LOG))
    }

    /// Check invariants required by `workflow`.
    pub fn validate(&self, workflow: Workflow) -> Result<()> {
        if self.domains.is_empty() {
            return Err(ConfigError::NoDomains);
        }
        if self.domains.iter().any(|d| d.is_empty()) {
            return Err(ConfigError::EmptyDomain);
        }
        if self.base.is_empty() {
            return Err(ConfigError::Missing("CERT_BASE_DOMAIN"));
        }
        if !self.domains.iter().any(|d| self.is_within_base(d)) {
            return Err(ConfigError::UnrelatedBase(self.base.clone()));
        }
        if self.email.is_empty() {
            return Err(ConfigError::Missing("CERT_EMAIL"));
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::Missing("CERT_ETCD_NAMESPACE"));
        }
        self.validate_etcd_url()?;

        match workflow {
            Workflow::Acquire => self.validate_backup_settings(),
            Workflow::SelfSign => self.validate_subject(),
        }
    }

    /// `domain` is the base domain or one of its subdomains.
    fn is_within_base(&self, domain: &str) -> bool {
        domain == self.base
            || domain
                .strip_suffix(self.base.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

        fn validate_etcd_url(&self) -> Result<()> {
        if self.etcd.is_empty() {
            return Err(ConfigError::Missing("CERT_ECTD_URL"));
        }
        let url = reqwest::Url::parse(&self.etcd)
            .map_err(|e| ConfigError::InvalidEtcdUrl(self.etcd.clone(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidEtcdUrl(
                self.etcd.clone(),
                "scheme must be http or https".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_backup_settings(&self) -> Result<()> {
        if self.bucket.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("CERT_BUCKET"));
        }
        match self.object_store {
            ObjectStoreKind::S3 => {
                if self.s3.access_key_id.is_none() {
                    return Err(ConfigError::Missing("AWS_ACCESS_KEY_ID"));
                }
                if self.s3.secret_access_key.is_none() {
                    return Err(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"));
                }
            }
            ObjectStoreKind::Gcs => {
                if self.gcs.client_email.is_none() {
                    return Err(ConfigError::Missing("GS_USER_ID"));
                }
                if self.gcs.key_file.is_none() {
                    return Err(ConfigError::Missing("GS_USER_KEY"));
                }
            }
        }
        Ok(())
    }

    fn validate_subject(&self) -> Result<()> {
        let required = [
            (&self.country, "CERT_COUNTRY"),
            (&self.state, "CERT_STATE"),
            (&self.organization, "CERT_ORG"),
            (&self.unit, "CERT_UNIT"),
        ];
        for (value, name) in required {
            if value.is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }
}
