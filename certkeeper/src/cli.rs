use crate::backup::Backup;
use crate::bot::{AcquireError, Bot, Completion, SelfSignError, WorkflowOutcome, selfsign};
use crate::bucket::{self, BucketError};
use crate::challenge::LocalProcessHost;
use crate::config::{Config, ConfigError, Workflow};
use crate::etcd::EtcdClient;
use crate::exec::ProcessRunner;
use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use thiserror::Error;

/// Exit status for a failed acquisition
pub const EXIT_ACQUIRE_FAILED: i32 = 100;

/// certkeeper - acquire, back up and publish TLS certificates
#[derive(Parser)]
#[command(name = "certkeeper")]
#[command(version)]
#[command(about = "certkeeper - acquire, back up and publish TLS certificates")]
pub struct Cli {
    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, env = "CERT_LOG_JSON", global = true, value_parser = FalseyValueParser::new())]
    pub json_logs: bool,

    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Restore certificates from backup or issue them with certbot, then publish
    #[command(visible_alias = "acquire")]
    Getlegit,

    /// Generate self-signed certificates for every domain and publish them
    Selfsign,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Object store setup failed: {0}")]
    Bucket(#[from] BucketError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    SelfSign(#[from] SelfSignError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Acquire(_) => EXIT_ACQUIRE_FAILED,
            _ => 1,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<(), CliError> {
        let config = Arc::new(self.config.normalize());
        match self.command {
            Commands::Getlegit => acquire(config).await,
            Commands::Selfsign => self_sign(&config).await,
        }
    }
}

async fn acquire(config: Arc<Config>) -> Result<(), CliError> {
    config.validate(Workflow::Acquire)?;

    let objects = bucket::object_store(&config).await?;
    let store = Arc::new(EtcdClient::new(&config.etcd, config.etcd_api)?);
    let backup = Backup::new(objects, config.clone());
    let bot = Bot::new(
        config,
        store,
        Arc::new(ProcessRunner),
        Arc::new(LocalProcessHost::default()),
        backup,
    );

    match bot.run().await {
        WorkflowOutcome::Done(Completion::Issued) => {
            tracing::info!("Certificates issued, backed up and published");
            Ok(())
        }
        WorkflowOutcome::Done(Completion::Restored) => {
            tracing::info!("Certificates restored from backup");
            Ok(())
        }
        WorkflowOutcome::Failed(e) => Err(e.into()),
    }
}

async fn self_sign(config: &Config) -> Result<(), CliError> {
    config.validate(Workflow::SelfSign)?;

    let store = EtcdClient::new(&config.etcd, config.etcd_api)?;
    let certs = selfsign::self_sign_all(config, &store, &ProcessRunner).await?;
    tracing::info!(count = certs.len(), "Self-signed certificates published");
    Ok(())
}
