//! Acquisition workflow
//!
//! Init -> ServerCreating -> ServerStarting -> Waiting -> Restoring
//! -> Stopping -> Publishing -> Done | Failed
//!
//! The challenge server is stopped as soon as restore settles, before anything
//! is written to the store.

use super::{Bot, certbot};
use crate::backup::RestoreOutcome;
use crate::challenge::{ChallengeError, ManagedProcess, ProcessEvent, ProcessSpec};
use crate::config::Config;
use crate::etcd::StoreError;
use crate::writer;
use certkeeper_core::{BundleLayout, bundles_for_domains};
use thiserror::Error;
use tokio::sync::mpsc;

const CHALLENGE_KIND: &str = "http";

/// Steps of the acquisition workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    ServerCreating,
    ServerStarting,
    Waiting,
    Restoring,
    Publishing,
    Stopping,
    Done,
    Failed,
}

/// How a successful acquisition finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Fresh certificates were issued, backed up and published.
    Issued,
    /// Certificates were restored from the backup archive.
    Restored,
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Failed to create challenge server: {0}")]
    ServerCreate(#[source] ChallengeError),

    #[error("Challenge server failed to start: {0}")]
    ServerStart(#[source] ChallengeError),

    #[error("Certificate issuance failed and no usable backup exists")]
    IssuanceFailed,

    #[error("Failed to publish certificates: {0}")]
    Publish(#[source] StoreError),
}

impl AcquireError {
    /// Stage the workflow was in when it failed
    pub fn stage(&self) -> Stage {
        match self {
            AcquireError::ServerCreate(_) => Stage::ServerCreating,
            AcquireError::ServerStart(_) => Stage::ServerStarting,
            AcquireError::IssuanceFailed => Stage::Restoring,
            AcquireError::Publish(_) => Stage::Publishing,
        }
    }
}

#[derive(Debug)]
pub enum WorkflowOutcome {
    Done(Completion),
    Failed(AcquireError),
}

impl WorkflowOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, WorkflowOutcome::Done(_))
    }
}

/// `python3 -m http.server <port>` serving the webroot
pub fn challenge_server_spec(config: &Config) -> ProcessSpec {
    ProcessSpec {
        command: "python3".to_string(),
        args: vec![
            "-m".to_string(),
            "http.server".to_string(),
            config.port.to_string(),
        ],
        cwd: Some(config.webroot.clone()),
    }
}

fn enter(stage: Stage) {
    tracing::debug!(?stage, "Acquisition stage");
}

impl Bot {
    /// Restore or issue certificates for every configured domain.
    pub async fn run(&self) -> WorkflowOutcome {
        enter(Stage::Init);
        match self.acquire().await {
            Ok(completion) => {
                enter(Stage::Done);
                WorkflowOutcome::Done(completion)
            }
            Err(e) => {
                enter(Stage::Failed);
                tracing::error!(
                    stage = ?e.stage(),
                    "Failed to fetch or renew certs via LetsEncrypt: {}",
                    e
                );
                WorkflowOutcome::Failed(e)
            }
        }
    }

    async fn acquire(&self) -> Result<Completion, AcquireError> {
        enter(Stage::ServerCreating);
        let mut server = self
            .processes
            .create(CHALLENGE_KIND, challenge_server_spec(&self.config))
            .await
            .map_err(AcquireError::ServerCreate)?;

        if let Some(events) = server.take_events() {
            tokio::spawn(log_server_events(events));
        }

        let restored = self.start_and_restore(server.as_mut()).await;
        enter(Stage::Stopping);
        tracing::info!(kind = server.kind(), "Stopping challenge server");
        server.stop().await;

        match restored? {
            RestoreOutcome::Cached(bundles) => {
                tracing::info!(
                    count = bundles.len(),
                    "Reusing certificates from backup; skipping backup and publish"
                );
                Ok(Completion::Restored)
            }
            RestoreOutcome::Issued => {
                self.publish().await?;
                Ok(Completion::Issued)
            }
            RestoreOutcome::Unavailable => Err(AcquireError::IssuanceFailed),
        }
    }

    async fn start_and_restore(
        &self,
        server: &mut dyn ManagedProcess,
    ) -> Result<RestoreOutcome, AcquireError> {
        enter(Stage::ServerStarting);
        tracing::info!(port = self.config.port, "Starting challenge server");
        server.start().await.map_err(AcquireError::ServerStart)?;

        enter(Stage::Waiting);
        tracing::info!(
            seconds = self.config.wait,
            "Challenge server started, waiting before checking for backups"
        );
        tokio::time::sleep(self.config.wait_duration()).await;

        enter(Stage::Restoring);
        let config = self.config.clone();
        let exec = self.exec.clone();
        let outcome = self
            .backup
            .restore(|| async move { certbot::run_certbot(&config, exec.as_ref()).await })
            .await;
        Ok(outcome)
    }

    async fn publish(&self) -> Result<(), AcquireError> {
        enter(Stage::Publishing);
        match self.backup.create().await {
            Ok(Some(handle)) => {
                tracing::info!(file = %handle.file.display(), "Uploaded certificate backup")
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Cert backup upload failed: {}", e),
        }

        let certs = bundles_for_domains(
            &self.config.cert_path,
            &self.config.base,
            &self.config.domains,
            BundleLayout::SharedBase,
        );
        writer::write_certs(&self.config, self.store.as_ref(), &certs)
            .await
            .map_err(AcquireError::Publish)?;

        tracing::info!(count = certs.len(), "Published certificates");
        Ok(())
    }
}

async fn log_server_events(mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                tracing::info!(process = CHALLENGE_KIND, "{}", line)
            }
            ProcessEvent::Crashed(status) => {
                tracing::error!("Challenge server crashed: {}", status)
            }
        }
    }
}
