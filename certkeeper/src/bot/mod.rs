//! Certificate workflows
//!
//! `Bot` drives the acquisition workflow: challenge server, backup restore,
//! certbot and publish. Self-signing needs none of that and lives in
//! [`selfsign`].

mod acquire;
pub mod certbot;
pub mod selfsign;

pub use acquire::{AcquireError, Completion, Stage, WorkflowOutcome};
pub use selfsign::SelfSignError;

use crate::backup::Backup;
use crate::challenge::ProcessHost;
use crate::config::Config;
use crate::etcd::KvStore;
use crate::exec::CommandRunner;
use std::sync::Arc;

pub struct Bot {
    config: Arc<Config>,
    store: Arc<dyn KvStore>,
    exec: Arc<dyn CommandRunner>,
    processes: Arc<dyn ProcessHost>,
    backup: Backup,
}

impl Bot {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn KvStore>,
        exec: Arc<dyn CommandRunner>,
        processes: Arc<dyn ProcessHost>,
        backup: Backup,
    ) -> Self {
        Self {
            config,
            store,
            exec,
            processes,
            backup,
        }
    }
}
