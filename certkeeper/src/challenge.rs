//! Challenge server supervision
//!
//! The HTTP-01 challenge is answered by a short-lived child process serving
//! the webroot. `start()` resolves once the child has stayed alive for a short
//! window (or fails if it exits first); afterwards crashes and output are
//! reported on an event channel that callers may observe without blocking.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long a child must stay up to count as started
pub const DEFAULT_STAY_UP: Duration = Duration::from_secs(1);

/// Errors that can occur while supervising a process
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Failed to spawn '{0}': {1}")]
    Spawn(String, std::io::Error),

    #[error("Process '{0}' would not stay up: {1}")]
    Failed(String, String),

    #[error("Process '{0}' was already started")]
    AlreadyStarted(String),
}

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

/// Lifecycle notifications emitted after `start()` succeeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// The process exited without being asked to
    Crashed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Failed,
    Stopped,
}

/// Creates supervised processes
#[async_trait]
pub trait ProcessHost: Send + Sync {
    async fn create(
        &self,
        kind: &str,
        spec: ProcessSpec,
    ) -> Result<Box<dyn ManagedProcess>, ChallengeError>;
}

/// A supervised process
#[async_trait]
pub trait ManagedProcess: Send {
    fn kind(&self) -> &str;

    fn state(&self) -> ProcessState;

    /// Start the process; resolves to exactly one of started or failed.
    async fn start(&mut self) -> Result<(), ChallengeError>;

    /// Event stream; can be taken once.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>>;

    /// Stop the process. Safe to call repeatedly and before `start()`.
    async fn stop(&mut self);
}

/// Spawns local child processes
#[derive(Debug, Clone)]
pub struct LocalProcessHost {
    stay_up: Duration,
}

impl LocalProcessHost {
    pub fn new(stay_up: Duration) -> Self {
        Self { stay_up }
    }
}

impl Default for LocalProcessHost {
    fn default() -> Self {
        Self::new(DEFAULT_STAY_UP)
    }
}

#[async_trait]
impl ProcessHost for LocalProcessHost {
    async fn create(
        &self,
        kind: &str,
        spec: ProcessSpec,
    ) -> Result<Box<dyn ManagedProcess>, ChallengeError> {
        let program = resolve_command(&spec.command)
            .ok_or_else(|| ChallengeError::CommandNotFound(spec.command.clone()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Box::new(LocalProcess {
            kind: kind.to_string(),
            program,
            spec,
            stay_up: self.stay_up,
            state: ProcessState::Created,
            events_tx,
            events_rx: Some(events_rx),
            shutdown: None,
            monitor: None,
        }))
    }
}

/// Find `command` on `PATH` (or verify it directly if it contains a separator).
fn resolve_command(command: &str) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }
    let direct = Path::new(command);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

struct LocalProcess {
    kind: String,
    program: PathBuf,
    spec: ProcessSpec,
    stay_up: Duration,
    state: ProcessState,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    shutdown: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

#[async_trait]
impl ManagedProcess for LocalProcess {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn state(&self) -> ProcessState {
        self.state
    }

    async fn start(&mut self) -> Result<(), ChallengeError> {
        if self.state != ProcessState::Created {
            return Err(ChallengeError::AlreadyStarted(self.kind.clone()));
        }

        tracing::info!(
            kind = %self.kind,
            command = %self.spec.command,
            args = ?self.spec.args,
            "Starting process"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = ProcessState::Failed;
                return Err(ChallengeError::Spawn(self.spec.command.clone(), e));
            }
        };

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, self.events_tx.clone(), ProcessEvent::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, self.events_tx.clone(), ProcessEvent::Stderr);
        }

        tokio::select! {
            status = child.wait() => {
                self.state = ProcessState::Failed;
                let reason = match status {
                    Ok(status) => format!("exited during startup ({})", status),
                    Err(e) => e.to_string(),
                };
                return Err(ChallengeError::Failed(self.kind.clone(), reason));
            }
            _ = tokio::time::sleep(self.stay_up) => {}
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let events = self.events_tx.clone();
        let kind = self.kind.clone();
        let monitor = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let reason = match status {
                        Ok(status) => status.to_string(),
                        Err(e) => e.to_string(),
                    };
                    tracing::debug!(kind = %kind, reason = %reason, "Process exited unexpectedly");
                    let _ = events.send(ProcessEvent::Crashed(reason));
                }
                _ = shutdown_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(kind = %kind, "Failed to kill process: {}", e);
                    }
                }
            }
        });

        self.shutdown = Some(shutdown_tx);
        self.monitor = Some(monitor);
        self.state = ProcessState::Running;
        tracing::info!(kind = %self.kind, "Process started");
        Ok(())
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        self.events_rx.take()
    }

    async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.await;
            tracing::info!(kind = %self.kind, "Process stopped");
        }
        if self.state != ProcessState::Failed {
            self.state = ProcessState::Stopped;
        }
    }
}

fn forward_lines<R>(
    stream: R,
    events: mpsc::UnboundedSender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if events.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessSpec {
        ProcessSpec {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: None,
        }
    }

    fn host() -> LocalProcessHost {
        LocalProcessHost::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn unknown_command_fails_creation() {
        let spec = ProcessSpec {
            command: "certkeeper-no-such-server".to_string(),
            args: vec![],
            cwd: None,
        };
        let err = host().create("http", spec).await.err().unwrap();
        assert!(matches!(err, ChallengeError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn long_running_process_starts_and_stops_idempotently() {
        let mut process = host().create("http", sh("sleep 30")).await.unwrap();
        process.start().await.unwrap();
        assert_eq!(process.state(), ProcessState::Running);

        process.stop().await;
        process.stop().await;
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn process_exiting_during_startup_fails() {
        let mut process = host().create("http", sh("exit 1")).await.unwrap();
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, ChallengeError::Failed(..)));
        assert_eq!(process.state(), ProcessState::Failed);

        process.stop().await;
        assert_eq!(process.state(), ProcessState::Failed);
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let mut process = host().create("http", sh("sleep 30")).await.unwrap();
        process.stop().await;
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn crash_after_start_is_reported_on_event_channel() {
        let mut process = host()
            .create("http", sh("sleep 0.4; exit 2"))
            .await
            .unwrap();
        let mut events = process.take_events().unwrap();
        process.start().await.unwrap();

        let crashed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if let ProcessEvent::Crashed(reason) = event {
                    return Some(reason);
                }
            }
            None
        })
        .await
        .unwrap();
        assert!(crashed.is_some());
        process.stop().await;
    }

    #[tokio::test]
    async fn stdout_lines_are_forwarded() {
        let mut process = host()
            .create("http", sh("echo serving; sleep 30"))
            .await
            .unwrap();
        let mut events = process.take_events().unwrap();
        assert!(process.take_events().is_none());
        process.start().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(ProcessEvent::Stdout("serving".to_string())));
        process.stop().await;
    }
}
