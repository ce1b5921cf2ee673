//! External tool invocation (certbot, openssl)

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Errors that can occur while running an external tool
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed with exit code {code:?}:\n\t{}", .output.join("\n\t"))]
    Failed {
        command: String,
        args: Vec<String>,
        /// Process exit code (`None` when terminated by a signal)
        code: Option<i32>,
        /// Captured stderr lines
        output: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExecError::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn output(&self) -> &[String] {
        match self {
            ExecError::Failed { output, .. } => output,
            _ => &[],
        }
    }
}

/// What to do with a tool's output while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// Forward every line to the log
    Log,
    /// Capture only
    Silent,
}

/// Runs external tools to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with `args`, returning stdout lines on a zero exit.
    async fn exec(&self, command: &str, args: &[String], echo: Echo)
    -> Result<Vec<String>, ExecError>;
}

/// `CommandRunner` backed by real child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn exec(
        &self,
        command: &str,
        args: &[String],
        echo: Echo,
    ) -> Result<Vec<String>, ExecError> {
        tracing::debug!(command, args = ?args, "Running external tool");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (out, err, status) = tokio::join!(
            collect_lines(stdout, command, echo),
            collect_lines(stderr, command, echo),
            child.wait()
        );
        let status = status?;

        if status.success() {
            Ok(out?)
        } else {
            Err(ExecError::Failed {
                command: command.to_string(),
                args: args.to_vec(),
                code: status.code(),
                output: err?,
            })
        }
    }
}

async fn collect_lines<R>(
    stream: Option<R>,
    command: &str,
    echo: Echo,
) -> Result<Vec<String>, std::io::Error>
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return Ok(Vec::new());
    };
    let mut lines = BufReader::new(stream).lines();
    let mut collected = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if echo == Echo::Log {
            tracing::info!(command, "{}", line);
        }
        collected.push(line);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_lines_on_success() {
        let out = ProcessRunner
            .exec("sh", &args(&["-c", "echo one; echo two"]), Echo::Silent)
            .await
            .unwrap();
        assert_eq!(out, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn non_zero_exit_reports_code_and_stderr() {
        let err = ProcessRunner
            .exec("sh", &args(&["-c", "echo boom >&2; exit 3"]), Echo::Silent)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(3));
        assert_eq!(err.output(), ["boom".to_string()]);
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = ProcessRunner
            .exec("certkeeper-no-such-tool", &[], Echo::Log)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        assert_eq!(err.code(), None);
    }
}
