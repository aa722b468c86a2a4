//! Idempotent command execution over an open session.
//!
//! Every remote action funnels through [`run`], which logs the command,
//! applies a timeout, and classifies the outcome. Callers that treat a
//! non-zero exit status as data rather than failure mark the invocation
//! with [`CommandInvocation::ignoring_failure`].

use std::time::Duration;

use thiserror::Error;

use crate::session::{ExecError, Session};

/// Default timeout applied to commands that do not override it.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const LOG_SNIPPET_CHARS: usize = 100;

/// A single remote command together with its execution policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Shell command line to run on the remote host.
    pub command: String,
    /// Timeout for this invocation.
    pub timeout: Duration,
    /// When set, a non-zero exit status is reported as a result rather
    /// than an error.
    pub ignore_failure: bool,
}

impl CommandInvocation {
    /// Creates an invocation with the default timeout.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            ignore_failure: false,
        }
    }

    /// Overrides the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks non-zero exit statuses as ordinary results.
    #[must_use]
    pub const fn ignoring_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }
}

/// Captured output of a completed command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandResult {
    /// Exit status reported by the remote shell.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandResult {
    /// Reports whether the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors produced when running a remote command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// The command completed with a non-zero exit status.
    #[error("command `{command}` failed with exit code {exit_code}: {stderr}")]
    Failed {
        /// Command line that was executed.
        command: String,
        /// Non-zero exit status reported by the remote shell.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// The command did not complete within its timeout.
    #[error("command `{command}` timed out after {seconds}s")]
    Timeout {
        /// Command line that was executed.
        command: String,
        /// Timeout that elapsed, in seconds.
        seconds: u64,
    },
    /// The session channel failed before an exit status was observed.
    #[error("command `{command}` channel failure: {message}")]
    Channel {
        /// Command line that was executed.
        command: String,
        /// Description of the transport failure.
        message: String,
    },
}

/// Runs one command over the session and classifies the outcome.
///
/// # Errors
///
/// Returns [`CommandError::Failed`] on a non-zero exit status unless the
/// invocation ignores failures, [`CommandError::Timeout`] when the timeout
/// elapses, and [`CommandError::Channel`] on transport failure.
pub async fn run(
    session: &mut dyn Session,
    invocation: &CommandInvocation,
) -> Result<CommandResult, CommandError> {
    tracing::info!(command = %invocation.command, "executing");
    let output = session
        .exec(&invocation.command, invocation.timeout)
        .await
        .map_err(|err| match err {
            ExecError::Timeout { seconds } => CommandError::Timeout {
                command: invocation.command.clone(),
                seconds,
            },
            ExecError::Channel { message } => CommandError::Channel {
                command: invocation.command.clone(),
                message,
            },
        })?;

    let result = CommandResult {
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    };
    tracing::info!(
        command = %invocation.command,
        exit_code = result.exit_code,
        stdout = %snippet(&result.stdout),
        "completed"
    );

    if result.is_success() || invocation.ignore_failure {
        Ok(result)
    } else {
        Err(CommandError::Failed {
            command: invocation.command.clone(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        })
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(LOG_SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedSession;

    #[tokio::test]
    async fn successful_command_returns_output() {
        let session = ScriptedSession::new();
        session.push_output(0, "Docker version 27.3.1\n", "");
        let mut boxed = session.clone();
        let result = run(&mut boxed, &CommandInvocation::new("docker --version"))
            .await
            .expect("command succeeds");
        assert!(result.is_success());
        assert_eq!(result.stdout, "Docker version 27.3.1\n");
        assert_eq!(session.executed(), vec![String::from("docker --version")]);
    }

    #[tokio::test]
    async fn failing_command_surfaces_stderr() {
        let session = ScriptedSession::new();
        session.push_output(1, "", "no such network");
        let mut boxed = session.clone();
        let err = run(&mut boxed, &CommandInvocation::new("docker network ls"))
            .await
            .expect_err("command fails");
        assert_eq!(
            err,
            CommandError::Failed {
                command: String::from("docker network ls"),
                exit_code: 1,
                stderr: String::from("no such network"),
            }
        );
    }

    #[tokio::test]
    async fn ignored_failure_is_returned_as_result() {
        let session = ScriptedSession::new();
        session.push_output(127, "", "sh: ctop: command not found");
        let mut boxed = session.clone();
        let result = run(
            &mut boxed,
            &CommandInvocation::new("ctop --help").ignoring_failure(),
        )
        .await
        .expect("failure is data");
        assert_eq!(result.exit_code, 127);
    }

    #[tokio::test]
    async fn timeout_is_classified() {
        let session = ScriptedSession::new();
        session.push_timeout(5);
        let mut boxed = session.clone();
        let err = run(
            &mut boxed,
            &CommandInvocation::new("sleep 60").with_timeout(Duration::from_secs(5)),
        )
        .await
        .expect_err("command times out");
        assert!(matches!(err, CommandError::Timeout { seconds: 5, .. }));
    }
}
