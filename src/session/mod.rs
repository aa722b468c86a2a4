//! Session lifecycle for authenticated remote-shell connections.
//!
//! A [`Session`] is one authenticated channel to a single host, owned
//! exclusively by one operation. Sessions are created on demand, never
//! pooled, and closed unconditionally when the owning operation finishes.
//! The [`Transport`] seam lets tests substitute scripted sessions for the
//! OpenSSH-backed implementation in [`crate::session::openssh`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

pub mod openssh;

/// Default TCP port for SSH.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default timeout applied while establishing a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by session operations.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Secret used to authenticate a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Credential {
    /// Password authentication, forwarded to the ssh client via `sshpass`.
    Password(String),
    /// Private key file authentication (`BatchMode=yes`).
    KeyFile(Utf8PathBuf),
}

/// Connection parameters for one remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionTarget {
    /// Hostname or IP address of the remote host.
    pub host: String,
    /// TCP port for SSH.
    pub port: u16,
    /// Principal to authenticate as.
    pub username: String,
    /// Credential used for authentication.
    pub credential: Credential,
    /// Timeout applied while establishing the connection.
    pub connect_timeout: Duration,
}

impl SessionTarget {
    /// Creates a target with the default port and connect timeout.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        credential: Credential,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the SSH port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Errors raised while establishing a session.
///
/// Authentication failures are distinguished from network failures because
/// callers such as the credential-verification probe branch on that
/// distinction.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectError {
    /// Raised when the remote host rejected the supplied credentials.
    #[error("authentication rejected by {host}: {detail}")]
    AuthenticationFailed {
        /// Host that rejected the credentials.
        host: String,
        /// Client-reported detail, preserved for the caller.
        detail: String,
    },
    /// Raised when the connection attempt exceeded the timeout.
    #[error("connection to {host} timed out after {seconds}s")]
    Timeout {
        /// Host that did not answer in time.
        host: String,
        /// Timeout that elapsed, in seconds.
        seconds: u64,
    },
    /// Raised when the host could not be reached for any other reason.
    #[error("host {host} unreachable: {detail}")]
    Unreachable {
        /// Host that could not be reached.
        host: String,
        /// Client-reported detail.
        detail: String,
    },
    /// Raised when the local ssh client could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Raw output of one command executed inside a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecOutput {
    /// Exit code reported by the remote command.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Errors raised by the session channel itself, before exit-code policy
/// is applied by the executor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when the command produced no result within the timeout.
    ///
    /// A command that is silent for the whole window is a timeout failure,
    /// never a success with empty output.
    #[error("command produced no result within {seconds}s")]
    Timeout {
        /// Timeout that elapsed, in seconds.
        seconds: u64,
    },
    /// Raised when the channel failed or the command terminated without an
    /// exit status.
    #[error("session channel failed: {message}")]
    Channel {
        /// Description of the channel failure.
        message: String,
    },
}

/// Errors raised while uploading content through the session file channel.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("upload to {remote_path} failed: {message}")]
pub struct TransferError {
    /// Remote path the upload targeted.
    pub remote_path: String,
    /// Description of the failure.
    pub message: String,
}

/// One open, authenticated channel to a remote host.
///
/// `close` is idempotent and never fails; every operation must call it on
/// success and error paths alike.
pub trait Session: Send {
    /// Executes `command` on the remote host, capturing output and exit code.
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        timeout: Duration,
    ) -> SessionFuture<'a, Result<ExecOutput, ExecError>>;

    /// Uploads `content` to `remote_path` through the session file channel.
    fn upload<'a>(
        &'a mut self,
        remote_path: &'a str,
        content: &'a str,
    ) -> SessionFuture<'a, Result<(), TransferError>>;

    /// Closes the session. Safe to call more than once.
    fn close(&mut self) -> SessionFuture<'_, ()>;
}

/// Factory for sessions, the seam between operations and the ssh client.
pub trait Transport: Send + Sync {
    /// Concrete session type produced by this transport.
    type Session: Session;

    /// Opens an authenticated session to `target`.
    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Result<Self::Session, ConnectError>>;
}
