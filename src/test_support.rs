//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::session::{
    ConnectError, ExecError, ExecOutput, Session, SessionFuture, SessionTarget, Transport,
    TransferError,
};

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<Result<ExecOutput, ExecError>>,
    executed: Vec<String>,
    uploads: Vec<(String, String)>,
    closed: bool,
}

/// Scripted session that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Clones share the same state, so a test can keep a handle for assertions
/// while the code under test consumes the session.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSession {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSession {
    /// Creates a session with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a command response.
    pub fn push_output(&self, exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) {
        self.lock().responses.push_back(Ok(ExecOutput {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Queues a successful response with empty output.
    pub fn push_success(&self) {
        self.push_output(0, "", "");
    }

    /// Queues a timeout for the next command.
    pub fn push_timeout(&self, seconds: u64) {
        self.lock()
            .responses
            .push_back(Err(ExecError::Timeout { seconds }));
    }

    /// Queues a channel failure for the next command.
    pub fn push_channel_error(&self, message: impl Into<String>) {
        self.lock().responses.push_back(Err(ExecError::Channel {
            message: message.into(),
        }));
    }

    /// Returns every command executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Returns every upload as `(remote_path, content)` pairs.
    #[must_use]
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.lock().uploads.clone()
    }

    /// Reports whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Session for ScriptedSession {
    fn exec<'a>(
        &'a mut self,
        command: &'a str,
        _timeout: Duration,
    ) -> SessionFuture<'a, Result<ExecOutput, ExecError>> {
        let mut state = self.lock();
        state.executed.push(command.to_owned());
        let response = state.responses.pop_front().unwrap_or_else(|| {
            Err(ExecError::Channel {
                message: format!("no scripted response for `{command}`"),
            })
        });
        Box::pin(async move { response })
    }

    fn upload<'a>(
        &'a mut self,
        remote_path: &'a str,
        content: &'a str,
    ) -> SessionFuture<'a, Result<(), TransferError>> {
        self.lock()
            .uploads
            .push((remote_path.to_owned(), content.to_owned()));
        Box::pin(async move { Ok(()) })
    }

    fn close(&mut self) -> SessionFuture<'_, ()> {
        self.lock().closed = true;
        Box::pin(async {})
    }
}

#[derive(Debug, Default)]
struct TransportState {
    sessions: VecDeque<ScriptedSession>,
    connect_error: Option<ConnectError>,
    connects: Vec<String>,
}

/// Scripted transport that hands out pre-built sessions per connect call.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued sessions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a session for the next connect call.
    pub fn push_session(&self, session: ScriptedSession) {
        self.lock().sessions.push_back(session);
    }

    /// Makes every subsequent connect fail with the given error.
    pub fn fail_connects(&self, error: ConnectError) {
        self.lock().connect_error = Some(error);
    }

    /// Returns the hosts connected to so far.
    #[must_use]
    pub fn connects(&self) -> Vec<String> {
        self.lock().connects.clone()
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    fn connect<'a>(
        &'a self,
        target: &'a SessionTarget,
    ) -> SessionFuture<'a, Result<Self::Session, ConnectError>> {
        let mut state = self.lock();
        state.connects.push(target.host.clone());
        let result = state.connect_error.clone().map_or_else(
            || {
                state.sessions.pop_front().ok_or_else(|| {
                    ConnectError::Unreachable {
                        host: target.host.clone(),
                        detail: String::from("no scripted session available"),
                    }
                })
            },
            Err,
        );
        Box::pin(async move { result })
    }
}
