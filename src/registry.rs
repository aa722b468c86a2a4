//! Registry tracking the status of long-running operations.
//!
//! Installations run in the background while callers poll for progress.
//! Each operation is keyed by name; beginning an operation that is still
//! running is rejected so two installs cannot interleave on one host.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

/// Lifecycle state of a tracked operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// The operation has never been started.
    #[default]
    Unknown,
    /// The operation is currently running.
    Running,
    /// The operation finished successfully.
    Success,
    /// The operation failed.
    Error,
}

/// Status of a tracked operation, with an optional progress message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct OperationStatus {
    /// Current lifecycle state.
    pub state: OperationState,
    /// Latest progress or outcome message.
    pub message: Option<String>,
}

/// Error returned when an operation is already in flight.
#[derive(Clone, Debug, thiserror::Error, Eq, PartialEq)]
#[error("operation `{key}` is already running")]
pub struct AlreadyRunning {
    /// Key of the running operation.
    pub key: String,
}

type StatusMap = Arc<Mutex<HashMap<String, OperationStatus>>>;

/// Shared registry of operation statuses.
///
/// Clones share state, so handlers and background tasks can hold their
/// own copies.
#[derive(Clone, Debug, Default)]
pub struct OperationRegistry {
    statuses: StatusMap,
}

impl OperationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationStatus>> {
        self.statuses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the status for a key, defaulting to unknown.
    #[must_use]
    pub fn status(&self, key: &str) -> OperationStatus {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    /// Begins an operation, returning a ticket used to report progress.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyRunning`] when the key has a running operation.
    pub fn begin(&self, key: impl Into<String>) -> Result<OperationTicket, AlreadyRunning> {
        let key = key.into();
        let mut statuses = self.lock();
        if statuses
            .get(&key)
            .is_some_and(|status| status.state == OperationState::Running)
        {
            return Err(AlreadyRunning { key });
        }
        statuses.insert(
            key.clone(),
            OperationStatus {
                state: OperationState::Running,
                message: Some(String::from("started")),
            },
        );
        drop(statuses);
        Ok(OperationTicket {
            statuses: Arc::clone(&self.statuses),
            key,
            finished: false,
        })
    }

    /// Begins an operation and runs the future on a background task.
    ///
    /// The future's `Ok` message becomes the success status; its error's
    /// display text becomes the failure status.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyRunning`] when the key has a running operation.
    pub fn spawn<F, E>(&self, key: impl Into<String>, future: F) -> Result<(), AlreadyRunning>
    where
        F: Future<Output = Result<String, E>> + Send + 'static,
        E: Display,
    {
        let mut ticket = self.begin(key)?;
        tokio::spawn(async move {
            match future.await {
                Ok(message) => ticket.succeed(message),
                Err(err) => ticket.fail(err.to_string()),
            }
        });
        Ok(())
    }
}

/// Handle for reporting the progress and outcome of one operation.
///
/// Dropping an unfinished ticket records an error status, so a panicked
/// or cancelled task never leaves its operation stuck at running.
#[derive(Debug)]
pub struct OperationTicket {
    statuses: StatusMap,
    key: String,
    finished: bool,
}

impl OperationTicket {
    fn set(&self, state: OperationState, message: String) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                self.key.clone(),
                OperationStatus {
                    state,
                    message: Some(message),
                },
            );
    }

    /// Records a progress message while the operation keeps running.
    pub fn progress(&self, message: impl Into<String>) {
        self.set(OperationState::Running, message.into());
    }

    /// Marks the operation as succeeded.
    pub fn succeed(&mut self, message: impl Into<String>) {
        self.finished = true;
        self.set(OperationState::Success, message.into());
    }

    /// Marks the operation as failed.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.finished = true;
        self.set(OperationState::Error, message.into());
    }
}

impl Drop for OperationTicket {
    fn drop(&mut self) {
        if !self.finished {
            self.set(OperationState::Error, String::from("operation aborted"));
        }
    }
}
