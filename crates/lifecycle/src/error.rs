//! Error taxonomy for the worker lifecycle
//!
//! Only [`ConnectionError`] (at startup) and an external interrupt end a
//! worker process. Everything else is local to one session or one work item:
//!
//! - [`ShutdownError`] is logged by the restart loop and swallowed
//! - [`WorkItemError`] is reported to the engine as the item's outcome
//! - [`HeartbeatError`] is escalated into a [`WorkItemError`] for that item

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error type recorded for work items whose liveness channel failed
pub const HEARTBEAT_FAILED: &str = "HEARTBEAT_FAILED";

/// Error type recorded for work items with no registered handler
pub const HANDLER_NOT_FOUND: &str = "HANDLER_NOT_FOUND";

/// Failure to reach the orchestration engine
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Address could not be parsed
    #[error("invalid engine address: {0}")]
    InvalidAddress(String),

    /// Address scheme has no engine behind it
    #[error("unsupported engine scheme '{scheme}' in address {address}")]
    UnsupportedScheme { scheme: String, address: String },
}

/// Errors raised by an engine while running a worker
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Worker was started against a queue name that is empty
    #[error("queue name must not be empty")]
    EmptyQueueName,

    /// Run handle was driven twice
    #[error("worker run loop already started")]
    AlreadyRunning,
}

/// Failure while stopping a worker session
///
/// Never fatal: the restart loop logs it and starts the next session.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// In-flight work outlived the graceful timeout and was torn down
    #[error("graceful shutdown timed out after {timeout:?}, worker force-stopped")]
    GraceExpired { timeout: Duration },

    /// Run loop exited with an engine error
    #[error("worker run loop failed: {0}")]
    RunFailed(#[from] EngineError),

    /// Run loop panicked
    #[error("worker run loop panicked: {0}")]
    Panicked(String),
}

/// Error from a single liveness emission
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// Engine no longer tracks the work item (finished, redelivered or timed out)
    #[error("heartbeat channel closed")]
    ChannelClosed,

    /// Engine refused the heartbeat
    #[error("heartbeat rejected: {0}")]
    Rejected(String),
}

/// Outcome error of one unit of work
///
/// Shaped after the engine-facing failure record: a message, an optional
/// machine-readable type and a retry hint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItemError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether the engine may retry the item
    pub retryable: bool,
}

impl WorkItemError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Whether this failure came from the liveness channel rather than the work
    pub fn is_heartbeat_failure(&self) -> bool {
        self.error_type.as_deref() == Some(HEARTBEAT_FAILED)
    }
}

impl std::fmt::Display for WorkItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkItemError {}

impl From<HeartbeatError> for WorkItemError {
    fn from(err: HeartbeatError) -> Self {
        Self::retryable(format!("heartbeat failed: {err}")).with_type(HEARTBEAT_FAILED)
    }
}

impl From<anyhow::Error> for WorkItemError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Fatal errors of the restart loop
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Engine unreachable at startup
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Invalid worker configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// OS signal listener could not be installed
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}
