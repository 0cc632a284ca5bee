//! Error types for the sync layer.

use crate::conflict::RemoteSnapshot;
use caresync_store::StorageError;
use caresync_types::{ActionId, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid identifier or namespace.
    #[error("invalid input: {0}")]
    Types(#[from] caresync_types::Error),

    /// No handler is registered for the namespace.
    #[error("no handler registered for namespace {0}")]
    UnknownNamespace(Namespace),

    /// The device is offline.
    #[error("offline")]
    Offline,

    /// Sync has been paused (for example after logout).
    #[error("sync is paused")]
    Paused,

    /// The action does not exist in the queue.
    #[error("action not found: {0}")]
    ActionNotFound(ActionId),

    /// A handler call failed.
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error (config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of handler failures.
///
/// The orchestrator branches on the code, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The server holds a conflicting version of the entity.
    Conflict,
    /// The server rejected the payload. Retrying cannot succeed.
    Validation,
    /// The endpoint could not be reached or is temporarily failing.
    Unavailable,
    /// Unexpected failure on either side.
    Internal,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "CONFLICT",
            Self::Validation => "VALIDATION",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether an action failing with this code should be retried later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Internal)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a namespace handler.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct HandlerError {
    /// Failure classification.
    pub code: ErrorCode,
    /// Human-readable reason, preserved in the action's `last_error`.
    pub message: String,
    /// Server state attached to a conflict, if the endpoint supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSnapshot>,
}

impl HandlerError {
    /// Creates an error with the given code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            remote: None,
        }
    }

    /// A conflict with the server's version.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// A rejected payload.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    /// An unreachable or failing endpoint.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    /// An unexpected failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Attaches the server's current state of the entity.
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteSnapshot) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Whether the failed action should be retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl From<StorageError> for HandlerError {
    fn from(e: StorageError) -> Self {
        Self::internal(format!("local store: {e}"))
    }
}
