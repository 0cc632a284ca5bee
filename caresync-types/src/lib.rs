//! Core type definitions for CareSync.
//!
//! This crate defines the plain data model shared by the store and the sync
//! engine:
//! - Action identifiers (UUID v7) and namespace names
//! - Millisecond timestamps and injectable clocks
//! - Pending actions, sync checkpoints and conflict records
//!
//! Domain-specific record types (residents, medications, rotas, ...) belong
//! to the modules that own them. The core treats their payloads as opaque JSON.

mod action;
mod checkpoint;
mod conflict;
mod ids;
mod timestamp;

pub use action::{entity_key_of, Operation, PendingAction};
pub use checkpoint::SyncCheckpoint;
pub use conflict::{ConflictRecord, Resolution};
pub use ids::{ActionId, Namespace};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}
