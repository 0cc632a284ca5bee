//! Local persistence for the CareSync sync core.
//!
//! The sync engine only needs get/put/delete/list semantics partitioned by
//! namespace. This crate defines that contract as [`LocalStore`] and ships two
//! implementations:
//!
//! - [`MemoryStore`]: process-local, for tests and ephemeral sessions
//! - [`SqliteStore`]: durable, backed by a SQLite file
//!
//! Pending actions are stored as one JSON record each, keyed by
//! `(namespace, id)`. Checkpoints are one row per namespace. Conflict records
//! are appended to an audit log when the engine is configured to keep them.

mod error;
mod memory;
mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use caresync_types::{ActionId, ConflictRecord, Namespace, PendingAction, SyncCheckpoint};

/// Durable key/value persistence for pending actions and checkpoints.
///
/// Implementations must isolate namespaces: nothing written under one
/// namespace is visible through another.
pub trait LocalStore: Send + Sync {
    /// Inserts or replaces an action, keyed by its namespace and ID.
    fn put_action(&self, action: &PendingAction) -> StorageResult<()>;

    /// Loads a single action.
    fn get_action(&self, namespace: &Namespace, id: &ActionId)
    -> StorageResult<Option<PendingAction>>;

    /// Deletes an action. Returns whether it existed.
    fn delete_action(&self, namespace: &Namespace, id: &ActionId) -> StorageResult<bool>;

    /// Lists every action of a namespace ordered by queue sequence.
    fn list_actions(&self, namespace: &Namespace) -> StorageResult<Vec<PendingAction>>;

    /// Atomically deletes `deletes` and writes `puts` within one namespace.
    fn replace_actions(
        &self,
        namespace: &Namespace,
        deletes: &[ActionId],
        puts: &[PendingAction],
    ) -> StorageResult<()>;

    /// Namespaces that currently hold actions or a checkpoint.
    fn namespaces(&self) -> StorageResult<Vec<Namespace>>;

    /// Loads a namespace's checkpoint.
    fn get_checkpoint(&self, namespace: &Namespace) -> StorageResult<Option<SyncCheckpoint>>;

    /// Inserts or replaces a checkpoint.
    fn put_checkpoint(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()>;

    /// Appends a conflict record to the audit log.
    fn append_conflict(&self, namespace: &Namespace, record: &ConflictRecord)
    -> StorageResult<()>;

    /// Lists audited conflict records in insertion order.
    fn list_conflicts(&self, namespace: &Namespace) -> StorageResult<Vec<ConflictRecord>>;
}
