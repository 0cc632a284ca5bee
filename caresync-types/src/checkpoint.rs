//! Per-namespace sync checkpoints.

use crate::{Namespace, Timestamp};
use serde::{Deserialize, Serialize};

/// Low-water mark for fetching server-side changes.
///
/// Marks the point up to which a namespace's local and remote state are known
/// to be reconciled. Only advanced after a fully successful flush cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    /// The namespace this checkpoint belongs to.
    pub namespace: Namespace,
    /// When the namespace last completed a full sync.
    pub last_sync_timestamp: Timestamp,
}

impl SyncCheckpoint {
    /// Creates a checkpoint.
    #[must_use]
    pub fn new(namespace: Namespace, last_sync_timestamp: Timestamp) -> Self {
        Self {
            namespace,
            last_sync_timestamp,
        }
    }
}
