//! Conflict records produced while reconciling local and remote state.

use crate::{ActionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which side a conflict was resolved in favour of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// The local pending change stands.
    Local,
    /// The server's state stands; the local action is dropped.
    Remote,
    /// Both sides contributed fields.
    Merged,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Merged => "merged",
        })
    }
}

/// The outcome of resolving one pending action against a remote snapshot.
///
/// Records are immutable once created. `Value::Null` stands in for a side
/// that does not exist (a deleted entity, or a local delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// The pending action involved.
    pub action_id: ActionId,
    /// The local payload.
    pub local_value: Value,
    /// The remote entity state.
    pub remote_value: Value,
    /// The chosen side.
    pub resolution: Resolution,
    /// The value that should now be considered current.
    pub resolved_value: Value,
    /// When the resolution was made.
    pub resolved_at: Timestamp,
}
