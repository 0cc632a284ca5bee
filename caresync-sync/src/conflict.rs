//! Conflict resolution between queued local changes and server state.
//!
//! The default policy is last-writer-wins by timestamp with a structural
//! union of object fields:
//! - fields present on only one side are kept
//! - shared fields take the value from the side with the later timestamp
//!   (the server of record wins ties)
//! - a deletion on either side beats an update, so deleted records are never
//!   resurrected by a stale local edit
//!
//! There are no per-field clocks and no operational-transform style merging.

use caresync_types::{ConflictRecord, Operation, PendingAction, Resolution, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Object key under which merge metadata is written.
pub const META_KEY: &str = "_meta";

/// Metadata field marking how a value was reconciled.
pub const CONFLICT_RESOLUTION_FIELD: &str = "conflictResolution";

/// Marker value for structurally merged writes.
pub const AUTO_MERGED: &str = "auto-merged";

/// The server's view of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    /// Entity type.
    pub entity: String,
    /// Entity key (the record's `id`).
    pub key: String,
    /// Current server state, or `None` if the entity was deleted.
    #[serde(default)]
    pub value: Option<Value>,
    /// When the server last changed the entity.
    pub server_timestamp: Timestamp,
}

impl RemoteSnapshot {
    /// A snapshot of an entity that exists on the server.
    pub fn existing(
        entity: impl Into<String>,
        key: impl Into<String>,
        value: Value,
        server_timestamp: Timestamp,
    ) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
            value: Some(value),
            server_timestamp,
        }
    }

    /// A snapshot of an entity the server has deleted.
    pub fn deleted(
        entity: impl Into<String>,
        key: impl Into<String>,
        server_timestamp: Timestamp,
    ) -> Self {
        Self {
            entity: entity.into(),
            key: key.into(),
            value: None,
            server_timestamp,
        }
    }

    /// Whether the server no longer has the entity.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

/// How competing create/update writes are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Later timestamp wins per field; one-sided fields are kept.
    #[default]
    LastWriterWins,
    /// The local payload always wins.
    PreferLocal,
    /// The server state always wins.
    PreferRemote,
}

/// Decides between a local pending change and the server's snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
}

impl ConflictResolver {
    /// Creates a resolver with the given policy.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Returns the configured policy.
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Resolves `local` against `remote`.
    ///
    /// Deletions are settled before the policy is consulted: a remote
    /// deletion drops any local change (`Remote`), and a local deletion of an
    /// entity that still exists remotely proceeds (`Local`).
    pub fn resolve(
        &self,
        local: &PendingAction,
        remote: &RemoteSnapshot,
        now: Timestamp,
    ) -> ConflictRecord {
        let local_value = match local.operation {
            Operation::Delete => Value::Null,
            Operation::Create | Operation::Update => local.payload.clone(),
        };
        let remote_value = remote.value.clone().unwrap_or(Value::Null);

        let (resolution, resolved_value) = match (&remote.value, local.operation) {
            (None, _) => (Resolution::Remote, Value::Null),
            (Some(_), Operation::Delete) => (Resolution::Local, Value::Null),
            (Some(remote_state), Operation::Create | Operation::Update) => match self.policy {
                ConflictPolicy::PreferLocal => (Resolution::Local, local.payload.clone()),
                ConflictPolicy::PreferRemote => (Resolution::Remote, remote_state.clone()),
                ConflictPolicy::LastWriterWins => last_writer_wins(
                    &local.payload,
                    local.client_timestamp,
                    remote_state,
                    remote.server_timestamp,
                ),
            },
        };

        ConflictRecord {
            action_id: local.id,
            local_value,
            remote_value,
            resolution,
            resolved_value,
            resolved_at: now,
        }
    }
}

fn last_writer_wins(
    local: &Value,
    local_ts: Timestamp,
    remote: &Value,
    remote_ts: Timestamp,
) -> (Resolution, Value) {
    let local_newer = local_ts > remote_ts;

    let (Value::Object(local_fields), Value::Object(remote_fields)) = (local, remote) else {
        return if local_newer {
            (Resolution::Local, local.clone())
        } else {
            (Resolution::Remote, remote.clone())
        };
    };

    let mut merged: Map<String, Value> = remote_fields.clone();
    for (field, value) in local_fields {
        if local_newer || !remote_fields.contains_key(field) {
            merged.insert(field.clone(), value.clone());
        }
    }

    if &merged == local_fields {
        (Resolution::Local, local.clone())
    } else if &merged == remote_fields {
        (Resolution::Remote, remote.clone())
    } else {
        annotate_merged(&mut merged);
        (Resolution::Merged, Value::Object(merged))
    }
}

fn annotate_merged(fields: &mut Map<String, Value>) {
    let marker = Value::String(AUTO_MERGED.to_string());
    match fields.get_mut(META_KEY) {
        Some(Value::Object(meta)) => {
            meta.insert(CONFLICT_RESOLUTION_FIELD.to_string(), marker);
        }
        _ => {
            let mut meta = Map::new();
            meta.insert(CONFLICT_RESOLUTION_FIELD.to_string(), marker);
            fields.insert(META_KEY.to_string(), Value::Object(meta));
        }
    }
}
