//! Pending actions: mutations queued locally until the server confirms them.
//!
//! An action is created when a module records a mutation, mutated only by the
//! sync orchestrator (attempt bookkeeping), and deleted once the server accepts
//! it. It is never flipped to a "done" state in place.

use crate::{ActionId, Namespace, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The kind of mutation an action carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// The entity was created locally.
    Create,
    /// The entity was modified locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

impl Operation {
    /// Returns the wire name of the operation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(crate::Error::InvalidOperation(other.to_string())),
        }
    }
}

/// Extracts the entity key (the payload's `id` field) from a payload.
///
/// String and integer IDs are supported. Payloads without a usable `id`
/// return `None` and are never coalesced with other actions.
#[must_use]
pub fn entity_key_of(payload: &Value) -> Option<String> {
    match payload.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A locally queued mutation awaiting confirmation from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Client-generated unique ID.
    pub id: ActionId,
    /// The module this action belongs to.
    pub namespace: Namespace,
    /// Entity type (e.g. "resident", "medication").
    pub entity: String,
    /// The mutation kind.
    pub operation: Operation,
    /// Opaque entity data.
    pub payload: Value,
    /// When the latest intent folded into this action was recorded.
    pub client_timestamp: Timestamp,
    /// Number of failed submission attempts.
    pub attempts: u32,
    /// When the last failed attempt happened.
    pub last_attempt_at: Option<Timestamp>,
    /// Reason for the last failure.
    pub last_error: Option<String>,
    /// Position in the namespace queue. Kept when later intents are coalesced in.
    #[serde(default)]
    pub sequence: u64,
    /// Set when a non-retryable failure parked this action for manual review.
    #[serde(default)]
    pub dead_lettered: bool,
    /// Server timestamp of the remote version a conflict resolution was based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Timestamp>,
}

impl PendingAction {
    /// Creates a fresh action with no attempts.
    #[must_use]
    pub fn new(
        namespace: Namespace,
        entity: impl Into<String>,
        operation: Operation,
        payload: Value,
        client_timestamp: Timestamp,
    ) -> Self {
        Self {
            id: ActionId::new(),
            namespace,
            entity: entity.into(),
            operation,
            payload,
            client_timestamp,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            sequence: 0,
            dead_lettered: false,
            base_version: None,
        }
    }

    /// Sets the queue position.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the entity key taken from the payload's `id` field.
    #[must_use]
    pub fn entity_key(&self) -> Option<String> {
        entity_key_of(&self.payload)
    }

    /// Whether this action targets the given entity.
    #[must_use]
    pub fn touches(&self, entity: &str, key: &str) -> bool {
        self.entity == entity && self.entity_key().as_deref() == Some(key)
    }

    /// Whether this action is held for manual review instead of being retried.
    #[must_use]
    pub fn is_dead_lettered(&self, max_attempts: u32) -> bool {
        self.dead_lettered || self.attempts >= max_attempts
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, at: Timestamp) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
    }
}
