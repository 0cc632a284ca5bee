//! Engine configuration.

use crate::conflict::ConflictPolicy;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tuning knobs for the sync engine.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed attempts before an action is dead-lettered.
    pub max_attempts: u32,
    /// Backoff after the first failure.
    pub base_backoff_ms: u64,
    /// Backoff ceiling.
    pub max_backoff_ms: u64,
    /// How often the background task flushes every namespace.
    pub flush_interval_ms: u64,
    /// How often the status task publishes a snapshot.
    pub status_poll_interval_ms: u64,
    /// How create/update conflicts are settled.
    pub conflict_policy: ConflictPolicy,
    /// Persist every conflict record to the local audit log.
    pub audit_conflicts: bool,
    /// Timeout for a single HTTP request.
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            flush_interval_ms: 30_000,
            status_poll_interval_ms: 1_000,
            conflict_policy: ConflictPolicy::LastWriterWins,
            audit_conflicts: false,
            request_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".into()));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(SyncError::Config(format!(
                "base_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.base_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.flush_interval_ms == 0 || self.status_poll_interval_ms == 0 {
            return Err(SyncError::Config("intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
