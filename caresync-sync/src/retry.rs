//! Retry scheduling for failed actions.
//!
//! Pure decision logic: no I/O and no clock reads. Given the same action and
//! the same `now`, the answer is always the same.

use crate::config::SyncConfig;
use caresync_types::{PendingAction, Timestamp};
use std::time::Duration;

/// Default attempt cap before an action is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for exponential backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Decides when a failed action may be retried.
///
/// The wait after the n-th failure is `base × 2^(n-1)`, capped at the
/// ceiling. An action that has never failed is always eligible; one that has
/// reached `max_attempts` (or was dead-lettered outright) never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryScheduler {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl RetryScheduler {
    /// Creates a scheduler. A ceiling below the base is raised to the base.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        let base_delay_ms = base_delay.as_millis() as u64;
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: (max_delay.as_millis() as u64).max(base_delay_ms),
        }
    }

    /// Builds a scheduler from engine configuration.
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// The attempt cap.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// How long to wait after `attempts` failures.
    pub fn backoff(&self, attempts: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempts))
    }

    fn backoff_ms(&self, attempts: u32) -> u64 {
        if attempts == 0 {
            return 0;
        }
        let exponent = (attempts - 1).min(63);
        self.base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Whether the action has used up its retry budget.
    pub fn is_exhausted(&self, action: &PendingAction) -> bool {
        action.is_dead_lettered(self.max_attempts)
    }

    /// Whether the action may be submitted at `now`.
    pub fn is_eligible(&self, action: &PendingAction, now: Timestamp) -> bool {
        if self.is_exhausted(action) {
            return false;
        }
        match action.last_attempt_at {
            None => true,
            Some(last) => now.millis_since(last) >= self.backoff_ms(action.attempts),
        }
    }

    /// The earliest time the action becomes eligible, or `None` if it never will.
    pub fn next_eligible_at(&self, action: &PendingAction) -> Option<Timestamp> {
        if self.is_exhausted(action) {
            return None;
        }
        Some(match action.last_attempt_at {
            None => Timestamp::EPOCH,
            Some(last) => last.plus_millis(self.backoff_ms(action.attempts)),
        })
    }
}
