use caresync_sync::{RetryScheduler, SyncConfig};
use caresync_types::{Namespace, Operation, PendingAction, Timestamp};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn action_with(attempts: u32, last_attempt_at: Option<u64>) -> PendingAction {
    let mut action = PendingAction::new(
        Namespace::new("blog").unwrap(),
        "post",
        Operation::Create,
        json!({"id": 1}),
        Timestamp::from_millis(0),
    );
    action.attempts = attempts;
    action.last_attempt_at = last_attempt_at.map(Timestamp::from_millis);
    action
}

fn scheduler() -> RetryScheduler {
    RetryScheduler::new(5, Duration::from_secs(1), Duration::from_secs(60))
}

// ── Backoff ──────────────────────────────────────────────────────

#[test]
fn backoff_doubles_from_base() {
    let s = scheduler();
    assert_eq!(s.backoff(0), Duration::ZERO);
    assert_eq!(s.backoff(1), Duration::from_secs(1));
    assert_eq!(s.backoff(2), Duration::from_secs(2));
    assert_eq!(s.backoff(3), Duration::from_secs(4));
    assert_eq!(s.backoff(4), Duration::from_secs(8));
}

#[test]
fn backoff_is_capped() {
    let s = scheduler();
    assert_eq!(s.backoff(7), Duration::from_secs(60));
    assert_eq!(s.backoff(200), Duration::from_secs(60));
}

#[test]
fn defaults() {
    let s = RetryScheduler::default();
    assert_eq!(s.max_attempts(), 3);
    assert_eq!(s.backoff(1), Duration::from_secs(1));
    assert_eq!(s, RetryScheduler::from_config(&SyncConfig::default()));
}

// ── Eligibility ──────────────────────────────────────────────────

#[test]
fn fresh_action_is_eligible() {
    let s = scheduler();
    assert!(s.is_eligible(&action_with(0, None), Timestamp::from_millis(0)));
}

#[test]
fn failed_action_waits_out_backoff() {
    let s = scheduler();
    let action = action_with(2, Some(10_000));

    assert!(!s.is_eligible(&action, Timestamp::from_millis(11_999)));
    assert!(s.is_eligible(&action, Timestamp::from_millis(12_000)));
    assert_eq!(s.next_eligible_at(&action), Some(Timestamp::from_millis(12_000)));
}

#[test]
fn exhausted_action_is_never_eligible() {
    let s = scheduler();
    let action = action_with(5, Some(0));

    assert!(s.is_exhausted(&action));
    assert!(!s.is_eligible(&action, Timestamp::from_millis(u64::MAX)));
    assert_eq!(s.next_eligible_at(&action), None);
}

#[test]
fn dead_lettered_action_is_never_eligible() {
    let s = scheduler();
    let mut action = action_with(1, Some(0));
    action.dead_lettered = true;

    assert!(!s.is_eligible(&action, Timestamp::from_millis(1_000_000)));
}

#[test]
fn clock_behind_last_attempt_is_not_eligible() {
    let s = scheduler();
    let action = action_with(1, Some(50_000));
    assert!(!s.is_eligible(&action, Timestamp::from_millis(10_000)));
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn backoff_grows_until_ceiling(
        base_ms in 1u64..10_000,
        ceiling_factor in 1u64..1_000,
        attempts in 1u32..64,
    ) {
        let ceiling = base_ms * ceiling_factor;
        let s = RetryScheduler::new(100, Duration::from_millis(base_ms), Duration::from_millis(ceiling));
        let current = s.backoff(attempts);
        let next = s.backoff(attempts + 1);

        prop_assert!(next >= current);
        prop_assert!(next <= Duration::from_millis(ceiling));
        if current < Duration::from_millis(ceiling) {
            prop_assert!(next > current);
        }
    }

    #[test]
    fn eligibility_is_monotonic_in_time(
        attempts in 0u32..3,
        last in 0u64..1_000_000,
        a in 0u64..2_000_000,
        b in 0u64..2_000_000,
    ) {
        let s = RetryScheduler::default();
        let action = action_with(attempts, Some(last));
        let (earlier, later) = if a <= b { (a, b) } else { (b, a) };

        if s.is_eligible(&action, Timestamp::from_millis(earlier)) {
            prop_assert!(s.is_eligible(&action, Timestamp::from_millis(later)));
        }
    }
}
