use caresync_sync::{ConflictPolicy, ConflictResolver, RemoteSnapshot};
use caresync_types::{Namespace, Operation, PendingAction, Resolution, Timestamp};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn local(operation: Operation, payload: Value, at: u64) -> PendingAction {
    PendingAction::new(
        Namespace::new("residents").unwrap(),
        "resident",
        operation,
        payload,
        Timestamp::from_millis(at),
    )
}

fn remote(value: Value, at: u64) -> RemoteSnapshot {
    RemoteSnapshot::existing("resident", "r-1", value, Timestamp::from_millis(at))
}

fn now() -> Timestamp {
    Timestamp::from_millis(99_999)
}

// ── Deletes ──────────────────────────────────────────────────────

#[test]
fn remote_delete_beats_local_update() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "room": "5E"}), 2_000);
    let deleted = RemoteSnapshot::deleted("resident", "r-1", Timestamp::from_millis(1_000));

    let record = resolver.resolve(&action, &deleted, now());

    assert_eq!(record.resolution, Resolution::Remote);
    assert_eq!(record.resolved_value, Value::Null);
    assert_eq!(record.remote_value, Value::Null);
    assert_eq!(record.action_id, action.id);
}

#[test]
fn local_delete_beats_remote_update() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Delete, json!({"id": "r-1"}), 1_000);
    let existing = remote(json!({"id": "r-1", "room": "6F"}), 2_000);

    let record = resolver.resolve(&action, &existing, now());

    assert_eq!(record.resolution, Resolution::Local);
    assert_eq!(record.resolved_value, Value::Null);
    assert_eq!(record.local_value, Value::Null);
}

#[test]
fn deletes_win_under_every_policy() {
    for policy in [ConflictPolicy::LastWriterWins, ConflictPolicy::PreferLocal, ConflictPolicy::PreferRemote] {
        let resolver = ConflictResolver::new(policy);
        let update = local(Operation::Update, json!({"id": "r-1"}), 5);
        let deleted = RemoteSnapshot::deleted("resident", "r-1", Timestamp::from_millis(1));
        assert_eq!(resolver.resolve(&update, &deleted, now()).resolution, Resolution::Remote);

        let delete = local(Operation::Delete, json!({"id": "r-1"}), 1);
        let existing = remote(json!({"id": "r-1"}), 5);
        assert_eq!(resolver.resolve(&delete, &existing, now()).resolution, Resolution::Local);
    }
}

// ── Last writer wins ─────────────────────────────────────────────

#[test]
fn newer_local_wins_shared_fields_and_keeps_remote_only_fields() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G"}), 2_000);
    let server = remote(json!({"id": "r-1", "room": "1A", "gp": "Dr. Okafor"}), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Merged);
    assert_eq!(
        record.resolved_value,
        json!({
            "id": "r-1",
            "room": "7G",
            "gp": "Dr. Okafor",
            "_meta": {"conflictResolution": "auto-merged"}
        })
    );
    assert_eq!(record.resolved_at, now());
}

#[test]
fn newer_remote_wins_shared_fields_and_keeps_local_only_fields() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G", "diet": "soft"}), 1_000);
    let server = remote(json!({"id": "r-1", "room": "1A"}), 2_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Merged);
    assert_eq!(record.resolved_value["room"], json!("1A"));
    assert_eq!(record.resolved_value["diet"], json!("soft"));
}

#[test]
fn tie_goes_to_remote() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G"}), 1_000);
    let server = remote(json!({"id": "r-1", "room": "1A"}), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Remote);
    assert_eq!(record.resolved_value, json!({"id": "r-1", "room": "1A"}));
}

#[test]
fn newer_local_superset_resolves_local_without_annotation() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G", "diet": "soft"}), 2_000);
    let server = remote(json!({"id": "r-1", "room": "1A"}), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Local);
    assert_eq!(record.resolved_value, action.payload);
}

#[test]
fn merge_annotation_preserves_existing_meta() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!({"id": "r-1", "a": 1, "_meta": {"source": "tablet"}}), 2_000);
    let server = remote(json!({"id": "r-1", "b": 2}), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(
        record.resolved_value["_meta"],
        json!({"source": "tablet", "conflictResolution": "auto-merged"})
    );
}

#[test]
fn non_object_values_use_whole_value_lww() {
    let resolver = ConflictResolver::default();
    let action = local(Operation::Update, json!(["a", "b"]), 2_000);
    let server = remote(json!("scalar"), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Local);
    assert_eq!(record.resolved_value, json!(["a", "b"]));
}

// ── Policies ─────────────────────────────────────────────────────

#[test]
fn prefer_local_ignores_timestamps() {
    let resolver = ConflictResolver::new(ConflictPolicy::PreferLocal);
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G"}), 1);
    let server = remote(json!({"id": "r-1", "room": "1A"}), 1_000);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Local);
    assert_eq!(record.resolved_value, json!({"id": "r-1", "room": "7G"}));
}

#[test]
fn prefer_remote_ignores_timestamps() {
    let resolver = ConflictResolver::new(ConflictPolicy::PreferRemote);
    let action = local(Operation::Update, json!({"id": "r-1", "room": "7G"}), 1_000);
    let server = remote(json!({"id": "r-1", "room": "1A"}), 1);

    let record = resolver.resolve(&action, &server, now());

    assert_eq!(record.resolution, Resolution::Remote);
}

#[test]
fn policy_serializes_kebab_case() {
    assert_eq!(serde_json::to_value(ConflictPolicy::LastWriterWins).unwrap(), json!("last-writer-wins"));
    assert_eq!(
        serde_json::from_value::<ConflictPolicy>(json!("prefer-remote")).unwrap(),
        ConflictPolicy::PreferRemote
    );
    assert_eq!(ConflictResolver::default().policy(), ConflictPolicy::LastWriterWins);
}

#[test]
fn snapshot_round_trips_camel_case() {
    let snapshot = remote(json!({"id": "r-1"}), 42);
    let value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["serverTimestamp"], json!(42));
    assert!(!snapshot.is_deleted());

    let deleted: RemoteSnapshot =
        serde_json::from_value(json!({"entity": "resident", "key": "r-1", "serverTimestamp": 7})).unwrap();
    assert!(deleted.is_deleted());
}
