use caresync_store::{LocalStore, MemoryStore, SqliteStore};
use caresync_types::{
    ActionId, ConflictRecord, Namespace, Operation, PendingAction, Resolution, SyncCheckpoint,
    Timestamp,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn ns(name: &str) -> Namespace {
    Namespace::new(name).unwrap()
}

fn action(namespace: &str, key: &str, sequence: u64) -> PendingAction {
    PendingAction::new(
        ns(namespace),
        "resident",
        Operation::Update,
        json!({"id": key, "room": "12"}),
        Timestamp::from_millis(1_000 + sequence),
    )
    .with_sequence(sequence)
}

fn stores() -> Vec<(&'static str, Box<dyn LocalStore>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        ("sqlite", Box::new(SqliteStore::open_in_memory().unwrap())),
    ]
}

// ── Actions ──────────────────────────────────────────────────────

#[test]
fn put_get_delete_action() {
    for (name, store) in stores() {
        let a = action("residents", "r1", 1);
        store.put_action(&a).unwrap();
        assert_eq!(store.get_action(&a.namespace, &a.id).unwrap(), Some(a.clone()), "{name}");

        assert!(store.delete_action(&a.namespace, &a.id).unwrap(), "{name}");
        assert_eq!(store.get_action(&a.namespace, &a.id).unwrap(), None, "{name}");
        // Deleting again is a no-op.
        assert!(!store.delete_action(&a.namespace, &a.id).unwrap(), "{name}");
    }
}

#[test]
fn put_replaces_existing_record() {
    for (name, store) in stores() {
        let mut a = action("residents", "r1", 1);
        store.put_action(&a).unwrap();
        a.record_failure("UNAVAILABLE", Timestamp::from_millis(5_000));
        store.put_action(&a).unwrap();

        let listed = store.list_actions(&a.namespace).unwrap();
        assert_eq!(listed.len(), 1, "{name}");
        assert_eq!(listed[0].attempts, 1, "{name}");
        assert_eq!(listed[0].last_error.as_deref(), Some("UNAVAILABLE"), "{name}");
    }
}

#[test]
fn list_orders_by_sequence() {
    for (name, store) in stores() {
        let a3 = action("calendar", "c3", 3);
        let a1 = action("calendar", "c1", 1);
        let a2 = action("calendar", "c2", 2);
        for a in [&a3, &a1, &a2] {
            store.put_action(a).unwrap();
        }
        let ids: Vec<ActionId> = store
            .list_actions(&ns("calendar"))
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![a1.id, a2.id, a3.id], "{name}");
    }
}

#[test]
fn namespaces_are_isolated() {
    for (name, store) in stores() {
        let blog = action("blog", "p1", 1);
        let cal = action("calendar", "c1", 1);
        store.put_action(&blog).unwrap();
        store.put_action(&cal).unwrap();

        assert_eq!(store.list_actions(&ns("blog")).unwrap(), vec![blog.clone()], "{name}");
        assert_eq!(store.get_action(&ns("calendar"), &blog.id).unwrap(), None, "{name}");
        assert!(!store.delete_action(&ns("calendar"), &blog.id).unwrap(), "{name}");
        assert_eq!(store.list_actions(&ns("blog")).unwrap().len(), 1, "{name}");
    }
}

#[test]
fn replace_actions_is_all_or_nothing_per_call() {
    for (name, store) in stores() {
        let old1 = action("residents", "r1", 1);
        let old2 = action("residents", "r1", 2);
        store.put_action(&old1).unwrap();
        store.put_action(&old2).unwrap();

        let mut merged = old1.clone();
        merged.operation = Operation::Delete;
        store
            .replace_actions(&ns("residents"), &[old1.id, old2.id], &[merged.clone()])
            .unwrap();

        assert_eq!(store.list_actions(&ns("residents")).unwrap(), vec![merged], "{name}");
    }
}

#[test]
fn replace_actions_rejects_foreign_namespace() {
    for (name, store) in stores() {
        let foreign = action("blog", "p1", 1);
        let result = store.replace_actions(&ns("calendar"), &[], &[foreign]);
        assert!(result.is_err(), "{name}");
        assert!(store.list_actions(&ns("blog")).unwrap().is_empty(), "{name}");
    }
}

// ── Checkpoints ──────────────────────────────────────────────────

#[test]
fn checkpoint_roundtrip() {
    for (name, store) in stores() {
        assert_eq!(store.get_checkpoint(&ns("blog")).unwrap(), None, "{name}");
        let cp = SyncCheckpoint::new(ns("blog"), Timestamp::from_millis(42));
        store.put_checkpoint(&cp).unwrap();
        assert_eq!(store.get_checkpoint(&ns("blog")).unwrap(), Some(cp), "{name}");

        let newer = SyncCheckpoint::new(ns("blog"), Timestamp::from_millis(99));
        store.put_checkpoint(&newer).unwrap();
        assert_eq!(store.get_checkpoint(&ns("blog")).unwrap(), Some(newer), "{name}");
    }
}

#[test]
fn namespaces_lists_queues_and_checkpoints() {
    for (name, store) in stores() {
        store.put_action(&action("residents", "r1", 1)).unwrap();
        store
            .put_checkpoint(&SyncCheckpoint::new(ns("blog"), Timestamp::from_millis(1)))
            .unwrap();
        assert_eq!(store.namespaces().unwrap(), vec![ns("blog"), ns("residents")], "{name}");
    }
}

// ── Conflict log ─────────────────────────────────────────────────

#[test]
fn conflict_log_appends_in_order() {
    for (name, store) in stores() {
        let records: Vec<ConflictRecord> = (0..3)
            .map(|i| ConflictRecord {
                action_id: ActionId::new(),
                local_value: json!({"id": "r1", "n": i}),
                remote_value: json!(null),
                resolution: Resolution::Remote,
                resolved_value: json!(null),
                resolved_at: Timestamp::from_millis(i),
            })
            .collect();
        for r in &records {
            store.append_conflict(&ns("residents"), r).unwrap();
        }
        assert_eq!(store.list_conflicts(&ns("residents")).unwrap(), records, "{name}");
        assert!(store.list_conflicts(&ns("blog")).unwrap().is_empty(), "{name}");
    }
}

// ── Durability ───────────────────────────────────────────────────

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("sync.db");

    let a = action("residents", "r1", 1);
    {
        let store = SqliteStore::open(&path).unwrap();
        store.put_action(&a).unwrap();
        store
            .put_checkpoint(&SyncCheckpoint::new(ns("residents"), Timestamp::from_millis(7)))
            .unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.list_actions(&ns("residents")).unwrap(), vec![a]);
    assert_eq!(
        reopened.get_checkpoint(&ns("residents")).unwrap().map(|c| c.last_sync_timestamp),
        Some(Timestamp::from_millis(7))
    );
}
