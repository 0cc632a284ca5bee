use caresync_types::{ActionId, Namespace};
use std::collections::HashSet;
use std::str::FromStr;

// ── ActionId ─────────────────────────────────────────────────────

#[test]
fn action_id_new_is_unique() {
    let ids: HashSet<ActionId> = (0..1000).map(|_| ActionId::new()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn action_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = ActionId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn action_id_display_and_parse() {
    let id = ActionId::new();
    let parsed = ActionId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
    assert_eq!(ActionId::from_str(&id.to_string()).unwrap(), id);
}

#[test]
fn action_id_parse_invalid() {
    assert!(ActionId::parse("not-a-uuid").is_err());
}

#[test]
fn action_ids_sort_in_creation_order() {
    let a = ActionId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = ActionId::new();
    assert!(a < b);
}

#[test]
fn action_id_serializes_as_plain_string() {
    let id = ActionId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}

// ── Namespace ────────────────────────────────────────────────────

#[test]
fn namespace_accepts_module_names() {
    for name in ["calendar", "pain-management", "org_units", "v2.residents"] {
        let ns = Namespace::new(name).unwrap();
        assert_eq!(ns.as_str(), name);
        assert_eq!(ns.to_string(), name);
    }
}

#[test]
fn namespace_rejects_empty_and_path_characters() {
    assert!(Namespace::new("").is_err());
    assert!(Namespace::new("a/b").is_err());
    assert!(Namespace::new("has space").is_err());
    assert!("../etc".parse::<Namespace>().is_err());
}

#[test]
fn namespace_deserialize_validates() {
    let ok: Namespace = serde_json::from_str("\"blog\"").unwrap();
    assert_eq!(ok.as_str(), "blog");
    assert!(serde_json::from_str::<Namespace>("\"bad name\"").is_err());
}
