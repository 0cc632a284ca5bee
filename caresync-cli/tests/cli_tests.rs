use caresync_cli::{Cli, format_timestamp, render_status, run};
use caresync_sync::SyncState;
use caresync_types::Timestamp;
use clap::Parser;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn exec(db: &Path, args: &[&str]) -> anyhow::Result<String> {
    let db = db.to_str().unwrap();
    let argv = ["caresync", "--db", db].into_iter().chain(args.iter().copied());
    run(Cli::try_parse_from(argv)?).await
}

async fn exec_json(db: &Path, args: &[&str]) -> Value {
    serde_json::from_str(&exec(db, args).await.unwrap()).unwrap()
}

async fn mount_sync_api(server: &MockServer, submit: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/sync/residents/actions"))
        .respond_with(submit)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sync/residents/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"changes": []})))
        .mount(server)
        .await;
}

// ── Argument parsing ────────────────────────────────────────────

#[test]
fn rejects_invalid_namespace() {
    let result = Cli::try_parse_from(["caresync", "pending", "bad namespace!"]);
    assert!(result.is_err());
}

#[test]
fn rejects_unknown_operation() {
    let result = Cli::try_parse_from(["caresync", "enqueue", "blog", "post", "upsert", "{}"]);
    assert!(result.is_err());
}

// ── Rendering ───────────────────────────────────────────────────

#[test]
fn formats_timestamps_as_rfc3339() {
    assert_eq!(format_timestamp(Timestamp::EPOCH), "1970-01-01T00:00:00.000Z");
    assert_eq!(
        format_timestamp(Timestamp::from_millis(1_700_000_000_123)),
        "2023-11-14T22:13:20.123Z"
    );
}

#[test]
fn renders_status_text() {
    let text = render_status(&SyncState {
        is_online: true,
        pending_count: 2,
        failed_count: 1,
        has_failed_items: true,
        ..SyncState::default()
    });
    assert_eq!(
        text,
        "online:    yes\nsyncing:   no\npending:   2\nfailed:    1\nlast sync: never"
    );
}

// ── Queue commands ──────────────────────────────────────────────

#[tokio::test]
async fn enqueue_coalesces_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("queue.db");

    exec(&db, &["enqueue", "residents", "resident", "create", r#"{"id":"r-1","name":"Ada"}"#])
        .await
        .unwrap();
    exec(&db, &["enqueue", "residents", "resident", "update", r#"{"id":"r-1","room":"12"}"#])
        .await
        .unwrap();

    let pending = exec_json(&db, &["pending", "residents"]).await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["operation"], json!("create"));
    assert_eq!(pending[0]["payload"], json!({"id": "r-1", "name": "Ada", "room": "12"}));

    let status = exec_json(&db, &["status", "--json"]).await;
    assert_eq!(status["pendingCount"], json!(1));
}

#[tokio::test]
async fn enqueue_rejects_invalid_payload() {
    let dir = tempfile::tempdir().unwrap();
    let err = exec(&dir.path().join("q.db"), &["enqueue", "blog", "post", "create", "{oops"])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not valid JSON"));
}

#[tokio::test]
async fn discard_of_live_action_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("queue.db");
    let action = exec_json(&db, &["enqueue", "blog", "post", "create", r#"{"id":1}"#]).await;
    let id = action["id"].as_str().unwrap().to_string();

    let err = exec(&db, &["discard", "blog", &id]).await.unwrap_err();
    assert!(err.to_string().contains("not a dead letter"));
}

// ── Sync ────────────────────────────────────────────────────────

#[tokio::test]
async fn sync_flushes_to_endpoint() {
    let server = MockServer::start().await;
    mount_sync_api(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({"accepted": true, "serverTimestamp": 5})),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("queue.db");
    exec(&db, &["enqueue", "residents", "resident", "create", r#"{"id":"r-1"}"#])
        .await
        .unwrap();

    let reports = exec_json(&db, &["sync", "--endpoint", &server.uri()]).await;

    assert_eq!(reports[0]["namespace"], json!("residents"));
    assert_eq!(reports[0]["succeeded"], json!(1));
    assert!(reports[0]["checkpoint"].is_number());
    let status = exec_json(&db, &["status", "--json", "--namespace", "residents"]).await;
    assert_eq!(status["pendingCount"], json!(0));
    assert!(status["lastSyncTime"].is_number());
}

#[tokio::test]
async fn rejected_action_can_be_requeued() {
    let server = MockServer::start().await;
    mount_sync_api(
        &server,
        ResponseTemplate::new(422).set_body_json(json!({"message": "room required"})),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("queue.db");
    exec(&db, &["enqueue", "residents", "resident", "create", r#"{"id":"r-1"}"#])
        .await
        .unwrap();

    let reports = exec_json(&db, &["sync", "--endpoint", &server.uri(), "-n", "residents"]).await;
    assert_eq!(reports[0]["deadLettered"], json!(1));

    let dead = exec_json(&db, &["dead-letters", "residents"]).await;
    assert_eq!(dead[0]["lastError"], json!("VALIDATION: room required"));
    let id = dead[0]["id"].as_str().unwrap().to_string();

    let requeued = exec_json(&db, &["requeue", "residents", &id]).await;
    assert_eq!(requeued["attempts"], json!(0));
    let pending = exec_json(&db, &["pending", "residents"]).await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
}
