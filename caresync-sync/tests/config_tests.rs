use caresync_sync::{ConflictPolicy, SyncConfig, SyncError};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

#[test]
fn defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.base_backoff_ms, 1_000);
    assert_eq!(config.max_backoff_ms, 60_000);
    assert_eq!(config.flush_interval(), Duration::from_secs(30));
    assert_eq!(config.status_poll_interval(), Duration::from_secs(1));
    assert_eq!(config.request_timeout(), Duration::from_secs(30));
    assert_eq!(config.conflict_policy, ConflictPolicy::LastWriterWins);
    assert!(!config.audit_conflicts);
    assert!(config.validate().is_ok());
}

#[test]
fn partial_json_keeps_defaults() {
    let config =
        SyncConfig::from_json(r#"{"max_attempts": 5, "conflict_policy": "prefer-local"}"#).unwrap();
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.conflict_policy, ConflictPolicy::PreferLocal);
    assert_eq!(config.base_backoff_ms, 1_000);
}

#[test]
fn rejects_zero_attempts() {
    let err = SyncConfig::from_json(r#"{"max_attempts": 0}"#).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn rejects_base_above_ceiling() {
    let err = SyncConfig::from_json(r#"{"base_backoff_ms": 5000, "max_backoff_ms": 100}"#).unwrap_err();
    assert!(err.to_string().contains("exceeds"));
}

#[test]
fn rejects_malformed_json() {
    let err = SyncConfig::from_json("{not json").unwrap_err();
    assert!(matches!(err, SyncError::Serialization(_)));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"flush_interval_ms": 10000, "audit_conflicts": true}}"#).unwrap();

    let config = SyncConfig::load(file.path()).unwrap();
    assert_eq!(config.flush_interval(), Duration::from_secs(10));
    assert!(config.audit_conflicts);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SyncConfig::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SyncError::Io(_)));
}
