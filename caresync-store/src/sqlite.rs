//! SQLite-backed store.
//!
//! Each pending action is kept as its JSON record alongside the columns the
//! queries need (namespace, id, sequence). Records are the source of truth;
//! the columns only index them.

use crate::{LocalStore, StorageError, StorageResult};
use caresync_types::{
    ActionId, ConflictRecord, Namespace, PendingAction, SyncCheckpoint, Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pending_actions (
        namespace TEXT NOT NULL,
        id TEXT NOT NULL,
        sequence INTEGER NOT NULL,
        record TEXT NOT NULL,
        PRIMARY KEY (namespace, id)
    );

    CREATE INDEX IF NOT EXISTS pending_actions_order
        ON pending_actions (namespace, sequence);

    CREATE TABLE IF NOT EXISTS sync_checkpoints (
        namespace TEXT PRIMARY KEY,
        last_sync_timestamp INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS conflict_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        namespace TEXT NOT NULL,
        action_id TEXT NOT NULL,
        record TEXT NOT NULL
    );
";

/// A [`LocalStore`] persisted to a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!("Opening sync store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn parse_namespace(raw: String) -> StorageResult<Namespace> {
    Namespace::new(raw).map_err(|e| StorageError::InvalidData(e.to_string()))
}

fn write_action(conn: &Connection, action: &PendingAction) -> StorageResult<()> {
    let record = serde_json::to_string(action)?;
    conn.execute(
        "INSERT OR REPLACE INTO pending_actions (namespace, id, sequence, record) VALUES (?1, ?2, ?3, ?4)",
        params![
            action.namespace.as_str(),
            action.id.to_string(),
            action.sequence as i64,
            record,
        ],
    )?;
    Ok(())
}

impl LocalStore for SqliteStore {
    fn put_action(&self, action: &PendingAction) -> StorageResult<()> {
        let conn = self.lock()?;
        write_action(&conn, action)
    }

    fn get_action(
        &self,
        namespace: &Namespace,
        id: &ActionId,
    ) -> StorageResult<Option<PendingAction>> {
        let conn = self.lock()?;
        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM pending_actions WHERE namespace = ?1 AND id = ?2",
                params![namespace.as_str(), id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|r| serde_json::from_str(&r).map_err(Into::into))
            .transpose()
    }

    fn delete_action(&self, namespace: &Namespace, id: &ActionId) -> StorageResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM pending_actions WHERE namespace = ?1 AND id = ?2",
            params![namespace.as_str(), id.to_string()],
        )?;
        Ok(removed > 0)
    }

    fn list_actions(&self, namespace: &Namespace) -> StorageResult<Vec<PendingAction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT record FROM pending_actions WHERE namespace = ?1 ORDER BY sequence, rowid",
        )?;
        let rows = stmt.query_map(params![namespace.as_str()], |row| row.get::<_, String>(0))?;

        let mut actions = Vec::new();
        for row in rows {
            actions.push(serde_json::from_str::<PendingAction>(&row?)?);
        }
        Ok(actions)
    }

    fn replace_actions(
        &self,
        namespace: &Namespace,
        deletes: &[ActionId],
        puts: &[PendingAction],
    ) -> StorageResult<()> {
        if let Some(action) = puts.iter().find(|a| &a.namespace != namespace) {
            return Err(StorageError::InvalidData(format!(
                "action {} belongs to namespace {}, not {}",
                action.id, action.namespace, namespace
            )));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for id in deletes {
            tx.execute(
                "DELETE FROM pending_actions WHERE namespace = ?1 AND id = ?2",
                params![namespace.as_str(), id.to_string()],
            )?;
        }
        for action in puts {
            write_action(&tx, action)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn namespaces(&self) -> StorageResult<Vec<Namespace>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT namespace FROM pending_actions
             UNION
             SELECT namespace FROM sync_checkpoints
             ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut namespaces = Vec::new();
        for row in rows {
            namespaces.push(parse_namespace(row?)?);
        }
        Ok(namespaces)
    }

    fn get_checkpoint(&self, namespace: &Namespace) -> StorageResult<Option<SyncCheckpoint>> {
        let conn = self.lock()?;
        let millis: Option<i64> = conn
            .query_row(
                "SELECT last_sync_timestamp FROM sync_checkpoints WHERE namespace = ?1",
                params![namespace.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(millis.map(|m| {
            SyncCheckpoint::new(namespace.clone(), Timestamp::from_millis(m.max(0) as u64))
        }))
    }

    fn put_checkpoint(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_checkpoints (namespace, last_sync_timestamp) VALUES (?1, ?2)",
            params![
                checkpoint.namespace.as_str(),
                checkpoint.last_sync_timestamp.as_millis() as i64,
            ],
        )?;
        Ok(())
    }

    fn append_conflict(&self, namespace: &Namespace, record: &ConflictRecord) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conflict_log (namespace, action_id, record) VALUES (?1, ?2, ?3)",
            params![
                namespace.as_str(),
                record.action_id.to_string(),
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    fn list_conflicts(&self, namespace: &Namespace) -> StorageResult<Vec<ConflictRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT record FROM conflict_log WHERE namespace = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![namespace.as_str()], |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str::<ConflictRecord>(&row?)?);
        }
        Ok(records)
    }
}
