//! In-memory store.

use crate::{LocalStore, StorageError, StorageResult};
use caresync_types::{ActionId, ConflictRecord, Namespace, PendingAction, SyncCheckpoint};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Partition {
    actions: HashMap<ActionId, PendingAction>,
    checkpoint: Option<SyncCheckpoint>,
    conflicts: Vec<ConflictRecord>,
}

impl Partition {
    fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.checkpoint.is_none()
    }
}

/// A [`LocalStore`] that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: Mutex<BTreeMap<Namespace, Partition>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, BTreeMap<Namespace, Partition>>> {
        self.partitions.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl LocalStore for MemoryStore {
    fn put_action(&self, action: &PendingAction) -> StorageResult<()> {
        self.lock()?
            .entry(action.namespace.clone())
            .or_default()
            .actions
            .insert(action.id, action.clone());
        Ok(())
    }

    fn get_action(
        &self,
        namespace: &Namespace,
        id: &ActionId,
    ) -> StorageResult<Option<PendingAction>> {
        Ok(self
            .lock()?
            .get(namespace)
            .and_then(|p| p.actions.get(id))
            .cloned())
    }

    fn delete_action(&self, namespace: &Namespace, id: &ActionId) -> StorageResult<bool> {
        Ok(self
            .lock()?
            .get_mut(namespace)
            .is_some_and(|p| p.actions.remove(id).is_some()))
    }

    fn list_actions(&self, namespace: &Namespace) -> StorageResult<Vec<PendingAction>> {
        let guard = self.lock()?;
        let mut actions: Vec<PendingAction> = guard
            .get(namespace)
            .map(|p| p.actions.values().cloned().collect())
            .unwrap_or_default();
        actions.sort_by_key(|a| (a.sequence, a.client_timestamp, a.id));
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
        let mut guard = self.lock()?;
        let partition = guard.entry(namespace.clone()).or_default();
        for id in deletes {
            partition.actions.remove(id);
        }
        for action in puts {
            partition.actions.insert(action.id, action.clone());
        }
        Ok(())
    }

    fn namespaces(&self) -> StorageResult<Vec<Namespace>> {
        Ok(self
            .lock()?
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(ns, _)| ns.clone())
            .collect())
    }

    fn get_checkpoint(&self, namespace: &Namespace) -> StorageResult<Option<SyncCheckpoint>> {
        Ok(self
            .lock()?
            .get(namespace)
            .and_then(|p| p.checkpoint.clone()))
    }

    fn put_checkpoint(&self, checkpoint: &SyncCheckpoint) -> StorageResult<()> {
        self.lock()?
            .entry(checkpoint.namespace.clone())
            .or_default()
            .checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    fn append_conflict(&self, namespace: &Namespace, record: &ConflictRecord) -> StorageResult<()> {
        self.lock()?
            .entry(namespace.clone())
            .or_default()
            .conflicts
            .push(record.clone());
        Ok(())
    }

    fn list_conflicts(&self, namespace: &Namespace) -> StorageResult<Vec<ConflictRecord>> {
        Ok(self
            .lock()?
            .get(namespace)
            .map(|p| p.conflicts.clone())
            .unwrap_or_default())
    }
}
