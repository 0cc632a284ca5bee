//! The pending action queue.
//!
//! Every local mutation becomes a [`PendingAction`] persisted to the
//! [`LocalStore`] before `enqueue` returns. Successive intents for the same
//! entity are coalesced so the server sees the net effect rather than every
//! keystroke:
//!
//! | queued (latest) | incoming         | result                              |
//! |-----------------|------------------|-------------------------------------|
//! | create          | update / create  | one create, payloads merged         |
//! | update          | update / create  | one update, payloads merged         |
//! | create / update | delete           | earlier actions dropped, delete kept |
//! | delete          | anything         | appended                            |
//! | in flight       | anything         | appended                            |
//!
//! Dead-lettered actions are never coalesced into and never flushed; they stay
//! in the store until requeued or discarded by an operator.

use crate::error::{SyncError, SyncResult};
use caresync_store::LocalStore;
use caresync_types::{
    entity_key_of, ActionId, Clock, Namespace, Operation, PendingAction, Timestamp,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Persistent, per-namespace FIFO of unconfirmed mutations.
pub struct ActionQueue {
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    // Serialises read-modify-write sequences against the store.
    write_lock: Mutex<()>,
    in_flight: Mutex<HashSet<ActionId>>,
}

impl ActionQueue {
    /// Creates a queue over `store`.
    pub fn new(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts,
            write_lock: Mutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a local mutation.
    ///
    /// Returns the action that now carries the intent: either a new action
    /// or an existing one the intent was coalesced into.
    pub fn enqueue(
        &self,
        namespace: &Namespace,
        entity: &str,
        operation: Operation,
        payload: Value,
    ) -> SyncResult<PendingAction> {
        let _guard = self.lock_writes();
        let now = self.clock.now();
        let existing = self.store.list_actions(namespace)?;
        let next_sequence = existing
            .iter()
            .map(|a| a.sequence)
            .max()
            .map_or(0, |s| s + 1);

        let fresh = PendingAction::new(namespace.clone(), entity, operation, payload, now)
            .with_sequence(next_sequence);

        let Some(key) = entity_key_of(&fresh.payload) else {
            return self.append(fresh);
        };

        let live: Vec<&PendingAction> = existing
            .iter()
            .filter(|a| !a.is_dead_lettered(self.max_attempts) && a.touches(entity, &key))
            .collect();
        let Some(latest) = live.last().copied() else {
            return self.append(fresh);
        };

        if self.is_in_flight(&latest.id) || latest.operation == Operation::Delete {
            return self.append(fresh);
        }

        if operation == Operation::Delete {
            let in_flight = self.in_flight_ids();
            let discarded: Vec<ActionId> = live
                .iter()
                .filter(|a| !in_flight.contains(&a.id))
                .map(|a| a.id)
                .collect();
            self.store
                .replace_actions(namespace, &discarded, std::slice::from_ref(&fresh))?;
            debug!(
                namespace = %namespace,
                entity,
                key = %key,
                discarded = discarded.len(),
                "delete superseded pending actions"
            );
            return Ok(fresh);
        }

        let mut merged = latest.clone();
        merged.payload = merge_payload(&latest.payload, fresh.payload);
        merged.client_timestamp = now;
        self.store.put_action(&merged)?;
        debug!(namespace = %namespace, entity, key = %key, id = %merged.id, "coalesced into pending action");
        Ok(merged)
    }

    fn append(&self, action: PendingAction) -> SyncResult<PendingAction> {
        self.store.put_action(&action)?;
        debug!(
            namespace = %action.namespace,
            entity = %action.entity,
            operation = %action.operation,
            id = %action.id,
            "enqueued action"
        );
        Ok(action)
    }

    /// Actions eligible for flushing, in queue order.
    ///
    /// Backoff is not applied here; that is the retry scheduler's decision.
    pub fn list_due(&self, namespace: &Namespace) -> SyncResult<Vec<PendingAction>> {
        Ok(self
            .store
            .list_actions(namespace)?
            .into_iter()
            .filter(|a| !a.is_dead_lettered(self.max_attempts))
            .collect())
    }

    /// Actions held for manual review, in queue order.
    pub fn list_dead_letters(&self, namespace: &Namespace) -> SyncResult<Vec<PendingAction>> {
        Ok(self
            .store
            .list_actions(namespace)?
            .into_iter()
            .filter(|a| a.is_dead_lettered(self.max_attempts))
            .collect())
    }

    /// Every stored action of the namespace, dead letters included.
    pub fn list_all(&self, namespace: &Namespace) -> SyncResult<Vec<PendingAction>> {
        Ok(self.store.list_actions(namespace)?)
    }

    /// Loads a single action.
    pub fn get(&self, namespace: &Namespace, id: &ActionId) -> SyncResult<Option<PendingAction>> {
        Ok(self.store.get_action(namespace, id)?)
    }

    fn update<F>(&self, namespace: &Namespace, id: &ActionId, f: F) -> SyncResult<PendingAction>
    where
        F: FnOnce(&mut PendingAction, Timestamp),
    {
        let _guard = self.lock_writes();
        let mut action = self
            .store
            .get_action(namespace, id)?
            .ok_or(SyncError::ActionNotFound(*id))?;
        f(&mut action, self.clock.now());
        self.store.put_action(&action)?;
        Ok(action)
    }

    /// Records a failed attempt. The action is dead-lettered implicitly once
    /// it reaches the attempt cap.
    pub fn mark_attempt(
        &self,
        namespace: &Namespace,
        id: &ActionId,
        error: impl Into<String>,
    ) -> SyncResult<PendingAction> {
        let error = error.into();
        self.update(namespace, id, |action, now| action.record_failure(error, now))
    }

    /// Parks an action for manual review regardless of its attempt count.
    pub fn dead_letter(
        &self,
        namespace: &Namespace,
        id: &ActionId,
        error: impl Into<String>,
    ) -> SyncResult<PendingAction> {
        let error = error.into();
        self.update(namespace, id, |action, now| {
            action.record_failure(error, now);
            action.dead_lettered = true;
        })
    }

    /// Rewrites an action's payload after a conflict was resolved in its favour.
    pub fn replace_payload(
        &self,
        namespace: &Namespace,
        id: &ActionId,
        payload: Value,
        base_version: Option<Timestamp>,
    ) -> SyncResult<PendingAction> {
        self.update(namespace, id, |action, _| {
            action.payload = payload;
            action.base_version = base_version;
        })
    }

    /// Deletes a confirmed or dropped action. Removing a missing action is
    /// not an error.
    pub fn remove(&self, namespace: &Namespace, id: &ActionId) -> SyncResult<bool> {
        let _guard = self.lock_writes();
        Ok(self.store.delete_action(namespace, id)?)
    }

    /// Returns a dead letter to the queue with a fresh retry budget.
    pub fn requeue_dead_letter(
        &self,
        namespace: &Namespace,
        id: &ActionId,
    ) -> SyncResult<PendingAction> {
        self.update(namespace, id, |action, _| {
            action.attempts = 0;
            action.dead_lettered = false;
            action.last_attempt_at = None;
        })
    }

    /// Permanently drops a dead letter. Returns `false` if the action is
    /// missing or still live.
    pub fn discard_dead_letter(&self, namespace: &Namespace, id: &ActionId) -> SyncResult<bool> {
        let _guard = self.lock_writes();
        match self.store.get_action(namespace, id)? {
            Some(action) if action.is_dead_lettered(self.max_attempts) => {
                Ok(self.store.delete_action(namespace, id)?)
            }
            _ => Ok(false),
        }
    }

    /// Number of actions still awaiting confirmation.
    pub fn pending_count(&self, namespace: &Namespace) -> SyncResult<usize> {
        Ok(self.list_due(namespace)?.len())
    }

    /// Number of actions held for manual review.
    pub fn dead_letter_count(&self, namespace: &Namespace) -> SyncResult<usize> {
        Ok(self.list_dead_letters(namespace)?.len())
    }

    /// Namespaces with stored actions or checkpoints.
    pub fn namespaces(&self) -> SyncResult<Vec<Namespace>> {
        Ok(self.store.namespaces()?)
    }

    /// Marks an action as being submitted until the guard drops.
    ///
    /// Takes the write lock, so an `enqueue` either lands before the mark
    /// (and a reload sees the merged payload) or sees the action in flight.
    pub fn begin_flight(&self, id: ActionId) -> InFlight<'_> {
        let _guard = self.lock_writes();
        self.in_flight_set().insert(id);
        InFlight { queue: self, id }
    }

    /// Whether the action is currently being submitted.
    pub fn is_in_flight(&self, id: &ActionId) -> bool {
        self.in_flight_set().contains(id)
    }

    fn in_flight_ids(&self) -> HashSet<ActionId> {
        self.in_flight_set().clone()
    }

    fn in_flight_set(&self) -> MutexGuard<'_, HashSet<ActionId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears an action's in-flight mark when dropped.
pub struct InFlight<'a> {
    queue: &'a ActionQueue,
    id: ActionId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.in_flight_set().remove(&self.id);
    }
}

/// Shallow merge: fields of `incoming` overwrite fields of `base`.
/// Non-object payloads are replaced outright.
fn merge_payload(base: &Value, incoming: Value) -> Value {
    match (base, incoming) {
        (Value::Object(base), Value::Object(incoming)) => {
            let mut merged = base.clone();
            merged.extend(incoming);
            Value::Object(merged)
        }
        (_, incoming) => incoming,
    }
}
