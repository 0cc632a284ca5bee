//! The flush cycle.
//!
//! A namespace is either idle or flushing. A flush walks the namespace's due
//! actions in queue order, one handler call at a time, and settles each one
//! before moving on:
//!
//! - accepted: removed from the queue
//! - transient failure: attempt recorded, retried after backoff
//! - validation failure: dead-lettered with the server's reason
//! - conflict: routed through the [`ConflictResolver`]
//!
//! A failure only affects the action that caused it and later actions for
//! the same entity, which wait so they never overtake it. When every due
//! action was settled the cycle pulls remote changes since the namespace's
//! checkpoint and then advances the checkpoint.

use crate::conflict::{ConflictResolver, RemoteSnapshot};
use crate::error::{ErrorCode, HandlerError, SyncError, SyncResult};
use crate::handler::{HandlerRegistry, SubmitRequest, SyncHandler};
use crate::network::NetworkMonitor;
use crate::queue::ActionQueue;
use crate::retry::RetryScheduler;
use caresync_types::{
    Clock, ConflictRecord, Namespace, Operation, PendingAction, Resolution, SyncCheckpoint,
    Timestamp,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How a flush request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushOutcome {
    /// This call ran the cycle.
    Completed,
    /// Another call was already flushing the namespace; its report is returned.
    Joined,
    /// Nothing ran because the device is offline.
    SkippedOffline,
    /// Nothing ran because sync is paused.
    SkippedPaused,
}

/// Summary of one flush cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub namespace: Namespace,
    pub outcome: FlushOutcome,
    /// Actions handed to the handler.
    pub attempted: usize,
    /// Actions removed from the queue (accepted, or dropped by a remote-wins resolution).
    pub succeeded: usize,
    /// Actions that failed and will be retried.
    pub failed: usize,
    /// Actions that were dead-lettered during this cycle.
    pub dead_lettered: usize,
    /// Due actions still waiting out their backoff.
    pub deferred: usize,
    /// Conflicts passed to the resolver.
    pub conflicts: usize,
    /// Remote changes applied locally.
    pub remote_applied: usize,
    /// The new checkpoint, if the cycle advanced it.
    pub checkpoint: Option<Timestamp>,
}

impl FlushReport {
    fn new(namespace: Namespace, outcome: FlushOutcome) -> Self {
        Self {
            namespace,
            outcome,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            dead_lettered: 0,
            deferred: 0,
            conflicts: 0,
            remote_applied: 0,
            checkpoint: None,
        }
    }

    /// Whether every due action was settled.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.dead_lettered == 0 && self.deferred == 0
    }

    /// Turns a skipped flush into the matching error.
    pub fn ensure_ran(self) -> SyncResult<Self> {
        match self.outcome {
            FlushOutcome::SkippedOffline => Err(SyncError::Offline),
            FlushOutcome::SkippedPaused => Err(SyncError::Paused),
            FlushOutcome::Completed | FlushOutcome::Joined => Ok(self),
        }
    }
}

struct Flight {
    id: u64,
    done: watch::Receiver<Option<FlushReport>>,
}

enum Role {
    Lead(u64, watch::Sender<Option<FlushReport>>),
    Follow(watch::Receiver<Option<FlushReport>>),
}

/// Drives flush cycles for every registered namespace.
pub struct SyncOrchestrator {
    queue: Arc<ActionQueue>,
    registry: Arc<HandlerRegistry>,
    network: NetworkMonitor,
    scheduler: RetryScheduler,
    resolver: ConflictResolver,
    clock: Arc<dyn Clock>,
    audit_conflicts: bool,
    paused: AtomicBool,
    flights: Mutex<HashMap<Namespace, Flight>>,
    next_flight: AtomicU64,
}

impl SyncOrchestrator {
    pub fn new(
        queue: Arc<ActionQueue>,
        registry: Arc<HandlerRegistry>,
        network: NetworkMonitor,
        scheduler: RetryScheduler,
        resolver: ConflictResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            registry,
            network,
            scheduler,
            resolver,
            clock,
            audit_conflicts: false,
            paused: AtomicBool::new(false),
            flights: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Persists every conflict record to the store's audit log.
    #[must_use]
    pub fn with_conflict_audit(mut self, enabled: bool) -> Self {
        self.audit_conflicts = enabled;
        self
    }

    /// Stops new flushes from starting. A flush already running finishes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("sync paused");
    }

    /// Allows flushes again.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("sync resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the namespace is mid-flush.
    pub fn is_flushing(&self, namespace: &Namespace) -> bool {
        self.flights().contains_key(namespace)
    }

    /// Whether any namespace is mid-flush.
    pub fn is_any_flushing(&self) -> bool {
        !self.flights().is_empty()
    }

    fn flights(&self) -> MutexGuard<'_, HashMap<Namespace, Flight>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flushes every namespace with a registered handler, concurrently.
    ///
    /// A namespace whose cycle fails outright is logged and left out of the
    /// result; the others are unaffected.
    pub async fn flush_all(&self) -> Vec<FlushReport> {
        let namespaces = self.registry.namespaces();
        let results = join_all(namespaces.iter().map(|ns| self.flush(ns))).await;
        namespaces
            .iter()
            .zip(results)
            .filter_map(|(ns, result)| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(namespace = %ns, error = %e, "flush failed");
                    None
                }
            })
            .collect()
    }

    /// Flushes one namespace.
    ///
    /// If the namespace is already flushing, waits for that cycle and returns
    /// its report instead of starting a second one.
    pub async fn flush(&self, namespace: &Namespace) -> SyncResult<FlushReport> {
        let handler = self
            .registry
            .get(namespace)
            .ok_or_else(|| SyncError::UnknownNamespace(namespace.clone()))?;

        loop {
            if self.is_paused() {
                return Ok(FlushReport::new(namespace.clone(), FlushOutcome::SkippedPaused));
            }

            let role = {
                let mut flights = self.flights();
                match flights.get(namespace) {
                    Some(flight) => Role::Follow(flight.done.clone()),
                    None => {
                        if !self.network.is_online() {
                            debug!(namespace = %namespace, "offline, flush skipped");
                            return Ok(FlushReport::new(
                                namespace.clone(),
                                FlushOutcome::SkippedOffline,
                            ));
                        }
                        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(None);
                        flights.insert(namespace.clone(), Flight { id, done: rx });
                        Role::Lead(id, tx)
                    }
                }
            };

            match role {
                Role::Lead(id, tx) => {
                    let _flight = FlightGuard {
                        orchestrator: self,
                        namespace,
                        id,
                    };
                    let report = self.run_cycle(namespace, handler.as_ref()).await?;
                    tx.send_replace(Some(report.clone()));
                    return Ok(report);
                }
                Role::Follow(mut rx) => {
                    debug!(namespace = %namespace, "joining in-progress flush");
                    let joined = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|report| report.clone());
                    if let Some(mut report) = joined {
                        report.outcome = FlushOutcome::Joined;
                        return Ok(report);
                    }
                    // The leading cycle ended without a report; try again.
                }
            }
        }
    }

    async fn run_cycle(
        &self,
        namespace: &Namespace,
        handler: &dyn SyncHandler,
    ) -> SyncResult<FlushReport> {
        let started = self.clock.now();
        let mut report = FlushReport::new(namespace.clone(), FlushOutcome::Completed);
        let queued = self.queue.list_all(namespace)?;
        info!(namespace = %namespace, queued = queued.len(), "flush started");

        // Entities with an earlier action still unsettled. Later actions for
        // them wait so the server sees each entity's changes in queue order.
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for listed in queued {
            let entity_key = listed.entity_key().map(|key| (listed.entity.clone(), key));
            if entity_key.as_ref().is_some_and(|k| blocked.contains(k)) {
                if !self.scheduler.is_exhausted(&listed) {
                    report.deferred += 1;
                }
                continue;
            }

            // Marked before the reload so no enqueue can coalesce into the copy we submit.
            let _in_flight = self.queue.begin_flight(listed.id);
            let action = match self.queue.get(namespace, &listed.id) {
                Ok(Some(action)) => action,
                Ok(None) => continue,
                Err(e) => {
                    warn!(namespace = %namespace, id = %listed.id, error = %e, "failed to load action");
                    report.failed += 1;
                    blocked.extend(entity_key);
                    continue;
                }
            };
            if self.scheduler.is_exhausted(&action) {
                blocked.extend(entity_key);
                continue;
            }
            if !self.scheduler.is_eligible(&action, self.clock.now()) {
                report.deferred += 1;
                blocked.extend(entity_key);
                continue;
            }

            report.attempted += 1;
            let id = action.id;
            if let Err(e) = self.process(namespace, handler, action, &mut report).await {
                warn!(namespace = %namespace, id = %id, error = %e, "action failed locally");
                report.failed += 1;
            }
            if !matches!(self.queue.get(namespace, &id), Ok(None)) {
                blocked.extend(entity_key);
            }
        }

        if report.is_clean() {
            match self.pull_remote(namespace, handler, &mut report).await {
                Ok(true) => {
                    self.queue
                        .store()
                        .put_checkpoint(&SyncCheckpoint::new(namespace.clone(), started))?;
                    report.checkpoint = Some(started);
                }
                Ok(false) => {}
                Err(e) => warn!(namespace = %namespace, error = %e, "pulling remote changes failed"),
            }
        }

        info!(
            namespace = %namespace,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            conflicts = report.conflicts,
            "flush finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        namespace: &Namespace,
        handler: &dyn SyncHandler,
        action: PendingAction,
        report: &mut FlushReport,
    ) -> SyncResult<()> {
        let request = SubmitRequest::from(&action);

        let error = match handler.submit(&request).await {
            Ok(response) if response.accepted => {
                self.queue.remove(namespace, &action.id)?;
                report.succeeded += 1;
                debug!(namespace = %namespace, id = %action.id, "action accepted");
                return Ok(());
            }
            Ok(_) => HandlerError::unavailable("server did not accept the action"),
            Err(error) => error,
        };

        match error.code {
            ErrorCode::Conflict => self.handle_conflict(namespace, handler, action, error, report).await,
            _ => self.settle_failure(namespace, &action, &error, report),
        }
    }

    fn settle_failure(
        &self,
        namespace: &Namespace,
        action: &PendingAction,
        error: &HandlerError,
        report: &mut FlushReport,
    ) -> SyncResult<()> {
        if error.is_retryable() {
            let updated = self.queue.mark_attempt(namespace, &action.id, error.to_string())?;
            if self.scheduler.is_exhausted(&updated) {
                warn!(namespace = %namespace, id = %action.id, attempts = updated.attempts, error = %error, "retries exhausted, action dead-lettered");
                report.dead_lettered += 1;
            } else {
                debug!(namespace = %namespace, id = %action.id, attempts = updated.attempts, error = %error, "action will be retried");
                report.failed += 1;
            }
        } else {
            self.queue.dead_letter(namespace, &action.id, error.to_string())?;
            warn!(namespace = %namespace, id = %action.id, error = %error, "action rejected, dead-lettered");
            report.dead_lettered += 1;
        }
        Ok(())
    }

    async fn handle_conflict(
        &self,
        namespace: &Namespace,
        handler: &dyn SyncHandler,
        action: PendingAction,
        error: HandlerError,
        report: &mut FlushReport,
    ) -> SyncResult<()> {
        report.conflicts += 1;

        let remote = match error.remote.clone() {
            Some(remote) => Some(remote),
            None => match action.entity_key() {
                Some(key) => match handler.fetch_remote(&action.entity, &key).await {
                    Ok(remote) => remote,
                    Err(fetch_error) => {
                        return self.settle_failure(namespace, &action, &fetch_error, report);
                    }
                },
                None => None,
            },
        };
        let Some(remote) = remote else {
            // Nothing to resolve against; retry the plain submission later.
            let unresolved = HandlerError::internal(format!("unresolved conflict: {}", error.message));
            return self.settle_failure(namespace, &action, &unresolved, report);
        };

        let record = self.resolver.resolve(&action, &remote, self.clock.now());
        self.audit(namespace, &record);
        info!(
            namespace = %namespace,
            id = %action.id,
            resolution = %record.resolution,
            "conflict resolved"
        );

        match record.resolution {
            Resolution::Remote => {
                self.queue.remove(namespace, &action.id)?;
                report.succeeded += 1;
                self.apply_remote(namespace, handler, &remote, report).await;
                Ok(())
            }
            Resolution::Local | Resolution::Merged => {
                let payload = match action.operation {
                    Operation::Delete => action.payload.clone(),
                    Operation::Create | Operation::Update => record.resolved_value.clone(),
                };
                let updated = self.queue.replace_payload(
                    namespace,
                    &action.id,
                    payload,
                    Some(remote.server_timestamp),
                )?;
                match handler.submit(&SubmitRequest::from(&updated)).await {
                    Ok(response) if response.accepted => {
                        self.queue.remove(namespace, &action.id)?;
                        report.succeeded += 1;
                        Ok(())
                    }
                    Ok(_) => {
                        let error = HandlerError::unavailable("server did not accept the resolved action");
                        self.settle_failure(namespace, &updated, &error, report)
                    }
                    // Resolved once already; a repeat conflict waits for the next cycle.
                    Err(error) if error.code == ErrorCode::Conflict => {
                        let retry = HandlerError::internal(format!(
                            "conflict persisted after resolution: {}",
                            error.message
                        ));
                        self.settle_failure(namespace, &updated, &retry, report)
                    }
                    Err(error) => self.settle_failure(namespace, &updated, &error, report),
                }
            }
        }
    }

    /// Pulls changes since the checkpoint. Returns whether all were applied.
    async fn pull_remote(
        &self,
        namespace: &Namespace,
        handler: &dyn SyncHandler,
        report: &mut FlushReport,
    ) -> SyncResult<bool> {
        let since = self
            .queue
            .store()
            .get_checkpoint(namespace)?
            .map_or(Timestamp::EPOCH, |c| c.last_sync_timestamp);
        let changes = handler.fetch_changes(since).await?;
        if changes.is_empty() {
            return Ok(true);
        }
        debug!(namespace = %namespace, %since, changes = changes.len(), "pulling remote changes");

        let mut all_applied = true;
        for change in changes {
            let pending = self
                .queue
                .list_due(namespace)?
                .into_iter()
                .rev()
                .find(|a| a.touches(&change.entity, &change.key));

            let Some(local) = pending else {
                all_applied &= self.apply_remote(namespace, handler, &change, report).await;
                continue;
            };

            report.conflicts += 1;
            let record = self.resolver.resolve(&local, &change, self.clock.now());
            self.audit(namespace, &record);
            match record.resolution {
                Resolution::Remote => {
                    self.queue.remove(namespace, &local.id)?;
                    all_applied &= self.apply_remote(namespace, handler, &change, report).await;
                }
                Resolution::Local => {
                    self.queue.replace_payload(
                        namespace,
                        &local.id,
                        local.payload.clone(),
                        Some(change.server_timestamp),
                    )?;
                }
                Resolution::Merged => {
                    self.queue.replace_payload(
                        namespace,
                        &local.id,
                        record.resolved_value.clone(),
                        Some(change.server_timestamp),
                    )?;
                    let merged = RemoteSnapshot {
                        value: Some(record.resolved_value),
                        ..change
                    };
                    all_applied &= self.apply_remote(namespace, handler, &merged, report).await;
                }
            }
        }
        Ok(all_applied)
    }

    async fn apply_remote(
        &self,
        namespace: &Namespace,
        handler: &dyn SyncHandler,
        change: &RemoteSnapshot,
        report: &mut FlushReport,
    ) -> bool {
        match handler.apply_remote(change).await {
            Ok(()) => {
                report.remote_applied += 1;
                true
            }
            Err(e) => {
                warn!(
                    namespace = %namespace,
                    entity = %change.entity,
                    key = %change.key,
                    error = %e,
                    "failed to apply remote change"
                );
                false
            }
        }
    }

    fn audit(&self, namespace: &Namespace, record: &ConflictRecord) {
        if !self.audit_conflicts {
            return;
        }
        if let Err(e) = self.queue.store().append_conflict(namespace, record) {
            warn!(namespace = %namespace, error = %e, "failed to audit conflict");
        }
    }
}

/// Clears the flight entry when the leading cycle ends, however it ends.
struct FlightGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
    namespace: &'a Namespace,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.orchestrator.flights();
        if flights.get(self.namespace).is_some_and(|f| f.id == self.id) {
            flights.remove(self.namespace);
        }
    }
}
