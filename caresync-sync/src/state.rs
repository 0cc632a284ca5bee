//! User-observable sync status.
//!
//! The reporter only reads: it never mutates the queue or the store.

use crate::error::SyncResult;
use crate::network::NetworkMonitor;
use crate::orchestrator::SyncOrchestrator;
use crate::queue::ActionQueue;
use caresync_types::{Namespace, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// A snapshot of sync status, for one namespace or all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_online: bool,
    /// Whether a flush is running (in the namespace, or anywhere when unfiltered).
    pub is_syncing: bool,
    /// Actions awaiting confirmation, dead letters excluded.
    pub pending_count: usize,
    /// Dead-lettered actions awaiting manual review.
    pub failed_count: usize,
    pub has_failed_items: bool,
    /// Latest checkpoint across the namespaces in scope.
    pub last_sync_time: Option<Timestamp>,
}

/// Derives [`SyncState`] from the queue, orchestrator and network monitor.
pub struct SyncStatusReporter {
    queue: Arc<ActionQueue>,
    orchestrator: Arc<SyncOrchestrator>,
    network: NetworkMonitor,
}

impl SyncStatusReporter {
    pub fn new(
        queue: Arc<ActionQueue>,
        orchestrator: Arc<SyncOrchestrator>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            network,
        }
    }

    /// Current status, optionally restricted to one namespace.
    pub fn status(&self, namespace: Option<&Namespace>) -> SyncResult<SyncState> {
        let namespaces = match namespace {
            Some(ns) => vec![ns.clone()],
            None => self.queue.namespaces()?,
        };

        let mut state = SyncState {
            is_online: self.network.is_online(),
            is_syncing: match namespace {
                Some(ns) => self.orchestrator.is_flushing(ns),
                None => self.orchestrator.is_any_flushing(),
            },
            ..SyncState::default()
        };

        for ns in &namespaces {
            state.pending_count += self.queue.pending_count(ns)?;
            state.failed_count += self.queue.dead_letter_count(ns)?;
            let checkpoint = self
                .queue
                .store()
                .get_checkpoint(ns)?
                .map(|c| c.last_sync_timestamp);
            state.last_sync_time = state.last_sync_time.max(checkpoint);
        }
        state.has_failed_items = state.failed_count > 0;
        Ok(state)
    }

    /// Starts publishing status snapshots every `interval`.
    pub fn start(self: &Arc<Self>, interval: Duration) -> StatusTask {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let reporter = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match reporter.status(None) {
                            Ok(state) => {
                                snapshot_tx.send_if_modified(|current| {
                                    if current.as_ref() == Some(&state) {
                                        false
                                    } else {
                                        *current = Some(state);
                                        true
                                    }
                                });
                            }
                            Err(e) => warn!(error = %e, "failed to compute sync status"),
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("status task stopped");
        });

        StatusTask {
            handle: Some(handle),
            stop: stop_tx,
            snapshots: snapshot_rx,
        }
    }
}

/// Handle to a running status poller. Dropping it stops the poller.
pub struct StatusTask {
    handle: Option<JoinHandle<()>>,
    stop: watch::Sender<bool>,
    snapshots: watch::Receiver<Option<SyncState>>,
}

impl StatusTask {
    /// A receiver that sees every published snapshot that differs from the last.
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncState>> {
        self.snapshots.clone()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<SyncState> {
        self.snapshots.borrow().clone()
    }

    /// Stops the poller and waits for it to exit.
    pub async fn stop(mut self) {
        self.stop.send_replace(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatusTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
