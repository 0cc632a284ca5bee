//! The sync engine facade.
//!
//! One [`SyncEngine`] owns the queue, handler registry, orchestrator and
//! status reporter for a store. Modules enqueue through it and register their
//! handler with it; the runtime feeds connectivity into its
//! [`NetworkMonitor`] and calls [`SyncEngine::start`] to run the background
//! flush and status tasks.

use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::error::SyncResult;
use crate::handler::{HandlerRegistry, SyncHandler};
use crate::network::NetworkMonitor;
use crate::orchestrator::{FlushReport, SyncOrchestrator};
use crate::queue::ActionQueue;
use crate::retry::RetryScheduler;
use crate::state::{StatusTask, SyncState, SyncStatusReporter};
use caresync_store::LocalStore;
use caresync_types::{ActionId, Clock, Namespace, Operation, PendingAction, SystemClock};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Offline-first sync for every registered namespace.
pub struct SyncEngine {
    config: SyncConfig,
    network: NetworkMonitor,
    registry: Arc<HandlerRegistry>,
    queue: Arc<ActionQueue>,
    orchestrator: Arc<SyncOrchestrator>,
    reporter: Arc<SyncStatusReporter>,
}

impl SyncEngine {
    /// Creates an engine on the system clock.
    pub fn new(
        store: Arc<dyn LocalStore>,
        network: NetworkMonitor,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::with_clock(store, network, config, Arc::new(SystemClock))
    }

    /// Creates an engine reading time from `clock`.
    pub fn with_clock(
        store: Arc<dyn LocalStore>,
        network: NetworkMonitor,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let registry = Arc::new(HandlerRegistry::new());
        let queue = Arc::new(ActionQueue::new(store, Arc::clone(&clock), config.max_attempts));
        let orchestrator = Arc::new(
            SyncOrchestrator::new(
                Arc::clone(&queue),
                Arc::clone(&registry),
                network.clone(),
                RetryScheduler::from_config(&config),
                ConflictResolver::new(config.conflict_policy),
                clock,
            )
            .with_conflict_audit(config.audit_conflicts),
        );
        let reporter = Arc::new(SyncStatusReporter::new(
            Arc::clone(&queue),
            Arc::clone(&orchestrator),
            network.clone(),
        ));

        Ok(Self {
            config,
            network,
            registry,
            queue,
            orchestrator,
            reporter,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn reporter(&self) -> &Arc<SyncStatusReporter> {
        &self.reporter
    }

    /// Registers the handler for a namespace.
    pub fn register_handler(&self, namespace: Namespace, handler: Arc<dyn SyncHandler>) {
        info!(namespace = %namespace, "registered sync handler");
        self.registry.register(namespace, handler);
    }

    /// Records a local mutation. See [`ActionQueue::enqueue`].
    pub fn enqueue(
        &self,
        namespace: &Namespace,
        entity: &str,
        operation: Operation,
        payload: Value,
    ) -> SyncResult<PendingAction> {
        self.queue.enqueue(namespace, entity, operation, payload)
    }

    /// Flushes one namespace, or all registered namespaces, and waits for the
    /// cycles to finish.
    pub async fn sync_now(&self, namespace: Option<&Namespace>) -> SyncResult<Vec<FlushReport>> {
        match namespace {
            Some(ns) => Ok(vec![self.orchestrator.flush(ns).await?]),
            None => Ok(self.orchestrator.flush_all().await),
        }
    }

    pub fn status(&self, namespace: Option<&Namespace>) -> SyncResult<SyncState> {
        self.reporter.status(namespace)
    }

    pub fn dead_letters(&self, namespace: &Namespace) -> SyncResult<Vec<PendingAction>> {
        self.queue.list_dead_letters(namespace)
    }

    pub fn requeue(&self, namespace: &Namespace, id: &ActionId) -> SyncResult<PendingAction> {
        self.queue.requeue_dead_letter(namespace, id)
    }

    pub fn discard(&self, namespace: &Namespace, id: &ActionId) -> SyncResult<bool> {
        self.queue.discard_dead_letter(namespace, id)
    }

    /// Stops new flushes from starting, e.g. on logout.
    pub fn pause(&self) {
        self.orchestrator.pause();
    }

    pub fn resume(&self) {
        self.orchestrator.resume();
    }

    /// Starts the background tasks: a periodic flush, a flush on every
    /// reconnect, and the status poller.
    ///
    /// Shutdown is only observed between cycles; a running flush always
    /// completes.
    pub fn start(self: &Arc<Self>) -> EngineTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let timer = {
            let engine = Arc::clone(self);
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.flush_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick fires immediately; skip it so startup does not
                // race the reconnect task.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!("periodic flush");
                            engine.orchestrator.flush_all().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let reconnect = {
            let engine = Arc::clone(self);
            let mut shutdown = shutdown_rx;
            let mut online = engine.network.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        changed = online.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let is_online = *online.borrow_and_update();
                            if is_online {
                                info!("back online, flushing all namespaces");
                                engine.orchestrator.flush_all().await;
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let status = self.reporter.start(self.config.status_poll_interval());

        EngineTasks {
            shutdown: shutdown_tx,
            handles: vec![timer, reconnect],
            status,
        }
    }
}

/// Handles to an engine's background tasks.
///
/// Dropping this signals the tasks to stop after any running cycle.
pub struct EngineTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    status: StatusTask,
}

impl EngineTasks {
    /// The status poller.
    pub fn status(&self) -> &StatusTask {
        &self.status
    }

    /// Signals shutdown and waits for every task to exit.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        self.status.stop().await;
        info!("sync engine stopped");
    }
}
