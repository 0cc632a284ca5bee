//! Offline-first sync engine for CareSync.
//!
//! Every domain module (residents, medications, calendar, ...) writes its
//! mutations into a local queue and keeps working whether or not the server
//! is reachable. When connectivity allows, the engine flushes each
//! namespace's queue through the module's [`SyncHandler`] and reconciles
//! conflicts with the server of record.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **NetworkMonitor**: connectivity state and transition notifications
//! - **ActionQueue**: persistent per-namespace queue with coalescing
//! - **RetryScheduler**: backoff and attempt caps
//! - **ConflictResolver**: last-writer-wins with structural merge
//! - **SyncOrchestrator**: runs flush cycles
//! - **SyncStatusReporter**: pending/failed counts for the UI
//! - **SyncEngine**: wires the above together
//!
//! ## Sync Process
//!
//! 1. **Enqueue**: a mutation is persisted as a pending action
//! 2. **Trigger**: reconnect, timer, or an explicit `sync_now`
//! 3. **Flush**: due actions are submitted in order, one at a time
//! 4. **Resolve**: conflicts are settled and resubmitted or dropped
//! 5. **Pull**: remote changes since the checkpoint are applied
//!
//! # Example
//!
//! ```
//! use caresync_store::MemoryStore;
//! use caresync_sync::{NetworkMonitor, SyncConfig, SyncEngine};
//! use caresync_types::{Namespace, Operation};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let engine = SyncEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     NetworkMonitor::new(Some(false)),
//!     SyncConfig::default(),
//! )?;
//!
//! let residents = Namespace::new("residents")?;
//! engine.enqueue(&residents, "resident", Operation::Create, json!({"id": "r-1", "name": "Ada"}))?;
//! engine.enqueue(&residents, "resident", Operation::Update, json!({"id": "r-1", "room": "12B"}))?;
//!
//! // Coalesced into a single create.
//! assert_eq!(engine.status(Some(&residents))?.pending_count, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
pub mod conflict;
mod engine;
mod error;
pub mod handler;
pub mod http;
mod network;
mod orchestrator;
mod queue;
mod retry;
mod state;

pub use config::SyncConfig;
pub use conflict::{ConflictPolicy, ConflictResolver, RemoteSnapshot};
pub use engine::{EngineTasks, SyncEngine};
pub use error::{ErrorCode, HandlerError, SyncError, SyncResult};
pub use handler::{
    HandlerRegistry, HandlerResult, SubmitRequest, SubmitResponse, SyncHandler,
};
pub use http::{HttpHandlerConfig, HttpSyncHandler};
pub use network::{NetworkMonitor, Subscription};
pub use orchestrator::{FlushOutcome, FlushReport, SyncOrchestrator};
pub use queue::{ActionQueue, InFlight};
pub use retry::{RetryScheduler, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF};
pub use state::{StatusTask, SyncState, SyncStatusReporter};
