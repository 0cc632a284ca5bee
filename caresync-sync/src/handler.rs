//! Per-namespace sync handlers.
//!
//! Each domain module registers a [`SyncHandler`] for its namespace. The
//! orchestrator hands it one action at a time and branches on the
//! [`ErrorCode`](crate::ErrorCode) of any failure.

use crate::conflict::RemoteSnapshot;
use crate::error::HandlerError;
use async_trait::async_trait;
use caresync_types::{ActionId, Namespace, Operation, PendingAction, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Result type for handler calls.
pub type HandlerResult<T> = Result<T, HandlerError>;

/// One action as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Idempotency key for the server.
    pub action_id: ActionId,
    pub entity: String,
    pub operation: Operation,
    pub payload: Value,
    pub client_timestamp: Timestamp,
    /// Server version a conflict resolution was computed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<Timestamp>,
}

impl From<&PendingAction> for SubmitRequest {
    fn from(action: &PendingAction) -> Self {
        Self {
            action_id: action.id,
            entity: action.entity.clone(),
            operation: action.operation,
            payload: action.payload.clone(),
            client_timestamp: action.client_timestamp,
            base_version: action.base_version,
        }
    }
}

/// The server's answer to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Whether the server applied the action.
    pub accepted: bool,
    /// When the server recorded the change.
    pub server_timestamp: Timestamp,
    /// The entity as stored by the server, if returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_entity: Option<Value>,
}

impl SubmitResponse {
    /// An accepted submission with no echoed entity.
    pub fn accepted(server_timestamp: Timestamp) -> Self {
        Self {
            accepted: true,
            server_timestamp,
            server_entity: None,
        }
    }
}

/// Talks to the server of record on behalf of one namespace.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Submits one action.
    async fn submit(&self, request: &SubmitRequest) -> HandlerResult<SubmitResponse>;

    /// Fetches the server's current state of an entity.
    ///
    /// Returns `None` when the handler cannot tell; conflicts then fall back
    /// to the snapshot attached to the error, if any.
    async fn fetch_remote(&self, _entity: &str, _key: &str) -> HandlerResult<Option<RemoteSnapshot>> {
        Ok(None)
    }

    /// Fetches entities the server changed after `since`.
    async fn fetch_changes(&self, _since: Timestamp) -> HandlerResult<Vec<RemoteSnapshot>> {
        Ok(Vec::new())
    }

    /// Applies a server change to the module's local data.
    async fn apply_remote(&self, _change: &RemoteSnapshot) -> HandlerResult<()> {
        Ok(())
    }
}

/// Maps namespaces to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<BTreeMap<Namespace, Arc<dyn SyncHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the namespace.
    pub fn register(&self, namespace: Namespace, handler: Arc<dyn SyncHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace, handler);
    }

    /// Removes a namespace's handler.
    pub fn unregister(&self, namespace: &Namespace) -> Option<Arc<dyn SyncHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(namespace)
    }

    pub fn get(&self, namespace: &Namespace) -> Option<Arc<dyn SyncHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    /// Registered namespaces in sorted order.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

/// In-memory handler for tests.
pub mod mock {
    use super::*;
    use caresync_types::entity_key_of;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    type Responder = Box<dyn Fn(&SubmitRequest) -> Option<HandlerError> + Send + Sync>;

    /// A scriptable server of record.
    ///
    /// Accepted submissions update an in-memory entity table, so later
    /// `fetch_remote` calls see them.
    #[derive(Default)]
    pub struct MockHandler {
        submissions: Mutex<Vec<SubmitRequest>>,
        outcomes: Mutex<VecDeque<HandlerError>>,
        responder: Mutex<Option<Responder>>,
        entities: Mutex<HashMap<(String, String), RemoteSnapshot>>,
        changes: Mutex<Vec<RemoteSnapshot>>,
        change_requests: Mutex<Vec<Timestamp>>,
        applied: Mutex<Vec<RemoteSnapshot>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockHandler {
        /// Creates a handler that accepts everything.
        pub fn new() -> Self {
            Self::default()
        }

        /// Fails the next submission with `error`. Calls queue up in order.
        pub fn fail_next(&self, error: HandlerError) {
            self.outcomes.lock().unwrap().push_back(error);
        }

        /// Decides the outcome of every submission not covered by `fail_next`.
        pub fn respond_with<F>(&self, responder: F)
        where
            F: Fn(&SubmitRequest) -> Option<HandlerError> + Send + Sync + 'static,
        {
            *self.responder.lock().unwrap() = Some(Box::new(responder));
        }

        /// Makes each submission take `delay` before answering.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        /// Sets the server's state of an entity.
        pub fn set_remote(&self, snapshot: RemoteSnapshot) {
            self.entities
                .lock()
                .unwrap()
                .insert((snapshot.entity.clone(), snapshot.key.clone()), snapshot);
        }

        /// Adds a change returned from `fetch_changes`.
        pub fn push_change(&self, change: RemoteSnapshot) {
            self.set_remote(change.clone());
            self.changes.lock().unwrap().push(change);
        }

        /// Every submission received, in order.
        pub fn submissions(&self) -> Vec<SubmitRequest> {
            self.submissions.lock().unwrap().clone()
        }

        pub fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }

        /// The `since` argument of every `fetch_changes` call.
        pub fn change_requests(&self) -> Vec<Timestamp> {
            self.change_requests.lock().unwrap().clone()
        }

        /// Changes handed to `apply_remote`.
        pub fn applied(&self) -> Vec<RemoteSnapshot> {
            self.applied.lock().unwrap().clone()
        }

        /// The server's state of an entity.
        pub fn remote(&self, entity: &str, key: &str) -> Option<RemoteSnapshot> {
            self.entities
                .lock()
                .unwrap()
                .get(&(entity.to_string(), key.to_string()))
                .cloned()
        }

        fn outcome(&self, request: &SubmitRequest) -> Option<HandlerError> {
            if let Some(error) = self.outcomes.lock().unwrap().pop_front() {
                return Some(error);
            }
            self.responder
                .lock()
                .unwrap()
                .as_ref()
                .and_then(|respond| respond(request))
        }

        fn record_accepted(&self, request: &SubmitRequest) {
            let Some(key) = entity_key_of(&request.payload) else {
                return;
            };
            let snapshot = match request.operation {
                Operation::Delete => {
                    RemoteSnapshot::deleted(&request.entity, key, request.client_timestamp)
                }
                Operation::Create | Operation::Update => RemoteSnapshot::existing(
                    &request.entity,
                    key,
                    request.payload.clone(),
                    request.client_timestamp,
                ),
            };
            self.set_remote(snapshot);
        }
    }

    #[async_trait]
    impl SyncHandler for MockHandler {
        async fn submit(&self, request: &SubmitRequest) -> HandlerResult<SubmitResponse> {
            self.submissions.lock().unwrap().push(request.clone());
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(error) = self.outcome(request) {
                return Err(error);
            }
            self.record_accepted(request);
            Ok(SubmitResponse {
                accepted: true,
                server_timestamp: request.client_timestamp,
                server_entity: Some(request.payload.clone()),
            })
        }

        async fn fetch_remote(&self, entity: &str, key: &str) -> HandlerResult<Option<RemoteSnapshot>> {
            Ok(self.remote(entity, key))
        }

        async fn fetch_changes(&self, since: Timestamp) -> HandlerResult<Vec<RemoteSnapshot>> {
            self.change_requests.lock().unwrap().push(since);
            Ok(self
                .changes
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.server_timestamp > since)
                .cloned()
                .collect())
        }

        async fn apply_remote(&self, change: &RemoteSnapshot) -> HandlerResult<()> {
            self.applied.lock().unwrap().push(change.clone());
            Ok(())
        }
    }
}
