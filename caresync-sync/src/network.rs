//! Connectivity tracking.
//!
//! The runtime feeds connectivity signals in through
//! [`NetworkMonitor::set_online`]. Listeners are only told about real
//! transitions, so a flapping signal that repeats the same state does not
//! trigger redundant syncs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::info;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_listener: AtomicU64,
}

/// Tracks whether the device can reach the network.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl NetworkMonitor {
    /// Creates a monitor from the runtime's initial connectivity reading.
    ///
    /// When no reading is available the monitor starts online; request
    /// failures will surface unreachability soon enough.
    pub fn new(initial: Option<bool>) -> Self {
        let (state, _) = watch::channel(initial.unwrap_or(true));
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Records a connectivity signal. Returns whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
            let listeners: Vec<Listener> = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .cloned()
                .collect();
            for listener in listeners {
                listener(online);
            }
        }
        changed
    }

    /// Registers a listener for connectivity transitions.
    ///
    /// The listener stays registered until the returned subscription is
    /// dropped or unsubscribed.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            monitor: Some(Arc::clone(&self.inner)),
        }
    }

    /// Returns a receiver that observes every connectivity change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle for a listener registered with [`NetworkMonitor::on_change`].
pub struct Subscription {
    id: u64,
    monitor: Option<Arc<Inner>>,
}

impl Subscription {
    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keeps the listener registered for the lifetime of the monitor.
    pub fn detach(mut self) {
        self.monitor = None;
    }

    fn remove(&mut self) {
        if let Some(inner) = self.monitor.take() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
