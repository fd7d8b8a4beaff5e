//! In-process "key changed" signal bus.
//!
//! A local mutation publishes the key it changed; every component showing
//! that key re-derives its view from the cache. Signals carry no payload,
//! so a receiver can never act on a value that differs from the cache.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use datemint_types::DateKey;
use tracing::trace;

/// Callback invoked with the published key.
pub type SignalCallback = Arc<dyn Fn(DateKey) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: DashMap<DateKey, HashMap<u64, SignalCallback>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove(&self, key: DateKey, id: u64) {
        let now_empty = match self.subscribers.get_mut(&key) {
            Some(mut callbacks) => {
                callbacks.remove(&id);
                callbacks.is_empty()
            },
            None => false,
        };
        if now_empty {
            self.subscribers.remove_if(&key, |_, callbacks| callbacks.is_empty());
        }
    }
}

/// Explicit publish/subscribe bus for local key-changed signals.
///
/// Cloning is cheap; clones share subscribers.
#[derive(Clone, Default)]
pub struct LocalSignalBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for LocalSignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSignalBus").field("keys", &self.inner.subscribers.len()).finish()
    }
}

impl LocalSignalBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifies every subscriber of `key`. Fire-and-forget.
    ///
    /// Callbacks run on the caller's thread after the bus lock is released.
    pub fn publish(&self, key: DateKey) {
        let callbacks: Vec<SignalCallback> = match self.inner.subscribers.get(&key) {
            Some(entry) => entry.values().cloned().collect(),
            None => return,
        };
        trace!(key = %key, subscribers = callbacks.len(), "publishing local signal");
        for callback in callbacks {
            callback(key);
        }
    }

    /// Subscribes `callback` to signals for `key`.
    ///
    /// The subscription lasts until the returned handle is dropped or
    /// [`SignalSubscription::unsubscribe`] is called.
    #[must_use = "dropping the handle unsubscribes immediately"]
    pub fn subscribe(&self, key: DateKey, callback: SignalCallback) -> SignalSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.entry(key).or_default().insert(id, callback);
        SignalSubscription { bus: Arc::clone(&self.inner), key, id, active: true }
    }

    /// Number of live subscriptions for `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: DateKey) -> usize {
        self.inner.subscribers.get(&key).map_or(0, |entry| entry.len())
    }
}

/// Owned handle for one [`LocalSignalBus`] subscription.
pub struct SignalSubscription {
    bus: Arc<BusInner>,
    key: DateKey,
    id: u64,
    active: bool,
}

impl SignalSubscription {
    /// Key this subscription listens to.
    #[must_use]
    pub fn key(&self) -> DateKey {
        self.key
    }

    /// Ends the subscription.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.active) {
            self.bus.remove(self.key, self.id);
        }
    }
}

impl fmt::Debug for SignalSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalSubscription").field("key", &self.key).field("id", &self.id).finish()
    }
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
