//! Process-wide change-notification channel.
//!
//! One [`SubscriptionChannel`] holds a single event stream to the ledger,
//! filtered to the union of keys registered by all listeners. Listeners
//! come and go without affecting the connection's lifecycle.
//!
//! # Delivery guarantees
//!
//! - A listener is only called for keys it subscribed to.
//! - The same event is never delivered twice; events are deduplicated by
//!   [`EventCursor`](crate::ledger::EventCursor) across reconnects.
//! - Per-key delivery order follows the ledger's log order.
//!
//! Callbacks run on the channel's background task, outside its lock. They
//! must not block; the status cache only enqueues work from them.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use datemint_types::DateKey;
use futures::{FutureExt, StreamExt, future::BoxFuture};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::SubscriptionConfig,
    error::{Result, SdkError},
    ledger::{EventCursor, EventStream, Ledger, MintEvent},
    streaming::{CursorTracker, PhaseObserver, ReconnectingStream, StreamPhase},
};

/// Callback invoked with the key of each delivered mint event.
pub type ChangeCallback = Arc<dyn Fn(DateKey) + Send + Sync>;

/// Identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener:{}", self.0)
    }
}

/// Connection state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No keys are subscribed, so no stream is open.
    Idle,
    /// Opening the first stream.
    Connecting,
    /// Events are flowing.
    Connected,
    /// The stream dropped and is being re-established.
    Reconnecting,
    /// The reconnect budget is spent. Probing at a slower interval.
    Degraded,
    /// [`SubscriptionChannel::close`] was called.
    Closed,
}

impl ChannelState {
    /// Returns a short label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Listener {
    keys: BTreeSet<DateKey>,
    on_change: Option<ChangeCallback>,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<ListenerId, Listener>,
    /// Number of listeners per subscribed key.
    key_counts: BTreeMap<DateKey, usize>,
}

impl Registry {
    fn add_key(&mut self, key: DateKey) -> bool {
        let count = self.key_counts.entry(key).or_insert(0);
        *count += 1;
        *count == 1
    }

    fn remove_key(&mut self, key: DateKey) -> bool {
        match self.key_counts.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            },
            Some(_) => {
                self.key_counts.remove(&key);
                true
            },
            None => false,
        }
    }

    fn callbacks_for(&self, key: DateKey) -> Vec<ChangeCallback> {
        self.listeners
            .values()
            .filter(|l| l.keys.contains(&key))
            .filter_map(|l| l.on_change.clone())
            .collect()
    }
}

struct ChannelInner {
    ledger: Arc<dyn Ledger>,
    config: SubscriptionConfig,
    registry: Mutex<Registry>,
    state: watch::Sender<ChannelState>,
    filter_changed: Notify,
    cancel: CancellationToken,
    next_listener: AtomicU64,
}

impl ChannelInner {
    fn current_keys(&self) -> BTreeSet<DateKey> {
        self.registry.lock().key_counts.keys().copied().collect()
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "subscription channel state changed");
        }
    }

    fn dispatch(&self, event: &MintEvent) {
        let callbacks = self.registry.lock().callbacks_for(event.key);
        if callbacks.is_empty() {
            debug!(key = %event.key, cursor = %event.cursor, "ignoring event for unsubscribed key");
            return;
        }
        debug!(key = %event.key, cursor = %event.cursor, listeners = callbacks.len(), "delivering mint event");
        for callback in callbacks {
            callback(event.key);
        }
    }
}

/// Shared connection to the ledger's mint event stream.
///
/// Cloning is cheap; all clones share one connection and one listener
/// registry. The background task runs until [`close`](Self::close) is called.
#[derive(Clone)]
pub struct SubscriptionChannel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("state", &self.state())
            .field("subscribed_keys", &self.inner.registry.lock().key_counts.len())
            .finish()
    }
}

impl SubscriptionChannel {
    /// Creates the channel and spawns its background task.
    ///
    /// No stream is opened until the first key is subscribed. Must be
    /// called from within a Tokio runtime.
    pub fn connect(ledger: Arc<dyn Ledger>, config: SubscriptionConfig) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        let inner = Arc::new(ChannelInner {
            ledger,
            config,
            registry: Mutex::new(Registry::default()),
            state,
            filter_changed: Notify::new(),
            cancel: CancellationToken::new(),
            next_listener: AtomicU64::new(1),
        });
        tokio::spawn(run(Arc::clone(&inner)));
        Self { inner }
    }

    /// Registers a new listener with no keys.
    pub fn register(&self) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner
            .registry
            .lock()
            .listeners
            .insert(id, Listener { keys: BTreeSet::new(), on_change: None });
        id
    }

    /// Adds `keys` to the listener's filter and sets its callback.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Shutdown`] if the channel is closed, or
    /// [`SdkError::Config`] if the listener is not registered.
    pub fn subscribe(
        &self,
        listener: ListenerId,
        keys: impl IntoIterator<Item = DateKey>,
        on_change: ChangeCallback,
    ) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(SdkError::Shutdown);
        }
        let changed = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry.listeners.get_mut(&listener) else {
                return Err(SdkError::Config { message: format!("{listener} is not registered") });
            };
            entry.on_change = Some(on_change);
            let added: Vec<DateKey> = keys.into_iter().filter(|k| entry.keys.insert(*k)).collect();
            let mut changed = false;
            for key in added {
                changed |= registry.add_key(key);
            }
            changed
        };
        if changed {
            self.inner.filter_changed.notify_one();
        }
        Ok(())
    }

    /// Removes `keys` from the listener's filter.
    pub fn unsubscribe(&self, listener: ListenerId, keys: impl IntoIterator<Item = DateKey>) {
        let changed = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry.listeners.get_mut(&listener) else {
                return;
            };
            let removed: Vec<DateKey> =
                keys.into_iter().filter(|k| entry.keys.remove(k)).collect();
            let mut changed = false;
            for key in removed {
                changed |= registry.remove_key(key);
            }
            changed
        };
        if changed {
            self.inner.filter_changed.notify_one();
        }
    }

    /// Removes the listener and all of its keys.
    pub fn deregister(&self, listener: ListenerId) {
        let changed = {
            let mut registry = self.inner.registry.lock();
            let Some(entry) = registry.listeners.remove(&listener) else {
                return;
            };
            let mut changed = false;
            for key in entry.keys {
                changed |= registry.remove_key(key);
            }
            changed
        };
        if changed {
            self.inner.filter_changed.notify_one();
        }
    }

    /// Returns the union of keys subscribed by all listeners.
    #[must_use]
    pub fn subscribed_keys(&self) -> BTreeSet<DateKey> {
        self.inner.current_keys()
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// Returns a receiver that observes state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// Returns true if push notifications can currently be relied on.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Closes the stream and stops the background task.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.set_state(ChannelState::Closed);
    }
}

/// How a driven stream stopped.
enum Stop {
    Cancelled,
    FilterChanged,
    Exhausted(String),
}

type EventSource = ReconnectingStream<
    MintEvent,
    CursorTracker,
    Box<dyn FnMut(Option<EventCursor>) -> BoxFuture<'static, Result<EventStream>> + Send>,
    BoxFuture<'static, Result<EventStream>>,
>;

/// Opens one filtered event stream for the keys subscribed right now.
///
/// Without a resume cursor the stream starts at the ledger's current head,
/// which is recorded in `tracker` for later reconnects.
async fn open_stream(
    inner: Arc<ChannelInner>,
    tracker: CursorTracker,
    after: Option<EventCursor>,
) -> Result<EventStream> {
    let keys = inner.current_keys();
    let timeout = inner.config.connect_timeout;
    let ledger = Arc::clone(&inner.ledger);
    let open = async move {
        let after = match after {
            Some(cursor) => cursor,
            None => {
                let head = ledger.event_head().await?;
                tracker.advance_to(head);
                head
            },
        };
        debug!(keys = keys.len(), after = %after, "opening mint event stream");
        ledger.watch_mints(keys, after).await
    };
    tokio::time::timeout(timeout, open).await.map_err(|_| SdkError::Timeout {
        operation: "watch_mints",
        duration_ms: timeout.as_millis() as u64,
    })?
}

fn event_source(
    inner: &Arc<ChannelInner>,
    tracker: &CursorTracker,
    opened: Option<EventStream>,
) -> EventSource {
    let reconnect_inner = Arc::clone(inner);
    let reconnect_tracker = tracker.clone();
    let reconnect: Box<
        dyn FnMut(Option<EventCursor>) -> BoxFuture<'static, Result<EventStream>> + Send,
    > = Box::new(move |after| {
        open_stream(Arc::clone(&reconnect_inner), reconnect_tracker.clone(), after).boxed()
    });

    let observer_inner = Arc::clone(inner);
    let observer: PhaseObserver = Arc::new(move |phase: StreamPhase| match phase {
        StreamPhase::Connected => observer_inner.set_state(ChannelState::Connected),
        StreamPhase::Reconnecting { attempt } => {
            warn!(attempt, "mint event stream dropped");
            observer_inner.set_state(ChannelState::Reconnecting);
        },
        StreamPhase::Exhausted => {},
    });

    let policy = inner.config.reconnect.clone();
    let source = match opened {
        Some(stream) => EventSource::new(stream, tracker.clone(), policy, reconnect),
        None => EventSource::connecting(tracker.clone(), policy, reconnect),
    };
    source.with_observer(observer)
}

async fn drive(
    inner: &ChannelInner,
    source: &mut EventSource,
    delivered: &mut Option<EventCursor>,
) -> Stop {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => return Stop::Cancelled,
            () = inner.filter_changed.notified() => return Stop::FilterChanged,
            item = source.next() => match item {
                Some(Ok(event)) => {
                    if delivered.is_some_and(|last| event.cursor <= last) {
                        debug!(cursor = %event.cursor, "skipping already delivered event");
                        continue;
                    }
                    *delivered = Some(event.cursor);
                    inner.dispatch(&event);
                },
                Some(Err(err)) => return Stop::Exhausted(err.to_string()),
                None => return Stop::Exhausted("reconnect budget spent".to_owned()),
            },
        }
    }
}

/// Background task owning the event stream.
async fn run(inner: Arc<ChannelInner>) {
    let tracker = CursorTracker::new();
    let mut delivered: Option<EventCursor> = None;
    let mut opened: Option<EventStream> = None;

    while !inner.cancel.is_cancelled() {
        if opened.is_none() && inner.registry.lock().key_counts.is_empty() {
            inner.set_state(ChannelState::Idle);
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                () = inner.filter_changed.notified() => continue,
            }
        }

        if opened.is_none() && *inner.state.borrow() == ChannelState::Idle {
            inner.set_state(ChannelState::Connecting);
        }
        let mut source = event_source(&inner, &tracker, opened.take());
        match drive(&inner, &mut source, &mut delivered).await {
            Stop::Cancelled => break,
            Stop::FilterChanged => {
                debug!(
                    keys = inner.registry.lock().key_counts.len(),
                    "resubscribing with new filter"
                );
            },
            Stop::Exhausted(reason) => {
                warn!(reason = %reason, "mint event stream unavailable, falling back to re-fetch on access");
                inner.set_state(ChannelState::Degraded);
                drop(source);
                match probe(&inner, &tracker).await {
                    Probe::Connected(stream) => opened = Some(stream),
                    Probe::Idle => {},
                    Probe::Cancelled => break,
                }
            },
        }
    }

    inner.set_state(ChannelState::Closed);
}

enum Probe {
    Cancelled,
    Idle,
    Connected(EventStream),
}

/// Retries single connection attempts at the degraded probe interval.
async fn probe(inner: &Arc<ChannelInner>, tracker: &CursorTracker) -> Probe {
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => return Probe::Cancelled,
            () = tokio::time::sleep(inner.config.degraded_probe_interval) => {},
        }
        if inner.registry.lock().key_counts.is_empty() {
            return Probe::Idle;
        }
        match open_stream(Arc::clone(inner), tracker.clone(), tracker.last()).await {
            Ok(stream) => {
                info!("degraded probe reconnected");
                inner.set_state(ChannelState::Connected);
                return Probe::Connected(stream);
            },
            Err(err) => debug!(error = %err, "degraded probe failed"),
        }
    }
}
