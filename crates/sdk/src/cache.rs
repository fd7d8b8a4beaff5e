//! The status cache.
//!
//! [`StatusCache`] holds the availability of the dates a screen is showing.
//! It fetches on demand, coalesces concurrent and near-simultaneous reads
//! into one batched round trip, and keeps entries current through three
//! invalidation paths: this client's own confirmed mints, pushed mint
//! events from the [`SubscriptionChannel`], and signals on the
//! [`LocalSignalBus`].
//!
//! # Interest
//!
//! Only keys in the *interest set* (the visible range plus the selected
//! key) are cached. Keys leaving the interest set are evicted together
//! with their push and signal subscriptions. Results that land for an
//! evicted key are discarded.
//!
//! # Ordering
//!
//! Every read is stamped with a version when it is issued. A result is
//! applied only if its version is not older than the entry's, so a slow
//! read can never overwrite a newer one. A locally confirmed mint raises a
//! floor for its key: no later read can make that key look available again
//! in this session.
//!
//! # Freshness
//!
//! A `Fresh` entry is served without a read while it is younger than
//! [`CacheConfig::freshness`] *and* the subscription channel is connected.
//! While the channel is down, every access re-reads.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    sync::{Arc, Weak},
    time::Instant,
};

use datemint_types::{Address, DateKey, Wei, month_keys};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::{CacheConfig, SubscriptionConfig},
    entry::{EntryState, StatusEntry},
    error::{FaultKind, Result, SdkError},
    ledger::{AdmissionState, Ledger},
    metrics::{CacheMetrics, InvalidationSource, default_metrics},
    reader::RemoteReader,
    signal::{LocalSignalBus, SignalSubscription},
    subscription::{ChangeCallback, ListenerId, SubscriptionChannel},
    writer::{MintOutcome, RemoteWriter},
};

type Fetched = Result<(bool, Option<Address>)>;

#[derive(Debug, Clone, Copy)]
struct Invalidation {
    key: DateKey,
    source: InvalidationSource,
}

/// Keys waiting for the batch window to close.
struct PendingBatch {
    id: u64,
    keys: BTreeSet<DateKey>,
    done: watch::Sender<bool>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<DateKey, StatusEntry>,
    visible: BTreeSet<DateKey>,
    selected: Option<DateKey>,
    signals: HashMap<DateKey, SignalSubscription>,
    pending: Option<PendingBatch>,
    /// Keys with an issued read, by batch id.
    inflight: HashMap<DateKey, (u64, watch::Receiver<bool>)>,
    /// Keys this client has minted, with the minter. Never read back as
    /// available.
    confirmed: HashMap<DateKey, Address>,
    /// Keys a `get_range` call is still waiting on, with the caller count.
    held: HashMap<DateKey, usize>,
    version: u64,
    next_batch: u64,
}

impl CacheState {
    fn is_interesting(&self, key: DateKey) -> bool {
        self.visible.contains(&key) || self.selected == Some(key)
    }

    fn interest(&self) -> BTreeSet<DateKey> {
        let mut keys = self.visible.clone();
        keys.extend(self.selected);
        keys
    }

    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

struct CacheInner {
    reader: RemoteReader,
    writer: RemoteWriter,
    channel: SubscriptionChannel,
    owns_channel: bool,
    bus: LocalSignalBus,
    config: CacheConfig,
    metrics: Arc<dyn CacheMetrics>,
    listener: ListenerId,
    on_push: ChangeCallback,
    invalidations: mpsc::UnboundedSender<Invalidation>,
    shutdown: CancellationToken,
    state: Mutex<CacheState>,
}

/// Client-side cache of date availability.
///
/// Cloning is cheap; clones share one cache.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use datemint_sdk::{StatusCache, mock::MockLedger};
/// # async fn example() -> datemint_sdk::Result<()> {
/// let ledger = Arc::new(MockLedger::new());
/// let cache = StatusCache::builder().ledger(ledger).build()?;
///
/// let keys = cache.show_month(2025, 2)?;
/// for entry in cache.get_range(&keys).await? {
///     println!("{}: {:?}", entry.key, entry.availability());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StatusCache")
            .field("entries", &state.entries.len())
            .field("visible", &state.visible.len())
            .field("selected", &state.selected)
            .field("channel", &self.inner.channel.state())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl StatusCache {
    /// Creates a cache over `ledger` and starts its invalidation task.
    ///
    /// Without an explicit `channel`, the cache opens its own subscription
    /// channel with the `subscription` settings and closes it on shutdown.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Config`] if either configuration is invalid.
    #[builder]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        #[builder(default)] config: CacheConfig,
        #[builder(default)] subscription: SubscriptionConfig,
        channel: Option<SubscriptionChannel>,
        bus: Option<LocalSignalBus>,
        metrics: Option<Arc<dyn CacheMetrics>>,
    ) -> Result<Self> {
        config.validate()?;
        subscription.validate()?;

        let metrics = metrics.unwrap_or_else(default_metrics);
        let owns_channel = channel.is_none();
        let channel = channel
            .unwrap_or_else(|| SubscriptionChannel::connect(Arc::clone(&ledger), subscription));
        let listener = channel.register();

        let (tx, rx) = mpsc::unbounded_channel();
        let push_tx = tx.clone();
        let on_push: ChangeCallback = Arc::new(move |key: DateKey| {
            let _ = push_tx.send(Invalidation { key, source: InvalidationSource::Push });
        });

        let inner = Arc::new(CacheInner {
            reader: RemoteReader::new(Arc::clone(&ledger), config.clone(), Arc::clone(&metrics)),
            writer: RemoteWriter::new(
                ledger,
                config.request_timeout,
                config.mutation_timeout,
                Arc::clone(&metrics),
            ),
            channel,
            owns_channel,
            bus: bus.unwrap_or_default(),
            config,
            metrics,
            listener,
            on_push,
            invalidations: tx,
            shutdown: CancellationToken::new(),
            state: Mutex::new(CacheState::default()),
        });
        tokio::spawn(run_invalidations(Arc::downgrade(&inner), rx, inner.shutdown.clone()));
        Ok(Self { inner })
    }
}

impl StatusCache {
    /// Returns entries for `keys`, in the order given.
    ///
    /// `keys` become the visible range. Keys an earlier `get_range` call is
    /// still waiting on stay visible until that call returns; everything
    /// else leaves the range and is evicted. Views that show more keys than
    /// they read should set the range with [`show_range`](Self::show_range)
    /// or [`show_month`](Self::show_month) instead.
    ///
    /// Fresh entries are served as they are; the rest are read, joining any
    /// read already pending or in flight for the same key. A key whose read
    /// fails comes back in the `Fault` state; the call itself only fails
    /// after shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub async fn get_range(&self, keys: &[DateKey]) -> Result<Vec<StatusEntry>> {
        self.ensure_running()?;
        let (waits, hold) = {
            let mut state = self.inner.state.lock();
            let mut visible: BTreeSet<DateKey> =
                state.visible.iter().copied().filter(|key| state.held.contains_key(key)).collect();
            visible.extend(keys.iter().copied());
            let selected = state.selected;
            self.inner.set_interest(&mut state, visible, selected);
            let hold = RangeHold::new(&self.inner, &mut state, keys);
            (self.inner.plan_reads(&mut state, keys), hold)
        };
        wait_all(waits).await;
        let entries = self.inner.snapshot(keys);
        drop(hold);
        Ok(entries)
    }

    /// Returns the entry for one key.
    ///
    /// A key outside the visible range becomes the selected key.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Shutdown`] after [`shutdown`](Self::shutdown).
    pub async fn get_one(&self, key: DateKey) -> Result<StatusEntry> {
        self.ensure_running()?;
        let waits = {
            let mut state = self.inner.state.lock();
            if !state.visible.contains(&key) {
                let visible = state.visible.clone();
                self.inner.set_interest(&mut state, visible, Some(key));
            }
            self.inner.plan_reads(&mut state, &[key])
        };
        wait_all(waits).await;
        let mut entries = self.inner.snapshot(&[key]);
        Ok(entries.pop().unwrap_or_else(|| StatusEntry::unknown(key)))
    }

    /// Replaces the visible range. Keys leaving it are evicted.
    pub fn show_range(&self, keys: impl IntoIterator<Item = DateKey>) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.inner.state.lock();
        let selected = state.selected;
        self.inner.set_interest(&mut state, keys.into_iter().collect(), selected);
    }

    /// Makes one calendar month the visible range and returns its keys.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Codec`] if the month is invalid or outside the
    /// encodable range.
    pub fn show_month(&self, year: i32, month: u32) -> Result<Vec<DateKey>> {
        let keys = month_keys(year, month)?;
        self.show_range(keys.iter().copied());
        Ok(keys)
    }

    /// Sets or clears the selected key.
    pub fn select(&self, key: Option<DateKey>) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.inner.state.lock();
        let visible = state.visible.clone();
        self.inner.set_interest(&mut state, visible, key);
    }

    /// Returns the current interest set.
    #[must_use]
    pub fn interest(&self) -> BTreeSet<DateKey> {
        self.inner.state.lock().interest()
    }

    /// Returns the cached entry for `key` without reading.
    #[must_use]
    pub fn entry(&self, key: DateKey) -> Option<StatusEntry> {
        self.inner.state.lock().entries.get(&key).cloned()
    }

    /// Returns true if the cache holds `key` as taken by `actor`.
    #[must_use]
    pub fn is_owned_by(&self, key: DateKey, actor: &Address) -> bool {
        self.inner.state.lock().entries.get(&key).is_some_and(|e| e.is_owned_by(actor))
    }

    /// Mints `key` for `actor`.
    ///
    /// On confirmation the entry flips to taken immediately, local signal
    /// subscribers are notified, and a confirming read is scheduled. A
    /// rejection leaves the cache unchanged and carries the ledger's reason
    /// verbatim. If no outcome arrives within
    /// [`CacheConfig::mutation_timeout`] the result is `Faulted`; the
    /// submission keeps running and is applied if it later confirms.
    pub async fn mutate(&self, key: DateKey, actor: &Address, payment: Wei) -> MintOutcome {
        if self.inner.shutdown.is_cancelled() {
            return MintOutcome::Faulted { reason: SdkError::Shutdown.to_string() };
        }
        let inner = Arc::clone(&self.inner);
        let actor = *actor;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = inner.writer.mint(key, actor, payment).await;
            if outcome.is_confirmed() {
                inner.confirm_local_mint(key, actor);
            }
            let _ = tx.send(outcome);
        });

        let timeout = self.inner.config.mutation_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => MintOutcome::Faulted { reason: "mint task ended without an outcome".to_owned() },
            Err(_) => MintOutcome::Faulted {
                reason: format!("no outcome after {timeout:?}; the submission may still complete"),
            },
        }
    }

    /// Reads the current mint preconditions. Never cached.
    ///
    /// # Errors
    ///
    /// Returns a remote fault or timeout from the underlying reads.
    pub async fn admission(&self) -> Result<AdmissionState> {
        self.ensure_running()?;
        self.inner.reader.read_admission().await
    }

    /// Subscription channel feeding this cache.
    #[must_use]
    pub fn channel(&self) -> &SubscriptionChannel {
        &self.inner.channel
    }

    /// Local signal bus this cache publishes to and listens on.
    #[must_use]
    pub fn signal_bus(&self) -> &LocalSignalBus {
        &self.inner.bus
    }

    /// Stops background work and drops every subscription.
    ///
    /// Later reads return [`SdkError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!("shutting down status cache");
        self.inner.release();
        let mut state = self.inner.state.lock();
        state.signals.clear();
        state.entries.clear();
        state.visible.clear();
        state.selected = None;
        state.held.clear();
        if let Some(batch) = state.pending.take() {
            batch.done.send_replace(true);
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() { Err(SdkError::Shutdown) } else { Ok(()) }
    }
}

impl CacheInner {
    /// Applies a new interest set, subscribing added keys and evicting
    /// removed ones. Called with the state lock held.
    fn set_interest(&self, state: &mut CacheState, visible: BTreeSet<DateKey>, selected: Option<DateKey>) {
        let before = state.interest();
        state.visible = visible;
        state.selected = selected;
        let after = state.interest();

        let added: Vec<DateKey> = after.difference(&before).copied().collect();
        let removed: Vec<DateKey> = before.difference(&after).copied().collect();
        if added.is_empty() && removed.is_empty() {
            return;
        }

        for key in &removed {
            state.entries.remove(key);
            state.signals.remove(key);
        }
        for key in &added {
            let mut entry = StatusEntry::unknown(*key);
            if let Some(minter) = state.confirmed.get(key) {
                entry.minted = true;
                entry.owner = Some(*minter);
            }
            state.entries.insert(*key, entry);
            let tx = self.invalidations.clone();
            let signal = self.bus.subscribe(
                *key,
                Arc::new(move |key: DateKey| {
                    let _ = tx.send(Invalidation { key, source: InvalidationSource::Signal });
                }),
            );
            state.signals.insert(*key, signal);
        }

        if !removed.is_empty() {
            self.channel.unsubscribe(self.listener, removed.iter().copied());
        }
        if !added.is_empty()
            && let Err(err) =
                self.channel.subscribe(self.listener, added.iter().copied(), Arc::clone(&self.on_push))
        {
            warn!(error = %err, keys = added.len(), "push subscription unavailable");
        }
        debug!(added = added.len(), removed = removed.len(), interest = after.len(), "interest changed");
    }

    /// Decides which of `keys` need a read and returns what to wait on.
    fn plan_reads(self: &Arc<Self>, state: &mut CacheState, keys: &[DateKey]) -> Vec<watch::Receiver<bool>> {
        let now = Instant::now();
        let live = self.channel.is_live();
        let mut seen_keys = HashSet::new();
        let mut seen_batches = HashSet::new();
        let mut waits = Vec::new();

        for &key in keys {
            if !seen_keys.insert(key) {
                continue;
            }
            let hit = live
                && state.entries.get(&key).is_some_and(|e| e.is_fresh_within(self.config.freshness, now));
            self.metrics.record_lookup(hit);
            if hit {
                continue;
            }

            let joined = match (&state.pending, state.inflight.get(&key)) {
                (Some(batch), _) if batch.keys.contains(&key) => Some((batch.id, batch.done.subscribe())),
                (_, Some((id, done))) => Some((*id, done.clone())),
                _ => None,
            };
            let (id, done) = match joined {
                Some(joined) => joined,
                None => self.enqueue(state, key),
            };
            if seen_batches.insert(id) {
                waits.push(done);
            }
        }
        waits
    }

    /// Adds `key` to the pending batch, opening one if needed.
    fn enqueue(self: &Arc<Self>, state: &mut CacheState, key: DateKey) -> (u64, watch::Receiver<bool>) {
        match &mut state.pending {
            Some(batch) => {
                batch.keys.insert(key);
                (batch.id, batch.done.subscribe())
            },
            None => {
                state.next_batch += 1;
                let id = state.next_batch;
                let (done, rx) = watch::channel(false);
                state.pending = Some(PendingBatch { id, keys: BTreeSet::from([key]), done });
                tokio::spawn(flush(Arc::clone(self), id));
                (id, rx)
            },
        }
    }

    fn invalidate(self: &Arc<Self>, batch: &[Invalidation]) {
        let mut state = self.state.lock();
        for inv in batch {
            if !state.is_interesting(inv.key) {
                debug!(key = %inv.key, source = %inv.source, "ignoring invalidation outside interest");
                continue;
            }
            self.metrics.record_invalidation(inv.source);
            if let Some(entry) = state.entries.get_mut(&inv.key)
                && entry.state == EntryState::Fresh
            {
                entry.state = EntryState::Stale;
            }
            debug!(key = %inv.key, source = %inv.source, "entry invalidated");
            self.enqueue(&mut state, inv.key);
        }
    }

    /// Reads `keys` and returns one result per key.
    async fn fetch(&self, keys: &[DateKey]) -> Vec<(DateKey, Fetched)> {
        if let [key] = keys {
            let result = self.reader.read_one(*key).await.map(|e| (e.minted, e.owner));
            return vec![(*key, result)];
        }

        let chunks: Vec<&[DateKey]> = keys.chunks(self.config.max_batch_keys).collect();
        let reads = join_all(chunks.iter().map(|chunk| self.reader.read_many(chunk))).await;

        let mut statuses: Vec<(DateKey, Result<bool>)> = Vec::with_capacity(keys.len());
        for (chunk, read) in chunks.into_iter().zip(reads) {
            match read {
                Ok(answers) => statuses.extend(answers),
                Err(err) => statuses.extend(chunk.iter().map(|k| (*k, Err(err.clone())))),
            }
        }

        let taken: Vec<DateKey> = statuses
            .iter()
            .filter(|(_, status)| matches!(status, Ok(true)))
            .map(|(key, _)| *key)
            .collect();
        let mut owners: HashMap<DateKey, Address> = HashMap::new();
        if self.config.resolve_owners && !taken.is_empty() {
            let lookups = join_all(taken.iter().map(|key| self.reader.read_owner(*key))).await;
            owners.extend(taken.into_iter().zip(lookups).filter_map(|(k, r)| r.ok().map(|a| (k, a))));
        }

        statuses
            .into_iter()
            .map(|(key, status)| (key, status.map(|minted| (minted, owners.get(&key).copied()))))
            .collect()
    }

    /// Applies one read result issued at `version`. Called with the state
    /// lock held.
    fn apply(&self, state: &mut CacheState, key: DateKey, version: u64, result: Fetched) {
        if !state.is_interesting(key) {
            debug!(key = %key, "discarding read for evicted key");
            return;
        }
        let floor = state.confirmed.get(&key).copied();
        let Some(entry) = state.entries.get_mut(&key) else {
            return;
        };
        if version < entry.version {
            debug!(key = %key, version, current = entry.version, "discarding out-of-order read");
            return;
        }
        entry.version = version;
        match result {
            Ok((minted, owner)) => {
                if floor.is_some() && !minted {
                    debug!(key = %key, "read lags a confirmed local mint");
                }
                entry.minted = minted || floor.is_some();
                if owner.is_some() {
                    entry.owner = owner;
                } else if entry.owner.is_none() {
                    entry.owner = floor;
                }
                entry.state = EntryState::Fresh;
                entry.refreshed_at = Some(Instant::now());
            },
            Err(err) => {
                warn!(key = %key, error = %err, "status read faulted");
                if let Some(minter) = floor {
                    entry.minted = true;
                    entry.owner.get_or_insert(minter);
                }
                entry.state = EntryState::Fault {
                    kind: err.fault_kind().unwrap_or(FaultKind::Internal),
                    reason: err.to_string(),
                };
            },
        }
    }

    fn confirm_local_mint(&self, key: DateKey, actor: Address) {
        {
            let mut state = self.state.lock();
            state.confirmed.insert(key, actor);
            let version = state.next_version();
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.minted = true;
                entry.owner = Some(actor);
                entry.version = version;
                entry.state = EntryState::Fresh;
                entry.refreshed_at = Some(Instant::now());
            }
        }
        self.bus.publish(key);
        let _ = self.invalidations.send(Invalidation { key, source: InvalidationSource::LocalMutation });
    }

    fn snapshot(&self, keys: &[DateKey]) -> Vec<StatusEntry> {
        let state = self.state.lock();
        keys.iter()
            .map(|key| state.entries.get(key).cloned().unwrap_or_else(|| StatusEntry::unknown(*key)))
            .collect()
    }

    fn release(&self) {
        self.shutdown.cancel();
        self.channel.deregister(self.listener);
        if self.owns_channel {
            self.channel.close();
        }
    }
}

/// Keeps a `get_range` call's keys visible while it waits.
struct RangeHold<'a> {
    inner: &'a CacheInner,
    keys: Vec<DateKey>,
}

impl<'a> RangeHold<'a> {
    fn new(inner: &'a CacheInner, state: &mut CacheState, keys: &[DateKey]) -> Self {
        for key in keys {
            *state.held.entry(*key).or_default() += 1;
        }
        Self { inner, keys: keys.to_vec() }
    }
}

impl Drop for RangeHold<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        for key in &self.keys {
            if let Some(count) = state.held.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    state.held.remove(key);
                }
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Waits out the batch window, then issues the batch's read.
async fn flush(inner: Arc<CacheInner>, id: u64) {
    if inner.config.batch_window.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(inner.config.batch_window).await;
    }

    let (keys, version, done) = {
        let mut state = inner.state.lock();
        let Some(batch) = state.pending.take_if(|b| b.id == id) else {
            return;
        };
        let keys: Vec<DateKey> = batch.keys.into_iter().filter(|k| state.is_interesting(*k)).collect();
        let version = state.next_version();
        for key in &keys {
            if let Some(entry) = state.entries.get_mut(key) {
                entry.state = EntryState::Fetching;
            }
            state.inflight.insert(*key, (id, batch.done.subscribe()));
        }
        (keys, version, batch.done)
    };

    if !keys.is_empty() && !inner.shutdown.is_cancelled() {
        debug!(batch = id, version, keys = keys.len(), "issuing status read");
        let results = inner.fetch(&keys).await;
        let mut state = inner.state.lock();
        for (key, result) in results {
            inner.apply(&mut state, key, version, result);
        }
        state.inflight.retain(|_, (batch, _)| *batch != id);
    }
    done.send_replace(true);
}

/// Turns pushed and signalled changes into re-reads.
///
/// Changes that arrive together are drained into one pass so they share a
/// batch.
async fn run_invalidations(
    inner: Weak<CacheInner>,
    mut rx: mpsc::UnboundedReceiver<Invalidation>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = rx.recv() => next,
        };
        let Some(first) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mut batch = vec![first];
        while let Ok(more) = rx.try_recv() {
            batch.push(more);
        }
        inner.invalidate(&batch);
    }
    debug!("invalidation task stopped");
}

async fn wait_all(waits: Vec<watch::Receiver<bool>>) {
    join_all(waits.into_iter().map(|mut done| async move {
        // A dropped sender means the batch was abandoned; the snapshot shows
        // whatever state it left.
        let _ = done.wait_for(|finished| *finished).await;
    }))
    .await;
}
