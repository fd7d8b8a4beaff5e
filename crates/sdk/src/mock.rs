//! In-process mock ledger for SDK testing.
//!
//! This module provides a controllable implementation of the [`Ledger`]
//! trait for testing the SDK without a real chain.
//!
//! # Features
//!
//! - **Mint rules**: Enforces key availability, the mint window, the
//!   operator switches and the mint price
//! - **Event log**: Every mint appends a [`MintEvent`] and is pushed to
//!   matching watchers; new watchers replay from their cursor
//! - **Failure injection**: Unavailable errors, per-key faults, read and
//!   receipt delays, dropped and refused watch streams
//! - **Request counting**: Track calls per method for verification
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use datemint_sdk::{StatusCache, mock::MockLedger};
//! use datemint_types::{Address, DateKey};
//!
//! # async fn example() -> datemint_sdk::Result<()> {
//! let ledger = Arc::new(MockLedger::new());
//! let key = DateKey::from_ymd(2025, 1, 1)?;
//! ledger.mint_externally(key, Address::new([1; 20]))?;
//!
//! let cache = StatusCache::builder().ledger(ledger.clone()).build()?;
//! let entries = cache.get_range(&[key]).await?;
//! assert!(entries[0].minted);
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use datemint_types::{Address, DateKey, TxHash, Wei};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    error::{FaultKind, Result, SdkError},
    ledger::{EventCursor, EventStream, Ledger, MintEvent, MintReceipt, StatusQuery},
};

/// Start of 2000-01-01 in unix seconds.
const DEFAULT_WINDOW_START: u64 = 946_684_800;

/// Start of 2100-01-01 in unix seconds.
const DEFAULT_WINDOW_END: u64 = 4_102_444_800;

#[derive(Debug)]
struct Watcher {
    keys: BTreeSet<DateKey>,
    tx: mpsc::UnboundedSender<Result<MintEvent>>,
}

#[derive(Debug, Clone, Copy)]
struct PendingMint {
    key: DateKey,
    from: Address,
    payment: Wei,
}

/// Shared state for the mock ledger.
#[derive(Debug)]
struct MockState {
    /// Key -> holder
    minted: RwLock<BTreeMap<DateKey, Address>>,

    /// Append-only mint event log
    events: RwLock<Vec<MintEvent>>,

    /// Open event streams
    watchers: Mutex<Vec<Watcher>>,

    /// Submitted mints awaiting their receipt
    pending: Mutex<HashMap<TxHash, PendingMint>>,

    price: RwLock<Wei>,
    window: RwLock<(u64, u64)>,
    minting_enabled: AtomicBool,
    emergency_stopped: AtomicBool,

    next_tx: AtomicU64,

    /// Keys whose status reads fail
    faulted_keys: RwLock<HashSet<DateKey>>,

    /// Number of unavailable errors to inject for the next calls
    unavailable_count: AtomicUsize,

    /// Number of watch requests to refuse
    refuse_watch_count: AtomicUsize,

    /// Delay applied to read responses (milliseconds)
    read_delay_ms: AtomicU64,

    /// Delay applied before a receipt is produced (milliseconds)
    receipt_delay_ms: AtomicU64,

    read_status_count: AtomicUsize,
    multicall_count: AtomicUsize,
    owner_count: AtomicUsize,
    submit_count: AtomicUsize,
    watch_count: AtomicUsize,
    watch_key_sets: Mutex<Vec<BTreeSet<DateKey>>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            minted: RwLock::default(),
            events: RwLock::default(),
            watchers: Mutex::default(),
            pending: Mutex::default(),
            price: RwLock::new(Wei::from_milli_ether(10)),
            window: RwLock::new((DEFAULT_WINDOW_START, DEFAULT_WINDOW_END)),
            minting_enabled: AtomicBool::new(true),
            emergency_stopped: AtomicBool::new(false),
            next_tx: AtomicU64::new(1),
            faulted_keys: RwLock::default(),
            unavailable_count: AtomicUsize::new(0),
            refuse_watch_count: AtomicUsize::new(0),
            read_delay_ms: AtomicU64::new(0),
            receipt_delay_ms: AtomicU64::new(0),
            read_status_count: AtomicUsize::new(0),
            multicall_count: AtomicUsize::new(0),
            owner_count: AtomicUsize::new(0),
            submit_count: AtomicUsize::new(0),
            watch_count: AtomicUsize::new(0),
            watch_key_sets: Mutex::default(),
        }
    }
}

/// Decrements `counter` if positive. Returns true if it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

impl MockState {
    fn check_injection(&self) -> Result<()> {
        if take_one(&self.unavailable_count) {
            return Err(SdkError::remote(FaultKind::Unavailable, "injected error"));
        }
        Ok(())
    }

    async fn read_delay(&self) {
        let delay_ms = self.read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    fn status(&self, query: StatusQuery) -> Result<bool> {
        let key = query.key();
        if self.faulted_keys.read().contains(&key) {
            return Err(SdkError::remote(FaultKind::Internal, format!("status read for {key} failed")));
        }
        let taken = self.minted.read().contains_key(&key);
        Ok(match query {
            StatusQuery::IsKeyMintable(_) => !taken,
            StatusQuery::IsKeyMinted(_) => taken,
        })
    }

    /// Records a mint and pushes its event. Fails if the key is taken.
    fn record_mint(&self, key: DateKey, owner: Address) -> Result<EventCursor> {
        let mut events = self.events.write();
        {
            let mut minted = self.minted.write();
            if minted.contains_key(&key) {
                return Err(SdkError::remote(FaultKind::Reverted, "already minted"));
            }
            minted.insert(key, owner);
        }
        let block = events.last().map_or(1, |e| e.cursor.block + 1);
        let event = MintEvent { key, minter: owner, cursor: EventCursor::new(block, 0) };
        events.push(event.clone());

        let mut watchers = self.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        for watcher in watchers.iter().filter(|w| w.keys.contains(&key)) {
            let _ = watcher.tx.send(Ok(event.clone()));
        }
        Ok(event.cursor)
    }

    /// Checks every mint rule, returning the revert reason of the first
    /// one that fails.
    fn admission_failure(&self, mint: &PendingMint) -> Option<String> {
        if self.emergency_stopped.load(Ordering::SeqCst) {
            return Some("emergency stop engaged".to_owned());
        }
        if !self.minting_enabled.load(Ordering::SeqCst) {
            return Some("minting is disabled".to_owned());
        }
        let (start, end) = *self.window.read();
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        if now < start || now > end {
            return Some("outside mint window".to_owned());
        }
        if self.minted.read().contains_key(&mint.key) {
            return Some("already minted".to_owned());
        }
        if mint.payment < *self.price.read() {
            return Some("insufficient payment".to_owned());
        }
        None
    }
}

/// Controllable in-process [`Ledger`].
#[derive(Debug, Default)]
pub struct MockLedger {
    state: MockState,
}

impl MockLedger {
    /// Creates a ledger with no mints, an open window, minting enabled and
    /// a price of 0.01 ether.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints `key` for `owner` as another client would, bypassing the mint
    /// rules, and pushes the event.
    ///
    /// # Errors
    ///
    /// Returns a `Reverted` fault if the key is already taken.
    pub fn mint_externally(&self, key: DateKey, owner: Address) -> Result<EventCursor> {
        self.state.record_mint(key, owner)
    }

    /// Returns the holder of `key`, if any.
    pub fn owner(&self, key: DateKey) -> Option<Address> {
        self.state.minted.read().get(&key).copied()
    }

    /// Sets the mint price.
    pub fn set_price(&self, price: Wei) {
        *self.state.price.write() = price;
    }

    /// Sets the mint window in unix seconds.
    pub fn set_mint_window(&self, start: u64, end: u64) {
        *self.state.window.write() = (start, end);
    }

    /// Enables or disables minting.
    pub fn set_minting_enabled(&self, enabled: bool) {
        self.state.minting_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Engages or releases the emergency stop.
    pub fn set_emergency_stopped(&self, stopped: bool) {
        self.state.emergency_stopped.store(stopped, Ordering::SeqCst);
    }

    /// Makes every status read of `key` fail.
    pub fn fault_key(&self, key: DateKey) {
        self.state.faulted_keys.write().insert(key);
    }

    /// Clears a fault set by [`fault_key`](Self::fault_key).
    pub fn heal_key(&self, key: DateKey) {
        self.state.faulted_keys.write().remove(&key);
    }

    /// Injects unavailable errors for the next `count` calls.
    pub fn inject_unavailable(&self, count: usize) {
        self.state.unavailable_count.store(count, Ordering::SeqCst);
    }

    /// Delays every read response. The answer reflects the state at the
    /// time the read arrived, not when it returns.
    pub fn inject_read_delay(&self, delay: Duration) {
        self.state.read_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delays every receipt.
    pub fn inject_receipt_delay(&self, delay: Duration) {
        self.state.receipt_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Refuses the next `count` watch requests.
    pub fn refuse_watches(&self, count: usize) {
        self.state.refuse_watch_count.store(count, Ordering::SeqCst);
    }

    /// Ends every open event stream, as a dropped connection would.
    pub fn disconnect_watchers(&self) {
        self.state.watchers.lock().clear();
    }

    /// Number of open event streams.
    pub fn watcher_count(&self) -> usize {
        let mut watchers = self.state.watchers.lock();
        watchers.retain(|w| !w.tx.is_closed());
        watchers.len()
    }

    /// Single-key status reads received.
    pub fn read_status_count(&self) -> usize {
        self.state.read_status_count.load(Ordering::SeqCst)
    }

    /// Multicall round trips received.
    pub fn multicall_count(&self) -> usize {
        self.state.multicall_count.load(Ordering::SeqCst)
    }

    /// Status round trips of either kind.
    pub fn status_read_count(&self) -> usize {
        self.read_status_count() + self.multicall_count()
    }

    /// Owner lookups received.
    pub fn owner_count(&self) -> usize {
        self.state.owner_count.load(Ordering::SeqCst)
    }

    /// Mint submissions received.
    pub fn submit_count(&self) -> usize {
        self.state.submit_count.load(Ordering::SeqCst)
    }

    /// Watch requests received, including refused ones.
    pub fn watch_count(&self) -> usize {
        self.state.watch_count.load(Ordering::SeqCst)
    }

    /// Key filters of every accepted watch request, in order.
    pub fn watch_key_sets(&self) -> Vec<BTreeSet<DateKey>> {
        self.state.watch_key_sets.lock().clone()
    }

    /// Resets call counters and injected failures. Ledger contents are kept.
    pub fn reset(&self) {
        for counter in [
            &self.state.read_status_count,
            &self.state.multicall_count,
            &self.state.owner_count,
            &self.state.submit_count,
            &self.state.watch_count,
            &self.state.unavailable_count,
            &self.state.refuse_watch_count,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.state.read_delay_ms.store(0, Ordering::SeqCst);
        self.state.receipt_delay_ms.store(0, Ordering::SeqCst);
        self.state.faulted_keys.write().clear();
        self.state.watch_key_sets.lock().clear();
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn read_status(&self, query: StatusQuery) -> Result<bool> {
        self.state.read_status_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_injection()?;
        let answer = self.state.status(query);
        self.state.read_delay().await;
        answer
    }

    async fn multicall(&self, queries: Vec<StatusQuery>) -> Result<Vec<Result<bool>>> {
        self.state.multicall_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_injection()?;
        let answers = queries.into_iter().map(|q| self.state.status(q)).collect();
        self.state.read_delay().await;
        Ok(answers)
    }

    async fn owner_of(&self, key: DateKey) -> Result<Address> {
        self.state.owner_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_injection()?;
        let owner = self
            .owner(key)
            .ok_or_else(|| SdkError::remote(FaultKind::NotFound, format!("{key} has no owner")));
        self.state.read_delay().await;
        owner
    }

    async fn mint_price(&self) -> Result<Wei> {
        self.state.check_injection()?;
        Ok(*self.state.price.read())
    }

    async fn mint_start_date(&self) -> Result<u64> {
        self.state.check_injection()?;
        Ok(self.state.window.read().0)
    }

    async fn mint_end_date(&self) -> Result<u64> {
        self.state.check_injection()?;
        Ok(self.state.window.read().1)
    }

    async fn minting_enabled(&self) -> Result<bool> {
        self.state.check_injection()?;
        Ok(self.state.minting_enabled.load(Ordering::SeqCst))
    }

    async fn is_emergency_stopped(&self) -> Result<bool> {
        self.state.check_injection()?;
        Ok(self.state.emergency_stopped.load(Ordering::SeqCst))
    }

    async fn submit_mint(&self, key: DateKey, from: Address, payment: Wei) -> Result<TxHash> {
        self.state.submit_count.fetch_add(1, Ordering::SeqCst);
        self.state.check_injection()?;
        let n = self.state.next_tx.fetch_add(1, Ordering::SeqCst);
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        let tx = TxHash::new(bytes);
        self.state.pending.lock().insert(tx, PendingMint { key, from, payment });
        Ok(tx)
    }

    async fn await_receipt(&self, tx: TxHash) -> Result<MintReceipt> {
        self.state.check_injection()?;
        let delay_ms = self.state.receipt_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        let mint = self
            .state
            .pending
            .lock()
            .remove(&tx)
            .ok_or_else(|| SdkError::remote(FaultKind::NotFound, format!("unknown transaction {tx}")))?;

        if let Some(reason) = self.state.admission_failure(&mint) {
            return Ok(MintReceipt::Reverted { tx, reason });
        }
        match self.state.record_mint(mint.key, mint.from) {
            Ok(cursor) => Ok(MintReceipt::Success { tx, cursor }),
            Err(SdkError::Remote { kind: FaultKind::Reverted, message }) => {
                Ok(MintReceipt::Reverted { tx, reason: message })
            },
            Err(err) => Err(err),
        }
    }

    async fn event_head(&self) -> Result<EventCursor> {
        self.state.check_injection()?;
        Ok(self.state.events.read().last().map(|e| e.cursor).unwrap_or_default())
    }

    async fn watch_mints(
        &self,
        keys: BTreeSet<DateKey>,
        after: EventCursor,
    ) -> Result<EventStream> {
        self.state.watch_count.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.state.refuse_watch_count) {
            return Err(SdkError::remote(FaultKind::Unavailable, "watch refused"));
        }
        self.state.check_injection()?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Hold the log lock while registering so no mint slips between
        // replay and registration.
        let events = self.state.events.read();
        for event in events.iter().filter(|e| e.cursor > after && keys.contains(&e.key)) {
            let _ = tx.send(Ok(event.clone()));
        }
        self.state.watch_key_sets.lock().push(keys.clone());
        self.state.watchers.lock().push(Watcher { keys, tx });
        drop(events);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn key(day: u32) -> DateKey {
        DateKey::from_ymd(2025, 10, day).unwrap()
    }

    #[test]
    fn test_take_one_decrements_to_zero() {
        let counter = AtomicUsize::new(2);
        assert!(take_one(&counter));
        assert!(take_one(&counter));
        assert!(!take_one(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_external_mint_twice_reverts() {
        let ledger = MockLedger::new();
        ledger.mint_externally(key(1), Address::new([1; 20])).unwrap();
        let err = ledger.mint_externally(key(1), Address::new([2; 20])).unwrap_err();
        assert!(err.is_reverted());
        assert_eq!(ledger.owner(key(1)), Some(Address::new([1; 20])));
    }

    #[tokio::test]
    async fn test_receipt_enforces_rules_in_order() {
        let ledger = MockLedger::new();
        let me = Address::new([3; 20]);
        let price = Wei::from_milli_ether(10);

        ledger.set_emergency_stopped(true);
        let tx = ledger.submit_mint(key(2), me, price).await.unwrap();
        assert_eq!(
            ledger.await_receipt(tx).await.unwrap(),
            MintReceipt::Reverted { tx, reason: "emergency stop engaged".to_owned() }
        );
        ledger.set_emergency_stopped(false);

        ledger.set_minting_enabled(false);
        let tx = ledger.submit_mint(key(2), me, price).await.unwrap();
        assert!(matches!(ledger.await_receipt(tx).await.unwrap(), MintReceipt::Reverted { .. }));
        ledger.set_minting_enabled(true);

        ledger.set_mint_window(0, 1);
        let tx = ledger.submit_mint(key(2), me, price).await.unwrap();
        assert_eq!(
            ledger.await_receipt(tx).await.unwrap(),
            MintReceipt::Reverted { tx, reason: "outside mint window".to_owned() }
        );
        ledger.set_mint_window(DEFAULT_WINDOW_START, DEFAULT_WINDOW_END);

        let tx = ledger.submit_mint(key(2), me, Wei::new(1)).await.unwrap();
        assert_eq!(
            ledger.await_receipt(tx).await.unwrap(),
            MintReceipt::Reverted { tx, reason: "insufficient payment".to_owned() }
        );

        let tx = ledger.submit_mint(key(2), me, price).await.unwrap();
        assert!(matches!(ledger.await_receipt(tx).await.unwrap(), MintReceipt::Success { .. }));
        assert_eq!(ledger.owner(key(2)), Some(me));
    }

    #[tokio::test]
    async fn test_watch_replays_after_cursor_and_filters_keys() {
        let ledger = MockLedger::new();
        let first = ledger.mint_externally(key(1), Address::new([1; 20])).unwrap();
        ledger.mint_externally(key(2), Address::new([1; 20])).unwrap();
        ledger.mint_externally(key(3), Address::new([1; 20])).unwrap();

        let mut stream =
            ledger.watch_mints(BTreeSet::from([key(1), key(3)]), first).await.unwrap();
        let replayed = stream.next().await.unwrap().unwrap();
        assert_eq!(replayed.key, key(3));

        ledger.mint_externally(key(4), Address::new([1; 20])).unwrap();
        ledger.disconnect_watchers();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refused_watch_is_counted() {
        let ledger = MockLedger::new();
        ledger.refuse_watches(1);
        assert!(ledger.watch_mints(BTreeSet::from([key(1)]), EventCursor::default()).await.is_err());
        assert!(ledger.watch_mints(BTreeSet::from([key(1)]), EventCursor::default()).await.is_ok());
        assert_eq!(ledger.watch_count(), 2);
        assert_eq!(ledger.watch_key_sets().len(), 1);
    }

    #[tokio::test]
    async fn test_multicall_reports_per_key_fault() {
        let ledger = MockLedger::new();
        ledger.fault_key(key(5));
        let answers = ledger
            .multicall(vec![StatusQuery::IsKeyMintable(key(4)), StatusQuery::IsKeyMintable(key(5))])
            .await
            .unwrap();
        assert!(*answers[0].as_ref().unwrap());
        assert!(answers[1].is_err());
    }
}
