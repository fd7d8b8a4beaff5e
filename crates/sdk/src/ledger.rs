//! The authoritative ledger as seen by the SDK.
//!
//! The SDK never implements mint logic itself: every read, mutation and
//! change notification goes through the [`Ledger`] trait. Production code
//! plugs in a chain client; tests and demos use
//! [`MockLedger`](crate::mock::MockLedger).

use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datemint_types::{Address, DateKey, TxHash, Wei};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One status predicate, in either of the two read shapes ledgers expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusQuery {
    /// `isKeyMintable(key)`: true while nobody holds the key.
    IsKeyMintable(DateKey),
    /// `isKeyMinted(key)`: true once the key is held.
    IsKeyMinted(DateKey),
}

impl StatusQuery {
    /// Returns the key being queried.
    #[must_use]
    pub fn key(self) -> DateKey {
        match self {
            Self::IsKeyMintable(key) | Self::IsKeyMinted(key) => key,
        }
    }

    /// Converts the predicate's answer into the canonical `taken` flag.
    #[must_use]
    pub fn taken(self, answer: bool) -> bool {
        match self {
            Self::IsKeyMintable(_) => !answer,
            Self::IsKeyMinted(_) => answer,
        }
    }
}

/// Position of an event in the ledger's event log.
///
/// Cursors are totally ordered; a larger cursor is a later event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct EventCursor {
    /// Block the event was emitted in.
    pub block: u64,
    /// Index of the event within its block.
    pub log_index: u32,
}

impl EventCursor {
    /// Creates a cursor.
    #[must_use]
    pub const fn new(block: u64, log_index: u32) -> Self {
        Self { block, log_index }
    }
}

impl fmt::Display for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.log_index)
    }
}

/// A mint observed on the ledger's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintEvent {
    /// Key that was minted.
    pub key: DateKey,
    /// Account that paid for the mint.
    pub minter: Address,
    /// Log position of the event.
    pub cursor: EventCursor,
}

/// Terminal outcome of a submitted mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintReceipt {
    /// The mint was included and the key is now held by the submitter.
    Success {
        /// Submission handle.
        tx: TxHash,
        /// Log position of the resulting mint event.
        cursor: EventCursor,
    },
    /// The ledger evaluated and declined the mint.
    Reverted {
        /// Submission handle.
        tx: TxHash,
        /// Revert reason, verbatim.
        reason: String,
    },
}

/// Stream of mint events produced by [`Ledger::watch_mints`].
pub type EventStream = BoxStream<'static, Result<MintEvent>>;

/// Preconditions the ledger enforces on every mint.
///
/// Read fresh on every request and never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionState {
    /// Price of a single mint.
    pub price: Wei,
    /// First instant minting is allowed.
    pub window_start: DateTime<Utc>,
    /// Last instant minting is allowed.
    pub window_end: DateTime<Utc>,
    /// Operator switch for minting.
    pub minting_enabled: bool,
    /// Emergency stop flag.
    pub emergency_stopped: bool,
}

impl AdmissionState {
    /// Returns true if a mint submitted at `now` would pass the window and
    /// operator checks. Key availability and payment are checked separately.
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.minting_enabled
            && !self.emergency_stopped
            && now >= self.window_start
            && now <= self.window_end
    }

    /// Returns true if `payment` covers the mint price.
    #[must_use]
    pub fn accepts_payment(&self, payment: Wei) -> bool {
        payment >= self.price
    }
}

/// Remote interface of the authoritative ledger.
///
/// All methods are independent round trips. Implementations classify
/// failures as [`SdkError::Remote`](crate::SdkError::Remote) with the
/// appropriate [`FaultKind`](crate::FaultKind); the SDK adds its own
/// timeouts on top.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Evaluates one status predicate.
    async fn read_status(&self, query: StatusQuery) -> Result<bool>;

    /// Evaluates many status predicates in a single round trip.
    ///
    /// The result has one entry per query, in order. A failing query does
    /// not fail the others.
    async fn multicall(&self, queries: Vec<StatusQuery>) -> Result<Vec<Result<bool>>>;

    /// Returns the holder of a taken key. Faults with `NotFound` otherwise.
    async fn owner_of(&self, key: DateKey) -> Result<Address>;

    /// Price of one mint.
    async fn mint_price(&self) -> Result<Wei>;

    /// Start of the mint window, in unix seconds.
    async fn mint_start_date(&self) -> Result<u64>;

    /// End of the mint window, in unix seconds.
    async fn mint_end_date(&self) -> Result<u64>;

    /// Whether the operator has enabled minting.
    async fn minting_enabled(&self) -> Result<bool>;

    /// Whether the emergency stop is engaged.
    async fn is_emergency_stopped(&self) -> Result<bool>;

    /// Submits a mint of `key` paid by `from`.
    async fn submit_mint(&self, key: DateKey, from: Address, payment: Wei) -> Result<TxHash>;

    /// Waits until the submission identified by `tx` reaches a terminal state.
    async fn await_receipt(&self, tx: TxHash) -> Result<MintReceipt>;

    /// Cursor of the most recent event in the log.
    async fn event_head(&self) -> Result<EventCursor>;

    /// Opens a stream of mint events for `keys` strictly after `after`.
    async fn watch_mints(&self, keys: BTreeSet<DateKey>, after: EventCursor)
    -> Result<EventStream>;
}

#[async_trait]
impl<L: Ledger + ?Sized> Ledger for Arc<L> {
    async fn read_status(&self, query: StatusQuery) -> Result<bool> {
        (**self).read_status(query).await
    }

    async fn multicall(&self, queries: Vec<StatusQuery>) -> Result<Vec<Result<bool>>> {
        (**self).multicall(queries).await
    }

    async fn owner_of(&self, key: DateKey) -> Result<Address> {
        (**self).owner_of(key).await
    }

    async fn mint_price(&self) -> Result<Wei> {
        (**self).mint_price().await
    }

    async fn mint_start_date(&self) -> Result<u64> {
        (**self).mint_start_date().await
    }

    async fn mint_end_date(&self) -> Result<u64> {
        (**self).mint_end_date().await
    }

    async fn minting_enabled(&self) -> Result<bool> {
        (**self).minting_enabled().await
    }

    async fn is_emergency_stopped(&self) -> Result<bool> {
        (**self).is_emergency_stopped().await
    }

    async fn submit_mint(&self, key: DateKey, from: Address, payment: Wei) -> Result<TxHash> {
        (**self).submit_mint(key, from, payment).await
    }

    async fn await_receipt(&self, tx: TxHash) -> Result<MintReceipt> {
        (**self).await_receipt(tx).await
    }

    async fn event_head(&self) -> Result<EventCursor> {
        (**self).event_head().await
    }

    async fn watch_mints(
        &self,
        keys: BTreeSet<DateKey>,
        after: EventCursor,
    ) -> Result<EventStream> {
        (**self).watch_mints(keys, after).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn key() -> DateKey {
        datemint_types::encode(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_status_query_normalises_to_taken() {
        assert!(StatusQuery::IsKeyMintable(key()).taken(false));
        assert!(!StatusQuery::IsKeyMintable(key()).taken(true));
        assert!(StatusQuery::IsKeyMinted(key()).taken(true));
        assert!(!StatusQuery::IsKeyMinted(key()).taken(false));
    }

    #[test]
    fn test_event_cursor_ordering() {
        assert!(EventCursor::new(1, 5) < EventCursor::new(2, 0));
        assert!(EventCursor::new(2, 0) < EventCursor::new(2, 1));
        assert_eq!(EventCursor::new(7, 3).to_string(), "7:3");
    }

    #[test]
    fn test_admission_window() {
        let state = AdmissionState {
            price: Wei::from_milli_ether(10),
            window_start: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap(),
            minting_enabled: true,
            emergency_stopped: false,
        };
        assert!(state.is_open_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(!state.is_open_at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));

        let stopped = AdmissionState { emergency_stopped: true, ..state.clone() };
        assert!(!stopped.is_open_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));

        assert!(state.accepts_payment(Wei::from_milli_ether(10)));
        assert!(!state.accepts_payment(Wei::from_milli_ether(9)));
    }
}
