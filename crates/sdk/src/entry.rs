//! Cached status of one key.

use std::time::{Duration, Instant};

use datemint_types::{Address, DateKey};

use crate::error::FaultKind;

/// Lifecycle of a cache entry.
///
/// ```text
/// Unknown ──▶ Fetching ──▶ Fresh ──invalidate──▶ Stale ──▶ Fetching
///                 │                                  ▲
///                 └──────▶ Fault ──next access───────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Never fetched.
    Unknown,
    /// A read for this key is in flight.
    Fetching,
    /// The last read succeeded and nothing has invalidated it since.
    Fresh,
    /// A notification arrived; the value may be outdated.
    Stale,
    /// The last read failed. Retried on next access only.
    Fault {
        /// Failure classification.
        kind: FaultKind,
        /// Failure message.
        reason: String,
    },
}

impl EntryState {
    /// Returns true for the fault state.
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

/// What a caller may safely show for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Status could not be determined. Never shown as available.
    Unknown,
    /// Nobody holds the key.
    Available,
    /// The key is held, by `owner` when known.
    Taken {
        /// Holder, once resolved.
        owner: Option<Address>,
    },
}

/// Snapshot of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Key this entry describes.
    pub key: DateKey,
    /// Canonical taken flag.
    pub minted: bool,
    /// Holder, populated only when `minted`.
    pub owner: Option<Address>,
    /// Logical version stamped when the producing read was issued.
    pub version: u64,
    /// Lifecycle state.
    pub state: EntryState,
    /// When the producing read completed.
    pub refreshed_at: Option<Instant>,
}

impl StatusEntry {
    /// Creates an entry that has never been fetched.
    #[must_use]
    pub fn unknown(key: DateKey) -> Self {
        Self { key, minted: false, owner: None, version: 0, state: EntryState::Unknown, refreshed_at: None }
    }

    /// Returns what can be shown for this key.
    ///
    /// A faulted entry that was never seen taken renders as unknown, not
    /// available. A key once seen taken stays taken.
    #[must_use]
    pub fn availability(&self) -> Availability {
        if self.minted {
            return Availability::Taken { owner: self.owner };
        }
        match self.state {
            EntryState::Fresh | EntryState::Stale => Availability::Available,
            // A refresh of a known value keeps showing it.
            EntryState::Fetching if self.refreshed_at.is_some() => Availability::Available,
            EntryState::Unknown | EntryState::Fetching | EntryState::Fault { .. } => {
                Availability::Unknown
            },
        }
    }

    /// Returns true if `actor` holds this key.
    #[must_use]
    pub fn is_owned_by(&self, actor: &Address) -> bool {
        self.minted && self.owner.as_ref() == Some(actor)
    }

    /// Returns true if the entry can be served without a read.
    pub(crate) fn is_fresh_within(&self, freshness: Duration, now: Instant) -> bool {
        self.state == EntryState::Fresh
            && self.refreshed_at.is_some_and(|at| now.saturating_duration_since(at) < freshness)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry() -> StatusEntry {
        StatusEntry::unknown(DateKey::from_ymd(2025, 1, 1).unwrap())
    }

    #[test]
    fn test_unknown_entry_is_not_available() {
        assert_eq!(entry().availability(), Availability::Unknown);
    }

    #[test]
    fn test_fault_never_renders_available() {
        let e = StatusEntry {
            state: EntryState::Fault { kind: FaultKind::Unavailable, reason: "down".into() },
            ..entry()
        };
        assert_eq!(e.availability(), Availability::Unknown);
    }

    #[test]
    fn test_fault_keeps_known_taken() {
        let owner = Address::new([7; 20]);
        let e = StatusEntry {
            minted: true,
            owner: Some(owner),
            state: EntryState::Fault { kind: FaultKind::DeadlineExceeded, reason: "slow".into() },
            ..entry()
        };
        assert_eq!(e.availability(), Availability::Taken { owner: Some(owner) });
    }

    #[test]
    fn test_refetch_keeps_last_known_value() {
        let e = StatusEntry {
            state: EntryState::Fetching,
            refreshed_at: Some(Instant::now()),
            ..entry()
        };
        assert_eq!(e.availability(), Availability::Available);
        assert_eq!(StatusEntry { refreshed_at: None, ..e }.availability(), Availability::Unknown);
    }

    #[test]
    fn test_is_owned_by_compares_explicit_actor() {
        let me = Address::new([1; 20]);
        let other = Address::new([2; 20]);
        let e = StatusEntry { minted: true, owner: Some(me), state: EntryState::Fresh, ..entry() };
        assert!(e.is_owned_by(&me));
        assert!(!e.is_owned_by(&other));
        assert!(!StatusEntry { minted: false, ..e }.is_owned_by(&me));
    }

    #[test]
    fn test_freshness_window() {
        let now = Instant::now();
        let e = StatusEntry { state: EntryState::Fresh, refreshed_at: Some(now), ..entry() };
        assert!(e.is_fresh_within(Duration::from_secs(30), now));
        assert!(!e.is_fresh_within(Duration::from_secs(30), now + Duration::from_secs(31)));

        let stale = StatusEntry { state: EntryState::Stale, ..e };
        assert!(!stale.is_fresh_within(Duration::from_secs(30), now));
    }
}
