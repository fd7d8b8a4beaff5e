//! Client-side status cache and sync layer for DateMint.
//!
//! DateMint sells calendar dates as unique tokens on a ledger. This SDK keeps
//! a client's view of which dates are taken, and by whom, consistent with the
//! ledger while issuing as few reads as possible.
//!
//! # Features
//!
//! - **Batched reads**: Concurrent lookups within a short window share one
//!   multicall round trip
//! - **Push invalidation**: One shared mint event stream, filtered to the
//!   keys on screen, with automatic reconnection
//! - **Local signals**: In-process publish/subscribe so views refresh after a
//!   mint without a round trip
//! - **Ordered updates**: Versioned results so a slow read never overwrites a
//!   newer one
//! - **Honest faults**: A date that could not be read is never shown as
//!   available
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use datemint_sdk::{Address, CacheConfig, StatusCache, Wei, mock::MockLedger};
//!
//! # async fn example() -> datemint_sdk::Result<()> {
//! let ledger = Arc::new(MockLedger::new());
//! let cache = StatusCache::builder().ledger(ledger).config(CacheConfig::default()).build()?;
//!
//! // Show February and read it in one round trip
//! let keys = cache.show_month(2025, 2)?;
//! let entries = cache.get_range(&keys).await?;
//!
//! // Mint a date; the cache flips to taken as soon as the ledger confirms
//! let me = Address::new([1; 20]);
//! let outcome = cache.mutate(keys[13], &me, Wei::from_milli_ether(10)).await;
//! assert!(outcome.is_confirmed());
//! assert!(cache.is_owned_by(keys[13], &me));
//! # let _ = entries;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  StatusCache (Public API)                   │
//! │  .get_range() │ .get_one() │ .mutate() │ .show_month()      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  Interest & Invalidation                    │
//! │  Visible + selected keys │ Versioned apply │ Batch window   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  SubscriptionChannel         │  LocalSignalBus              │
//! │  Filtered mint events        │  In-process key signals      │
//! │  Reconnect │ Degraded probe  │                              │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │           RemoteReader │ RemoteWriter (backon)              │
//! │   Timeouts │ In-call retry │ Owner resolution │ Receipts    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     Ledger trait                            │
//! │   Status reads │ Admission │ Mint submission │ Event log    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod entry;
mod error;
mod ledger;
mod metrics;
pub mod mock;
mod reader;
mod retry;
mod signal;
mod streaming;
mod subscription;
mod writer;

// Public API exports
pub use cache::StatusCache;
pub use config::{
    CacheConfig, CacheConfigBuilder, ReadSurface, RetryPolicy, RetryPolicyBuilder,
    SubscriptionConfig, SubscriptionConfigBuilder,
};
pub use entry::{Availability, EntryState, StatusEntry};
pub use error::{FaultKind, Result, SdkError};
pub use ledger::{
    AdmissionState, EventCursor, EventStream, Ledger, MintEvent, MintReceipt, StatusQuery,
};
pub use metrics::{CacheMetrics, InvalidationSource, MetricsCacheMetrics, NoopCacheMetrics};
pub use reader::{KeyReads, RemoteReader};
pub use retry::with_retry;
pub use signal::{LocalSignalBus, SignalCallback, SignalSubscription};
pub use streaming::{
    CursorTracker, PhaseObserver, PositionTracker, ReconnectingStream, StreamPhase,
};
pub use subscription::{ChangeCallback, ChannelState, ListenerId, SubscriptionChannel};
pub use writer::{MintOutcome, RemoteWriter};

// Re-export commonly used types from datemint-types
pub use datemint_types::{Address, CodecError, DateKey, TxHash, Wei, decode, encode, month_keys};
