//! SDK-side metrics for observability.
//!
//! This module provides a pluggable metrics trait ([`CacheMetrics`]) that
//! applications can implement to collect telemetry from the status cache.
//! Two implementations are included:
//!
//! - [`NoopCacheMetrics`]: Zero-overhead default that discards all metrics.
//! - [`MetricsCacheMetrics`]: Integration with the [`metrics`](https://docs.rs/metrics) crate facade,
//!   forwarding to whatever recorder is installed (Prometheus, StatsD, etc.).
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `datemint_sdk_remote_calls_total` | Counter | `method`, `status` | Ledger calls by method and outcome |
//! | `datemint_sdk_remote_call_duration_seconds` | Histogram | `method` | Ledger call latency |
//! | `datemint_sdk_lookups_total` | Counter | `result` | Cache lookups served from cache (`hit`) or fetched (`miss`) |
//! | `datemint_sdk_invalidations_total` | Counter | `source` | Invalidations by trigger |
//! | `datemint_sdk_mints_total` | Counter | `outcome` | Terminal mint outcomes |

use std::{fmt, sync::Arc, time::Duration};

/// What caused an entry to be invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidationSource {
    /// This client's own confirmed mint.
    LocalMutation,
    /// A mint event pushed by the ledger.
    Push,
    /// A signal from the in-process bus.
    Signal,
}

impl fmt::Display for InvalidationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalMutation => write!(f, "local_mutation"),
            Self::Push => write!(f, "push"),
            Self::Signal => write!(f, "signal"),
        }
    }
}

/// Trait for cache metrics collection.
///
/// All methods have default no-op implementations, so implementors only
/// override the metrics they care about.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` since one instance is shared by
/// the cache, its reader and writer, and background tasks.
pub trait CacheMetrics: Send + Sync + fmt::Debug {
    /// Records a completed ledger call.
    ///
    /// - `method`: The ledger method (e.g., "read_many", "owner_of").
    /// - `duration`: Wall-clock time including in-call retries.
    /// - `success`: Whether the call ultimately succeeded.
    fn record_remote_call(&self, method: &str, duration: Duration, success: bool) {
        let _ = (method, duration, success);
    }

    /// Records one key lookup, `hit` when served without a read.
    fn record_lookup(&self, hit: bool) {
        let _ = hit;
    }

    /// Records an invalidation that reached an interesting key.
    fn record_invalidation(&self, source: InvalidationSource) {
        let _ = source;
    }

    /// Records the terminal outcome of a mint ("confirmed", "rejected", "faulted").
    fn record_mint(&self, outcome: &str) {
        let _ = outcome;
    }
}

/// No-op metrics implementation with zero overhead.
#[derive(Debug, Clone, Copy)]
pub struct NoopCacheMetrics;

impl CacheMetrics for NoopCacheMetrics {}

/// Metrics implementation using the [`metrics`](https://docs.rs/metrics) crate facade.
///
/// All metric names use the `datemint_sdk_` prefix.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCacheMetrics;

/// Metric name constants for the `metrics` crate facade.
mod metric_names {
    /// Ledger calls by method and outcome.
    pub const REMOTE_CALLS_TOTAL: &str = "datemint_sdk_remote_calls_total";
    /// Ledger call duration distribution.
    pub const REMOTE_CALL_DURATION: &str = "datemint_sdk_remote_call_duration_seconds";
    /// Lookups by result.
    pub const LOOKUPS_TOTAL: &str = "datemint_sdk_lookups_total";
    /// Invalidations by source.
    pub const INVALIDATIONS_TOTAL: &str = "datemint_sdk_invalidations_total";
    /// Mint outcomes.
    pub const MINTS_TOTAL: &str = "datemint_sdk_mints_total";
}

impl CacheMetrics for MetricsCacheMetrics {
    fn record_remote_call(&self, method: &str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };
        metrics::counter!(metric_names::REMOTE_CALLS_TOTAL, "method" => method.to_owned(), "status" => status).increment(1);
        metrics::histogram!(metric_names::REMOTE_CALL_DURATION, "method" => method.to_owned())
            .record(duration.as_secs_f64());
    }

    fn record_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!(metric_names::LOOKUPS_TOTAL, "result" => result).increment(1);
    }

    fn record_invalidation(&self, source: InvalidationSource) {
        metrics::counter!(metric_names::INVALIDATIONS_TOTAL, "source" => source.to_string())
            .increment(1);
    }

    fn record_mint(&self, outcome: &str) {
        metrics::counter!(metric_names::MINTS_TOTAL, "outcome" => outcome.to_owned()).increment(1);
    }
}

/// Creates the default metrics instance (no-op).
pub(crate) fn default_metrics() -> Arc<dyn CacheMetrics> {
    Arc::new(NoopCacheMetrics)
}
