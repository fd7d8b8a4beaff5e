//! Read-side access to the ledger.
//!
//! Every call carries the configured request timeout and may be retried
//! within the call for transient faults. Status answers are normalised to
//! the canonical `taken` flag regardless of which read shape the ledger
//! exposes.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use datemint_types::{Address, DateKey};
use tracing::{debug, warn};

use crate::{
    config::{CacheConfig, ReadSurface, RetryPolicy},
    entry::{EntryState, StatusEntry},
    error::{FaultKind, Result, SdkError},
    ledger::{AdmissionState, Ledger, StatusQuery},
    metrics::CacheMetrics,
    retry::with_retry,
};

/// Per-key outcome of [`RemoteReader::read_many`].
pub type KeyReads = BTreeMap<DateKey, Result<bool>>;

/// Issues status, owner and admission reads against the ledger.
#[derive(Clone)]
pub struct RemoteReader {
    ledger: Arc<dyn Ledger>,
    config: CacheConfig,
    metrics: Arc<dyn CacheMetrics>,
}

impl std::fmt::Debug for RemoteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReader")
            .field("read_surface", &self.config.read_surface)
            .field("request_timeout", &self.config.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteReader {
    /// Creates a reader over `ledger`.
    pub fn new(ledger: Arc<dyn Ledger>, config: CacheConfig, metrics: Arc<dyn CacheMetrics>) -> Self {
        Self { ledger, config, metrics }
    }

    fn query(&self, key: DateKey) -> StatusQuery {
        match self.config.read_surface {
            ReadSurface::Mintable => StatusQuery::IsKeyMintable(key),
            ReadSurface::Minted => StatusQuery::IsKeyMinted(key),
        }
    }

    /// Runs one ledger call with timeout, in-call retry and metrics.
    async fn call<T, F, Fut>(&self, method: &'static str, retry: &RetryPolicy, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.request_timeout;
        let start = Instant::now();
        let result = with_retry(retry, || {
            let fut = op();
            async move {
                tokio::time::timeout(timeout, fut).await.map_err(|_| SdkError::Timeout {
                    operation: method,
                    duration_ms: timeout.as_millis() as u64,
                })?
            }
        })
        .await;
        self.metrics.record_remote_call(method, start.elapsed(), result.is_ok());
        if let Err(err) = &result {
            warn!(method, error = %err, "ledger read failed");
        }
        result
    }

    /// Reads the status of one key, then its owner if taken.
    ///
    /// The returned entry is `Fresh` with version 0; callers stamp their own
    /// version. A failed owner lookup leaves `owner` empty rather than
    /// failing the read.
    ///
    /// # Errors
    ///
    /// Returns a remote fault or timeout if the status read fails.
    pub async fn read_one(&self, key: DateKey) -> Result<StatusEntry> {
        let query = self.query(key);
        let answer = self
            .call("read_one", &self.config.read_retry, || self.ledger.read_status(query))
            .await?;
        let minted = query.taken(answer);
        let owner = if minted && self.config.resolve_owners {
            self.read_owner(key).await.ok()
        } else {
            None
        };
        Ok(StatusEntry {
            key,
            minted,
            owner,
            version: 0,
            state: EntryState::Fresh,
            refreshed_at: Some(Instant::now()),
        })
    }

    /// Reads the status of many keys in one round trip.
    ///
    /// A fault on one key is reported for that key only.
    ///
    /// # Errors
    ///
    /// Returns a remote fault or timeout if the round trip as a whole fails.
    pub async fn read_many(&self, keys: &[DateKey]) -> Result<KeyReads> {
        let queries: Vec<StatusQuery> = keys.iter().map(|k| self.query(*k)).collect();
        let answers = self
            .call("read_many", &self.config.read_retry, || self.ledger.multicall(queries.clone()))
            .await?;
        if answers.len() != queries.len() {
            return Err(SdkError::remote(
                FaultKind::Internal,
                format!("multicall returned {} results for {} queries", answers.len(), queries.len()),
            ));
        }
        debug!(keys = keys.len(), "batched status read complete");
        Ok(queries
            .into_iter()
            .zip(answers)
            .map(|(query, answer)| (query.key(), answer.map(|a| query.taken(a))))
            .collect())
    }

    /// Reads the holder of a key known to be taken.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is not taken, or a remote fault.
    pub async fn read_owner(&self, key: DateKey) -> Result<Address> {
        self.call("owner_of", &self.config.read_retry, || self.ledger.owner_of(key)).await
    }

    /// Reads the mint preconditions. Never cached.
    ///
    /// # Errors
    ///
    /// Returns the first remote fault among the underlying reads.
    pub async fn read_admission(&self) -> Result<AdmissionState> {
        let retry = &self.config.read_retry;
        let (price, start, end, enabled, stopped) = tokio::try_join!(
            self.call("mint_price", retry, || self.ledger.mint_price()),
            self.call("mint_start_date", retry, || self.ledger.mint_start_date()),
            self.call("mint_end_date", retry, || self.ledger.mint_end_date()),
            self.call("minting_enabled", retry, || self.ledger.minting_enabled()),
            self.call("is_emergency_stopped", retry, || self.ledger.is_emergency_stopped()),
        )?;
        Ok(AdmissionState {
            price,
            window_start: timestamp(start)?,
            window_end: timestamp(end)?,
            minting_enabled: enabled,
            emergency_stopped: stopped,
        })
    }
}

fn timestamp(secs: u64) -> Result<DateTime<Utc>> {
    i64::try_from(secs).ok().and_then(|s| DateTime::from_timestamp(s, 0)).ok_or_else(|| {
        SdkError::remote(FaultKind::Internal, format!("ledger returned invalid timestamp {secs}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use datemint_types::Wei;

    use super::*;
    use crate::{metrics::default_metrics, mock::MockLedger};

    fn key(day: u32) -> DateKey {
        DateKey::from_ymd(2025, 1, day).unwrap()
    }

    fn reader(ledger: &Arc<MockLedger>, config: CacheConfig) -> RemoteReader {
        RemoteReader::new(ledger.clone(), config, default_metrics())
    }

    #[tokio::test]
    async fn test_read_one_resolves_owner_when_taken() {
        let ledger = Arc::new(MockLedger::new());
        let owner = Address::new([4; 20]);
        ledger.mint_externally(key(2), owner).unwrap();
        let reader = reader(&ledger, CacheConfig::default());

        let taken = reader.read_one(key(2)).await.unwrap();
        assert!(taken.minted);
        assert_eq!(taken.owner, Some(owner));

        let free = reader.read_one(key(3)).await.unwrap();
        assert!(!free.minted);
        assert_eq!(free.owner, None);
        // Owner is only looked up for the taken key
        assert_eq!(ledger.owner_count(), 1);
    }

    #[tokio::test]
    async fn test_both_read_surfaces_agree() {
        let ledger = Arc::new(MockLedger::new());
        ledger.mint_externally(key(5), Address::new([1; 20])).unwrap();

        for surface in [ReadSurface::Mintable, ReadSurface::Minted] {
            let config = CacheConfig::builder().read_surface(surface).build().unwrap();
            let reads = reader(&ledger, config).read_many(&[key(4), key(5)]).await.unwrap();
            assert!(!*reads[&key(4)].as_ref().unwrap(), "{surface:?}");
            assert!(*reads[&key(5)].as_ref().unwrap(), "{surface:?}");
        }
    }

    #[tokio::test]
    async fn test_read_many_isolates_key_fault() {
        let ledger = Arc::new(MockLedger::new());
        ledger.fault_key(key(7));
        let reader = reader(&ledger, CacheConfig::default());

        let reads = reader.read_many(&[key(6), key(7), key(8)]).await.unwrap();
        assert!(reads[&key(6)].is_ok());
        assert!(reads[&key(7)].is_err());
        assert!(reads[&key(8)].is_ok());
        assert_eq!(ledger.multicall_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_fault() {
        let ledger = Arc::new(MockLedger::new());
        ledger.inject_read_delay(Duration::from_millis(200));
        let config = CacheConfig::builder().request_timeout(Duration::from_millis(20)).build().unwrap();

        let err = reader(&ledger, config).read_one(key(1)).await.unwrap_err();
        assert!(matches!(err, SdkError::Timeout { operation: "read_one", .. }));
    }

    #[tokio::test]
    async fn test_in_call_retry_is_bounded() {
        let ledger = Arc::new(MockLedger::new());
        ledger.inject_unavailable(1);
        let retry = RetryPolicy::builder()
            .max_attempts(2)
            .initial_backoff(Duration::from_millis(1))
            .jitter(0.0)
            .build();
        let config = CacheConfig::builder().read_retry(retry).build().unwrap();

        assert!(reader(&ledger, config).read_one(key(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let ledger = Arc::new(MockLedger::new());
        ledger.inject_unavailable(1);
        let err = reader(&ledger, CacheConfig::default()).read_one(key(1)).await.unwrap_err();
        assert_eq!(err.fault_kind(), Some(FaultKind::Unavailable));
    }

    #[tokio::test]
    async fn test_read_admission_passes_through() {
        let ledger = Arc::new(MockLedger::new());
        let reader = reader(&ledger, CacheConfig::default());

        let first = reader.read_admission().await.unwrap();
        assert_eq!(first.price, Wei::from_milli_ether(10));
        assert!(first.minting_enabled);

        ledger.set_emergency_stopped(true);
        let second = reader.read_admission().await.unwrap();
        assert!(second.emergency_stopped);
    }

    #[test]
    fn test_timestamp_conversion() {
        assert_eq!(timestamp(0).unwrap().timestamp(), 0);
        assert!(timestamp(u64::MAX).is_err());
    }
}
