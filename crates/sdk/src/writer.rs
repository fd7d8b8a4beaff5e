//! Mint submission.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use datemint_types::{Address, DateKey, TxHash, Wei};
use tracing::{info, warn};

use crate::{
    error::{FaultKind, Result, SdkError},
    ledger::{EventCursor, Ledger, MintReceipt},
    metrics::CacheMetrics,
};

/// Terminal outcome of a mint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    /// The ledger accepted the mint.
    Confirmed {
        /// Submission handle.
        tx: TxHash,
        /// Log position of the mint event.
        cursor: EventCursor,
    },
    /// The ledger declined the mint. The reason is passed through verbatim.
    Rejected {
        /// Revert reason.
        reason: String,
    },
    /// The outcome could not be determined.
    Faulted {
        /// What went wrong.
        reason: String,
    },
}

impl MintOutcome {
    /// Returns true for [`MintOutcome::Confirmed`].
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::Rejected { .. } => "rejected",
            Self::Faulted { .. } => "faulted",
        }
    }

    /// Converts the outcome for a mint of `key` into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::MutationRejected`] for a rejection and a remote
    /// fault for a faulted outcome.
    pub fn into_result(self, key: DateKey) -> Result<TxHash> {
        match self {
            Self::Confirmed { tx, .. } => Ok(tx),
            Self::Rejected { reason } => Err(SdkError::MutationRejected { key, reason }),
            Self::Faulted { reason } => {
                Err(SdkError::remote(FaultKind::Unavailable, reason))
            },
        }
    }
}

/// Submits mints and waits for their receipts.
#[derive(Clone)]
pub struct RemoteWriter {
    ledger: Arc<dyn Ledger>,
    submit_timeout: Duration,
    receipt_timeout: Duration,
    metrics: Arc<dyn CacheMetrics>,
}

impl std::fmt::Debug for RemoteWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriter")
            .field("submit_timeout", &self.submit_timeout)
            .field("receipt_timeout", &self.receipt_timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteWriter {
    /// Creates a writer. `submit_timeout` bounds the submission call and
    /// `receipt_timeout` bounds the wait for its receipt.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        submit_timeout: Duration,
        receipt_timeout: Duration,
        metrics: Arc<dyn CacheMetrics>,
    ) -> Self {
        Self { ledger, submit_timeout, receipt_timeout, metrics }
    }

    /// Submits a mint of `key` paid by `actor` and waits for its outcome.
    ///
    /// A revert, whether at submission or in the receipt, is a rejection.
    /// Any other failure, including a timeout, is a fault: the submission
    /// may still complete on the ledger.
    pub async fn mint(&self, key: DateKey, actor: Address, payment: Wei) -> MintOutcome {
        let start = Instant::now();
        let outcome = self.submit_and_wait(key, actor, payment).await;
        self.metrics.record_remote_call("mint", start.elapsed(), outcome.is_confirmed());
        self.metrics.record_mint(outcome.label());
        match &outcome {
            MintOutcome::Confirmed { tx, cursor } => {
                info!(key = %key, tx = %tx, cursor = %cursor, "mint confirmed");
            },
            MintOutcome::Rejected { reason } => info!(key = %key, reason = %reason, "mint rejected"),
            MintOutcome::Faulted { reason } => warn!(key = %key, reason = %reason, "mint faulted"),
        }
        outcome
    }

    async fn submit_and_wait(&self, key: DateKey, actor: Address, payment: Wei) -> MintOutcome {
        let submitted =
            tokio::time::timeout(self.submit_timeout, self.ledger.submit_mint(key, actor, payment))
                .await;
        let tx = match submitted {
            Ok(Ok(tx)) => tx,
            Ok(Err(err)) => return classify(err),
            Err(_) => {
                return MintOutcome::Faulted {
                    reason: format!("submission timed out after {:?}", self.submit_timeout),
                };
            },
        };

        match tokio::time::timeout(self.receipt_timeout, self.ledger.await_receipt(tx)).await {
            Ok(Ok(MintReceipt::Success { tx, cursor })) => MintOutcome::Confirmed { tx, cursor },
            Ok(Ok(MintReceipt::Reverted { reason, .. })) => MintOutcome::Rejected { reason },
            Ok(Err(err)) => classify(err),
            Err(_) => MintOutcome::Faulted {
                reason: format!(
                    "no receipt for {tx} after {:?}; the submission may still complete",
                    self.receipt_timeout
                ),
            },
        }
    }
}

fn classify(err: SdkError) -> MintOutcome {
    match err {
        SdkError::Remote { kind: FaultKind::Reverted, message } => {
            MintOutcome::Rejected { reason: message }
        },
        other => MintOutcome::Faulted { reason: other.to_string() },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::{metrics::default_metrics, mock::MockLedger};

    fn key(day: u32) -> DateKey {
        DateKey::from_ymd(2025, 8, day).unwrap()
    }

    fn writer(ledger: &Arc<MockLedger>) -> RemoteWriter {
        RemoteWriter::new(
            ledger.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
            default_metrics(),
        )
    }

    #[tokio::test]
    async fn test_mint_confirmed() {
        let ledger = Arc::new(MockLedger::new());
        let actor = Address::new([9; 20]);
        let outcome = writer(&ledger).mint(key(1), actor, Wei::from_milli_ether(10)).await;
        assert!(outcome.is_confirmed());
        assert_eq!(ledger.owner(key(1)), Some(actor));
    }

    #[tokio::test]
    async fn test_already_minted_is_rejected_verbatim() {
        let ledger = Arc::new(MockLedger::new());
        ledger.mint_externally(key(2), Address::new([1; 20])).unwrap();
        let outcome =
            writer(&ledger).mint(key(2), Address::new([2; 20]), Wei::from_milli_ether(10)).await;
        assert_eq!(outcome, MintOutcome::Rejected { reason: "already minted".to_owned() });
    }

    #[tokio::test]
    async fn test_underpayment_is_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let outcome =
            writer(&ledger).mint(key(3), Address::new([2; 20]), Wei::from_milli_ether(1)).await;
        assert!(matches!(outcome, MintOutcome::Rejected { .. }));
        assert_eq!(ledger.owner(key(3)), None);
    }

    #[tokio::test]
    async fn test_transport_failure_is_faulted() {
        let ledger = Arc::new(MockLedger::new());
        ledger.inject_unavailable(1);
        let outcome =
            writer(&ledger).mint(key(4), Address::new([2; 20]), Wei::from_milli_ether(10)).await;
        assert!(matches!(outcome, MintOutcome::Faulted { .. }));
    }

    #[test]
    fn test_into_result() {
        let rejected = MintOutcome::Rejected { reason: "already minted".to_owned() };
        match rejected.into_result(key(5)).unwrap_err() {
            SdkError::MutationRejected { reason, .. } => assert_eq!(reason, "already minted"),
            other => panic!("unexpected {other:?}"),
        }

        let faulted = MintOutcome::Faulted { reason: "timeout".to_owned() };
        assert_eq!(faulted.into_result(key(5)).unwrap_err().fault_kind(), Some(FaultKind::Unavailable));
    }
}
