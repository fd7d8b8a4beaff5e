//! SDK error types with recovery context.
//!
//! Provides a three-tier error model:
//! - **Caller errors**: invalid dates/keys, invalid configuration
//! - **Remote faults**: ledger call failures and timeouts
//! - **Domain outcomes**: the ledger declined a mutation
//!
//! Errors include retryability classification. Read paths through the
//! status cache never return remote faults; they are recorded on the entry.

use datemint_types::{CodecError, DateKey};
use snafu::Snafu;

/// Result type alias for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Classification of a failed ledger call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The ledger endpoint is temporarily unreachable.
    Unavailable,
    /// The ledger did not answer within its own deadline.
    DeadlineExceeded,
    /// The ledger evaluated the call and reverted it.
    Reverted,
    /// The queried item does not exist (e.g. owner of an unminted key).
    NotFound,
    /// Any other failure.
    Internal,
}

impl FaultKind {
    /// Returns a short label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Reverted => "reverted",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SDK error types with context-rich error messages.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SdkError {
    /// A date or key supplied by the caller is invalid.
    #[snafu(display("{source}"), context(false))]
    Codec {
        /// Underlying codec error.
        source: CodecError,
    },

    /// A ledger call failed.
    #[snafu(display("Remote fault ({kind}): {message}"))]
    Remote {
        /// Fault classification.
        kind: FaultKind,
        /// Message from the ledger or transport.
        message: String,
    },

    /// A ledger call exceeded its timeout.
    #[snafu(display("{operation} timed out after {duration_ms}ms"))]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The ledger declined a mint.
    #[snafu(display("Mint of {key} rejected: {reason}"))]
    MutationRejected {
        /// Key the mint targeted.
        key: DateKey,
        /// Reason reported by the ledger, verbatim.
        reason: String,
    },

    /// The change-notification stream dropped and could not be restored.
    #[snafu(display("Subscription dropped: {message}"))]
    SubscriptionDropped {
        /// Disconnect reason.
        message: String,
    },

    /// Retry attempts exhausted.
    #[snafu(display("Retry exhausted after {attempts} attempts: {last_error}"))]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message before giving up.
        last_error: String,
    },

    /// Configuration validation error.
    #[snafu(display("Configuration error: {message}"))]
    Config {
        /// Error description.
        message: String,
    },

    /// The cache or channel has been shut down.
    #[snafu(display("Shut down"))]
    Shutdown,
}

impl SdkError {
    /// Creates a remote fault.
    pub fn remote(kind: FaultKind, message: impl Into<String>) -> Self {
        Self::Remote { kind, message: message.into() }
    }

    /// Returns true if the error is transient and the call may be retried.
    ///
    /// Retryable errors:
    /// - `Remote` with `Unavailable` or `DeadlineExceeded`
    /// - `Timeout`
    /// - `SubscriptionDropped`
    ///
    /// Non-retryable errors:
    /// - `Codec`, `Config`: caller errors
    /// - `Remote` with `Reverted`/`NotFound`/`Internal`: the ledger answered
    /// - `MutationRejected`: the caller must react
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { kind, .. } => {
                matches!(kind, FaultKind::Unavailable | FaultKind::DeadlineExceeded)
            },
            Self::Timeout { .. } => true,
            Self::SubscriptionDropped { .. } => true,
            // Non-retryable
            Self::Codec { .. } => false,
            Self::MutationRejected { .. } => false,
            Self::RetryExhausted { .. } => false,
            Self::Config { .. } => false,
            Self::Shutdown => false,
        }
    }

    /// Returns the fault kind if this is a remote fault.
    #[must_use]
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Remote { kind, .. } => Some(*kind),
            Self::Timeout { .. } => Some(FaultKind::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true if the ledger itself declined the call.
    #[must_use]
    pub fn is_reverted(&self) -> bool {
        matches!(self, Self::Remote { kind: FaultKind::Reverted, .. })
            || matches!(self, Self::MutationRejected { .. })
    }

    /// Short classification label for metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Codec { .. } => "codec",
            Self::Remote { kind, .. } => kind.as_str(),
            Self::Timeout { .. } => "timeout",
            Self::MutationRejected { .. } => "rejected",
            Self::SubscriptionDropped { .. } => "subscription_dropped",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Config { .. } => "config",
            Self::Shutdown => "shutdown",
        }
    }
}
