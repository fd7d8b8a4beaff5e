//! Retry logic with exponential backoff.
//!
//! Provides a retry wrapper using the `backon` crate with a configurable
//! [`RetryPolicy`]. Retries only ever happen inside a single call; nothing
//! is retried in the background.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{ExponentialBuilder, Retryable};
use rand::Rng;

use crate::{
    config::RetryPolicy,
    error::{Result, SdkError},
};

/// Execute an async operation with retry using exponential backoff.
///
/// The operation is retried according to the provided [`RetryPolicy`] if
/// it fails with a retryable error (as determined by [`SdkError::is_retryable`]).
///
/// # Retry Strategy
///
/// - **Exponential backoff**: `initial_backoff * multiplier^(attempt-1)`
/// - **Jitter**: ±`jitter` randomness applied to each delay
/// - **Cap**: Backoff capped at `max_backoff`
/// - **Termination**: After `max_attempts` failed attempts
///
/// With a single-attempt policy the original error is returned unchanged.
///
/// # Example
///
/// ```ignore
/// use datemint_sdk::{with_retry, RetryPolicy, SdkError};
///
/// let policy = RetryPolicy::default();
/// let result = with_retry(&policy, || async {
///     Ok::<_, SdkError>("success")
/// }).await;
/// ```
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon counts retries, not attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;
    if max_retries == 0 {
        let mut operation = operation;
        return operation().await;
    }

    let backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries);

    let attempt_count = AtomicU32::new(0);
    let jitter_factor = policy.jitter;

    operation
        .retry(backoff)
        .sleep(move |dur| tokio::time::sleep(apply_jitter(dur, jitter_factor)))
        .when(|e: &SdkError| e.is_retryable())
        .notify(|err: &SdkError, dur: Duration| {
            let attempt = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                attempt = attempt,
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
        })
        .await
        .map_err(|e| {
            if e.is_retryable() {
                SdkError::RetryExhausted {
                    attempts: attempt_count.load(Ordering::SeqCst) + 1,
                    last_error: e.to_string(),
                }
            } else {
                e
            }
        })
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`
/// so that many clients reconnecting at once spread out.
pub(crate) fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

/// Backoff before reconnect attempt `attempt` (1-based), capped and jittered.
pub(crate) fn backoff_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as f64;
    let delay = policy.initial_backoff.as_secs_f64() * policy.multiplier.powf(exponent);
    let capped = Duration::from_secs_f64(delay.min(policy.max_backoff.as_secs_f64()));
    apply_jitter(capped, policy.jitter)
}
