//! Polling assertions for async tests.

use std::time::Duration;

use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Background tasks (stream pumps, invalidation workers, deferred flushes)
/// settle on their own schedule; polling keeps tests free of fixed sleeps.
/// Returns whether the condition held, checked one last time at the
/// deadline.
///
/// # Example
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use datemint_test_utils::assert_eventually;
///
/// # async fn example() {
/// let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
/// let flag = seen.clone();
/// tokio::spawn(async move {
///     tokio::time::sleep(Duration::from_millis(20)).await;
///     flag.store(true, std::sync::atomic::Ordering::SeqCst);
/// });
///
/// assert!(
///     assert_eventually(Duration::from_millis(500), || {
///         seen.load(std::sync::atomic::Ordering::SeqCst)
///     })
///     .await
/// );
/// # }
/// ```
pub async fn assert_eventually<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}
