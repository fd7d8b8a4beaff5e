//! Shared test utilities for DateMint crates.
//!
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`init_test_tracing`] - Captured log output for tests
//! - [`strategies`] - Proptest generators for domain types

#![deny(unsafe_code)]

mod assertions;
pub use assertions::assert_eventually;

mod logging;
pub use logging::init_test_tracing;

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use proptest::prelude::*;

    use super::*;

    // ============================================
    // assert_eventually tests
    // ============================================

    #[tokio::test]
    async fn test_assert_eventually_immediate_success() {
        assert!(assert_eventually(Duration::from_millis(100), || true).await);
    }

    #[tokio::test]
    async fn test_assert_eventually_delayed_success() {
        let counter = AtomicUsize::new(0);
        let result = assert_eventually(Duration::from_millis(500), || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(result);
        assert!(counter.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_assert_eventually_timeout() {
        assert!(!assert_eventually(Duration::from_millis(50), || false).await);
    }

    #[tokio::test]
    async fn test_assert_eventually_sees_background_task() {
        let hits = Arc::new(AtomicUsize::new(0));
        let writer = hits.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer.store(7, Ordering::SeqCst);
        });
        assert!(
            assert_eventually(Duration::from_millis(300), || hits.load(Ordering::SeqCst) == 7)
                .await
        );
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }

    // ============================================
    // Strategy tests
    // ============================================

    proptest! {
        #[test]
        fn prop_date_keys_round_trip_through_dates(key in strategies::arb_date_key()) {
            prop_assert_eq!(datemint_types::DateKey::from_date(key.date()).unwrap(), key);
        }

        #[test]
        fn prop_month_key_sets_stay_in_one_month(keys in strategies::arb_month_key_set(10)) {
            prop_assert!(keys.len() <= 10);
            let months: std::collections::BTreeSet<u64> =
                keys.iter().map(|k| k.value() / 100).collect();
            prop_assert!(months.len() <= 1);
        }
    }
}
