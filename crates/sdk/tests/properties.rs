//! Property tests: whatever the ledger holds, a fresh cache read agrees.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::sync::Arc;

use datemint_sdk::{Availability, DateKey, StatusCache, Wei, mock::MockLedger};
use datemint_test_utils::strategies::{arb_address, arb_month_key_set};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_cache_matches_ledger(
        shown in arb_month_key_set(12),
        taken_mask in any::<u16>(),
        owner in arb_address(),
    ) {
        let keys: Vec<DateKey> = shown.into_iter().collect();
        let taken: Vec<DateKey> = keys
            .iter()
            .enumerate()
            .filter(|(i, _)| taken_mask & (1u16 << *i) != 0)
            .map(|(_, k)| *k)
            .collect();

        let entries = runtime().block_on(async {
            let ledger = Arc::new(MockLedger::new());
            for key in &taken {
                ledger.mint_externally(*key, owner).unwrap();
            }
            let cache = StatusCache::builder().ledger(ledger).build().unwrap();
            let entries = cache.get_range(&keys).await.unwrap();
            cache.shutdown();
            entries
        });

        prop_assert_eq!(entries.len(), keys.len());
        for entry in entries {
            let expected = if taken.contains(&entry.key) {
                Availability::Taken { owner: Some(owner) }
            } else {
                Availability::Available
            };
            prop_assert_eq!(entry.availability(), expected);
        }
    }

    #[test]
    fn prop_confirmed_mint_is_owned(
        shown in arb_month_key_set(8).prop_filter("need a key", |s| !s.is_empty()),
        actor in arb_address(),
    ) {
        let keys: Vec<DateKey> = shown.into_iter().collect();
        let target = keys[keys.len() / 2];

        let owned = runtime().block_on(async {
            let ledger = Arc::new(MockLedger::new());
            let cache = StatusCache::builder().ledger(ledger).build().unwrap();
            cache.get_range(&keys).await.unwrap();
            let outcome = cache.mutate(target, &actor, Wei::from_milli_ether(10)).await;
            assert!(outcome.is_confirmed(), "{outcome:?}");
            let owned = cache.is_owned_by(target, &actor);
            cache.shutdown();
            owned
        });

        prop_assert!(owned);
    }
}
