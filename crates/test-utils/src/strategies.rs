//! Proptest strategies for DateMint domain types.
//!
//! # Usage
//!
//! ```no_run
//! use datemint_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn key_label_is_never_empty(key in strategies::arb_date_key()) {
//!         prop_assert!(!key.long_label().is_empty());
//!     }
//! }
//! ```

use std::collections::BTreeSet;

use chrono::NaiveDate;
use datemint_types::{Address, DateKey, MAX_YEAR, MIN_YEAR, Wei};
use proptest::prelude::*;

/// Generates any valid calendar date in the encodable year range.
pub fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (MIN_YEAR..=MAX_YEAR, 1u32..=12, 1u32..=31)
        .prop_filter_map("no such day", |(year, month, day)| NaiveDate::from_ymd_opt(year, month, day))
}

/// Generates a [`DateKey`] for any valid date.
pub fn arb_date_key() -> impl Strategy<Value = DateKey> {
    arb_date().prop_filter_map("unencodable date", |date| DateKey::from_date(date).ok())
}

/// Generates up to `max` distinct keys, all within one month of 2025.
///
/// Keys are clustered so that generated sets overlap, the way views of
/// one calendar month do.
pub fn arb_month_key_set(max: usize) -> impl Strategy<Value = BTreeSet<DateKey>> {
    (1u32..=12, proptest::collection::btree_set(1u32..=28, 0..=max)).prop_map(|(month, days)| {
        days.into_iter().filter_map(|day| DateKey::from_ymd(2025, month, day).ok()).collect()
    })
}

/// Generates an arbitrary account address.
pub fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::new)
}

/// Generates a payment between zero and one ether, in milli-ether steps.
pub fn arb_payment() -> impl Strategy<Value = Wei> {
    (0u64..=1_000).prop_map(Wei::from_milli_ether)
}
