//! Month view walkthrough against the in-memory ledger.
//!
//! Run: `RUST_LOG=datemint_sdk=debug cargo run --example month_view`
//!
//! This example shows:
//! - Building a cache and showing one calendar month
//! - Reading the month in a single batched round trip
//! - Minting a date and seeing the view update at once
//! - Another client's mint arriving through the push channel
//! - A rejected mint and its verbatim reason

// Examples are allowed to use expect/unwrap for brevity
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::disallowed_methods)]

use std::{sync::Arc, time::Duration};

use datemint_sdk::{
    Address, Availability, CacheConfig, ChannelState, DateKey, MintOutcome, Result, StatusCache, Wei,
    mock::MockLedger,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let ledger = Arc::new(MockLedger::new());
    let neighbour = Address::new([0xaa; 20]);
    let me = Address::new([0x01; 20]);

    // -------------------------------------------------------------------------
    // 1. Build the cache and show February
    // -------------------------------------------------------------------------
    let config = CacheConfig::builder().freshness(Duration::from_secs(60)).build()?;
    let cache = StatusCache::builder().ledger(ledger.clone()).config(config).build()?;

    let keys = cache.show_month(2025, 2)?;
    ledger.mint_externally(keys[0], neighbour)?;

    let entries = cache.get_range(&keys).await?;
    println!("February 2025, {} dates, {} ledger round trips", entries.len(), ledger.status_read_count());
    render(&cache, &keys, &me);

    // -------------------------------------------------------------------------
    // 2. Mint Valentine's Day
    // -------------------------------------------------------------------------
    let admission = cache.admission().await?;
    println!("\nMint price: {}, open: {}", admission.price, admission.is_open_at(chrono::Utc::now()));

    match cache.mutate(keys[13], &me, admission.price).await {
        MintOutcome::Confirmed { tx, .. } => println!("Minted {} in {tx}", keys[13].long_label()),
        other => println!("Mint did not confirm: {other:?}"),
    }

    // -------------------------------------------------------------------------
    // 3. Another client mints while we watch
    // -------------------------------------------------------------------------
    let mut state = cache.channel().watch_state();
    state.wait_for(|s| *s == ChannelState::Connected).await.ok();
    ledger.mint_externally(keys[27], neighbour)?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!();
    render(&cache, &keys, &me);

    // -------------------------------------------------------------------------
    // 4. Try a date that is already taken
    // -------------------------------------------------------------------------
    if let MintOutcome::Rejected { reason } = cache.mutate(keys[0], &me, admission.price).await {
        println!("\n{} rejected: {reason}", keys[0].long_label());
    }
    let underpaid = cache.mutate(keys[1], &me, Wei::new(1)).await;
    println!("{} with 1 wei: {underpaid:?}", keys[1].long_label());

    cache.shutdown();
    Ok(())
}

fn render(cache: &StatusCache, keys: &[DateKey], me: &Address) {
    for key in keys {
        let Some(entry) = cache.entry(*key) else { continue };
        let mark = match entry.availability() {
            Availability::Available => "free",
            Availability::Taken { .. } if entry.is_owned_by(me) => "mine",
            Availability::Taken { .. } => "taken",
            Availability::Unknown => "?",
        };
        println!("  {key}  {mark}");
    }
}
