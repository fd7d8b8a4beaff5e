//! Core types for the DateMint SDK.
//!
//! This crate provides the value types shared by the SDK and by ledger
//! implementations:
//! - [`DateKey`] and the key codec (`yyyymmdd` integer keys for dates)
//! - [`Address`], [`TxHash`] and [`Wei`]
//! - Codec error types using snafu

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod key;
pub mod types;

pub use error::{CodecError, Result};
pub use key::{DateKey, MAX_YEAR, MIN_YEAR, decode, encode, month_keys};
pub use types::{Address, TxHash, Wei};
