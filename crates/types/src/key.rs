//! Date keys and the codec between calendar dates and ledger keys.
//!
//! A date is keyed on the ledger by the decimal integer `yyyymmdd`
//! (2025-01-01 is `20250101`). The mapping is a bijection between real
//! calendar days in years 1..=9999 and those integers, and it preserves
//! order: `a < b` as dates iff `encode(a) < encode(b)` as integers. A whole
//! visible month is therefore a generated sequence of keys, not a lookup.

use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{CodecError, InvalidDateSnafu, InvalidKeySnafu, Result};

/// Smallest encodable year.
pub const MIN_YEAR: i32 = 1;

/// Largest encodable year (keys stay eight decimal digits).
pub const MAX_YEAR: i32 = 9999;

/// Canonical ledger key for one calendar date.
///
/// Only constructible through validation, so every `DateKey` denotes a real
/// day. Ordering follows the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct DateKey {
    date: NaiveDate,
}

impl DateKey {
    /// Creates a key from a (year, month, day) triple.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidDate`] if the triple is not a real
    /// calendar day or the year is outside `MIN_YEAR..=MAX_YEAR`.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Result<Self> {
        encode(year, month, day)
    }

    /// Creates a key from a calendar date.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidDate`] if the year is out of range.
    pub fn from_date(date: NaiveDate) -> Result<Self> {
        encode(date.year(), date.month(), date.day())
    }

    /// Returns the integer form used on the ledger.
    #[must_use]
    pub fn value(self) -> u64 {
        let year = u64::from(self.date.year().unsigned_abs());
        year * 10_000 + u64::from(self.date.month()) * 100 + u64::from(self.date.day())
    }

    /// Returns the calendar date this key denotes.
    #[must_use]
    pub fn date(self) -> NaiveDate {
        self.date
    }

    /// Human-readable label, e.g. `Wednesday, January 1, 2025`.
    #[must_use]
    pub fn long_label(self) -> String {
        self.date.format("%A, %B %-d, %Y").to_string()
    }

    /// Returns the key of the following day, if it is still encodable.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.date.succ_opt().and_then(|d| Self::from_date(d).ok())
    }
}

/// Encodes a (year, month, day) triple into its ledger key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidDate`] for days that do not exist
/// (2025-02-30, 2025-04-31, 2023-02-29, month 13) and for years outside
/// `MIN_YEAR..=MAX_YEAR`.
pub fn encode(year: i32, month: u32, day: u32) -> Result<DateKey> {
    ensure!((MIN_YEAR..=MAX_YEAR).contains(&year), InvalidDateSnafu { year, month, day });
    let date =
        NaiveDate::from_ymd_opt(year, month, day).ok_or(CodecError::InvalidDate { year, month, day })?;
    Ok(DateKey { date })
}

/// Decodes a raw ledger key back into a [`DateKey`].
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if `raw` is not the encoding of any
/// real calendar day.
pub fn decode(raw: u64) -> Result<DateKey> {
    ensure!(
        (10_000..=99_991_231).contains(&raw),
        InvalidKeySnafu { key: raw, reason: "outside the encodable yyyymmdd range" }
    );

    let year = (raw / 10_000) as i32;
    let month = ((raw / 100) % 100) as u32;
    let day = (raw % 100) as u32;

    encode(year, month, day).map_err(|_| CodecError::InvalidKey {
        key: raw,
        reason: format!("{year:04}-{month:02}-{day:02} is not a calendar day"),
    })
}

/// Returns the keys for every day of a month, in ascending order.
///
/// # Errors
///
/// Returns [`CodecError::InvalidDate`] if the month is not 1-12 or the year
/// is out of range.
pub fn month_keys(year: i32, month: u32) -> Result<Vec<DateKey>> {
    let first = encode(year, month, 1)?;
    let mut keys = Vec::with_capacity(31);
    let mut cursor = Some(first);
    while let Some(key) = cursor {
        if key.date.month() != month {
            break;
        }
        keys.push(key);
        cursor = key.next();
    }
    Ok(keys)
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for DateKey {
    type Err = CodecError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.trim().parse::<u64>().map_err(|e| CodecError::InvalidKey {
            key: 0,
            reason: format!("'{s}' is not an integer: {e}"),
        })?;
        decode(raw)
    }
}

impl TryFrom<u64> for DateKey {
    type Error = CodecError;

    fn try_from(raw: u64) -> std::result::Result<Self, Self::Error> {
        decode(raw)
    }
}

impl From<DateKey> for u64 {
    fn from(key: DateKey) -> Self {
        key.value()
    }
}

impl TryFrom<NaiveDate> for DateKey {
    type Error = CodecError;

    fn try_from(date: NaiveDate) -> std::result::Result<Self, Self::Error> {
        Self::from_date(date)
    }
}
