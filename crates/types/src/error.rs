//! Error types for DateMint core types using snafu.
//!
//! Every error here is a caller error: the input does not denote a valid
//! value. They are surfaced synchronously and never retried.

use snafu::Snafu;

/// Result type for codec and parsing operations.
pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Errors produced while encoding, decoding, or parsing core types.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// The (year, month, day) triple is not a real calendar day.
    #[snafu(display("invalid date {year:04}-{month:02}-{day:02}"))]
    InvalidDate {
        /// Calendar year.
        year: i32,
        /// Calendar month (1-12).
        month: u32,
        /// Day of month.
        day: u32,
    },

    /// The integer was never produced by key encoding.
    #[snafu(display("invalid date key {key}: {reason}"))]
    InvalidKey {
        /// Raw key value.
        key: u64,
        /// Why the key was rejected.
        reason: String,
    },

    /// An address string could not be parsed.
    #[snafu(display("invalid address '{input}': {reason}"))]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },
}

impl CodecError {
    /// Returns true for date and key errors, as opposed to address errors.
    #[must_use]
    pub fn is_date_error(&self) -> bool {
        matches!(self, Self::InvalidDate { .. } | Self::InvalidKey { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_date_display_is_zero_padded() {
        let err = CodecError::InvalidDate { year: 2025, month: 2, day: 30 };
        assert_eq!(err.to_string(), "invalid date 2025-02-30");
    }

    #[test]
    fn test_is_date_error() {
        assert!(CodecError::InvalidKey { key: 1, reason: "x".to_owned() }.is_date_error());
        assert!(
            !CodecError::InvalidAddress { input: "0x".to_owned(), reason: "short".to_owned() }
                .is_date_error()
        );
    }
}
