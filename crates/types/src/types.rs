//! Value types shared between the SDK and ledger implementations.
//!
//! - [`Address`]: a 20-byte account identifier, rendered as `0x`-prefixed hex
//! - [`Wei`]: an amount in the ledger's smallest currency unit
//! - [`TxHash`]: a 32-byte handle for a submitted mutation

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Generates a fixed-size byte newtype with `0x`-prefixed hex formatting.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - `new()` constructor and `as_bytes()` accessor
/// - `Display`/`FromStr` in lowercase hex with a `0x` prefix
macro_rules! define_hex_id {
    (
        $(#[$meta:meta])*
        $name:ident, $len:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
            Serialize, Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; $len]);

        impl $name {
            /// Creates a new value from raw bytes.
            #[inline]
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            #[inline]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
                let invalid = |reason: String| CodecError::InvalidAddress {
                    input: s.to_owned(),
                    reason,
                };
                if digits.len() != $len * 2 {
                    return Err(invalid(format!(
                        "expected {} hex digits, got {}",
                        $len * 2,
                        digits.len()
                    )));
                }
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(digits, &mut bytes).map_err(|e| invalid(e.to_string()))?;
                Ok(Self(bytes))
            }
        }

        impl TryFrom<String> for $name {
            type Error = CodecError;

            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_string()
            }
        }
    };
}

define_hex_id!(
    /// Account address on the ledger.
    ///
    /// The current actor (the connected wallet) is never ambient state in the
    /// SDK: it is passed explicitly wherever ownership matters.
    Address, 20
);

define_hex_id!(
    /// Handle for a submitted mutation, used to await its receipt.
    TxHash, 32
);

/// Amount in the ledger's smallest currency unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Wei(u128);

impl Wei {
    /// Wei per ether.
    pub const PER_ETHER: u128 = 1_000_000_000_000_000_000;

    /// Creates an amount from raw wei.
    #[inline]
    pub const fn new(wei: u128) -> Self {
        Self(wei)
    }

    /// Creates an amount from thousandths of an ether (`10` is 0.01 ether).
    #[inline]
    pub const fn from_milli_ether(milli: u64) -> Self {
        Self(milli as u128 * (Self::PER_ETHER / 1_000))
    }

    /// Returns the raw wei value.
    #[inline]
    pub const fn value(self) -> u128 {
        self.0
    }

    /// Returns the amount above `price`, or zero.
    #[must_use]
    pub const fn excess_over(self, price: Wei) -> Wei {
        Wei(self.0.saturating_sub(price.0))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

impl From<u128> for Wei {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_roundtrip() {
        let addr = Address::new([0xab; 20]);
        let text = addr.to_string();
        assert_eq!(text, format!("0x{}", "ab".repeat(20)));
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_accepts_mixed_case_without_prefix() {
        let addr: Address = "BBb811040c8D20aC5F30467BC10a4795d8292D05".parse().unwrap();
        assert_eq!(addr.to_string(), "0xbbb811040c8d20ac5f30467bc10a4795d8292d05");
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert!(matches!(err, CodecError::InvalidAddress { .. }));
    }

    #[test]
    fn test_address_rejects_non_hex() {
        assert!(format!("0x{}", "zz".repeat(20)).parse::<Address>().is_err());
    }

    #[test]
    fn test_tx_hash_length() {
        let hash = TxHash::new([1; 32]);
        assert_eq!(hash.to_string().len(), 2 + 64);
    }

    #[test]
    fn test_wei_from_milli_ether() {
        assert_eq!(Wei::from_milli_ether(10).value(), 10_000_000_000_000_000);
        assert_eq!(Wei::from_milli_ether(1_000).value(), Wei::PER_ETHER);
    }

    #[test]
    fn test_wei_excess_over() {
        let price = Wei::from_milli_ether(10);
        assert_eq!(Wei::from_milli_ether(15).excess_over(price), Wei::from_milli_ether(5));
        assert_eq!(Wei::from_milli_ether(5).excess_over(price), Wei::new(0));
    }
}
