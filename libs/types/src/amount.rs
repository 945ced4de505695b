//! Monetary amounts
//!
//! Amounts are non-negative integers in the smallest currency unit (for an
//! 18-decimal currency, 1 unit = 10^-18 of the display unit). All arithmetic
//! is checked. Conversion to and from display units goes through
//! `rust_decimal` so no floating-point rounding ever touches a balance.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypesError;

/// Decimal places of the native ledger currency.
pub const NATIVE_DECIMALS: u32 = 18;

/// Largest scale `rust_decimal` can represent.
const MAX_DECIMALS: u32 = 28;

/// Non-negative amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn new(base_units: u128) -> Self {
        Self(base_units)
    }

    pub fn base_units(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Sum a sequence of amounts, returning `None` on overflow.
    pub fn checked_sum<I>(amounts: I) -> Option<Amount>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(amount))
    }

    /// Big-endian 32-byte encoding (the `uint256` word layout).
    pub fn to_be_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&self.0.to_be_bytes());
        word
    }

    /// Convert a display-unit decimal (e.g. `1.5` ether) to base units.
    pub fn from_decimal(value: Decimal, decimals: u32) -> Result<Self, TypesError> {
        if decimals > MAX_DECIMALS {
            return Err(TypesError::UnsupportedDecimals(decimals));
        }
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypesError::OutOfRange(value.to_string()));
        }
        if value.normalize().scale() > decimals {
            return Err(TypesError::TooPrecise {
                value: value.to_string(),
                decimals,
            });
        }

        let factor = Decimal::try_from_i128_with_scale(10i128.pow(decimals), 0)
            .map_err(|e| TypesError::OutOfRange(e.to_string()))?;
        let scaled = value
            .checked_mul(factor)
            .ok_or_else(|| TypesError::OutOfRange(value.to_string()))?;

        scaled
            .trunc()
            .to_u128()
            .map(Amount)
            .ok_or_else(|| TypesError::OutOfRange(value.to_string()))
    }

    /// Parse a display-unit string such as `"10"` or `"0.25"`.
    pub fn parse_units(text: &str, decimals: u32) -> Result<Self, TypesError> {
        let value = Decimal::from_str(text.trim())
            .map_err(|e| TypesError::InvalidAmount(format!("{}: {}", text, e)))?;
        Self::from_decimal(value, decimals)
    }

    /// Render in display units. Fails for amounts beyond the 96-bit
    /// mantissa `rust_decimal` supports.
    pub fn to_decimal(&self, decimals: u32) -> Result<Decimal, TypesError> {
        if decimals > MAX_DECIMALS {
            return Err(TypesError::UnsupportedDecimals(decimals));
        }
        let signed =
            i128::try_from(self.0).map_err(|_| TypesError::OutOfRange(self.0.to_string()))?;
        Decimal::try_from_i128_with_scale(signed, decimals)
            .map(|d| d.normalize())
            .map_err(|_| TypesError::OutOfRange(self.0.to_string()))
    }

    /// Display-unit string, e.g. `"1.5"` for 1.5 ether at 18 decimals.
    pub fn format_units(&self, decimals: u32) -> Result<String, TypesError> {
        Ok(self.to_decimal(decimals)?.to_string())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value as u128)
    }
}
