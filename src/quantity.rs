//! Source quantities as delivered by the data source.
//!
//! Quantities arrive as decimal strings (`"1"`, `"1.00"`, `"2.5"`). The fixed
//! width formats only carry whole units, so values are parsed with
//! `rust_decimal` and truncated toward zero when written.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// A non-binary decimal quantity read from a transaction row.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use sus_billing::Quantity;
///
/// let qty = Quantity::from_str("3.00").unwrap();
/// assert_eq!(qty.whole_units(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Zero value.
    pub const ZERO: Self = Quantity(Decimal::ZERO);

    /// Creates a quantity from a whole number of units.
    pub fn from_units(units: u64) -> Self {
        Quantity(Decimal::from(units))
    }

    /// Whole units, truncated toward zero. Negative quantities count as zero.
    pub fn whole_units(&self) -> u64 {
        if self.0.is_sign_negative() {
            return 0;
        }
        self.0.trunc().to_u64().unwrap_or(0)
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Quantity {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Some sources export with a decimal comma
        let trimmed = s.trim().replace(',', ".");
        Decimal::from_str(&trimmed).map(Quantity)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Quantity::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_units_truncates() {
        assert_eq!(Quantity::from_str("1.00").unwrap().whole_units(), 1);
        assert_eq!(Quantity::from_str("2.9").unwrap().whole_units(), 2);
        assert_eq!(Quantity::from_str("  30  ").unwrap().whole_units(), 30);
    }

    #[test]
    fn test_decimal_comma() {
        assert_eq!(Quantity::from_str("4,0").unwrap().whole_units(), 4);
    }

    #[test]
    fn test_negative_counts_as_zero() {
        assert_eq!(Quantity::from_str("-3").unwrap().whole_units(), 0);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Quantity::from_str("abc").is_err());
    }

    #[test]
    fn test_display_is_normalized() {
        assert_eq!(Quantity::from_str("1.500").unwrap().to_string(), "1.5");
        assert_eq!(Quantity::from_units(7).to_string(), "7");
        assert!(Quantity::ZERO.is_zero());
    }
}
