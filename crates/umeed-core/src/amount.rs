//! # Fixed-Point Amounts
//!
//! Prices and estimated CO₂ savings are decimals with two places. They are
//! held as integer hundredths so that sums, comparisons, and persistence are
//! exact. On the wire an [`Amount`] is always a decimal string (`"1499.50"`);
//! JSON numbers are rejected so that no value ever passes through a float.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Largest representable value: ten significant digits, two after the point.
pub const MAX_HUNDREDTHS: i64 = 99_999_999_99;

/// A non-negative decimal amount with two fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build an amount from integer hundredths (e.g. paise, or grams × 10).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for negative values or
    /// values above [`MAX_HUNDREDTHS`].
    pub fn from_hundredths(hundredths: i64) -> Result<Self, ValidationError> {
        if !(0..=MAX_HUNDREDTHS).contains(&hundredths) {
            return Err(ValidationError::InvalidAmount(hundredths.to_string()));
        }
        Ok(Self(hundredths))
    }

    /// Parse a decimal string such as `"12"`, `"12.5"`, or `"12.50"`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] when the string has a sign,
    /// more than two fractional digits, non-digit characters, or overflows.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidAmount(value.to_string());
        let s = value.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty()
            || whole.len() > 8
            || frac.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
            || (s.contains('.') && frac.is_empty())
        {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        Self::from_hundredths(whole * 100 + frac)
    }

    pub fn hundredths(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Approximate value for chart rendering only; never feed it back into
    /// arithmetic.
    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Saturating sum, clamped at [`MAX_HUNDREDTHS`].
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount((self.0 + other.0).min(MAX_HUNDREDTHS))
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

impl std::str::FromStr for Amount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Amount {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(a: Amount) -> Self {
        a.to_string()
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
