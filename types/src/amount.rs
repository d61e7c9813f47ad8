use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::MINOR_PER_MAJOR;

/// Fixed-point currency amount in minor units.
///
/// Amounts are unsigned; an operation that would take a balance below zero
/// fails at `checked_sub` instead of producing a negative value.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    pub const fn from_major(major: u64) -> Self {
        Self(major * MINOR_PER_MAJOR)
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Portion of this amount in basis points, rounded down.
    pub fn bps(self, basis_points: u64) -> Amount {
        let part = (self.0 as u128)
            .saturating_mul(basis_points as u128)
            .checked_div(10_000)
            .unwrap_or(0);
        Amount(u64::try_from(part).unwrap_or(u64::MAX))
    }

    /// Ratio `self / of` expressed in percent (0.0 when `of` is zero).
    pub fn percent_of(self, of: Amount) -> f64 {
        if of.0 == 0 {
            return 0.0;
        }
        self.0 as f64 * 100.0 / of.0 as f64
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02}",
            self.0 / MINOR_PER_MAJOR,
            self.0 % MINOR_PER_MAJOR
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount {0:?}: expected a non-negative decimal with at most two fraction digits")]
pub struct ParseAmountError(String);

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Parse `"12"`, `"12.5"` or `"12.50"`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAmountError(value.to_string());
        let (major, minor) = match value.split_once('.') {
            Some((_, "")) => return Err(invalid()),
            Some(parts) => parts,
            None => (value, ""),
        };
        if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if minor.len() > 2 || !minor.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let major: u64 = major.parse().map_err(|_| invalid())?;
        let minor: u64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => minor.parse().map_err(|_| invalid())?,
        };
        major
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|major| major.checked_add(minor))
            .map(Amount)
            .ok_or_else(invalid)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}
