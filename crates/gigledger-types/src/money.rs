//! Monetary amounts in integer minor currency units.
//!
//! Balances and ledger rows never use floating point. Conversion to and
//! from human-facing major units (e.g. `12.34`) goes through
//! [`rust_decimal::Decimal`] and rejects anything finer than a cent.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::{GigledgerError, Result, constants};

/// A signed amount of money in minor units (cents).
///
/// Ledger rows carry signed amounts: credits are positive, debits negative.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Convert a major-unit decimal (e.g. `12.34`) into minor units.
    ///
    /// # Errors
    /// - `InvalidAmount` if the value has more than two decimal places
    /// - `AmountOverflow` if it does not fit in `i64` minor units
    pub fn from_major(major: Decimal) -> Result<Self> {
        let scaled = major
            .checked_mul(Decimal::from(constants::MINOR_PER_MAJOR))
            .ok_or(GigledgerError::AmountOverflow)?;
        if !scaled.fract().is_zero() {
            return Err(GigledgerError::InvalidAmount {
                reason: format!(
                    "{major} has more than {} decimal places",
                    constants::CURRENCY_SCALE
                ),
            });
        }
        scaled.to_i64().map(Self).ok_or(GigledgerError::AmountOverflow)
    }

    /// The amount in major units with two decimal places.
    #[must_use]
    pub fn to_major(self) -> Decimal {
        Decimal::new(self.0, constants::CURRENCY_SCALE)
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(GigledgerError::AmountOverflow)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(GigledgerError::AmountOverflow)
    }

    pub fn checked_neg(self) -> Result<Self> {
        self.0
            .checked_neg()
            .map(Self)
            .ok_or(GigledgerError::AmountOverflow)
    }

    /// Sum an iterator of amounts, failing on overflow instead of wrapping.
    pub fn checked_sum<I: IntoIterator<Item = Self>>(iter: I) -> Result<Self> {
        iter.into_iter()
            .try_fold(Self::ZERO, |acc, amount| acc.checked_add(amount))
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Reject zero and negative amounts for operations that move money.
    ///
    /// # Errors
    /// Returns `InvalidAmount` naming the operation.
    pub fn ensure_positive(self, operation: &str) -> Result<Self> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(GigledgerError::InvalidAmount {
                reason: format!("{operation} amount must be positive, got {self}"),
            })
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}
