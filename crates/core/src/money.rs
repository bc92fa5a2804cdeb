//! Monetary amounts in the smallest currency unit.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use serde::{Deserialize, Serialize};

use crate::value_object::ValueObject;

/// Non-negative amount in minor units (cents). Single currency per storefront.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Whole currency units, e.g. `Money::from_units(63)` is 63.00.
    pub const fn from_units(units: u64) -> Self {
        Self(units * 100)
    }

    pub const fn cents(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Clamps at zero; amounts never go negative.
    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn times(self, quantity: u32) -> Money {
        Money(self.0.saturating_mul(u64::from(quantity)))
    }

    /// `percent`% of this amount, rounded down to the cent.
    pub fn percent(self, percent: u8) -> Money {
        Money(self.0.saturating_mul(u64::from(percent)) / 100)
    }

    /// Whole currency units, rounded up (used for loyalty point requirements).
    pub fn units_ceil(self) -> u64 {
        self.0.div_ceil(100)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_cents(6300).to_string(), "63.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn subtraction_clamps_at_zero() {
        assert_eq!(Money::from_cents(100).saturating_sub(Money::from_cents(250)), Money::ZERO);
    }

    #[test]
    fn percent_rounds_down_and_units_round_up() {
        assert_eq!(Money::from_cents(999).percent(10), Money::from_cents(99));
        assert_eq!(Money::from_cents(6301).units_ceil(), 64);
        assert_eq!(Money::from_cents(6300).units_ceil(), 63);
    }
}
