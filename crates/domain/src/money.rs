//! Fixed-point money.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::DomainError;

/// Number of fraction digits carried by every amount.
const SCALE: u32 = 2;

/// Monetary amount with exactly two fraction digits.
///
/// Serialised as a decimal string such as `"200.00"` so no client ever sees
/// a binary float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

impl Money {
    /// Creates an amount, rounding half away from zero to two digits.
    pub fn new(amount: Decimal) -> Self {
        let mut amount = amount.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        amount.rescale(SCALE);
        Self(amount)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(Decimal::new(0, SCALE))
    }

    /// Creates an amount from the provider's minor units (paise, cents).
    pub fn from_minor_units(minor: i64) -> Self {
        Self(Decimal::new(minor, SCALE))
    }

    /// Returns the amount in minor units, or `None` if it does not fit.
    pub fn to_minor_units(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED).trunc().to_i64()
    }

    /// Returns the underlying decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Multiplies by a quantity.
    pub fn times(&self, quantity: u32) -> Money {
        Money::new(self.0 * Decimal::from(quantity))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount =
            Decimal::from_str(s.trim()).map_err(|_| DomainError::InvalidAmount(s.to_string()))?;
        Ok(Money::new(amount))
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money::new(amount)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money::new(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money::new(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_always_has_two_digits() {
        assert_eq!(Money::new(Decimal::from(200)).to_string(), "200.00");
        assert_eq!(Money::zero().to_string(), "0.00");
        assert_eq!("19.9".parse::<Money>().unwrap().to_string(), "19.90");
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!("1.005".parse::<Money>().unwrap().to_string(), "1.01");
        assert_eq!("1.004".parse::<Money>().unwrap().to_string(), "1.00");
    }

    #[test]
    fn times_and_sum() {
        let price: Money = "100.00".parse().unwrap();
        let total: Money = [price.times(2), "0.50".parse().unwrap()].into_iter().sum();
        assert_eq!(total.to_string(), "200.50");
    }

    #[test]
    fn minor_units_round_trip() {
        let amount = Money::from_minor_units(20000);
        assert_eq!(amount.to_string(), "200.00");
        assert_eq!(amount.to_minor_units(), Some(20000));
    }

    #[test]
    fn serializes_as_string() {
        let amount: Money = "200".parse().unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"200.00\"");

        let back: Money = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(back.to_string(), "12.50");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "twelve".parse::<Money>(),
            Err(DomainError::InvalidAmount(_))
        ));
    }
}
