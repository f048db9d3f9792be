//! Non-negative decimal money amounts.
//!
//! The shop trades in a single currency, so a price is just a decimal amount
//! in the currency's standard unit. Negative amounts are rejected at
//! construction; arithmetic helpers never produce one.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// A non-negative amount of money (selling price, unit cost, discount).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price, rejecting negative amounts.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` if `amount` is negative.
    pub fn new(amount: Decimal) -> Result<Self, InventoryError> {
        if amount < Decimal::ZERO {
            return Err(InventoryError::Validation(format!(
                "price must not be negative (got {amount})"
            )));
        }
        Ok(Self(amount))
    }

    /// Underlying decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Price of `quantity` items at this price.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` if the amount does not fit.
    pub fn times(&self, quantity: i64) -> Result<Decimal, InventoryError> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(|| too_large(format_args!("{quantity} x {}", self.0)))
    }

    /// Split a per-pack amount into a per-unit amount.
    ///
    /// `pack_size` is always at least 1 for a valid product.
    #[must_use]
    pub fn per_unit_of(&self, pack_size: u32) -> Self {
        Self(self.0 / Decimal::from(pack_size.max(1)))
    }

    /// Scale a per-unit amount up to a pack of `pack_size` units.
    #[must_use]
    pub fn per_pack_of(&self, pack_size: u32) -> Self {
        Self(self.0 * Decimal::from(pack_size.max(1)))
    }

    /// Difference `self - other`, floored at zero.
    #[must_use]
    pub fn saturating_sub(&self, other: Self) -> Self {
        if other.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - other.0)
        }
    }
}

/// Add up amounts, failing on the first error or on overflow.
///
/// # Errors
///
/// Returns the first error in `amounts`, or `InventoryError::Validation` if
/// the sum does not fit.
pub fn sum_amounts<I>(amounts: I) -> Result<Decimal, InventoryError>
where
    I: IntoIterator<Item = Result<Decimal, InventoryError>>,
{
    amounts.into_iter().try_fold(Decimal::ZERO, |acc, amount| {
        let amount = amount?;
        acc.checked_add(amount)
            .ok_or_else(|| too_large(format_args!("{acc} + {amount}")))
    })
}

fn too_large(what: fmt::Arguments<'_>) -> InventoryError {
    InventoryError::Validation(format!("amount too large: {what}"))
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = InventoryError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Self::new(amount)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let amount = <Decimal as Deserialize>::deserialize(deserializer)?;
        Self::new(amount).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_price_rejected() {
        assert!(matches!(
            Price::new(Decimal::new(-1, 2)),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_price_allowed() {
        assert_eq!(Price::new(Decimal::ZERO).unwrap(), Price::ZERO);
    }

    #[test]
    fn test_pack_conversions() {
        let pack = Price::new(Decimal::new(12000, 2)).unwrap();
        assert_eq!(pack.per_unit_of(12).amount(), Decimal::new(1000, 2));
        let unit = Price::new(Decimal::new(250, 2)).unwrap();
        assert_eq!(unit.per_pack_of(6).amount(), Decimal::new(1500, 2));
    }

    #[test]
    fn test_overflowing_amounts_are_rejected() {
        let unit = Price::new(Decimal::new(250, 2)).unwrap();
        assert_eq!(unit.times(4).unwrap(), Decimal::TEN);

        let huge = Price::new(Decimal::MAX).unwrap();
        assert!(matches!(huge.times(2), Err(InventoryError::Validation(_))));
        assert!(matches!(
            sum_amounts([Ok(Decimal::MAX), Ok(Decimal::ONE)]),
            Err(InventoryError::Validation(_))
        ));
        assert_eq!(
            sum_amounts([unit.times(2), unit.times(6)]).unwrap(),
            Decimal::new(2000, 2)
        );
    }

    #[test]
    fn test_deserialize_rejects_negative() {
        let result: Result<Price, _> = serde_json::from_str("\"-3.00\"");
        assert!(result.is_err());
        let ok: Price = serde_json::from_str("\"3.50\"").unwrap();
        assert_eq!(ok.to_string(), "3.50");
    }
}
