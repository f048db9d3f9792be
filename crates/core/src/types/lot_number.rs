//! Lot number type.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Identifier of a lot, unique within its product.
///
/// Generated numbers look like `LOT001`, `LOT002`, ... (three digits minimum,
/// widening past `LOT999`). Receiving flows may also supply their own number,
/// e.g. a supplier batch code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotNumber(String);

impl LotNumber {
    /// Maximum accepted length.
    pub const MAX_LENGTH: usize = 64;

    /// Parse a caller-supplied lot number.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` if the trimmed input is empty or
    /// longer than [`Self::MAX_LENGTH`].
    pub fn parse(s: &str) -> Result<Self, InventoryError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InventoryError::Validation(
                "lot number cannot be empty".to_string(),
            ));
        }
        if trimmed.len() > Self::MAX_LENGTH {
            return Err(InventoryError::Validation(format!(
                "lot number must be at most {} characters",
                Self::MAX_LENGTH
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The generated lot number for a ledger sequence value.
    #[must_use]
    pub fn from_sequence(seq: u32) -> Self {
        Self(format!("LOT{seq:03}"))
    }

    /// Borrow as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LotNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sequence_pads_to_three_digits() {
        assert_eq!(LotNumber::from_sequence(1).as_str(), "LOT001");
        assert_eq!(LotNumber::from_sequence(42).as_str(), "LOT042");
        assert_eq!(LotNumber::from_sequence(1234).as_str(), "LOT1234");
    }

    #[test]
    fn test_parse_trims() {
        assert_eq!(LotNumber::parse("  B-77 ").unwrap().as_str(), "B-77");
    }

    #[test]
    fn test_parse_rejects_empty_and_long() {
        assert!(LotNumber::parse("   ").is_err());
        assert!(LotNumber::parse(&"x".repeat(65)).is_err());
    }
}
