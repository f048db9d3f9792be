//! Domain error type shared by every inventory operation.

use thiserror::Error;

/// Errors raised by the lot ledger, the allocation engine, and the rules
/// layered on top of them (promotions, cart, orders, receiving).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Malformed input: non-positive quantity, negative price, missing field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown product, lot, promotion, or order reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Overlapping promotion reservation, duplicate lot number, or a state
    /// transition that already happened.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Allocation could not be fully satisfied.
    #[error("insufficient stock: short by {shortage} units")]
    InsufficientStock {
        /// Units that could not be supplied.
        shortage: i64,
    },

    /// The requested promotion has no reserved lot left with stock.
    #[error("no eligible lots: {0}")]
    NoEligibleLots(String),

    /// Excluding promotion-reserved lots leaves nothing to sell at regular price.
    #[error("no sellable stock: {0}")]
    NoSellableStock(String),
}

impl InventoryError {
    /// Whether the caller can fix the request (as opposed to stock simply
    /// running out).
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_) | Self::Conflict(_))
    }
}
