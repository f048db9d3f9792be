//! Status enums for lots, orders, payments, and purchase orders.
//!
//! Enums that live in their own database column derive `sqlx::Type` (with the
//! `postgres` feature) and map to a `PostgreSQL` enum type of the same name.
//! Enums that only appear inside embedded JSON documents (lot status, stock
//! commitment) are serde-only.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InventoryError;

/// Lifecycle state of a lot.
///
/// ```text
/// active --(qty reaches 0)--> depleted --(restore, qty > 0)--> active
/// active --(expiry sweep)--> expired
/// any ----(dispose)--------> disposed   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LotStatus {
    #[default]
    Active,
    Depleted,
    Expired,
    Disposed,
}

impl LotStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Depleted => "depleted",
            Self::Expired => "expired",
            Self::Disposed => "disposed",
        }
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a cart or order line is sold by the single unit or by the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "sale_unit", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum SaleUnit {
    #[default]
    Unit,
    Pack,
}

impl SaleUnit {
    /// Convert a line quantity into base units.
    ///
    /// # Errors
    ///
    /// Returns `InventoryError::Validation` if the unit count does not fit
    /// in an `i64`.
    pub fn checked_units(self, quantity: i64, pack_size: u32) -> Result<i64, InventoryError> {
        match self {
            Self::Unit => Ok(quantity),
            Self::Pack => quantity.checked_mul(i64::from(pack_size)).ok_or_else(|| {
                InventoryError::Validation(format!(
                    "{quantity} packs of {pack_size} is too many units"
                ))
            }),
        }
    }
}

impl fmt::Display for SaleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "unit"),
            Self::Pack => write!(f, "pack"),
        }
    }
}

impl FromStr for SaleUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unit" => Ok(Self::Unit),
            "pack" => Ok(Self::Pack),
            _ => Err(format!("invalid sale unit: {s} (use unit or pack)")),
        }
    }
}

/// Stock commitment of a single order line.
///
/// `Uncommitted -> Committed -> Reversed`; `Reversed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockCommitment {
    #[default]
    Uncommitted,
    Committed,
    Reversed,
}

/// How an order was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    /// Stock leaves the shop without a sale (damage, staff use).
    WriteOff,
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "bank_transfer" => Ok(Self::BankTransfer),
            "write_off" => Ok(Self::WriteOff),
            _ => Err(format!("invalid payment method: {s}")),
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Completed,
    Cancelled,
    Returned,
    WrittenOff,
}

impl OrderStatus {
    /// Whether the order's stock has been handed back to the ledger.
    #[must_use]
    pub const fn is_reversed(self) -> bool {
        matches!(self, Self::Cancelled | Self::Returned)
    }
}

/// Payment state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Cash and write-off orders settle immediately.
    #[default]
    NotRequired,
    Pending,
    Paid,
    Expired,
}

/// Purchase order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "purchase_order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    #[default]
    Pending,
    Delivered,
    Completed,
    /// Withdrawn before anything arrived.
    Cancelled,
}

impl PurchaseOrderStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How much of a purchase order has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "delivery_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    NotDelivered,
    PartiallyDelivered,
    FullyDelivered,
}

impl DeliveryStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotDelivered => "not delivered",
            Self::PartiallyDelivered => "partially delivered",
            Self::FullyDelivered => "fully delivered",
        }
    }
}
