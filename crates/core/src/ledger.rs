//! The lot ledger: authoritative record of a product's physical stock.
//!
//! Stock is held as discrete, dated lots. The collection is private; every
//! change goes through a named operation so uniqueness of lot numbers and the
//! status state machine are enforced in one place. Lots are never removed:
//! depleted, expired and disposed lots stay behind as an audit trail.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::{self, Allocation, Draw, LotFilter};
use crate::error::InventoryError;
use crate::types::{LotNumber, LotStatus, Price, PurchaseOrderId};

/// Why and when a lot was taken out of circulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposal {
    /// Free-text reason (`expired`, `damaged`, `manual`, ...).
    pub reason: String,
    /// Day the lot was disposed.
    pub disposed_on: NaiveDate,
}

/// A batch of physical stock belonging to one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Unique within the owning product, never reused.
    pub lot_number: LotNumber,
    /// Remaining units.
    pub quantity: i64,
    /// Unit cost of this batch.
    pub purchase_price: Price,
    /// `None` means the lot does not expire.
    pub expiration_date: Option<NaiveDate>,
    /// Day the batch entered stock.
    pub received_date: NaiveDate,
    /// Lifecycle state.
    pub status: LotStatus,
    /// Purchase order that delivered this lot, if any.
    pub purchase_order_id: Option<PurchaseOrderId>,
    /// Set once the lot is disposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposal: Option<Disposal>,
}

impl Lot {
    /// Whether the lot counts towards availability, cost, and expiry figures.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == LotStatus::Active
    }

    /// Whether a promotion may reserve this lot on `today`.
    ///
    /// The lot must be active, hold stock, and (if dated) expire strictly after `today`.
    #[must_use]
    pub fn is_promotion_eligible(&self, today: NaiveDate) -> bool {
        self.is_active() && self.quantity > 0 && self.expiration_date.is_none_or(|d| d > today)
    }

    /// Whether the lot's expiration date is strictly before `today`.
    #[must_use]
    pub fn is_past_expiry(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|d| d < today)
    }
}

/// Input for receiving a new lot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewLot {
    /// Units received (already converted from packs).
    pub quantity: i64,
    /// Per-unit cost.
    pub purchase_price: Decimal,
    /// Optional expiration date.
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    /// Defaults to the receiving day.
    #[serde(default)]
    pub received_date: Option<NaiveDate>,
    /// Caller-supplied lot number; generated when absent.
    #[serde(default)]
    pub lot_number: Option<String>,
    /// Source purchase order.
    #[serde(default)]
    pub purchase_order_id: Option<PurchaseOrderId>,
}

impl NewLot {
    /// A lot with just quantity and cost; everything else defaulted.
    #[must_use]
    pub const fn new(quantity: i64, purchase_price: Decimal) -> Self {
        Self {
            quantity,
            purchase_price,
            expiration_date: None,
            received_date: None,
            lot_number: None,
            purchase_order_id: None,
        }
    }

    /// Set the expiration date.
    #[must_use]
    pub const fn expiring(mut self, date: NaiveDate) -> Self {
        self.expiration_date = Some(date);
        self
    }

    /// Set the received date.
    #[must_use]
    pub const fn received(mut self, date: NaiveDate) -> Self {
        self.received_date = Some(date);
        self
    }
}

/// Read-only aggregate figures over the active lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockSummary {
    /// Sum of active quantities.
    pub total_available: i64,
    /// Quantity-weighted unit cost of active stock.
    pub average_cost: Decimal,
    /// Earliest expiration among active dated lots.
    pub nearest_expiry: Option<NaiveDate>,
    /// Number of active lots.
    pub active_lots: usize,
}

/// Ordered collection of lots plus the counter that names new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotLedger {
    lots: Vec<Lot>,
    next_sequence: u32,
}

impl Default for LotLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LotLedger {
    /// An empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lots: Vec::new(),
            next_sequence: 1,
        }
    }

    /// Rebuild a ledger from its persisted parts.
    #[must_use]
    pub fn from_parts(lots: Vec<Lot>, next_sequence: u32) -> Self {
        Self {
            lots,
            next_sequence: next_sequence.max(1),
        }
    }

    /// All lots in receiving order, including retired ones.
    #[must_use]
    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    /// Sequence value the next generated lot number will start from.
    #[must_use]
    pub const fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Look up a lot by number.
    #[must_use]
    pub fn get(&self, lot_number: &LotNumber) -> Option<&Lot> {
        self.lots.iter().find(|l| &l.lot_number == lot_number)
    }

    fn get_mut(&mut self, lot_number: &LotNumber) -> Option<&mut Lot> {
        self.lots.iter_mut().find(|l| &l.lot_number == lot_number)
    }

    fn active(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter().filter(|l| l.is_active())
    }

    /// Append a new `active` lot.
    ///
    /// # Errors
    ///
    /// - `Validation` if the quantity is not positive, the price is negative,
    ///   or the product's stock or the lot's value would overflow.
    /// - `Conflict` if a supplied lot number already exists on this product.
    pub fn add_lot(&mut self, new: NewLot, today: NaiveDate) -> Result<Lot, InventoryError> {
        if new.quantity <= 0 {
            return Err(InventoryError::Validation(format!(
                "lot quantity must be positive (got {})",
                new.quantity
            )));
        }
        let purchase_price = Price::new(new.purchase_price)?;
        purchase_price.times(new.quantity)?;
        self.lots
            .iter()
            .try_fold(new.quantity, |total, lot| total.checked_add(lot.quantity))
            .ok_or_else(|| {
                InventoryError::Validation(format!(
                    "a lot of {} units would overflow the product's stock",
                    new.quantity
                ))
            })?;

        let lot_number = match new.lot_number.as_deref() {
            Some(raw) => {
                let number = LotNumber::parse(raw)?;
                if self.get(&number).is_some() {
                    return Err(InventoryError::Conflict(format!(
                        "lot {number} already exists"
                    )));
                }
                number
            }
            None => self.generate_lot_number(),
        };

        let lot = Lot {
            lot_number,
            quantity: new.quantity,
            purchase_price,
            expiration_date: new.expiration_date,
            received_date: new.received_date.unwrap_or(today),
            status: LotStatus::Active,
            purchase_order_id: new.purchase_order_id,
            disposal: None,
        };
        self.lots.push(lot.clone());
        Ok(lot)
    }

    /// Next free generated number; skips numbers a caller already used by hand.
    fn generate_lot_number(&mut self) -> LotNumber {
        loop {
            let candidate = LotNumber::from_sequence(self.next_sequence);
            self.next_sequence = self.next_sequence.saturating_add(1);
            if self.get(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Sum of `quantity` over active lots.
    #[must_use]
    pub fn total_available(&self) -> i64 {
        self.active().map(|l| l.quantity).sum()
    }

    /// Units an allocation under `filter` could supply right now.
    #[must_use]
    pub fn sellable_quantity(&self, filter: Option<&LotFilter>) -> i64 {
        self.lots
            .iter()
            .filter(|l| allocation::is_allocatable(l, filter))
            .map(|l| l.quantity)
            .sum()
    }

    /// Quantity-weighted mean purchase price over active lots; zero if none.
    #[must_use]
    pub fn average_cost(&self) -> Decimal {
        let (value, units) = self.active().fold((Decimal::ZERO, 0_i64), |(value, units), lot| {
            let cost = lot.purchase_price.times(lot.quantity).unwrap_or(Decimal::MAX);
            (value.saturating_add(cost), units.saturating_add(lot.quantity))
        });
        if units == 0 {
            Decimal::ZERO
        } else {
            value / Decimal::from(units)
        }
    }

    /// Earliest expiration date over active lots that have one.
    #[must_use]
    pub fn nearest_expiry(&self) -> Option<NaiveDate> {
        self.active().filter_map(|l| l.expiration_date).min()
    }

    /// All aggregate figures at once.
    #[must_use]
    pub fn summary(&self) -> StockSummary {
        StockSummary {
            total_available: self.total_available(),
            average_cost: self.average_cost(),
            nearest_expiry: self.nearest_expiry(),
            active_lots: self.active().count(),
        }
    }

    /// Mark a lot `disposed`, whatever its remaining quantity.
    ///
    /// Disposing an already disposed lot is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the lot does not exist on this product.
    pub fn dispose(
        &mut self,
        lot_number: &LotNumber,
        reason: &str,
        today: NaiveDate,
    ) -> Result<(), InventoryError> {
        let lot = self
            .get_mut(lot_number)
            .ok_or_else(|| InventoryError::NotFound(format!("lot {lot_number}")))?;
        if lot.status != LotStatus::Disposed {
            lot.status = LotStatus::Disposed;
            lot.disposal = Some(Disposal {
                reason: reason.to_string(),
                disposed_on: today,
            });
        }
        Ok(())
    }

    /// Move every active lot whose expiration date is before `today` to `expired`.
    ///
    /// Returns the lot numbers that changed; a second call on the same day
    /// returns nothing.
    pub fn expire(&mut self, today: NaiveDate) -> Vec<LotNumber> {
        self.lots
            .iter_mut()
            .filter(|l| l.is_active() && l.is_past_expiry(today))
            .map(|lot| {
                lot.status = LotStatus::Expired;
                lot.lot_number.clone()
            })
            .collect()
    }

    /// Draw `required` units in FEFO order. See [`allocation::allocate`].
    pub fn allocate(&mut self, required: i64, filter: Option<&LotFilter>) -> Allocation {
        allocation::allocate(&mut self.lots, required, filter)
    }

    /// Give back exactly the units recorded in `draws`.
    ///
    /// Every lot is resolved before anything changes, so an unknown lot number
    /// leaves the ledger untouched. A `depleted` lot that holds stock again
    /// becomes `active`; expired and disposed lots keep their status.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a draw names a lot that does not exist.
    /// - `Validation` if a draw has a negative quantity.
    pub fn restore(&mut self, draws: &[Draw]) -> Result<(), InventoryError> {
        for draw in draws {
            if draw.quantity_taken < 0 {
                return Err(InventoryError::Validation(format!(
                    "cannot restore a negative quantity to lot {}",
                    draw.lot_number
                )));
            }
            if self.get(&draw.lot_number).is_none() {
                return Err(InventoryError::NotFound(format!("lot {}", draw.lot_number)));
            }
        }
        for draw in draws {
            if let Some(lot) = self.get_mut(&draw.lot_number) {
                lot.quantity += draw.quantity_taken;
                if lot.status == LotStatus::Depleted && lot.quantity > 0 {
                    lot.status = LotStatus::Active;
                }
            }
        }
        Ok(())
    }

    /// Take exactly the units recorded in `draws` again, bypassing FEFO.
    ///
    /// The inverse of [`Self::restore`], used to re-apply a sale whose
    /// reversal has to be undone. All or nothing.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a draw names a lot that does not exist.
    /// - `InsufficientStock` if a lot no longer holds what the draw took.
    pub fn reapply(&mut self, draws: &[Draw]) -> Result<(), InventoryError> {
        let mut wanted: Vec<(&LotNumber, i64)> = Vec::new();
        for draw in draws {
            match wanted.iter_mut().find(|(number, _)| *number == &draw.lot_number) {
                Some((_, quantity)) => *quantity += draw.quantity_taken,
                None => wanted.push((&draw.lot_number, draw.quantity_taken)),
            }
        }
        for (number, quantity) in &wanted {
            let lot = self
                .get(number)
                .ok_or_else(|| InventoryError::NotFound(format!("lot {number}")))?;
            if lot.quantity < *quantity {
                return Err(InventoryError::InsufficientStock {
                    shortage: quantity - lot.quantity,
                });
            }
        }
        for draw in draws {
            if let Some(lot) = self.get_mut(&draw.lot_number) {
                lot.quantity -= draw.quantity_taken;
                if lot.quantity == 0 && lot.status == LotStatus::Active {
                    lot.status = LotStatus::Depleted;
                }
            }
        }
        Ok(())
    }
}
