//! Orders, order lines, and the lot draws that make returns exact.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::Draw;
use crate::error::InventoryError;
use crate::types::{
    LotNumber, OrderId, OrderStatus, PaymentMethod, PaymentStatus, Price, ProductId, PromotionId,
    SaleUnit, StockCommitment, sum_amounts,
};

/// A draw as stored on an order line: enough to reverse the sale lot by lot
/// and to report its cost of goods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDraw {
    pub lot_number: LotNumber,
    pub quantity_taken: i64,
    pub purchase_price: Price,
    pub expiration_date: Option<NaiveDate>,
}

impl LotDraw {
    /// The bare `(lot, quantity)` pair the ledger restores from.
    #[must_use]
    pub fn to_draw(&self) -> Draw {
        Draw::new(self.lot_number.clone(), self.quantity_taken)
    }

    /// Cost of the units taken.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn cost(&self) -> Result<Decimal, InventoryError> {
        self.purchase_price.times(self.quantity_taken)
    }
}

/// One product line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    /// Quantity in `sale_unit`s.
    pub quantity: i64,
    pub sale_unit: SaleUnit,
    pub pack_size: u32,
    /// Regular price per sale unit at checkout.
    pub catalog_price: Price,
    /// Price actually charged per sale unit.
    pub unit_price: Price,
    pub promotion_id: Option<PromotionId>,
    #[serde(default)]
    pub draws: Vec<LotDraw>,
    #[serde(default)]
    pub commitment: StockCommitment,
}

impl OrderLine {
    /// Amount charged for the line.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn line_total(&self) -> Result<Decimal, InventoryError> {
        self.unit_price.times(self.quantity)
    }

    /// Amount the line would have cost at catalog price.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn catalog_total(&self) -> Result<Decimal, InventoryError> {
        self.catalog_price.times(self.quantity)
    }

    /// Discount granted on the line (never negative).
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn discount(&self) -> Result<Decimal, InventoryError> {
        self.catalog_price
            .saturating_sub(self.unit_price)
            .times(self.quantity)
    }

    /// Purchase cost of the units drawn.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn cost_of_goods(&self) -> Result<Decimal, InventoryError> {
        sum_amounts(self.draws.iter().map(LotDraw::cost))
    }

    /// `uncommitted -> committed`, recording the draws.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the line already holds stock or was reversed.
    pub fn commit(&mut self, draws: Vec<LotDraw>) -> Result<(), InventoryError> {
        if self.commitment != StockCommitment::Uncommitted {
            return Err(InventoryError::Conflict(format!(
                "line for {} is already {:?}",
                self.product_name, self.commitment
            )));
        }
        self.draws = draws;
        self.commitment = StockCommitment::Committed;
        Ok(())
    }

    /// `committed -> reversed`. Call only after the draws were restored.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the line is committed.
    pub fn mark_reversed(&mut self) -> Result<(), InventoryError> {
        if self.commitment != StockCommitment::Committed {
            return Err(InventoryError::Conflict(format!(
                "line for {} cannot be reversed from {:?}",
                self.product_name, self.commitment
            )));
        }
        self.commitment = StockCommitment::Reversed;
        Ok(())
    }

    /// `reversed -> committed`, for a reversal whose restore did not go through.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the line is reversed.
    pub fn undo_reversal(&mut self) -> Result<(), InventoryError> {
        if self.commitment != StockCommitment::Reversed {
            return Err(InventoryError::Conflict(format!(
                "line for {} is not reversed",
                self.product_name
            )));
        }
        self.commitment = StockCommitment::Committed;
        Ok(())
    }

    /// Swap in a new quantity and its draws after an edit.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the line is committed.
    pub fn replace_commitment(
        &mut self,
        quantity: i64,
        draws: Vec<LotDraw>,
    ) -> Result<(), InventoryError> {
        if self.commitment != StockCommitment::Committed {
            return Err(InventoryError::Conflict(format!(
                "line for {} is not holding stock",
                self.product_name
            )));
        }
        self.quantity = quantity;
        self.draws = draws;
        Ok(())
    }
}

/// Money figures and initial statuses of a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub cash_received: Option<Decimal>,
    pub change: Option<Decimal>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl Settlement {
    /// Settle `lines` with `method`.
    ///
    /// Cash must cover the total; bank transfers wait for payment; write-offs
    /// need no payment.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if there are no lines, if cash is missing or
    /// short, or if the totals overflow.
    pub fn compute(
        lines: &[OrderLine],
        method: PaymentMethod,
        cash_received: Option<Decimal>,
    ) -> Result<Self, InventoryError> {
        if lines.is_empty() {
            return Err(InventoryError::Validation("order has no lines".to_string()));
        }
        let subtotal = sum_amounts(lines.iter().map(OrderLine::catalog_total))?;
        let discount_total = sum_amounts(lines.iter().map(OrderLine::discount))?;
        let total = sum_amounts(lines.iter().map(OrderLine::line_total))?;

        let (cash_received, change, status, payment_status) = match method {
            PaymentMethod::Cash => {
                let cash = cash_received.ok_or_else(|| {
                    InventoryError::Validation("cash received is required".to_string())
                })?;
                if cash < total {
                    return Err(InventoryError::Validation(format!(
                        "cash received {cash} does not cover total {total}"
                    )));
                }
                (
                    Some(cash),
                    Some(cash - total),
                    OrderStatus::Completed,
                    PaymentStatus::NotRequired,
                )
            }
            PaymentMethod::BankTransfer => {
                (None, None, OrderStatus::Completed, PaymentStatus::Pending)
            }
            PaymentMethod::WriteOff => {
                (None, None, OrderStatus::WrittenOff, PaymentStatus::NotRequired)
            }
        };

        Ok(Self {
            subtotal,
            discount_total,
            total,
            cash_received,
            change,
            status,
            payment_status,
        })
    }
}

/// A completed checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_name: String,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    pub payment_method: PaymentMethod,
    pub cash_received: Option<Decimal>,
    pub change: Option<Decimal>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub ordered_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, bumped on every save.
    pub version: i64,
}

impl Order {
    /// Set line `index` to `quantity` units drawn as `draws` and recompute
    /// the money figures. Cash and change are left as recorded at checkout.
    /// On error the order is unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` for a line index that does not exist.
    /// - `Conflict` if the line is not holding stock.
    /// - `Validation` if the totals overflow.
    pub fn edit_line(
        &mut self,
        index: usize,
        quantity: i64,
        draws: Vec<LotDraw>,
    ) -> Result<(), InventoryError> {
        let mut lines = self.lines.clone();
        lines
            .get_mut(index)
            .ok_or_else(|| InventoryError::NotFound(format!("line {index} of order {}", self.id)))?
            .replace_commitment(quantity, draws)?;
        let subtotal = sum_amounts(lines.iter().map(OrderLine::catalog_total))?;
        let discount_total = sum_amounts(lines.iter().map(OrderLine::discount))?;
        let total = sum_amounts(lines.iter().map(OrderLine::line_total))?;

        self.lines = lines;
        self.subtotal = subtotal;
        self.discount_total = discount_total;
        self.total = total;
        Ok(())
    }

    /// Total purchase cost of everything sold on this order.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn cost_of_goods(&self) -> Result<Decimal, InventoryError> {
        sum_amounts(self.lines.iter().map(OrderLine::cost_of_goods))
    }

    /// Check that stock can still be handed back.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the order was already cancelled or returned.
    pub fn ensure_reversible(&self) -> Result<(), InventoryError> {
        if self.status.is_reversed() {
            return Err(InventoryError::Conflict(format!(
                "order {} is already {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Move a live order to `cancelled` or `returned`.
    ///
    /// Expired transfers also get `payment_status = expired`. The caller
    /// restores the committed lines afterwards.
    ///
    /// # Errors
    ///
    /// - `Validation` if `to` is not a reversal status.
    /// - `Conflict` if the order was already reversed.
    pub fn begin_reversal(&mut self, to: OrderStatus, expired: bool) -> Result<(), InventoryError> {
        if !to.is_reversed() {
            return Err(InventoryError::Validation(format!(
                "{to:?} is not a reversal status"
            )));
        }
        self.ensure_reversible()?;
        self.status = to;
        if expired && self.payment_status == PaymentStatus::Pending {
            self.payment_status = PaymentStatus::Expired;
        }
        Ok(())
    }

    /// Mark every line still holding stock as reversed and return their
    /// indices. Once saved, the caller owns restoring those lines.
    pub fn claim_committed_lines(&mut self) -> Vec<usize> {
        self.lines
            .iter_mut()
            .enumerate()
            .filter(|(_, line)| line.commitment == StockCommitment::Committed)
            .map(|(index, line)| {
                line.commitment = StockCommitment::Reversed;
                index
            })
            .collect()
    }

    /// Mark a pending bank transfer as paid.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless payment is pending and the order is live.
    pub fn mark_paid(&mut self, at: DateTime<Utc>) -> Result<(), InventoryError> {
        if self.payment_status != PaymentStatus::Pending || self.status.is_reversed() {
            return Err(InventoryError::Conflict(format!(
                "order {} is not awaiting payment",
                self.id
            )));
        }
        self.payment_status = PaymentStatus::Paid;
        self.paid_at = Some(at);
        Ok(())
    }

    /// Whether this order is an unpaid transfer placed before `cutoff`.
    #[must_use]
    pub fn is_payment_overdue(&self, cutoff: DateTime<Utc>) -> bool {
        self.payment_status == PaymentStatus::Pending
            && !self.status.is_reversed()
            && self.ordered_at < cutoff
    }
}

/// Everything needed to store a new order; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_name: String,
    pub lines: Vec<OrderLine>,
    pub payment_method: PaymentMethod,
    pub settlement: Settlement,
    pub ordered_at: DateTime<Utc>,
}

impl NewOrder {
    /// Attach the store-assigned id.
    #[must_use]
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            user_name: self.user_name,
            lines: self.lines,
            subtotal: self.settlement.subtotal,
            discount_total: self.settlement.discount_total,
            total: self.settlement.total,
            payment_method: self.payment_method,
            cash_received: self.settlement.cash_received,
            change: self.settlement.change,
            status: self.settlement.status,
            payment_status: self.settlement.payment_status,
            ordered_at: self.ordered_at,
            paid_at: None,
            version: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn price(cents: i64) -> Price {
        Price::new(Decimal::new(cents, 2)).unwrap()
    }

    fn line(quantity: i64, catalog: i64, charged: i64) -> OrderLine {
        OrderLine {
            product_id: ProductId::new(1),
            product_name: "Rice".to_string(),
            quantity,
            sale_unit: SaleUnit::Unit,
            pack_size: 1,
            catalog_price: price(catalog),
            unit_price: price(charged),
            promotion_id: None,
            draws: Vec::new(),
            commitment: StockCommitment::Uncommitted,
        }
    }

    fn draw(lot: &str, qty: i64, cost_cents: i64) -> LotDraw {
        LotDraw {
            lot_number: LotNumber::parse(lot).unwrap(),
            quantity_taken: qty,
            purchase_price: price(cost_cents),
            expiration_date: None,
        }
    }

    #[test]
    fn test_cash_settlement_computes_change() {
        let lines = [line(2, 500, 400), line(1, 300, 300)];
        let settled =
            Settlement::compute(&lines, PaymentMethod::Cash, Some(Decimal::new(20, 0))).unwrap();
        assert_eq!(settled.subtotal, Decimal::new(1300, 2));
        assert_eq!(settled.discount_total, Decimal::new(200, 2));
        assert_eq!(settled.total, Decimal::new(1100, 2));
        assert_eq!(settled.change, Some(Decimal::new(900, 2)));
        assert_eq!(settled.status, OrderStatus::Completed);
    }

    #[test]
    fn test_cash_must_cover_total() {
        let lines = [line(2, 500, 500)];
        assert!(Settlement::compute(&lines, PaymentMethod::Cash, Some(Decimal::new(9, 0))).is_err());
        assert!(Settlement::compute(&lines, PaymentMethod::Cash, None).is_err());
        assert!(Settlement::compute(&[], PaymentMethod::BankTransfer, None).is_err());
    }

    #[test]
    fn test_transfer_and_write_off_statuses() {
        let lines = [line(1, 500, 500)];
        let transfer = Settlement::compute(&lines, PaymentMethod::BankTransfer, None).unwrap();
        assert_eq!(transfer.payment_status, PaymentStatus::Pending);
        let write_off = Settlement::compute(&lines, PaymentMethod::WriteOff, None).unwrap();
        assert_eq!(write_off.status, OrderStatus::WrittenOff);
        assert_eq!(write_off.payment_status, PaymentStatus::NotRequired);
    }

    #[test]
    fn test_commitment_state_machine() {
        let mut l = line(3, 100, 100);
        assert!(l.mark_reversed().is_err());

        l.commit(vec![draw("LOT001", 2, 40), draw("LOT002", 1, 60)])
            .unwrap();
        assert_eq!(l.cost_of_goods().unwrap(), Decimal::new(140, 2));
        assert!(l.commit(Vec::new()).is_err());

        l.mark_reversed().unwrap();
        assert_eq!(l.commitment, StockCommitment::Reversed);
        assert!(l.mark_reversed().is_err());
        assert!(l.replace_commitment(1, Vec::new()).is_err());
    }

    #[test]
    fn test_payment_lifecycle() {
        let lines = vec![line(1, 500, 500)];
        let settlement = Settlement::compute(&lines, PaymentMethod::BankTransfer, None).unwrap();
        let ordered_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut order = NewOrder {
            user_name: "till-1".to_string(),
            lines,
            payment_method: PaymentMethod::BankTransfer,
            settlement,
            ordered_at,
        }
        .into_order(OrderId::new(1));

        assert!(order.is_payment_overdue(ordered_at + chrono::Duration::minutes(31)));
        assert!(!order.is_payment_overdue(ordered_at));

        order.mark_paid(ordered_at).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert!(order.mark_paid(ordered_at).is_err());
        assert!(!order.is_payment_overdue(ordered_at + chrono::Duration::days(1)));
    }

    #[test]
    fn test_begin_reversal_claims_once() {
        let lines = vec![line(1, 500, 500)];
        let settlement = Settlement::compute(&lines, PaymentMethod::BankTransfer, None).unwrap();
        let mut order = NewOrder {
            user_name: "till-1".to_string(),
            lines,
            payment_method: PaymentMethod::BankTransfer,
            settlement,
            ordered_at: Utc::now(),
        }
        .into_order(OrderId::new(2));
        order.lines[0].commit(vec![draw("LOT001", 1, 40)]).unwrap();

        assert!(order.begin_reversal(OrderStatus::Completed, false).is_err());
        order.begin_reversal(OrderStatus::Cancelled, true).unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Expired);
        assert_eq!(order.claim_committed_lines(), vec![0]);
        assert!(order.claim_committed_lines().is_empty());

        order.lines[0].undo_reversal().unwrap();
        assert_eq!(order.lines[0].commitment, StockCommitment::Committed);
        assert!(matches!(
            order.begin_reversal(OrderStatus::Returned, false),
            Err(InventoryError::Conflict(_))
        ));
    }
}
