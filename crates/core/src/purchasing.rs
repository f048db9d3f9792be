//! Suppliers, purchase orders, and turning deliveries into lots.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;
use crate::ledger::NewLot;
use crate::product::Product;
use crate::types::{
    DeliveryStatus, LotNumber, Price, ProductId, PurchaseOrderId, PurchaseOrderStatus, SaleUnit,
    SupplierId, sum_amounts,
};

// =============================================================================
// Suppliers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub name: String,
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSupplier {
    pub name: String,
    #[serde(default)]
    pub contact: Option<String>,
}

impl NewSupplier {
    /// # Errors
    ///
    /// Returns `Validation` if the name is blank.
    pub fn validate(self) -> Result<Self, InventoryError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(InventoryError::Validation(
                "supplier name cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            contact: self.contact.filter(|c| !c.trim().is_empty()),
        })
    }
}

// =============================================================================
// Purchase orders
// =============================================================================

/// One product line of a purchase order. Quantities and prices are per
/// `sale_unit` as ordered from the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub sale_unit: SaleUnit,
    pub pack_size: u32,
    pub ordered_quantity: i64,
    pub estimated_price: Price,
    #[serde(default)]
    pub delivered_quantity: i64,
    #[serde(default)]
    pub actual_price: Option<Price>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    /// Lots created by deliveries against this line.
    #[serde(default)]
    pub lot_numbers: Vec<LotNumber>,
}

impl PurchaseOrderLine {
    /// Quantity still expected.
    #[must_use]
    pub fn outstanding(&self) -> i64 {
        (self.ordered_quantity - self.delivered_quantity).max(0)
    }

    #[must_use]
    pub fn is_fully_delivered(&self) -> bool {
        self.delivered_quantity >= self.ordered_quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    /// Human-facing running number, unique and increasing.
    pub order_number: i64,
    pub supplier_id: SupplierId,
    pub lines: Vec<PurchaseOrderLine>,
    /// Estimated cost of the whole order.
    pub total: Decimal,
    pub ordered_at: DateTime<Utc>,
    pub status: PurchaseOrderStatus,
    pub delivery_status: DeliveryStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency token, bumped on every save.
    pub version: i64,
}

/// Line input for a new purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPurchaseOrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub sale_unit: SaleUnit,
    pub estimated_price: Decimal,
}

impl NewPurchaseOrderLine {
    /// Resolve against the product being ordered.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the product is retired.
    /// - `Validation` for a non-positive quantity or negative price.
    pub fn resolve(self, product: &Product) -> Result<PurchaseOrderLine, InventoryError> {
        product.ensure_active()?;
        if self.quantity <= 0 {
            return Err(InventoryError::Validation(format!(
                "ordered quantity for {} must be positive",
                product.name
            )));
        }
        Ok(PurchaseOrderLine {
            product_id: product.id,
            product_name: product.name.clone(),
            sale_unit: self.sale_unit,
            pack_size: product.pack_size,
            ordered_quantity: self.quantity,
            estimated_price: Price::new(self.estimated_price)?,
            delivered_quantity: 0,
            actual_price: None,
            expiration_date: None,
            lot_numbers: Vec::new(),
        })
    }
}

/// Sum of estimated line costs.
///
/// # Errors
///
/// Returns `Validation` if the total overflows.
pub fn estimated_total(lines: &[PurchaseOrderLine]) -> Result<Decimal, InventoryError> {
    sum_amounts(lines.iter().map(|l| l.estimated_price.times(l.ordered_quantity)))
}

/// Goods received against one purchase-order line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Delivery {
    /// Index of the line in [`PurchaseOrder::lines`].
    pub line: usize,
    /// Quantity in the line's sale unit.
    pub quantity: i64,
    /// Actual price per sale unit.
    pub actual_price: Decimal,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
    #[serde(default)]
    pub lot_number: Option<String>,
}

/// A validated delivery ready to become a lot. `quantity` is in the line's
/// sale unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReceipt {
    pub line: usize,
    pub product_id: ProductId,
    pub quantity: i64,
    pub actual_price: Price,
    pub lot: NewLot,
}

impl PurchaseOrder {
    fn ensure_open(&self) -> Result<(), InventoryError> {
        match self.status {
            PurchaseOrderStatus::Completed | PurchaseOrderStatus::Cancelled => {
                Err(InventoryError::Conflict(format!(
                    "purchase order {} is already {}",
                    self.order_number,
                    self.status.as_str()
                )))
            }
            PurchaseOrderStatus::Pending | PurchaseOrderStatus::Delivered => Ok(()),
        }
    }

    fn line_mut(&mut self, index: usize) -> Result<&mut PurchaseOrderLine, InventoryError> {
        let order_number = self.order_number;
        self.lines.get_mut(index).ok_or_else(|| {
            InventoryError::NotFound(format!("line {index} on purchase order {order_number}"))
        })
    }

    /// Validate `deliveries` against what is still outstanding and convert
    /// each into the lot it will create.
    ///
    /// Pack quantities become units and a per-pack price becomes a per-unit
    /// cost. Nothing on the order changes.
    ///
    /// # Errors
    ///
    /// - `NotFound` for a line index that does not exist.
    /// - `Validation` for a non-positive quantity, a negative price, or more
    ///   than was ordered (counting earlier deliveries in the same batch).
    /// - `Conflict` if the order is completed or cancelled.
    pub fn plan_receipts(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Result<Vec<PlannedReceipt>, InventoryError> {
        self.ensure_open()?;
        if deliveries.is_empty() {
            return Err(InventoryError::Validation(
                "nothing to receive".to_string(),
            ));
        }

        let mut pending: Vec<i64> = self.lines.iter().map(|l| l.delivered_quantity).collect();
        let mut planned = Vec::with_capacity(deliveries.len());

        for delivery in deliveries {
            let line = self.lines.get(delivery.line).ok_or_else(|| {
                InventoryError::NotFound(format!(
                    "line {} on purchase order {}",
                    delivery.line, self.order_number
                ))
            })?;
            if delivery.quantity <= 0 {
                return Err(InventoryError::Validation(format!(
                    "delivered quantity for {} must be positive",
                    line.product_name
                )));
            }
            let actual_price = Price::new(delivery.actual_price)?;

            let delivered = pending.get_mut(delivery.line).ok_or_else(|| {
                InventoryError::NotFound(format!("line {}", delivery.line))
            })?;
            *delivered = checked_delivery(line, *delivered, delivery.quantity)?;

            let unit_cost = match line.sale_unit {
                SaleUnit::Unit => actual_price,
                SaleUnit::Pack => actual_price.per_unit_of(line.pack_size),
            };
            let lot = NewLot {
                quantity: line.sale_unit.checked_units(delivery.quantity, line.pack_size)?,
                purchase_price: unit_cost.amount(),
                expiration_date: delivery.expiration_date,
                received_date: None,
                lot_number: delivery.lot_number,
                purchase_order_id: Some(self.id),
            };
            planned.push(PlannedReceipt {
                line: delivery.line,
                product_id: line.product_id,
                quantity: delivery.quantity,
                actual_price,
                lot,
            });
        }
        Ok(planned)
    }

    /// Validate `deliveries` and count them as delivered straight away, so
    /// a concurrent receipt against the same order sees the quantity as
    /// taken. Returns the lots to create; a lot that cannot be created is
    /// handed back with [`Self::release_receipt`].
    ///
    /// # Errors
    ///
    /// As [`Self::plan_receipts`]. Nothing changes on error.
    pub fn claim_receipts(
        &mut self,
        deliveries: Vec<Delivery>,
        at: DateTime<Utc>,
    ) -> Result<Vec<PlannedReceipt>, InventoryError> {
        let planned = self.plan_receipts(deliveries)?;
        let before = self.clone();
        for receipt in &planned {
            if let Err(e) = self.record_receipt(receipt, at) {
                *self = before;
                return Err(e);
            }
        }
        Ok(planned)
    }

    /// Count a receipt against its line.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the line index does not exist.
    /// - `Validation` if the line would receive more than was ordered.
    /// - `Conflict` if the order is completed or cancelled.
    pub fn record_receipt(
        &mut self,
        receipt: &PlannedReceipt,
        at: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        self.ensure_open()?;
        let line = self.line_mut(receipt.line)?;
        line.delivered_quantity = checked_delivery(line, line.delivered_quantity, receipt.quantity)?;
        self.refresh_status(at);
        Ok(())
    }

    /// Note on its line the lot a recorded receipt became.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the line index does not exist.
    pub fn attach_lot(
        &mut self,
        receipt: &PlannedReceipt,
        lot_number: LotNumber,
    ) -> Result<(), InventoryError> {
        let line = self.line_mut(receipt.line)?;
        line.actual_price = Some(receipt.actual_price);
        if receipt.lot.expiration_date.is_some() {
            line.expiration_date = receipt.lot.expiration_date;
        }
        line.lot_numbers.push(lot_number);
        Ok(())
    }

    /// Undo [`Self::record_receipt`] for a receipt whose lot was never
    /// created.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the line index does not exist.
    pub fn release_receipt(
        &mut self,
        receipt: &PlannedReceipt,
        at: DateTime<Utc>,
    ) -> Result<(), InventoryError> {
        let line = self.line_mut(receipt.line)?;
        line.delivered_quantity = line
            .delivered_quantity
            .saturating_sub(receipt.quantity)
            .max(0);
        self.refresh_status(at);
        Ok(())
    }

    /// Derive `delivery_status` and `status` from the lines.
    pub fn refresh_status(&mut self, at: DateTime<Utc>) {
        let all = self.lines.iter().all(PurchaseOrderLine::is_fully_delivered);
        let any = self.lines.iter().any(|l| l.delivered_quantity > 0);
        self.delivery_status = if all {
            DeliveryStatus::FullyDelivered
        } else if any {
            DeliveryStatus::PartiallyDelivered
        } else {
            DeliveryStatus::NotDelivered
        };
        match self.status {
            PurchaseOrderStatus::Pending if all => {
                self.status = PurchaseOrderStatus::Delivered;
                self.delivered_at = Some(at);
            }
            PurchaseOrderStatus::Delivered if !all => {
                self.status = PurchaseOrderStatus::Pending;
                self.delivered_at = None;
            }
            _ => {}
        }
    }

    /// Cancel an order nothing has arrived for.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the order is not pending or any quantity has
    /// been received, including by a receipt still in progress.
    pub fn cancel(&mut self) -> Result<(), InventoryError> {
        if self.status != PurchaseOrderStatus::Pending
            || self.delivery_status != DeliveryStatus::NotDelivered
        {
            return Err(InventoryError::Conflict(format!(
                "purchase order {} cannot be cancelled while {} and {}",
                self.order_number,
                self.status.as_str(),
                self.delivery_status.as_str()
            )));
        }
        self.status = PurchaseOrderStatus::Cancelled;
        Ok(())
    }

    /// Close a delivered order.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the order is `Delivered`.
    pub fn complete(&mut self) -> Result<(), InventoryError> {
        if self.status != PurchaseOrderStatus::Delivered {
            return Err(InventoryError::Conflict(format!(
                "purchase order {} cannot be completed while {:?}",
                self.order_number, self.status
            )));
        }
        self.status = PurchaseOrderStatus::Completed;
        Ok(())
    }

    /// Cost actually paid for what has arrived.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the amount overflows.
    pub fn received_total(&self) -> Result<Decimal, InventoryError> {
        sum_amounts(self.lines.iter().map(|l| {
            l.actual_price
                .unwrap_or(l.estimated_price)
                .times(l.delivered_quantity)
        }))
    }
}

/// `delivered + quantity`, provided it stays within what the line ordered.
fn checked_delivery(
    line: &PurchaseOrderLine,
    delivered: i64,
    quantity: i64,
) -> Result<i64, InventoryError> {
    delivered
        .checked_add(quantity)
        .filter(|total| *total <= line.ordered_quantity)
        .ok_or_else(|| {
            InventoryError::Validation(format!(
                "delivering {quantity} of {} exceeds the {} ordered ({delivered} already received)",
                line.product_name, line.ordered_quantity
            ))
        })
}
