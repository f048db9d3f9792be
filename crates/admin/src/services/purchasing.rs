//! Suppliers, purchase orders and receiving.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use stockroom_core::purchasing::{
    Delivery, NewPurchaseOrderLine, NewSupplier, PurchaseOrder, Supplier, estimated_total,
};
use stockroom_core::{InventoryError, Lot, PurchaseOrderId, SupplierId};

use crate::db::{ProductStore, PurchasingStore, RepositoryError};
use crate::error::AppError;
use crate::services::stock::InventoryService;

/// Outcome of receiving a batch of deliveries.
#[derive(Debug)]
pub struct ReceiptReport {
    /// The purchase order as saved.
    pub order: PurchaseOrder,
    /// Lots created, in delivery order.
    pub lots: Vec<Lot>,
    /// Deliveries whose lot could not be created, by line index.
    pub rejected: Vec<(usize, AppError)>,
}

#[derive(Debug)]
pub struct PurchasingService<S> {
    inventory: InventoryService<S>,
}

impl<S> Clone for PurchasingService<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
        }
    }
}

impl<S: ProductStore + PurchasingStore> PurchasingService<S> {
    #[must_use]
    pub const fn new(inventory: InventoryService<S>) -> Self {
        Self { inventory }
    }

    // =========================================================================
    // Suppliers
    // =========================================================================

    /// # Errors
    ///
    /// Returns a validation error for a blank name.
    #[instrument(skip(self, supplier, now), fields(name = %supplier.name))]
    pub async fn create_supplier(
        &self,
        supplier: NewSupplier,
        now: DateTime<Utc>,
    ) -> Result<Supplier, AppError> {
        let supplier = supplier.validate()?;
        let supplier = self.inventory.store().create_supplier(supplier, now).await?;
        info!(supplier_id = %supplier.id, "Supplier created");
        Ok(supplier)
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown supplier.
    pub async fn supplier(&self, id: SupplierId) -> Result<Supplier, AppError> {
        self.inventory
            .store()
            .get_supplier(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("supplier {id}")))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn suppliers(&self) -> Result<Vec<Supplier>, AppError> {
        Ok(self.inventory.store().list_suppliers().await?)
    }

    // =========================================================================
    // Purchase orders
    // =========================================================================

    /// Place a purchase order with a supplier.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown supplier or product.
    /// - `Validation` for an order without lines, a non-positive quantity or
    ///   a negative price.
    #[instrument(skip(self, lines, now), fields(supplier_id = %supplier_id, lines = lines.len()))]
    pub async fn create_purchase_order(
        &self,
        supplier_id: SupplierId,
        lines: Vec<NewPurchaseOrderLine>,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOrder, AppError> {
        if lines.is_empty() {
            return Err(InventoryError::Validation(
                "a purchase order needs at least one line".to_string(),
            )
            .into());
        }
        self.supplier(supplier_id).await?;

        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self.inventory.product(line.product_id).await?;
            resolved.push(line.resolve(&product)?);
        }
        let total = estimated_total(&resolved)?;

        let order = self
            .inventory
            .store()
            .create_purchase_order(supplier_id, resolved, total, now)
            .await?;
        info!(purchase_order = order.order_number, %total, "Purchase order placed");
        Ok(order)
    }

    /// Receive goods against a purchase order.
    ///
    /// Every delivery becomes a lot on its product, costed per unit and
    /// tagged with the purchase order. The quantities are first claimed on
    /// the order in one versioned write, so concurrent receipts can never
    /// take more than was ordered between them. Each lot is then created on
    /// its own, so one product's failure does not hold back the others. A
    /// final write records the lot numbers and hands back the claim of every
    /// delivery that failed; those are listed in [`ReceiptReport::rejected`]
    /// and stay outstanding.
    ///
    /// If that final write fails the lots stand and their quantities stay
    /// claimed, so receiving the same goods again is refused rather than
    /// counted twice.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown order or line.
    /// - `Validation` for a delivery beyond what is outstanding.
    /// - `Conflict` for a completed or cancelled order.
    #[instrument(skip(self, deliveries, now), fields(purchase_order_id = %id, deliveries = deliveries.len()))]
    pub async fn receive(
        &self,
        id: PurchaseOrderId,
        deliveries: Vec<Delivery>,
        now: DateTime<Utc>,
    ) -> Result<ReceiptReport, AppError> {
        let (planned, _) = self
            .update_purchase_order(id, |order| order.claim_receipts(deliveries.clone(), now))
            .await?;

        let mut received = Vec::with_capacity(planned.len());
        let mut released = Vec::new();
        let mut lots = Vec::with_capacity(planned.len());
        let mut rejected = Vec::new();
        for receipt in planned {
            match self
                .inventory
                .add_lot(receipt.product_id, receipt.lot.clone(), now)
                .await
            {
                Ok(lot) => {
                    received.push((receipt, lot.lot_number.clone()));
                    lots.push(lot);
                }
                Err(e) => {
                    warn!(line = receipt.line, error = %e, "Delivery rejected");
                    rejected.push((receipt.line, e));
                    released.push(receipt);
                }
            }
        }

        let saved = self
            .update_purchase_order(id, |order| {
                for (receipt, lot_number) in &received {
                    order.attach_lot(receipt, lot_number.clone())?;
                }
                for receipt in &released {
                    order.release_receipt(receipt, now)?;
                }
                Ok(())
            })
            .await;
        let order = match saved {
            Ok(((), order)) => order,
            Err(e) => {
                error!(
                    lots = lots.len(),
                    released = released.len(),
                    "Deliveries claimed but purchase order not finalised"
                );
                e.report();
                return Err(e);
            }
        };

        info!(
            lots = lots.len(),
            rejected = rejected.len(),
            delivery_status = ?order.delivery_status,
            "Deliveries received"
        );
        Ok(ReceiptReport {
            order,
            lots,
            rejected,
        })
    }

    /// Cancel a purchase order nothing has been received for.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown order.
    /// - `Conflict` once any delivery has been received or while one is
    ///   being received, and for completed or cancelled orders.
    #[instrument(skip(self), fields(purchase_order_id = %id))]
    pub async fn cancel(&self, id: PurchaseOrderId) -> Result<PurchaseOrder, AppError> {
        let ((), order) = self.update_purchase_order(id, PurchaseOrder::cancel).await?;
        info!(purchase_order = order.order_number, "Purchase order cancelled");
        Ok(order)
    }

    /// Close a fully delivered purchase order.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the order is delivered.
    #[instrument(skip(self), fields(purchase_order_id = %id))]
    pub async fn complete(&self, id: PurchaseOrderId) -> Result<PurchaseOrder, AppError> {
        let (received, order) = self
            .update_purchase_order(id, |order| {
                order.complete()?;
                order.received_total()
            })
            .await?;
        info!(purchase_order = order.order_number, %received, "Purchase order completed");
        Ok(order)
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown purchase order.
    pub async fn purchase_order(&self, id: PurchaseOrderId) -> Result<PurchaseOrder, AppError> {
        self.inventory
            .store()
            .get_purchase_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("purchase order {id}")))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn purchase_orders(&self) -> Result<Vec<PurchaseOrder>, AppError> {
        Ok(self.inventory.store().list_purchase_orders().await?)
    }

    async fn update_purchase_order<T, F>(
        &self,
        id: PurchaseOrderId,
        mut op: F,
    ) -> Result<(T, PurchaseOrder), AppError>
    where
        F: FnMut(&mut PurchaseOrder) -> Result<T, InventoryError> + Send,
        T: Send,
    {
        let store = self.inventory.store();
        let attempts = self.inventory.config().max_retries;
        for attempt in 1..=attempts {
            let mut order = self.purchase_order(id).await?;
            let value = op(&mut order)?;
            match store.save_purchase_order(&order).await {
                Ok(version) => {
                    order.version = version;
                    return Ok((value, order));
                }
                Err(RepositoryError::VersionConflict { expected, found }) => {
                    debug!(attempt, expected, found, "Purchase order version moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(InventoryError::Conflict(format!(
            "purchase order {id} is being changed concurrently; gave up"
        ))
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use stockroom_core::{
        DeliveryStatus, NewLot, NewProduct, ProductId, PurchaseOrderStatus, SaleUnit,
    };

    use super::*;
    use crate::config::StockConfig;
    use crate::db::MemoryStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 12, 7, 30, 0).unwrap()
    }

    struct Fixture {
        inventory: InventoryService<MemoryStore>,
        purchasing: PurchasingService<MemoryStore>,
        supplier: SupplierId,
        water: ProductId,
        soap: ProductId,
    }

    async fn product(inventory: &InventoryService<MemoryStore>, name: &str, pack_size: u32) -> ProductId {
        inventory
            .create_product(
                NewProduct {
                    name: name.to_string(),
                    description: None,
                    category: None,
                    barcode_unit: None,
                    barcode_pack: None,
                    pack_size,
                    price_per_unit: Decimal::new(90, 2),
                    price_per_pack: Decimal::new(900, 2),
                },
                now(),
            )
            .await
            .unwrap()
            .id
    }

    async fn fixture() -> Fixture {
        let inventory =
            InventoryService::new(Arc::new(MemoryStore::new()), StockConfig::default());
        let purchasing = PurchasingService::new(inventory.clone());
        let supplier = purchasing
            .create_supplier(
                NewSupplier {
                    name: "  Wholesale Ltd ".to_string(),
                    contact: Some("orders@wholesale.test".to_string()),
                },
                now(),
            )
            .await
            .unwrap();
        let water = product(&inventory, "Water", 12).await;
        let soap = product(&inventory, "Soap", 1).await;
        Fixture {
            inventory,
            purchasing,
            supplier: supplier.id,
            water,
            soap,
        }
    }

    async fn order(f: &Fixture) -> PurchaseOrder {
        f.purchasing
            .create_purchase_order(
                f.supplier,
                vec![
                    NewPurchaseOrderLine {
                        product_id: f.water,
                        quantity: 2,
                        sale_unit: SaleUnit::Pack,
                        estimated_price: Decimal::new(600, 2),
                    },
                    NewPurchaseOrderLine {
                        product_id: f.soap,
                        quantity: 10,
                        sale_unit: SaleUnit::Unit,
                        estimated_price: Decimal::new(150, 2),
                    },
                ],
                now(),
            )
            .await
            .unwrap()
    }

    fn delivery(line: usize, quantity: i64, price: i64) -> Delivery {
        Delivery {
            line,
            quantity,
            actual_price: Decimal::new(price, 2),
            expiration_date: None,
            lot_number: None,
        }
    }

    #[tokio::test]
    async fn test_create_purchase_order() {
        let f = fixture().await;
        let po = order(&f).await;
        assert_eq!(po.total, Decimal::new(2700, 2));
        assert_eq!(po.status, PurchaseOrderStatus::Pending);
        assert_eq!(po.delivery_status, DeliveryStatus::NotDelivered);

        let second = order(&f).await;
        assert!(second.order_number > po.order_number);
        assert_eq!(f.purchasing.supplier(f.supplier).await.unwrap().name, "Wholesale Ltd");

        let empty = f
            .purchasing
            .create_purchase_order(f.supplier, Vec::new(), now())
            .await;
        assert!(matches!(
            empty,
            Err(AppError::Inventory(InventoryError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_receive_converts_packs_to_unit_lots() {
        let f = fixture().await;
        let po = order(&f).await;

        let mut water = delivery(0, 1, 660);
        water.expiration_date = NaiveDate::from_ymd_opt(2026, 1, 1);
        let report = f
            .purchasing
            .receive(po.id, vec![water, delivery(1, 4, 140)], now())
            .await
            .unwrap();

        assert!(report.rejected.is_empty());
        assert_eq!(report.lots.len(), 2);
        assert_eq!(report.lots[0].quantity, 12);
        assert_eq!(report.lots[0].purchase_price.amount(), Decimal::new(55, 2));
        assert_eq!(report.lots[0].purchase_order_id, Some(po.id));
        assert_eq!(report.order.delivery_status, DeliveryStatus::PartiallyDelivered);
        assert_eq!(report.order.lines[0].delivered_quantity, 1);
        assert_eq!(report.order.lines[0].lot_numbers.len(), 1);

        let stock = f.inventory.summary(f.water).await.unwrap();
        assert_eq!(stock.total_available, 12);
    }

    #[tokio::test]
    async fn test_full_delivery_then_complete() {
        let f = fixture().await;
        let po = order(&f).await;
        f.purchasing
            .receive(po.id, vec![delivery(0, 2, 600), delivery(1, 10, 150)], now())
            .await
            .unwrap();

        let po = f.purchasing.purchase_order(po.id).await.unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Delivered);
        assert_eq!(po.delivery_status, DeliveryStatus::FullyDelivered);

        let po = f.purchasing.complete(po.id).await.unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Completed);
        assert!(matches!(
            f.purchasing
                .receive(po.id, vec![delivery(1, 1, 150)], now())
                .await,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn test_over_delivery_is_rejected_up_front() {
        let f = fixture().await;
        let po = order(&f).await;
        let result = f
            .purchasing
            .receive(po.id, vec![delivery(1, 6, 150), delivery(1, 5, 150)], now())
            .await;
        assert!(matches!(
            result,
            Err(AppError::Inventory(InventoryError::Validation(_)))
        ));
        assert_eq!(f.inventory.summary(f.soap).await.unwrap().total_available, 0);
        assert!(matches!(
            f.purchasing.complete(po.id).await,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_receipts_cannot_over_deliver() {
        let f = fixture().await;
        let id = order(&f).await.id;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let purchasing = f.purchasing.clone();
                tokio::spawn(async move {
                    purchasing
                        .receive(id, vec![delivery(1, 10, 150)], now())
                        .await
                })
            })
            .collect();

        let mut received = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(report) => {
                    assert!(report.rejected.is_empty());
                    received += 1;
                }
                Err(e) => assert!(
                    matches!(e, AppError::Inventory(InventoryError::Validation(_))),
                    "unexpected error: {e}"
                ),
            }
        }

        assert_eq!(received, 1);
        assert_eq!(f.inventory.summary(f.soap).await.unwrap().total_available, 10);
        let po = f.purchasing.purchase_order(id).await.unwrap();
        assert_eq!(po.lines[1].delivered_quantity, 10);
        assert_eq!(po.lines[1].lot_numbers.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_any_delivery() {
        let f = fixture().await;
        let untouched = order(&f).await;
        let cancelled = f.purchasing.cancel(untouched.id).await.unwrap();
        assert_eq!(cancelled.status, PurchaseOrderStatus::Cancelled);
        assert!(matches!(
            f.purchasing
                .receive(untouched.id, vec![delivery(1, 1, 150)], now())
                .await,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
        assert_eq!(f.inventory.summary(f.soap).await.unwrap().total_available, 0);

        let started = order(&f).await;
        f.purchasing
            .receive(started.id, vec![delivery(1, 2, 150)], now())
            .await
            .unwrap();
        assert!(matches!(
            f.purchasing.cancel(started.id).await,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
        assert!(matches!(
            f.purchasing.cancel(PurchaseOrderId::new(999)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lines_commit_independently() {
        let f = fixture().await;
        let mut existing = NewLot::new(1, Decimal::ONE);
        existing.lot_number = Some("B-17".to_string());
        f.inventory.add_lot(f.soap, existing, now()).await.unwrap();

        let po = order(&f).await;
        let mut clash = delivery(1, 3, 150);
        clash.lot_number = Some("B-17".to_string());
        let report = f
            .purchasing
            .receive(po.id, vec![delivery(0, 1, 600), clash], now())
            .await
            .unwrap();

        assert_eq!(report.lots.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 1);
        assert_eq!(report.order.lines[0].delivered_quantity, 1);
        assert_eq!(report.order.lines[1].delivered_quantity, 0);
    }
}
