//! Scheduled housekeeping: expiring lots and unpaid transfers.
//!
//! A sweep only calls the public service operations, so every change it
//! makes goes through the same versioned writes as a manual one. Running it
//! twice on the same day changes nothing the second time.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use stockroom_core::{LotNumber, OrderId, ProductId};

use crate::config::SweepConfig;
use crate::db::{CartStore, OrderStore, ProductStore, PromotionStore};
use crate::error::AppError;
use crate::services::orders::OrderService;
use crate::services::stock::InventoryService;

/// What one sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub products_checked: usize,
    pub expired: Vec<(ProductId, LotNumber)>,
    pub disposed: Vec<(ProductId, LotNumber)>,
    pub cancelled_orders: Vec<OrderId>,
    /// Products and orders that could not be processed. They are retried on
    /// the next run.
    pub failures: usize,
}

impl SweepReport {
    /// Whether the sweep changed anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.expired.is_empty() && self.disposed.is_empty() && self.cancelled_orders.is_empty()
    }
}

#[derive(Debug)]
pub struct Sweeper<S> {
    inventory: InventoryService<S>,
    orders: OrderService<S>,
    config: SweepConfig,
}

impl<S> Clone for Sweeper<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            orders: self.orders.clone(),
            config: self.config,
        }
    }
}

impl<S> Sweeper<S>
where
    S: ProductStore + PromotionStore + CartStore + OrderStore,
{
    #[must_use]
    pub fn new(inventory: InventoryService<S>, config: SweepConfig) -> Self {
        Self {
            orders: OrderService::new(inventory.clone()),
            inventory,
            config,
        }
    }

    /// Run one sweep at `now`.
    ///
    /// A product or order that fails is reported and counted; the sweep
    /// carries on with the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if products or overdue orders cannot be listed.
    #[instrument(skip(self, now))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        let products = self.inventory.list_products().await?;
        report.products_checked = products.len();
        for product in products {
            match self
                .inventory
                .expire(product.id, self.config.dispose_expired, now)
                .await
            {
                Ok(outcome) => {
                    report
                        .expired
                        .extend(outcome.expired.into_iter().map(|lot| (product.id, lot)));
                    report
                        .disposed
                        .extend(outcome.disposed.into_iter().map(|lot| (product.id, lot)));
                }
                Err(e) => {
                    e.report();
                    report.failures += 1;
                }
            }
        }

        let payments = self
            .orders
            .expire_unpaid(now, self.config.payment_timeout)
            .await?;
        report.failures += payments.failed.len();
        report.cancelled_orders = payments.cancelled;

        info!(
            products = report.products_checked,
            expired = report.expired.len(),
            disposed = report.disposed.len(),
            cancelled_orders = report.cancelled_orders.len(),
            failures = report.failures,
            "Sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use stockroom_core::{LotStatus, NewLot, NewProduct};

    use super::*;
    use crate::config::StockConfig;
    use crate::db::MemoryStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 3, 0, 0).unwrap()
    }

    async fn setup(dispose_expired: bool) -> (Sweeper<MemoryStore>, InventoryService<MemoryStore>, ProductId) {
        let inventory =
            InventoryService::new(Arc::new(MemoryStore::new()), StockConfig::default());
        let product = inventory
            .create_product(
                NewProduct {
                    name: "Ham".to_string(),
                    description: None,
                    category: None,
                    barcode_unit: None,
                    barcode_pack: None,
                    pack_size: 1,
                    price_per_unit: Decimal::new(350, 2),
                    price_per_pack: Decimal::new(350, 2),
                },
                now(),
            )
            .await
            .unwrap();
        for day in [18, 20, 25] {
            let lot = NewLot::new(4, Decimal::ONE)
                .expiring(NaiveDate::from_ymd_opt(2025, 8, day).unwrap())
                .received(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap());
            inventory.add_lot(product.id, lot, now()).await.unwrap();
        }
        let config = SweepConfig {
            dispose_expired,
            ..SweepConfig::default()
        };
        (Sweeper::new(inventory.clone(), config), inventory, product.id)
    }

    #[tokio::test]
    async fn test_sweep_expires_only_past_lots_and_is_idempotent() {
        let (sweeper, inventory, product) = setup(false).await;

        let report = sweeper.run_once(now()).await.unwrap();
        assert_eq!(report.products_checked, 1);
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.expired[0].1.as_str(), "LOT001");
        assert!(report.disposed.is_empty());
        assert_eq!(report.failures, 0);

        let ham = inventory.product(product).await.unwrap();
        assert_eq!(ham.ledger.lots()[0].status, LotStatus::Expired);
        // Expiring today is not yet past its date.
        assert_eq!(ham.ledger.lots()[1].status, LotStatus::Active);
        assert_eq!(ham.ledger.total_available(), 8);

        let again = sweeper.run_once(now()).await.unwrap();
        assert!(again.is_noop());
        assert_eq!(inventory.product(product).await.unwrap().version, ham.version);
    }

    #[tokio::test]
    async fn test_sweep_can_dispose_in_the_same_run() {
        let (sweeper, inventory, product) = setup(true).await;

        let report = sweeper.run_once(now() + Duration::days(1)).await.unwrap();
        assert_eq!(report.expired.len(), 2);
        assert_eq!(report.disposed.len(), 2);

        let ham = inventory.product(product).await.unwrap();
        let disposal = ham.ledger.lots()[0].disposal.as_ref().unwrap();
        assert_eq!(disposal.reason, "expired");
        assert_eq!(ham.ledger.lots()[1].status, LotStatus::Disposed);
        assert_eq!(ham.ledger.total_available(), 4);
    }
}
