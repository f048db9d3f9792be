//! Sale and return orchestration for a single product line.
//!
//! A sale resolves the lot filter for the requested price (promotional or
//! regular), allocates FEFO from the admitted lots, and saves the ledger in
//! one versioned write. The returned draws are what a later return hands
//! back, lot for lot.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use stockroom_core::allocation::LotFilter;
use stockroom_core::order::LotDraw;
use stockroom_core::promotion::PromotionBinder;
use stockroom_core::{InventoryError, Product, ProductId, PromotionId, SaleUnit};

use crate::db::{ProductStore, PromotionStore};
use crate::error::AppError;
use crate::services::stock::InventoryService;

/// Stock taken for one sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedSale {
    /// The product as saved after the sale.
    pub product: Product,
    /// Base units taken.
    pub units: i64,
    pub draws: Vec<LotDraw>,
}

/// Commits and reverses sales against product ledgers.
#[derive(Debug)]
pub struct SalesService<S> {
    inventory: InventoryService<S>,
}

impl<S> Clone for SalesService<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
        }
    }
}

impl<S: ProductStore + PromotionStore> SalesService<S> {
    #[must_use]
    pub const fn new(inventory: InventoryService<S>) -> Self {
        Self { inventory }
    }

    /// Take `quantity` × `sale_unit` of a product, from the promotion's lots
    /// when `promotion_id` is given, otherwise from the lots no active
    /// promotion reserves.
    ///
    /// All or nothing: on any failure the ledger is left as it was.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown product or a promotion of another product.
    /// - `Validation` for a non-positive quantity or an inactive promotion.
    /// - `NoEligibleLots` / `NoSellableStock` when segregation leaves nothing.
    /// - `InsufficientStock` with the shortage in base units.
    #[instrument(skip(self, now), fields(product_id = %product_id))]
    pub async fn commit_sale(
        &self,
        product_id: ProductId,
        quantity: i64,
        sale_unit: SaleUnit,
        promotion_id: Option<PromotionId>,
        now: DateTime<Utc>,
    ) -> Result<CommittedSale, AppError> {
        let result = self
            .inventory
            .transact_with_promotions(product_id, now, |product, promotions| {
                let units = product.units_for(quantity, sale_unit)?;
                let binder = PromotionBinder::new(promotions);
                let filter = binder.resolve_filter_for(product, now, promotion_id)?;
                let draws = product.commit_sale(units, Some(&filter))?;
                Ok((units, draws))
            })
            .await;

        match result {
            Ok(((units, draws), product)) => {
                info!(units, lots = draws.len(), "Sale committed");
                Ok(CommittedSale {
                    product,
                    units,
                    draws,
                })
            }
            Err(e) => {
                if let Some(shortage) = e.shortage() {
                    warn!(shortage, "Sale rejected: insufficient stock");
                }
                Err(e)
            }
        }
    }

    /// Commit a new quantity for a line that already holds `previous`
    /// draws, in a single ledger write. The old draws are handed back first
    /// and the new quantity allocated from the result.
    ///
    /// Promotional lines draw from the promotion's lots whether or not it
    /// is still running; the price was fixed when the order was placed.
    ///
    /// # Errors
    ///
    /// As [`Self::commit_sale`]; the ledger is unchanged on failure.
    #[instrument(skip(self, previous, now), fields(product_id = %product_id))]
    pub async fn recommit_sale(
        &self,
        product_id: ProductId,
        previous: &[LotDraw],
        units: i64,
        promotion_id: Option<PromotionId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<LotDraw>, AppError> {
        let (draws, _) = self
            .inventory
            .transact_with_promotions(product_id, now, |product, promotions| {
                product.restore_sale(previous)?;
                let binder = PromotionBinder::new(promotions);
                let filter = match promotion_id {
                    Some(id) => {
                        let promotion = binder.find(product_id, id).ok_or_else(|| {
                            InventoryError::NotFound(format!("promotion {id}"))
                        })?;
                        LotFilter::IncludeOnly(promotion.applied_lots.clone())
                    }
                    None => binder.resolve_filter_for(product, now, None)?,
                };
                product.commit_sale(units, Some(&filter))
            })
            .await?;
        info!(lots = draws.len(), "Sale recommitted");
        Ok(draws)
    }

    /// Hand recorded draws back to their lots.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the product or one of the lots is gone;
    /// nothing is restored in that case.
    #[instrument(skip(self, draws, now), fields(product_id = %product_id, lots = draws.len()))]
    pub async fn restore_sale(
        &self,
        product_id: ProductId,
        draws: &[LotDraw],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inventory
            .transact(product_id, now, |product| product.restore_sale(draws))
            .await?;
        info!("Sale restored");
        Ok(())
    }

    /// Swap `current` draws back for `previous` ones, undoing a recommit.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientStock` if the units of `previous` were sold to
    /// someone else in the meantime; the ledger is unchanged in that case.
    #[instrument(skip(self, current, previous, now), fields(product_id = %product_id))]
    pub async fn revert_recommit(
        &self,
        product_id: ProductId,
        current: &[LotDraw],
        previous: &[LotDraw],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.inventory
            .transact(product_id, now, |product| {
                product.restore_sale(current)?;
                product.reapply_sale(previous)
            })
            .await?;
        Ok(())
    }
}
