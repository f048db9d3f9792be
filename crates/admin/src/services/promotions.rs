//! Promotion management.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use stockroom_core::promotion::{
    Promotion, PromotionBinder, PromotionDraft, ValidPromotion, next_promotion_barcode,
};
use stockroom_core::{InventoryError, ProductId, PromotionId};

use crate::db::{ProductStore, PromotionStore, RepositoryError};
use crate::error::AppError;
use crate::services::stock::InventoryService;

#[derive(Debug)]
pub struct PromotionService<S> {
    inventory: InventoryService<S>,
}

impl<S> Clone for PromotionService<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
        }
    }
}

impl<S: ProductStore + PromotionStore> PromotionService<S> {
    #[must_use]
    pub const fn new(inventory: InventoryService<S>) -> Self {
        Self { inventory }
    }

    /// Check a promotion against its product and the product's other
    /// promotions. Returns the product version the check was made against.
    async fn check(
        &self,
        valid: &ValidPromotion,
        updating: Option<PromotionId>,
        now: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let product = self.inventory.product(valid.product_id).await?;
        product.ensure_active()?;
        let existing = self
            .inventory
            .store()
            .promotions_for_product(valid.product_id)
            .await?;
        let binder = PromotionBinder::new(&existing);
        binder.validate_application(
            &product,
            &valid.applied_lots,
            &valid.window,
            now.date_naive(),
            updating,
        )?;
        binder.ensure_unique_name(valid.product_id, &valid.name, &valid.window, updating)?;
        Ok(product.version)
    }

    fn contended(product_id: ProductId) -> AppError {
        warn!("Gave up on contended promotion write");
        InventoryError::Conflict(format!(
            "product {product_id} is being changed concurrently; promotion not saved"
        ))
        .into()
    }

    /// Create a promotion and give it the first free barcode of the month.
    ///
    /// # Errors
    ///
    /// - Validation errors for bad input or lots that cannot be reserved.
    /// - `Conflict` for lots already claimed by an overlapping promotion, a
    ///   duplicate name, or when no barcode is left this month.
    #[instrument(skip(self, draft, now), fields(product_id = %draft.product_id, name = %draft.name))]
    pub async fn create(
        &self,
        draft: PromotionDraft,
        now: DateTime<Utc>,
    ) -> Result<Promotion, AppError> {
        let valid = draft.validate()?;

        let store = self.inventory.store();
        for attempt in 1..=self.inventory.config().max_retries {
            let version = self.check(&valid, None, now).await?;
            let all = store.list_promotions().await?;
            let barcode = next_promotion_barcode(all.iter().map(|p| &p.barcode), now.date_naive())?;
            match store.insert_promotion(&valid, &barcode, version, now).await {
                Ok(promotion) => {
                    info!(promotion_id = %promotion.id, barcode = %promotion.barcode, "Promotion created");
                    return Ok(promotion);
                }
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(%barcode, %reason, "Promotion barcode taken, picking another");
                }
                Err(RepositoryError::VersionConflict { expected, found }) => {
                    debug!(attempt, expected, found, "Product moved, checking the promotion again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Self::contended(valid.product_id))
    }

    /// Replace a promotion's name, price, window and lots.
    ///
    /// # Errors
    ///
    /// As [`Self::create`], plus `NotFound` for an unknown promotion and a
    /// validation error when the draft names a different product.
    #[instrument(skip(self, draft, now), fields(promotion_id = %id))]
    pub async fn update(
        &self,
        id: PromotionId,
        draft: PromotionDraft,
        now: DateTime<Utc>,
    ) -> Result<Promotion, AppError> {
        let current = self.promotion(id).await?;
        if draft.product_id != current.product_id {
            return Err(InventoryError::Validation(
                "a promotion cannot move to another product".to_string(),
            )
            .into());
        }
        let valid = draft.validate()?;

        let store = self.inventory.store();
        for attempt in 1..=self.inventory.config().max_retries {
            let version = self.check(&valid, Some(id), now).await?;
            match store.update_promotion(id, &valid, version, now).await {
                Ok(promotion) => {
                    info!("Promotion updated");
                    return Ok(promotion);
                }
                Err(RepositoryError::VersionConflict { expected, found }) => {
                    debug!(attempt, expected, found, "Product moved, checking the promotion again");
                }
                Err(RepositoryError::NotFound) => {
                    return Err(AppError::NotFound(format!("promotion {id}")));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Self::contended(valid.product_id))
    }

    /// Delete a promotion. Its lots go back to regular stock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown promotion.
    #[instrument(skip(self), fields(promotion_id = %id))]
    pub async fn delete(&self, id: PromotionId) -> Result<(), AppError> {
        self.inventory
            .store()
            .delete_promotion(id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => AppError::NotFound(format!("promotion {id}")),
                other => other.into(),
            })?;
        info!("Promotion deleted");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown promotion.
    pub async fn promotion(&self, id: PromotionId) -> Result<Promotion, AppError> {
        self.inventory
            .store()
            .get_promotion(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("promotion {id}")))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> Result<Vec<Promotion>, AppError> {
        Ok(self.inventory.store().list_promotions().await?)
    }

    /// Promotions running at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Promotion>, AppError> {
        let mut promotions = self.list().await?;
        promotions.retain(|p| p.is_active(now));
        Ok(promotions)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn for_product(&self, product_id: ProductId) -> Result<Vec<Promotion>, AppError> {
        Ok(self
            .inventory
            .store()
            .promotions_for_product(product_id)
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use stockroom_core::{NewLot, NewProduct};

    use super::*;
    use crate::config::StockConfig;
    use crate::db::MemoryStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 8, 0, 0).unwrap()
    }

    async fn setup() -> (PromotionService<MemoryStore>, ProductId) {
        let inventory =
            InventoryService::new(Arc::new(MemoryStore::new()), StockConfig::default());
        let product = inventory
            .create_product(
                NewProduct {
                    name: "Cheddar".to_string(),
                    description: None,
                    category: None,
                    barcode_unit: None,
                    barcode_pack: None,
                    pack_size: 1,
                    price_per_unit: Decimal::new(499, 2),
                    price_per_pack: Decimal::new(499, 2),
                },
                now(),
            )
            .await
            .unwrap();
        for _ in 0..3 {
            let lot = NewLot::new(10, Decimal::new(250, 2))
                .expiring(now().date_naive() + chrono::Days::new(20));
            inventory.add_lot(product.id, lot, now()).await.unwrap();
        }
        (PromotionService::new(inventory), product.id)
    }

    fn draft(product_id: ProductId, name: &str, lots: &[&str], days: (i64, i64)) -> PromotionDraft {
        PromotionDraft {
            product_id,
            name: name.to_string(),
            discounted_price: Decimal::new(350, 2),
            start: now() + Duration::days(days.0),
            end: now() + Duration::days(days.1),
            applied_lots: lots.iter().map(ToString::to_string).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_barcodes() {
        let (promotions, product) = setup().await;
        let first = promotions
            .create(draft(product, "Week 1", &["LOT001"], (0, 7)), now())
            .await
            .unwrap();
        let second = promotions
            .create(draft(product, "Week 2", &["LOT002"], (0, 7)), now())
            .await
            .unwrap();

        assert!(first.barcode.as_str().starts_with("2992506"));
        assert_ne!(first.barcode, second.barcode);
    }

    #[tokio::test]
    async fn test_overlapping_lot_claim_is_conflict() {
        let (promotions, product) = setup().await;
        promotions
            .create(draft(product, "Week 1", &["LOT001", "LOT002"], (0, 7)), now())
            .await
            .unwrap();

        let clash = promotions
            .create(draft(product, "Flash", &["LOT002"], (3, 4)), now())
            .await;
        assert!(matches!(
            clash,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));

        // Same lots in a later, disjoint window are fine.
        promotions
            .create(draft(product, "Week 3", &["LOT002"], (14, 18)), now())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_cannot_share_a_lot() {
        let (promotions, product) = setup().await;
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let promotions = promotions.clone();
                tokio::spawn(async move {
                    promotions
                        .create(draft(product, &format!("Flash {i}"), &["LOT001"], (0, 7)), now())
                        .await
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(
                    matches!(e, AppError::Inventory(InventoryError::Conflict(_))),
                    "unexpected error: {e}"
                ),
            }
        }
        assert_eq!(created, 1);
        let stored = promotions.for_product(product).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].applied_lots.iter().any(|l| l.as_str() == "LOT001"));
    }

    #[tokio::test]
    async fn test_retired_product_takes_no_new_promotions() {
        let (promotions, product) = setup().await;
        promotions
            .inventory
            .retire_product(product, now())
            .await
            .unwrap();

        let result = promotions
            .create(draft(product, "Clearance", &["LOT001"], (0, 7)), now())
            .await;
        assert!(matches!(
            result,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
        assert!(promotions.for_product(product).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_in_overlapping_window() {
        let (promotions, product) = setup().await;
        promotions
            .create(draft(product, "Summer", &["LOT001"], (0, 7)), now())
            .await
            .unwrap();
        let dup = promotions
            .create(draft(product, "summer", &["LOT003"], (5, 9)), now())
            .await;
        assert!(matches!(
            dup,
            Err(AppError::Inventory(InventoryError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn test_update_may_keep_its_own_lots() {
        let (promotions, product) = setup().await;
        let promo = promotions
            .create(draft(product, "Week 1", &["LOT001"], (0, 7)), now())
            .await
            .unwrap();

        let updated = promotions
            .update(
                promo.id,
                draft(product, "Week 1", &["LOT001", "LOT003"], (0, 10)),
                now(),
            )
            .await
            .unwrap();
        assert_eq!(updated.applied_lots.len(), 2);
        assert_eq!(updated.barcode, promo.barcode);

        promotions.delete(promo.id).await.unwrap();
        assert!(matches!(
            promotions.delete(promo.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_active_filters_by_window() {
        let (promotions, product) = setup().await;
        promotions
            .create(draft(product, "Now", &["LOT001"], (0, 2)), now())
            .await
            .unwrap();
        promotions
            .create(draft(product, "Later", &["LOT002"], (5, 6)), now())
            .await
            .unwrap();

        let active = promotions.active(now()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Now");
        assert_eq!(promotions.for_product(product).await.unwrap().len(), 2);
    }
}
