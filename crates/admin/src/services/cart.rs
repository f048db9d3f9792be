//! Cart management.
//!
//! Carts hold no stock. Every change runs the availability guard so a user
//! cannot pile up more than a checkout could draw, but the sale itself
//! checks again.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use stockroom_core::cart::{CartGuard, CartLine, CartRequest, ensure_line_quantity};
use stockroom_core::promotion::PromotionBinder;
use stockroom_core::{CartLineId, InventoryError};

use crate::db::{CartStore, NewCartLine, ProductStore, PromotionStore, RepositoryError};
use crate::error::AppError;
use crate::services::stock::InventoryService;

#[derive(Debug)]
pub struct CartService<S> {
    inventory: InventoryService<S>,
}

impl<S> Clone for CartService<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
        }
    }
}

impl<S: ProductStore + PromotionStore + CartStore> CartService<S> {
    #[must_use]
    pub const fn new(inventory: InventoryService<S>) -> Self {
        Self { inventory }
    }

    /// Put something in a cart. A request for the same product, unit and
    /// promotion as an existing line adds to that line.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty user or a quantity below 1.
    /// - `NotFound` for an unknown product or promotion.
    /// - `InsufficientStock` when the cart would exceed sellable stock.
    #[instrument(skip(self, request, now), fields(user = %request.user_name, product_id = %request.product_id))]
    pub async fn add(&self, request: CartRequest, now: DateTime<Utc>) -> Result<CartLine, AppError> {
        request.validate()?;
        let product = self.inventory.product(request.product_id).await?;
        let promotions = self
            .inventory
            .store()
            .promotions_for_product(product.id)
            .await?;
        let guard = CartGuard::new(&product, PromotionBinder::new(&promotions), now);
        let unit_price = guard.unit_price(request.sale_unit, request.promotion_id)?;

        let store = self.inventory.store();
        let existing = store.cart_lines(&request.user_name).await?;

        if let Some(line) = existing.iter().find(|line| line.same_slot(&request)) {
            let quantity = line.quantity.checked_add(request.quantity).ok_or_else(|| {
                InventoryError::Validation("cart quantity is too large".to_string())
            })?;
            guard.check(
                &request.user_name,
                quantity,
                request.sale_unit,
                request.promotion_id,
                &existing,
                Some(line.id),
            )?;
            let updated = store.update_cart_line(line.id, quantity, unit_price).await?;
            debug!(line_id = %updated.id, quantity, "Cart line merged");
            return Ok(updated);
        }

        guard.check(
            &request.user_name,
            request.quantity,
            request.sale_unit,
            request.promotion_id,
            &existing,
            None,
        )?;
        let line = store
            .insert_cart_line(NewCartLine {
                user_name: request.user_name,
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: request.quantity,
                sale_unit: request.sale_unit,
                unit_price,
                promotion_id: request.promotion_id,
                added_at: now,
            })
            .await?;
        info!(line_id = %line.id, "Added to cart");
        Ok(line)
    }

    /// Set a line's quantity, re-pricing it at today's price.
    ///
    /// # Errors
    ///
    /// As [`Self::add`], plus `NotFound` for an unknown line.
    #[instrument(skip(self, now), fields(line_id = %line_id))]
    pub async fn update(
        &self,
        line_id: CartLineId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError> {
        ensure_line_quantity(quantity)?;
        let store = self.inventory.store();
        let line = store
            .get_cart_line(line_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("cart line {line_id}")))?;

        let product = self.inventory.product(line.product_id).await?;
        let promotions = store.promotions_for_product(product.id).await?;
        let guard = CartGuard::new(&product, PromotionBinder::new(&promotions), now);
        let unit_price = guard.unit_price(line.sale_unit, line.promotion_id)?;
        let existing = store.cart_lines(&line.user_name).await?;
        guard.check(
            &line.user_name,
            quantity,
            line.sale_unit,
            line.promotion_id,
            &existing,
            Some(line.id),
        )?;

        store
            .update_cart_line(line_id, quantity, unit_price)
            .await
            .map_err(|e| cart_line_error(e, line_id))
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown line.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn remove(&self, line_id: CartLineId) -> Result<(), AppError> {
        self.inventory
            .store()
            .delete_cart_line(line_id)
            .await
            .map_err(|e| cart_line_error(e, line_id))
    }

    /// Empty a user's cart; returns how many lines were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn clear(&self, user_name: &str) -> Result<u64, AppError> {
        Ok(self.inventory.store().clear_cart(user_name).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn lines(&self, user_name: &str) -> Result<Vec<CartLine>, AppError> {
        Ok(self.inventory.store().cart_lines(user_name).await?)
    }
}

fn cart_line_error(e: RepositoryError, id: CartLineId) -> AppError {
    match e {
        RepositoryError::NotFound => AppError::NotFound(format!("cart line {id}")),
        other => other.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use stockroom_core::promotion::PromotionDraft;
    use stockroom_core::{NewLot, NewProduct, ProductId, SaleUnit};

    use super::*;
    use crate::config::StockConfig;
    use crate::db::MemoryStore;
    use crate::services::promotions::PromotionService;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    /// Yoghurt in packs of 4: LOT001 and LOT002 with 6 units each.
    async fn setup() -> (CartService<MemoryStore>, InventoryService<MemoryStore>, ProductId) {
        let inventory =
            InventoryService::new(Arc::new(MemoryStore::new()), StockConfig::default());
        let product = inventory
            .create_product(
                NewProduct {
                    name: "Yoghurt".to_string(),
                    description: None,
                    category: Some("Dairy".to_string()),
                    barcode_unit: None,
                    barcode_pack: None,
                    pack_size: 4,
                    price_per_unit: Decimal::new(120, 2),
                    price_per_pack: Decimal::new(400, 2),
                },
                now(),
            )
            .await
            .unwrap();
        for _ in 0..2 {
            inventory
                .add_lot(product.id, NewLot::new(6, Decimal::ONE), now())
                .await
                .unwrap();
        }
        (CartService::new(inventory.clone()), inventory, product.id)
    }

    fn request(product_id: ProductId, quantity: i64, sale_unit: SaleUnit) -> CartRequest {
        CartRequest {
            user_name: "ana".to_string(),
            product_id,
            quantity,
            sale_unit,
            promotion_id: None,
        }
    }

    #[tokio::test]
    async fn test_same_slot_merges() {
        let (cart, _, product) = setup().await;
        let first = cart
            .add(request(product, 2, SaleUnit::Unit), now())
            .await
            .unwrap();
        let merged = cart
            .add(request(product, 3, SaleUnit::Unit), now())
            .await
            .unwrap();

        assert_eq!(first.id, merged.id);
        assert_eq!(merged.quantity, 5);
        assert_eq!(merged.unit_price.amount(), Decimal::new(120, 2));
        assert_eq!(cart.lines("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_units_and_packs_count_against_the_same_stock() {
        let (cart, _, product) = setup().await;
        // 2 packs = 8 of 12 units
        cart.add(request(product, 2, SaleUnit::Pack), now())
            .await
            .unwrap();

        let err = cart
            .add(request(product, 5, SaleUnit::Unit), now())
            .await
            .unwrap_err();
        assert_eq!(err.shortage(), Some(1));

        cart.add(request(product, 4, SaleUnit::Unit), now())
            .await
            .unwrap();
        assert_eq!(cart.lines("ana").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_huge_pack_quantity_is_a_validation_error() {
        let (cart, _, product) = setup().await;
        let result = cart
            .add(request(product, i64::MAX / 2, SaleUnit::Pack), now())
            .await;
        assert!(matches!(
            result,
            Err(AppError::Inventory(InventoryError::Validation(_)))
        ));
        assert!(cart.lines("ana").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_does_not_count_the_line_twice() {
        let (cart, _, product) = setup().await;
        let line = cart
            .add(request(product, 10, SaleUnit::Unit), now())
            .await
            .unwrap();

        let line = cart.update(line.id, 12, now()).await.unwrap();
        assert_eq!(line.quantity, 12);

        let err = cart.update(line.id, 13, now()).await.unwrap_err();
        assert_eq!(err.shortage(), Some(1));
        assert!(matches!(
            cart.update(line.id, 0, now()).await,
            Err(AppError::Inventory(InventoryError::Validation(_)))
        ));
    }

    #[tokio::test]
    async fn test_promotional_line_uses_promotion_price_and_lots() {
        let (cart, inventory, product) = setup().await;
        let promotion = PromotionService::new(inventory)
            .create(
                PromotionDraft {
                    product_id: product,
                    name: "Spring".to_string(),
                    discounted_price: Decimal::new(80, 2),
                    start: now() - Duration::hours(1),
                    end: now() + Duration::days(7),
                    applied_lots: vec!["LOT002".to_string()],
                },
                now(),
            )
            .await
            .unwrap();

        let mut promo_request = request(product, 6, SaleUnit::Unit);
        promo_request.promotion_id = Some(promotion.id);
        let line = cart.add(promo_request.clone(), now()).await.unwrap();
        assert_eq!(line.unit_price.amount(), Decimal::new(80, 2));

        // LOT002 is exhausted by the cart; regular stock is separate.
        promo_request.quantity = 1;
        let err = cart.add(promo_request, now()).await.unwrap_err();
        assert_eq!(err.shortage(), Some(1));
        cart.add(request(product, 6, SaleUnit::Unit), now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (cart, _, product) = setup().await;
        let line = cart
            .add(request(product, 1, SaleUnit::Unit), now())
            .await
            .unwrap();
        cart.remove(line.id).await.unwrap();
        assert!(matches!(
            cart.remove(line.id).await,
            Err(AppError::NotFound(_))
        ));

        cart.add(request(product, 1, SaleUnit::Pack), now())
            .await
            .unwrap();
        assert_eq!(cart.clear("ana").await.unwrap(), 1);
        assert!(cart.lines("ana").await.unwrap().is_empty());
    }
}
