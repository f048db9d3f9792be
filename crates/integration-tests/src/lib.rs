//! Integration tests for Stockroom.
//!
//! Scenarios run every service against one [`MemoryStore`], the same way
//! the worker and CLI run them against `PostgreSQL`.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p stockroom-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use stockroom_admin::config::{StockConfig, SweepConfig};
use stockroom_admin::db::MemoryStore;
use stockroom_admin::error::AppError;
use stockroom_admin::services::Stockroom;
use stockroom_core::cart::{CartLine, CartRequest};
use stockroom_core::{NewLot, NewProduct, ProductId, PromotionId, SaleUnit};

/// A shop wired to a fresh in-memory store.
#[derive(Debug, Clone)]
pub struct TestShop {
    pub stockroom: Stockroom<MemoryStore>,
}

impl TestShop {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StockConfig::default(), SweepConfig::default())
    }

    #[must_use]
    pub fn with_config(stock: StockConfig, sweep: SweepConfig) -> Self {
        Self {
            stockroom: Stockroom::new(Arc::new(MemoryStore::new()), stock, sweep),
        }
    }

    /// Create a product sold by the unit at `price` cents, or by packs of
    /// `pack_size` at `pack_size` times that.
    ///
    /// # Errors
    ///
    /// Returns an error if the product is rejected.
    pub async fn product(
        &self,
        name: &str,
        price_cents: i64,
        pack_size: u32,
    ) -> Result<ProductId, AppError> {
        let product = self
            .stockroom
            .inventory
            .create_product(
                NewProduct {
                    name: name.to_string(),
                    description: None,
                    category: None,
                    barcode_unit: None,
                    barcode_pack: None,
                    pack_size,
                    price_per_unit: Decimal::new(price_cents, 2),
                    price_per_pack: Decimal::new(price_cents * i64::from(pack_size), 2),
                },
                at(1, 1),
            )
            .await?;
        Ok(product.id)
    }

    /// Receive a lot of `quantity` units costing 1.00 each.
    ///
    /// # Errors
    ///
    /// Returns an error if the lot is rejected.
    pub async fn receive(
        &self,
        product_id: ProductId,
        quantity: i64,
        expires: NaiveDate,
    ) -> Result<(), AppError> {
        let lot = NewLot::new(quantity, Decimal::ONE).expiring(expires);
        self.stockroom
            .inventory
            .add_lot(product_id, lot, at(1, 1))
            .await?;
        Ok(())
    }

    /// Put units of a product in `user`'s cart.
    ///
    /// # Errors
    ///
    /// Returns the cart guard's error.
    pub async fn add_to_cart(
        &self,
        user: &str,
        product_id: ProductId,
        quantity: i64,
        promotion_id: Option<PromotionId>,
        now: DateTime<Utc>,
    ) -> Result<CartLine, AppError> {
        self.stockroom
            .cart
            .add(
                CartRequest {
                    user_name: user.to_string(),
                    product_id,
                    quantity,
                    sale_unit: SaleUnit::Unit,
                    promotion_id,
                },
                now,
            )
            .await
    }

    /// Units currently available for a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the product does not exist.
    pub async fn available(&self, product_id: ProductId) -> Result<i64, AppError> {
        Ok(self
            .stockroom
            .inventory
            .summary(product_id)
            .await?
            .total_available)
    }
}

impl Default for TestShop {
    fn default() -> Self {
        Self::new()
    }
}

/// Noon on a day of 2026, or midnight if the date is out of range.
#[must_use]
pub fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A date in 2026, or the Unix epoch if out of range.
#[must_use]
pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap_or_default()
}
