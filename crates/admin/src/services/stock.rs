//! Product catalog and lot ledger operations.
//!
//! Every ledger change runs through [`InventoryService::transact`]: load the
//! product, apply the change to a copy, and save it conditional on the
//! version that was read. A lost race reloads and tries again, so two
//! concurrent writers can never both spend the same units.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use stockroom_core::promotion::Promotion;
use stockroom_core::{
    Barcode, InventoryError, Lot, LotNumber, NewLot, NewProduct, Product, ProductId,
    ProductUpdate, StockSummary,
};

use crate::config::StockConfig;
use crate::db::{ProductStore, PromotionStore, RepositoryError};
use crate::error::AppError;

/// Lots changed by one expiry sweep of a product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryOutcome {
    pub expired: Vec<LotNumber>,
    pub disposed: Vec<LotNumber>,
}

/// Catalog and stock operations on products.
#[derive(Debug)]
pub struct InventoryService<S> {
    store: Arc<S>,
    config: StockConfig,
}

impl<S> Clone for InventoryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: ProductStore> InventoryService<S> {
    /// Create a new inventory service.
    #[must_use]
    pub const fn new(store: Arc<S>, config: StockConfig) -> Self {
        Self { store, config }
    }

    pub(crate) const fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub(crate) const fn config(&self) -> StockConfig {
        self.config
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// # Errors
    ///
    /// Returns a validation error for bad input, or a conflict if a barcode
    /// is already in use.
    #[instrument(skip(self, product), fields(name = %product.name))]
    pub async fn create_product(
        &self,
        product: NewProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        let valid = product.validate()?;
        let product = self.store.create_product(valid, now).await?;
        info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the product does not exist.
    pub async fn product(&self, id: ProductId) -> Result<Product, AppError> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("product {id}")))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_products(&self) -> Result<Vec<Product>, AppError> {
        Ok(self.store.list_products().await?)
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no product carries `barcode`.
    pub async fn find_by_barcode(&self, barcode: &Barcode) -> Result<Product, AppError> {
        self.store
            .find_by_barcode(barcode)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("barcode {barcode}")))
    }

    /// Change catalog fields. The ledger is not touched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown product or a validation
    /// error for bad input.
    #[instrument(skip(self, update), fields(product_id = %id))]
    pub async fn update_catalog(
        &self,
        id: ProductId,
        update: ProductUpdate,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        let mut product = self.product(id).await?;
        update.apply(&mut product)?;
        self.store.update_catalog(&product, now).await?;
        Ok(product)
    }

    // =========================================================================
    // Ledger transactions
    // =========================================================================

    /// Run `op` against a fresh copy of the product and save the result with
    /// a compare-and-swap on its version.
    ///
    /// `op` may run several times. If it fails, nothing is saved. If it
    /// leaves the ledger unchanged, nothing is written. Returns the value of
    /// `op` and the product as saved.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the product does not exist.
    /// - The error returned by `op`.
    /// - `InventoryError::Conflict` once `max_retries` attempts all lost
    ///   the race.
    #[instrument(skip(self, now, op), fields(product_id = %id))]
    pub async fn transact<T, F>(
        &self,
        id: ProductId,
        now: DateTime<Utc>,
        mut op: F,
    ) -> Result<(T, Product), AppError>
    where
        F: FnMut(&mut Product) -> Result<T, InventoryError> + Send,
        T: Send,
    {
        for attempt in 1..=self.config.max_retries {
            let current = self.product(id).await?;
            let mut working = current.clone();
            let value = op(&mut working)?;
            if let Some(saved) = self.save_attempt(attempt, &current, working, value, now).await? {
                return Ok(saved);
            }
        }
        Err(self.gave_up(id))
    }

    /// Save `working` over `current` with a compare-and-swap. `None` means
    /// the version moved and the caller should reload.
    async fn save_attempt<T: Send>(
        &self,
        attempt: u32,
        current: &Product,
        mut working: Product,
        value: T,
        now: DateTime<Utc>,
    ) -> Result<Option<(T, Product)>, AppError> {
        if working.ledger == current.ledger {
            return Ok(Some((value, working)));
        }

        match self
            .store
            .save_ledger(current.id, &working.ledger, current.version, now)
            .await
        {
            Ok(version) => {
                working.version = version;
                working.updated_at = now;
                Ok(Some((value, working)))
            }
            Err(RepositoryError::VersionConflict { expected, found }) => {
                debug!(attempt, expected, found, "Ledger version moved, retrying");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn gave_up(&self, id: ProductId) -> AppError {
        warn!(
            attempts = self.config.max_retries,
            "Gave up on contended ledger write"
        );
        InventoryError::Conflict(format!(
            "product {id} is being changed concurrently; gave up after {} attempts",
            self.config.max_retries
        ))
        .into()
    }

    /// Receive a new lot.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a non-positive quantity or negative
    /// price, or a conflict for a retired product or a lot number the
    /// product already has.
    #[instrument(skip(self, lot, now), fields(product_id = %id, quantity = lot.quantity))]
    pub async fn add_lot(
        &self,
        id: ProductId,
        lot: NewLot,
        now: DateTime<Utc>,
    ) -> Result<Lot, AppError> {
        let today = now.date_naive();
        let (lot, _) = self
            .transact(id, now, |product| {
                product.ensure_active()?;
                product.ledger.add_lot(lot.clone(), today)
            })
            .await?;
        info!(lot_number = %lot.lot_number, "Lot received");
        Ok(lot)
    }

    /// Take a lot out of circulation.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the product or lot does not exist.
    #[instrument(skip(self, now), fields(product_id = %id, lot_number = %lot_number))]
    pub async fn dispose(
        &self,
        id: ProductId,
        lot_number: &LotNumber,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let today = now.date_naive();
        self.transact(id, now, |product| {
            product.ledger.dispose(lot_number, reason, today)
        })
        .await?;
        info!(reason, "Lot disposed");
        Ok(())
    }

    /// Expire lots past their date and, if `dispose` is set, dispose the
    /// lots this call expired in the same write. Lots expired by an earlier
    /// run are left for a manual decision.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the product does not exist.
    #[instrument(skip(self, now), fields(product_id = %id))]
    pub async fn expire(
        &self,
        id: ProductId,
        dispose: bool,
        now: DateTime<Utc>,
    ) -> Result<ExpiryOutcome, AppError> {
        let today = now.date_naive();
        let (outcome, _) = self
            .transact(id, now, |product| {
                let expired = product.ledger.expire(today);
                let mut disposed = Vec::new();
                if dispose {
                    for lot in &expired {
                        product.ledger.dispose(lot, "expired", today)?;
                        disposed.push(lot.clone());
                    }
                }
                Ok(ExpiryOutcome { expired, disposed })
            })
            .await?;
        if !outcome.expired.is_empty() || !outcome.disposed.is_empty() {
            info!(
                expired = outcome.expired.len(),
                disposed = outcome.disposed.len(),
                "Expired lots swept"
            );
        }
        Ok(outcome)
    }

    /// Take a product out of the catalog. It can no longer be sold, put in
    /// a cart, restocked or ordered; its lots stay as the record of what
    /// was bought and sold. Returns and expiry still apply. Retiring twice
    /// keeps the first date.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the product does not exist.
    /// - `InventoryError::Conflict` if concurrent writes keep winning.
    #[instrument(skip(self, now), fields(product_id = %id))]
    pub async fn retire_product(
        &self,
        id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        let product = self.set_retired(id, Some(now), now).await?;
        info!(name = %product.name, "Product retired");
        Ok(product)
    }

    /// Put a retired product back in the catalog.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the product does not exist.
    /// - `InventoryError::Conflict` if concurrent writes keep winning.
    #[instrument(skip(self, now), fields(product_id = %id))]
    pub async fn reinstate_product(
        &self,
        id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        let product = self.set_retired(id, None, now).await?;
        info!(name = %product.name, "Product reinstated");
        Ok(product)
    }

    async fn set_retired(
        &self,
        id: ProductId,
        retired_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Product, AppError> {
        for attempt in 1..=self.config.max_retries {
            let mut product = self.product(id).await?;
            if product.retired_at.is_some() == retired_at.is_some() {
                return Ok(product);
            }
            match self
                .store
                .set_retired(id, retired_at, product.version, now)
                .await
            {
                Ok(version) => {
                    product.retired_at = retired_at;
                    product.version = version;
                    product.updated_at = now;
                    return Ok(product);
                }
                Err(RepositoryError::VersionConflict { expected, found }) => {
                    debug!(attempt, expected, found, "Product version moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.gave_up(id))
    }

    /// Reporting snapshot of a product's stock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the product does not exist.
    pub async fn summary(&self, id: ProductId) -> Result<StockSummary, AppError> {
        Ok(self.product(id).await?.ledger.summary())
    }
}

impl<S: ProductStore + PromotionStore> InventoryService<S> {
    /// [`Self::transact`] for changes that depend on the product's
    /// promotions.
    ///
    /// The promotions are read after the product on every attempt. Promotion
    /// writes bump the product's version, so a promotion created or changed
    /// after that read makes the save miss and the attempt start over.
    ///
    /// # Errors
    ///
    /// As [`Self::transact`].
    #[instrument(skip(self, now, op), fields(product_id = %id))]
    pub async fn transact_with_promotions<T, F>(
        &self,
        id: ProductId,
        now: DateTime<Utc>,
        mut op: F,
    ) -> Result<(T, Product), AppError>
    where
        F: FnMut(&mut Product, &[Promotion]) -> Result<T, InventoryError> + Send,
        T: Send,
    {
        for attempt in 1..=self.config.max_retries {
            let current = self.product(id).await?;
            let promotions = self.store.promotions_for_product(id).await?;
            let mut working = current.clone();
            let value = op(&mut working, &promotions)?;
            if let Some(saved) = self.save_attempt(attempt, &current, working, value, now).await? {
                return Ok(saved);
            }
        }
        Err(self.gave_up(id))
    }
}
