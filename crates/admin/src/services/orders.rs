//! Checkout and the order lifecycle.
//!
//! # Stock and order writes
//!
//! An order's lines and the product ledgers live in different records, so
//! no single write covers both. The rules that keep them consistent:
//!
//! - Checkout commits lines one by one and restores the committed ones if
//!   a later line fails, before anything is stored.
//! - A reversal claims the lines first (marks them reversed in a versioned
//!   order write) and only then hands stock back. A line is claimed at most
//!   once, so its stock is restored at most once.
//! - An edit moves stock first and compensates if the order write loses a
//!   race.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use stockroom_core::cart::{CartGuard, ensure_line_quantity};
use stockroom_core::order::{NewOrder, Order, OrderLine, Settlement};
use stockroom_core::promotion::PromotionBinder;
use stockroom_core::{InventoryError, OrderId, OrderStatus, PaymentMethod, StockCommitment};

use crate::db::{CartStore, OrderStore, ProductStore, PromotionStore, RepositoryError};
use crate::error::AppError;
use crate::services::sales::SalesService;
use crate::services::stock::InventoryService;

/// Result of cancelling overdue bank transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentExpiry {
    pub cancelled: Vec<OrderId>,
    pub failed: Vec<OrderId>,
}

#[derive(Debug)]
pub struct OrderService<S> {
    inventory: InventoryService<S>,
    sales: SalesService<S>,
}

impl<S> Clone for OrderService<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            sales: self.sales.clone(),
        }
    }
}

impl<S> OrderService<S>
where
    S: ProductStore + PromotionStore + CartStore + OrderStore,
{
    #[must_use]
    pub fn new(inventory: InventoryService<S>) -> Self {
        Self {
            sales: SalesService::new(inventory.clone()),
            inventory,
        }
    }

    fn max_retries(&self) -> u32 {
        self.inventory.config().max_retries
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Turn a user's cart into an order.
    ///
    /// Prices are resolved again at checkout. Lines commit in cart order; if
    /// one fails, the lines already committed are restored and the cart is
    /// left as it was.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty cart or cash that does not cover the total.
    /// - Any error of [`SalesService::commit_sale`] for the failing line.
    #[instrument(skip(self, cash_received, now), fields(user = %user_name, ?payment_method))]
    pub async fn checkout(
        &self,
        user_name: &str,
        payment_method: PaymentMethod,
        cash_received: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let store = self.inventory.store();
        let cart = store.cart_lines(user_name).await?;
        if cart.is_empty() {
            return Err(InventoryError::Validation("cart is empty".to_string()).into());
        }

        let mut lines = Vec::with_capacity(cart.len());
        for item in &cart {
            let product = self.inventory.product(item.product_id).await?;
            let promotions = store.promotions_for_product(product.id).await?;
            let guard = CartGuard::new(&product, PromotionBinder::new(&promotions), now);
            lines.push(OrderLine {
                product_id: product.id,
                product_name: product.name.clone(),
                quantity: item.quantity,
                sale_unit: item.sale_unit,
                pack_size: product.pack_size,
                catalog_price: product.catalog_price(item.sale_unit),
                unit_price: guard.unit_price(item.sale_unit, item.promotion_id)?,
                promotion_id: item.promotion_id,
                draws: Vec::new(),
                commitment: StockCommitment::Uncommitted,
            });
        }
        let settlement = Settlement::compute(&lines, payment_method, cash_received)?;

        for index in 0..lines.len() {
            let Some(line) = lines.get_mut(index) else {
                break;
            };
            let committed = self
                .sales
                .commit_sale(
                    line.product_id,
                    line.quantity,
                    line.sale_unit,
                    line.promotion_id,
                    now,
                )
                .await
                .and_then(|sale| line.commit(sale.draws).map_err(AppError::from));
            if let Err(e) = committed {
                warn!(line = index, error = %e, "Checkout line failed, rolling back");
                self.roll_back(&lines, now).await;
                return Err(e);
            }
        }

        let order = match store
            .insert_order(NewOrder {
                user_name: user_name.to_string(),
                lines: lines.clone(),
                payment_method,
                settlement,
                ordered_at: now,
            })
            .await
        {
            Ok(order) => order,
            Err(e) => {
                let e = AppError::from(e);
                e.report();
                self.roll_back(&lines, now).await;
                return Err(e);
            }
        };

        if let Err(e) = store.clear_cart(user_name).await {
            warn!(order_id = %order.id, error = %e, "Order stored but cart not cleared");
        }
        info!(order_id = %order.id, total = %order.total, lines = order.lines.len(), "Order placed");
        Ok(order)
    }

    /// Hand back the stock of every committed line of an order that was
    /// never stored.
    async fn roll_back(&self, lines: &[OrderLine], now: DateTime<Utc>) {
        for line in lines
            .iter()
            .filter(|l| l.commitment == StockCommitment::Committed)
        {
            if let Err(e) = self
                .sales
                .restore_sale(line.product_id, &line.draws, now)
                .await
            {
                error!(product_id = %line.product_id, "Checkout rollback failed; stock is short");
                e.report();
            }
        }
    }

    // =========================================================================
    // Reversal
    // =========================================================================

    /// Cancel an order and restore its stock.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown order.
    /// - `Conflict` if the order was already cancelled or returned.
    pub async fn cancel(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order, AppError> {
        self.reverse(id, OrderStatus::Cancelled, None, now).await
    }

    /// Take an order back and restore its stock.
    ///
    /// # Errors
    ///
    /// As [`Self::cancel`].
    pub async fn return_order(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order, AppError> {
        self.reverse(id, OrderStatus::Returned, None, now).await
    }

    /// Restore any line of a reversed order that still holds stock, after a
    /// reversal whose restore failed part way.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the order is not cancelled or returned.
    /// - The restore error of a line that still cannot be handed back.
    #[instrument(skip(self, now), fields(order_id = %id))]
    pub async fn finish_reversal(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order, AppError> {
        let (claimed, order) = self
            .update_order(id, |order| {
                if !order.status.is_reversed() {
                    return Err(InventoryError::Conflict(format!(
                        "order {} has not been cancelled or returned",
                        order.id
                    )));
                }
                Ok(order.claim_committed_lines())
            })
            .await?;
        self.restore_claimed(order, &claimed, now).await
    }

    /// `overdue_before` marks a timeout cancellation: the order must still be
    /// an unpaid transfer placed before that instant when it is claimed.
    #[instrument(skip(self, now), fields(order_id = %id))]
    async fn reverse(
        &self,
        id: OrderId,
        to: OrderStatus,
        overdue_before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let (claimed, order) = self
            .update_order(id, |order| {
                if overdue_before.is_some_and(|cutoff| !order.is_payment_overdue(cutoff)) {
                    return Err(InventoryError::Conflict(format!(
                        "order {} is no longer awaiting payment",
                        order.id
                    )));
                }
                order.begin_reversal(to, overdue_before.is_some())?;
                Ok(order.claim_committed_lines())
            })
            .await?;
        debug!(lines = claimed.len(), "Order lines claimed for reversal");
        self.restore_claimed(order, &claimed, now).await
    }

    /// Restore the claimed lines of `order`. Lines whose restore fails are
    /// put back to committed so [`Self::finish_reversal`] can retry them.
    async fn restore_claimed(
        &self,
        order: Order,
        claimed: &[usize],
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut failed = Vec::new();
        let mut first_error = None;
        for &index in claimed {
            let Some(line) = order.lines.get(index) else {
                continue;
            };
            if let Err(e) = self
                .sales
                .restore_sale(line.product_id, &line.draws, now)
                .await
            {
                warn!(order_id = %order.id, line = index, error = %e, "Line restore failed");
                failed.push(index);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        let Some(e) = first_error else {
            info!(order_id = %order.id, status = ?order.status, "Order reversed");
            return Ok(order);
        };

        let release = self
            .update_order(order.id, |order| {
                for &index in &failed {
                    if let Some(line) = order.lines.get_mut(index) {
                        line.undo_reversal()?;
                    }
                }
                Ok(())
            })
            .await;
        if let Err(release_error) = release {
            error!(order_id = %order.id, "Could not release failed reversal lines");
            release_error.report();
        }
        Err(e)
    }

    // =========================================================================
    // Edits and payment
    // =========================================================================

    /// Change the quantity of one line of a live order.
    ///
    /// The line's stock is swapped in one ledger write: its old draws are
    /// handed back and the new quantity drawn from the result. Promotional
    /// lines keep drawing from the promotion's lots at the price charged.
    ///
    /// # Errors
    ///
    /// - `Validation` for a quantity below 1.
    /// - `NotFound` for an unknown order or line.
    /// - `Conflict` for a reversed order or line, or when the order changed
    ///   concurrently (the stock swap is undone in that case).
    /// - `InsufficientStock` when the new quantity cannot be covered.
    #[instrument(skip(self, now), fields(order_id = %id))]
    pub async fn edit_line(
        &self,
        id: OrderId,
        index: usize,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        ensure_line_quantity(quantity)?;
        let mut order = self.order(id).await?;
        order.ensure_reversible()?;
        let line = order
            .lines
            .get(index)
            .ok_or_else(|| AppError::NotFound(format!("line {index} of order {id}")))?;
        if line.commitment != StockCommitment::Committed {
            return Err(InventoryError::Conflict(format!(
                "line {index} of order {id} holds no stock"
            ))
            .into());
        }
        let product_id = line.product_id;
        let previous = line.draws.clone();
        let units = line.sale_unit.checked_units(quantity, line.pack_size)?;
        let promotion_id = line.promotion_id;
        // The new totals must fit before any stock moves.
        order.clone().edit_line(index, quantity, previous.clone())?;

        let draws = self
            .sales
            .recommit_sale(product_id, &previous, units, promotion_id, now)
            .await?;

        let saved = match order.edit_line(index, quantity, draws.clone()) {
            Ok(()) => self
                .inventory
                .store()
                .save_order(&order)
                .await
                .map_err(|e| match e {
                    RepositoryError::VersionConflict { .. } => InventoryError::Conflict(
                        format!("order {id} changed while it was being edited"),
                    )
                    .into(),
                    other => AppError::from(other),
                }),
            Err(e) => Err(e.into()),
        };

        match saved {
            Ok(version) => {
                order.version = version;
                info!(line = index, quantity, total = %order.total, "Order line edited");
                Ok(order)
            }
            Err(e) => {
                warn!(error = %e, "Order write failed after stock swap, undoing");
                if let Err(undo) = self
                    .sales
                    .revert_recommit(product_id, &draws, &previous, now)
                    .await
                {
                    error!(%product_id, "Could not undo stock swap for order edit");
                    undo.report();
                }
                Err(e)
            }
        }
    }

    /// Record payment of a bank transfer.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` unless the order is a live transfer awaiting
    /// payment.
    #[instrument(skip(self, now), fields(order_id = %id))]
    pub async fn mark_paid(&self, id: OrderId, now: DateTime<Utc>) -> Result<Order, AppError> {
        let ((), order) = self.update_order(id, |order| order.mark_paid(now)).await?;
        info!("Payment recorded");
        Ok(order)
    }

    /// Cancel bank transfers still unpaid `timeout` after they were placed.
    ///
    /// An order paid or cancelled in the meantime is skipped. Other failures
    /// are reported and listed in [`PaymentExpiry::failed`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the overdue orders cannot be listed.
    #[instrument(skip(self, now, timeout))]
    pub async fn expire_unpaid(
        &self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Result<PaymentExpiry, AppError> {
        let cutoff = now - timeout;
        let overdue = self.inventory.store().overdue_transfers(cutoff).await?;
        let mut outcome = PaymentExpiry::default();
        for order in overdue {
            match self
                .reverse(order.id, OrderStatus::Cancelled, Some(cutoff), now)
                .await
            {
                Ok(_) => outcome.cancelled.push(order.id),
                Err(AppError::Inventory(InventoryError::Conflict(reason))) => {
                    debug!(order_id = %order.id, %reason, "Overdue order settled meanwhile");
                }
                Err(e) => {
                    e.report();
                    outcome.failed.push(order.id);
                }
            }
        }
        if !outcome.cancelled.is_empty() {
            info!(cancelled = outcome.cancelled.len(), "Unpaid transfers cancelled");
        }
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown order.
    pub async fn order(&self, id: OrderId) -> Result<Order, AppError> {
        self.inventory
            .store()
            .get_order(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }

    /// Orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self) -> Result<Vec<Order>, AppError> {
        Ok(self.inventory.store().list_orders().await?)
    }

    /// Apply `op` to a fresh copy of the order and save it with a
    /// compare-and-swap on its version, retrying when it lost a race.
    async fn update_order<T, F>(&self, id: OrderId, mut op: F) -> Result<(T, Order), AppError>
    where
        F: FnMut(&mut Order) -> Result<T, InventoryError> + Send,
        T: Send,
    {
        let store = self.inventory.store();
        for attempt in 1..=self.max_retries() {
            let mut order = self.order(id).await?;
            let value = op(&mut order)?;
            match store.save_order(&order).await {
                Ok(version) => {
                    order.version = version;
                    return Ok((value, order));
                }
                Err(RepositoryError::VersionConflict { expected, found }) => {
                    debug!(attempt, expected, found, "Order version moved, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(InventoryError::Conflict(format!(
            "order {id} is being changed concurrently; gave up"
        ))
        .into())
    }
}
