//! Business logic services for the back office.
//!
//! # Services
//!
//! - `stock` - Catalog, lot receipts, disposal and expiry, with versioned ledger writes
//! - `sales` - Committing and restoring sales lot by lot
//! - `promotions` - Promotions and their reserved lots
//! - `cart` - Carts checked against sellable stock
//! - `orders` - Checkout, cancellation, returns, edits and payment timeouts
//! - `purchasing` - Suppliers, purchase orders and receiving
//! - `sweep` - Scheduled expiry and payment-timeout sweeps

use std::sync::Arc;

pub mod cart;
pub mod orders;
pub mod promotions;
pub mod purchasing;
pub mod sales;
pub mod stock;
pub mod sweep;

pub use cart::CartService;
pub use orders::{OrderService, PaymentExpiry};
pub use promotions::PromotionService;
pub use purchasing::{PurchasingService, ReceiptReport};
pub use sales::{CommittedSale, SalesService};
pub use stock::{ExpiryOutcome, InventoryService};
pub use sweep::{SweepReport, Sweeper};

use crate::config::{StockConfig, SweepConfig};
use crate::db::Store;

/// Every service, wired to one store.
#[derive(Debug)]
pub struct Stockroom<S> {
    pub inventory: InventoryService<S>,
    pub sales: SalesService<S>,
    pub promotions: PromotionService<S>,
    pub cart: CartService<S>,
    pub orders: OrderService<S>,
    pub purchasing: PurchasingService<S>,
    pub sweeper: Sweeper<S>,
}

impl<S> Clone for Stockroom<S> {
    fn clone(&self) -> Self {
        Self {
            inventory: self.inventory.clone(),
            sales: self.sales.clone(),
            promotions: self.promotions.clone(),
            cart: self.cart.clone(),
            orders: self.orders.clone(),
            purchasing: self.purchasing.clone(),
            sweeper: self.sweeper.clone(),
        }
    }
}

impl<S: Store> Stockroom<S> {
    #[must_use]
    pub fn new(store: Arc<S>, stock: StockConfig, sweep: SweepConfig) -> Self {
        let inventory = InventoryService::new(store, stock);
        Self {
            sales: SalesService::new(inventory.clone()),
            promotions: PromotionService::new(inventory.clone()),
            cart: CartService::new(inventory.clone()),
            orders: OrderService::new(inventory.clone()),
            purchasing: PurchasingService::new(inventory.clone()),
            sweeper: Sweeper::new(inventory.clone(), sweep),
            inventory,
        }
    }
}
