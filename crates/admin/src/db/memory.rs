//! In-memory store for tests and dry runs.
//!
//! Implements every store trait behind one `tokio` mutex, with the same
//! version checks and uniqueness rules as the `PostgreSQL` store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use stockroom_core::cart::CartLine;
use stockroom_core::order::{NewOrder, Order};
use stockroom_core::promotion::{Promotion, ValidPromotion};
use stockroom_core::purchasing::{NewSupplier, PurchaseOrder, PurchaseOrderLine, Supplier};
use stockroom_core::{
    Barcode, CartLineId, DeliveryStatus, LotLedger, OrderId, Price, Product, ProductId,
    PromotionId, PurchaseOrderId, PurchaseOrderStatus, SupplierId, ValidProduct,
};

use super::{
    CartStore, NewCartLine, OrderStore, ProductStore, PromotionStore, PurchasingStore,
    RepositoryError,
};

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<ProductId, Product>,
    promotions: BTreeMap<PromotionId, Promotion>,
    cart_lines: BTreeMap<CartLineId, CartLine>,
    orders: BTreeMap<OrderId, Order>,
    suppliers: BTreeMap<SupplierId, Supplier>,
    purchase_orders: BTreeMap<PurchaseOrderId, PurchaseOrder>,
    last_id: i32,
    last_order_number: i64,
}

impl State {
    /// Ids are drawn from one counter shared by every table.
    const fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    /// Move a product's version on, provided nobody else has.
    fn bump_product(
        &mut self,
        id: ProductId,
        expected: i64,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let product = self.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        check_version(expected, product.version)?;
        product.version += 1;
        product.updated_at = now;
        Ok(())
    }

    fn barcode_taken(&self, barcode: &Barcode) -> bool {
        self.products.values().any(|p| {
            p.barcode_unit.as_ref() == Some(barcode) || p.barcode_pack.as_ref() == Some(barcode)
        })
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_version(expected: i64, found: i64) -> Result<(), RepositoryError> {
    if expected == found {
        Ok(())
    } else {
        Err(RepositoryError::VersionConflict { expected, found })
    }
}

// =============================================================================
// Products
// =============================================================================

#[async_trait]
impl ProductStore for MemoryStore {
    async fn create_product(
        &self,
        product: ValidProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, RepositoryError> {
        let mut state = self.state.lock().await;
        let barcodes = [&product.barcode_unit, &product.barcode_pack];
        if barcodes.into_iter().flatten().any(|b| state.barcode_taken(b)) {
            return Err(RepositoryError::Conflict("barcode already in use".to_owned()));
        }

        let id = ProductId::new(state.next_id());
        let stored = Product {
            id,
            name: product.name,
            description: product.description,
            category: product.category,
            barcode_unit: product.barcode_unit,
            barcode_pack: product.barcode_pack,
            pack_size: product.pack_size,
            price_per_unit: product.price_per_unit,
            price_per_pack: product.price_per_pack,
            ledger: LotLedger::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            retired_at: None,
        };
        state.products.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by_key(|p| (p.name.to_lowercase(), p.id));
        Ok(products)
    }

    async fn find_by_barcode(&self, barcode: &Barcode) -> Result<Option<Product>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|p| {
                p.barcode_unit.as_ref() == Some(barcode) || p.barcode_pack.as_ref() == Some(barcode)
            })
            .cloned())
    }

    async fn update_catalog(
        &self,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .products
            .get_mut(&product.id)
            .ok_or(RepositoryError::NotFound)?;
        stored.name.clone_from(&product.name);
        stored.description.clone_from(&product.description);
        stored.category.clone_from(&product.category);
        stored.price_per_unit = product.price_per_unit;
        stored.price_per_pack = product.price_per_pack;
        stored.updated_at = now;
        Ok(())
    }

    async fn save_ledger(
        &self,
        id: ProductId,
        ledger: &LotLedger,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        check_version(expected_version, stored.version)?;
        stored.ledger = ledger.clone();
        stored.version += 1;
        stored.updated_at = now;
        Ok(stored.version)
    }

    async fn set_retired(
        &self,
        id: ProductId,
        retired_at: Option<DateTime<Utc>>,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let mut state = self.state.lock().await;
        state.bump_product(id, expected_version, now)?;
        let stored = state.products.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        stored.retired_at = retired_at;
        Ok(stored.version)
    }
}

// =============================================================================
// Promotions
// =============================================================================

#[async_trait]
impl PromotionStore for MemoryStore {
    async fn insert_promotion(
        &self,
        promotion: &ValidPromotion,
        barcode: &Barcode,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.promotions.values().any(|p| &p.barcode == barcode) {
            return Err(RepositoryError::Conflict(
                "promotion barcode already in use".to_owned(),
            ));
        }
        state.bump_product(promotion.product_id, product_version, now)?;

        let id = PromotionId::new(state.next_id());
        let stored = Promotion {
            id,
            product_id: promotion.product_id,
            name: promotion.name.clone(),
            discounted_price: promotion.discounted_price,
            window: promotion.window,
            applied_lots: promotion.applied_lots.clone(),
            barcode: barcode.clone(),
            created_at: now,
        };
        state.promotions.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: &ValidPromotion,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        let mut state = self.state.lock().await;
        let product_id = state
            .promotions
            .get(&id)
            .ok_or(RepositoryError::NotFound)?
            .product_id;
        state.bump_product(product_id, product_version, now)?;

        let stored = state.promotions.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        stored.name.clone_from(&promotion.name);
        stored.discounted_price = promotion.discounted_price;
        stored.window = promotion.window;
        stored.applied_lots.clone_from(&promotion.applied_lots);
        Ok(stored.clone())
    }

    async fn delete_promotion(&self, id: PromotionId) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        state
            .promotions
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)?;
        state.cart_lines.retain(|_, line| line.promotion_id != Some(id));
        Ok(())
    }

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError> {
        Ok(self.state.lock().await.promotions.get(&id).cloned())
    }

    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, RepositoryError> {
        let mut promotions: Vec<Promotion> = self
            .state
            .lock()
            .await
            .promotions
            .values()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect();
        promotions.sort_by(|a, b| b.window.start.cmp(&a.window.start).then(a.id.cmp(&b.id)));
        Ok(promotions)
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>, RepositoryError> {
        let mut promotions: Vec<Promotion> =
            self.state.lock().await.promotions.values().cloned().collect();
        promotions.sort_by(|a, b| b.window.start.cmp(&a.window.start).then(a.id.cmp(&b.id)));
        Ok(promotions)
    }
}

// =============================================================================
// Carts
// =============================================================================

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_lines(&self, user_name: &str) -> Result<Vec<CartLine>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .cart_lines
            .values()
            .filter(|l| l.user_name == user_name)
            .cloned()
            .collect())
    }

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>, RepositoryError> {
        Ok(self.state.lock().await.cart_lines.get(&id).cloned())
    }

    async fn insert_cart_line(&self, line: NewCartLine) -> Result<CartLine, RepositoryError> {
        let mut state = self.state.lock().await;
        let id = CartLineId::new(state.next_id());
        let stored = line.into_line(id);
        state.cart_lines.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_cart_line(
        &self,
        id: CartLineId,
        quantity: i64,
        unit_price: Price,
    ) -> Result<CartLine, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state.cart_lines.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        stored.quantity = quantity;
        stored.unit_price = unit_price;
        Ok(stored.clone())
    }

    async fn delete_cart_line(&self, id: CartLineId) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .await
            .cart_lines
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn clear_cart(&self, user_name: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        let before = state.cart_lines.len();
        state.cart_lines.retain(|_, l| l.user_name != user_name);
        Ok(u64::try_from(before - state.cart_lines.len()).unwrap_or_default())
    }
}

// =============================================================================
// Orders
// =============================================================================

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock().await;
        let id = OrderId::new(state.next_id());
        let stored = order.into_order(id);
        state.orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self.state.lock().await.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn save_order(&self, order: &Order) -> Result<i64, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state.orders.get_mut(&order.id).ok_or(RepositoryError::NotFound)?;
        check_version(order.version, stored.version)?;
        *stored = order.clone();
        stored.version += 1;
        Ok(stored.version)
    }

    async fn overdue_transfers(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.is_payment_overdue(cutoff))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.ordered_at);
        Ok(orders)
    }
}

// =============================================================================
// Purchasing
// =============================================================================

#[async_trait]
impl PurchasingStore for MemoryStore {
    async fn create_supplier(
        &self,
        supplier: NewSupplier,
        now: DateTime<Utc>,
    ) -> Result<Supplier, RepositoryError> {
        let mut state = self.state.lock().await;
        let id = SupplierId::new(state.next_id());
        let stored = Supplier {
            id,
            name: supplier.name,
            contact: supplier.contact,
            created_at: now,
        };
        state.suppliers.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_supplier(&self, id: SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        Ok(self.state.lock().await.suppliers.get(&id).cloned())
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError> {
        let mut suppliers: Vec<Supplier> =
            self.state.lock().await.suppliers.values().cloned().collect();
        suppliers.sort_by_key(|s| (s.name.to_lowercase(), s.id));
        Ok(suppliers)
    }

    async fn create_purchase_order(
        &self,
        supplier_id: SupplierId,
        lines: Vec<PurchaseOrderLine>,
        total: Decimal,
        ordered_at: DateTime<Utc>,
    ) -> Result<PurchaseOrder, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.suppliers.contains_key(&supplier_id) {
            return Err(RepositoryError::Conflict(format!(
                "supplier {supplier_id} does not exist"
            )));
        }
        let id = PurchaseOrderId::new(state.next_id());
        state.last_order_number += 1;
        let stored = PurchaseOrder {
            id,
            order_number: state.last_order_number,
            supplier_id,
            lines,
            total,
            ordered_at,
            status: PurchaseOrderStatus::Pending,
            delivery_status: DeliveryStatus::NotDelivered,
            delivered_at: None,
            version: 0,
        };
        state.purchase_orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, RepositoryError> {
        Ok(self.state.lock().await.purchase_orders.get(&id).cloned())
    }

    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let mut orders: Vec<PurchaseOrder> =
            self.state.lock().await.purchase_orders.values().cloned().collect();
        orders.sort_by(|a, b| b.order_number.cmp(&a.order_number));
        Ok(orders)
    }

    async fn save_purchase_order(&self, order: &PurchaseOrder) -> Result<i64, RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .purchase_orders
            .get_mut(&order.id)
            .ok_or(RepositoryError::NotFound)?;
        check_version(order.version, stored.version)?;
        *stored = order.clone();
        stored.version += 1;
        Ok(stored.version)
    }
}
