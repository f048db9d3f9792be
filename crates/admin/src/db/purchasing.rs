//! Supplier and purchase order persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;

use stockroom_core::purchasing::{NewSupplier, PurchaseOrder, PurchaseOrderLine, Supplier};
use stockroom_core::{DeliveryStatus, PurchaseOrderId, PurchaseOrderStatus, SupplierId};

use super::{PgStore, RepositoryError, version_miss};

#[async_trait]
pub trait PurchasingStore: Send + Sync {
    async fn create_supplier(
        &self,
        supplier: NewSupplier,
        now: DateTime<Utc>,
    ) -> Result<Supplier, RepositoryError>;

    async fn get_supplier(&self, id: SupplierId) -> Result<Option<Supplier>, RepositoryError>;

    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError>;

    /// Store a new pending purchase order; the store assigns the running
    /// order number.
    async fn create_purchase_order(
        &self,
        supplier_id: SupplierId,
        lines: Vec<PurchaseOrderLine>,
        total: Decimal,
        ordered_at: DateTime<Utc>,
    ) -> Result<PurchaseOrder, RepositoryError>;

    async fn get_purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, RepositoryError>;

    /// All purchase orders, newest first.
    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>, RepositoryError>;

    /// Save `order` if the stored version still equals `order.version`.
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::VersionConflict` if the order changed meanwhile.
    /// - `RepositoryError::NotFound` if the order does not exist.
    async fn save_purchase_order(&self, order: &PurchaseOrder) -> Result<i64, RepositoryError>;
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SupplierRow {
    id: i32,
    name: String,
    contact: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SupplierRow> for Supplier {
    fn from(row: SupplierRow) -> Self {
        Self {
            id: SupplierId::new(row.id),
            name: row.name,
            contact: row.contact,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseOrderRow {
    id: i32,
    order_number: i64,
    supplier_id: i32,
    lines: Json<Vec<PurchaseOrderLine>>,
    total: Decimal,
    ordered_at: DateTime<Utc>,
    status: PurchaseOrderStatus,
    delivery_status: DeliveryStatus,
    delivered_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<PurchaseOrderRow> for PurchaseOrder {
    fn from(row: PurchaseOrderRow) -> Self {
        Self {
            id: PurchaseOrderId::new(row.id),
            order_number: row.order_number,
            supplier_id: SupplierId::new(row.supplier_id),
            lines: row.lines.0,
            total: row.total,
            ordered_at: row.ordered_at,
            status: row.status,
            delivery_status: row.delivery_status,
            delivered_at: row.delivered_at,
            version: row.version,
        }
    }
}

const PURCHASE_ORDER_COLUMNS: &str = "id, order_number, supplier_id, lines, total, ordered_at, \
     status, delivery_status, delivered_at, version";

// =============================================================================
// PostgreSQL
// =============================================================================

#[async_trait]
impl PurchasingStore for PgStore {
    async fn create_supplier(
        &self,
        supplier: NewSupplier,
        now: DateTime<Utc>,
    ) -> Result<Supplier, RepositoryError> {
        let row = sqlx::query_as::<_, SupplierRow>(
            r"
            INSERT INTO suppliers (name, contact, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, contact, created_at
            ",
        )
        .bind(&supplier.name)
        .bind(&supplier.contact)
        .bind(now)
        .fetch_one(self.pool())
        .await?;

        Ok(row.into())
    }

    async fn get_supplier(&self, id: SupplierId) -> Result<Option<Supplier>, RepositoryError> {
        let row = sqlx::query_as::<_, SupplierRow>(
            "SELECT id, name, contact, created_at FROM suppliers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>, RepositoryError> {
        let rows = sqlx::query_as::<_, SupplierRow>(
            "SELECT id, name, contact, created_at FROM suppliers ORDER BY LOWER(name), id",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_purchase_order(
        &self,
        supplier_id: SupplierId,
        lines: Vec<PurchaseOrderLine>,
        total: Decimal,
        ordered_at: DateTime<Utc>,
    ) -> Result<PurchaseOrder, RepositoryError> {
        let query = format!(
            "INSERT INTO purchase_orders (supplier_id, lines, total, ordered_at) \
             VALUES ($1, $2, $3, $4) RETURNING {PURCHASE_ORDER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PurchaseOrderRow>(&query)
            .bind(supplier_id)
            .bind(Json(&lines))
            .bind(total)
            .bind(ordered_at)
            .fetch_one(self.pool())
            .await?;

        Ok(row.into())
    }

    async fn get_purchase_order(
        &self,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, RepositoryError> {
        let query = format!("SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders WHERE id = $1");
        let row = sqlx::query_as::<_, PurchaseOrderRow>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>, RepositoryError> {
        let query = format!(
            "SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders ORDER BY order_number DESC"
        );
        let rows = sqlx::query_as::<_, PurchaseOrderRow>(&query)
            .fetch_all(self.pool())
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_purchase_order(&self, order: &PurchaseOrder) -> Result<i64, RepositoryError> {
        let version = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE purchase_orders
            SET lines = $3, status = $4, delivery_status = $5, delivered_at = $6,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            ",
        )
        .bind(order.id)
        .bind(order.version)
        .bind(Json(&order.lines))
        .bind(order.status)
        .bind(order.delivery_status)
        .bind(order.delivered_at)
        .fetch_optional(self.pool())
        .await?;

        match version {
            Some(version) => Ok(version),
            None => Err(version_miss(
                self.pool(),
                "purchase_orders",
                order.id.as_i32(),
                order.version,
            )
            .await),
        }
    }
}
