//! Order persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;

use stockroom_core::order::{NewOrder, Order, OrderLine};
use stockroom_core::{OrderId, OrderStatus, PaymentMethod, PaymentStatus};

use super::{PgStore, RepositoryError, version_miss};

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Store a new order at version 0.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, RepositoryError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    /// All orders, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>, RepositoryError>;

    /// Save `order` if the stored version still equals `order.version`.
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::VersionConflict` if the order changed meanwhile.
    /// - `RepositoryError::NotFound` if the order does not exist.
    async fn save_order(&self, order: &Order) -> Result<i64, RepositoryError>;

    /// Live bank-transfer orders still awaiting payment, placed before `cutoff`.
    async fn overdue_transfers(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError>;
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i32,
    user_name: String,
    lines: Json<Vec<OrderLine>>,
    subtotal: Decimal,
    discount_total: Decimal,
    total: Decimal,
    payment_method: PaymentMethod,
    cash_received: Option<Decimal>,
    change: Option<Decimal>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    ordered_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Self {
            id: OrderId::new(row.id),
            user_name: row.user_name,
            lines: row.lines.0,
            subtotal: row.subtotal,
            discount_total: row.discount_total,
            total: row.total,
            payment_method: row.payment_method,
            cash_received: row.cash_received,
            change: row.change,
            status: row.status,
            payment_status: row.payment_status,
            ordered_at: row.ordered_at,
            paid_at: row.paid_at,
            version: row.version,
        }
    }
}

const ORDER_COLUMNS: &str = "id, user_name, lines, subtotal, discount_total, total, \
     payment_method, cash_received, change, status, payment_status, ordered_at, paid_at, version";

// =============================================================================
// PostgreSQL
// =============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let query = format!(
            "INSERT INTO orders (user_name, lines, subtotal, discount_total, total, \
             payment_method, cash_received, change, status, payment_status, ordered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {ORDER_COLUMNS}"
        );
        let settlement = &order.settlement;
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(&order.user_name)
            .bind(Json(&order.lines))
            .bind(settlement.subtotal)
            .bind(settlement.discount_total)
            .bind(settlement.total)
            .bind(order.payment_method)
            .bind(settlement.cash_received)
            .bind(settlement.change)
            .bind(settlement.status)
            .bind(settlement.payment_status)
            .bind(order.ordered_at)
            .fetch_one(self.pool())
            .await?;

        Ok(row.into())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_orders(&self) -> Result<Vec<Order>, RepositoryError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY ordered_at DESC, id DESC");
        let rows = sqlx::query_as::<_, OrderRow>(&query)
            .fetch_all(self.pool())
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_order(&self, order: &Order) -> Result<i64, RepositoryError> {
        let version = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE orders
            SET lines = $3, subtotal = $4, discount_total = $5, total = $6,
                status = $7, payment_status = $8, paid_at = $9, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            ",
        )
        .bind(order.id)
        .bind(order.version)
        .bind(Json(&order.lines))
        .bind(order.subtotal)
        .bind(order.discount_total)
        .bind(order.total)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.paid_at)
        .fetch_optional(self.pool())
        .await?;

        match version {
            Some(version) => Ok(version),
            None => Err(version_miss(self.pool(), "orders", order.id.as_i32(), order.version).await),
        }
    }

    async fn overdue_transfers(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Order>, RepositoryError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE payment_status = 'pending' AND status NOT IN ('cancelled', 'returned') \
             AND ordered_at < $1 ORDER BY ordered_at"
        );
        let rows = sqlx::query_as::<_, OrderRow>(&query)
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
