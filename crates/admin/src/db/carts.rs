//! Cart line persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockroom_core::cart::CartLine;
use stockroom_core::{CartLineId, Price, ProductId, PromotionId, SaleUnit};

use super::products::parse_price;
use super::{PgStore, RepositoryError};

/// A cart line before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartLine {
    pub user_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: i64,
    pub sale_unit: SaleUnit,
    pub unit_price: Price,
    pub promotion_id: Option<PromotionId>,
    pub added_at: DateTime<Utc>,
}

impl NewCartLine {
    pub(crate) fn into_line(self, id: CartLineId) -> CartLine {
        CartLine {
            id,
            user_name: self.user_name,
            product_id: self.product_id,
            product_name: self.product_name,
            quantity: self.quantity,
            sale_unit: self.sale_unit,
            unit_price: self.unit_price,
            promotion_id: self.promotion_id,
            added_at: self.added_at,
        }
    }
}

#[async_trait]
pub trait CartStore: Send + Sync {
    /// Lines of one user's cart in the order they were added.
    async fn cart_lines(&self, user_name: &str) -> Result<Vec<CartLine>, RepositoryError>;

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>, RepositoryError>;

    async fn insert_cart_line(&self, line: NewCartLine) -> Result<CartLine, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line does not exist.
    async fn update_cart_line(
        &self,
        id: CartLineId,
        quantity: i64,
        unit_price: Price,
    ) -> Result<CartLine, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line does not exist.
    async fn delete_cart_line(&self, id: CartLineId) -> Result<(), RepositoryError>;

    /// Remove every line of `user_name`; returns how many were removed.
    async fn clear_cart(&self, user_name: &str) -> Result<u64, RepositoryError>;
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct CartLineRow {
    id: i32,
    user_name: String,
    product_id: i32,
    product_name: String,
    quantity: i64,
    sale_unit: SaleUnit,
    unit_price: Decimal,
    promotion_id: Option<i32>,
    added_at: DateTime<Utc>,
}

impl TryFrom<CartLineRow> for CartLine {
    type Error = RepositoryError;

    fn try_from(row: CartLineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CartLineId::new(row.id),
            user_name: row.user_name,
            product_id: ProductId::new(row.product_id),
            product_name: row.product_name,
            quantity: row.quantity,
            sale_unit: row.sale_unit,
            unit_price: parse_price(row.unit_price)?,
            promotion_id: row.promotion_id.map(PromotionId::new),
            added_at: row.added_at,
        })
    }
}

const CART_COLUMNS: &str = "id, user_name, product_id, product_name, quantity, sale_unit, \
     unit_price, promotion_id, added_at";

// =============================================================================
// PostgreSQL
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn cart_lines(&self, user_name: &str) -> Result<Vec<CartLine>, RepositoryError> {
        let query =
            format!("SELECT {CART_COLUMNS} FROM cart_lines WHERE user_name = $1 ORDER BY id");
        let rows = sqlx::query_as::<_, CartLineRow>(&query)
            .bind(user_name)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_cart_line(&self, id: CartLineId) -> Result<Option<CartLine>, RepositoryError> {
        let query = format!("SELECT {CART_COLUMNS} FROM cart_lines WHERE id = $1");
        let row = sqlx::query_as::<_, CartLineRow>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn insert_cart_line(&self, line: NewCartLine) -> Result<CartLine, RepositoryError> {
        let query = format!(
            "INSERT INTO cart_lines (user_name, product_id, product_name, quantity, sale_unit, \
             unit_price, promotion_id, added_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {CART_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CartLineRow>(&query)
            .bind(&line.user_name)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.quantity)
            .bind(line.sale_unit)
            .bind(line.unit_price.amount())
            .bind(line.promotion_id)
            .bind(line.added_at)
            .fetch_one(self.pool())
            .await?;

        row.try_into()
    }

    async fn update_cart_line(
        &self,
        id: CartLineId,
        quantity: i64,
        unit_price: Price,
    ) -> Result<CartLine, RepositoryError> {
        let query = format!(
            "UPDATE cart_lines SET quantity = $2, unit_price = $3 WHERE id = $1 \
             RETURNING {CART_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CartLineRow>(&query)
            .bind(id)
            .bind(quantity)
            .bind(unit_price.amount())
            .fetch_optional(self.pool())
            .await?
            .ok_or(RepositoryError::NotFound)?;

        row.try_into()
    }

    async fn delete_cart_line(&self, id: CartLineId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn clear_cart(&self, user_name: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM cart_lines WHERE user_name = $1")
            .bind(user_name)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }
}
