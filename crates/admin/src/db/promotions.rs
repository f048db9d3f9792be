//! Promotion persistence.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use stockroom_core::promotion::{Promotion, ValidPromotion, ValidityWindow};
use stockroom_core::{Barcode, LotNumber, ProductId, PromotionId};

use super::products::parse_price;
use super::{PgStore, RepositoryError, unique_violation, version_miss};

/// Promotion writes share the product's version with ledger writes. Creating
/// or changing a promotion bumps `products.version` in the same transaction,
/// so a sale or another promotion checked against an older set of
/// promotions loses its compare-and-swap and has to look again.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Insert a promotion if its product is still at `product_version`.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::Conflict` if `barcode` is taken.
    /// - `RepositoryError::VersionConflict` if the product moved on.
    /// - `RepositoryError::NotFound` if the product does not exist.
    async fn insert_promotion(
        &self,
        promotion: &ValidPromotion,
        barcode: &Barcode,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError>;

    /// Overwrite everything but the id, barcode and creation time, if the
    /// promotion's product is still at `product_version`.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::NotFound` if the promotion does not exist.
    /// - `RepositoryError::VersionConflict` if the product moved on.
    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: &ValidPromotion,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the promotion does not exist.
    async fn delete_promotion(&self, id: PromotionId) -> Result<(), RepositoryError>;

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError>;

    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, RepositoryError>;

    /// All promotions, newest window first.
    async fn list_promotions(&self) -> Result<Vec<Promotion>, RepositoryError>;
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PromotionRow {
    id: i32,
    product_id: i32,
    name: String,
    discounted_price: Decimal,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    applied_lots: Vec<String>,
    barcode: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PromotionRow> for Promotion {
    type Error = RepositoryError;

    fn try_from(row: PromotionRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: &dyn core::fmt::Display| {
            RepositoryError::DataCorruption(format!("promotion {}: {what}: {e}", row.id))
        };
        let applied_lots = row
            .applied_lots
            .iter()
            .map(|raw| LotNumber::parse(raw))
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| corrupt("lot number", &e))?;
        let window =
            ValidityWindow::new(row.starts_at, row.ends_at).map_err(|e| corrupt("window", &e))?;
        let barcode = Barcode::parse(&row.barcode).map_err(|e| corrupt("barcode", &e))?;

        Ok(Self {
            id: PromotionId::new(row.id),
            product_id: ProductId::new(row.product_id),
            name: row.name,
            discounted_price: parse_price(row.discounted_price)?,
            window,
            applied_lots,
            barcode,
            created_at: row.created_at,
        })
    }
}

fn lot_strings(lots: &BTreeSet<LotNumber>) -> Vec<String> {
    lots.iter().map(|l| l.as_str().to_owned()).collect()
}

/// Bump the product's version inside `tx`, failing if it is no longer
/// `expected`.
async fn bump_product(
    pool: &PgPool,
    tx: &mut Transaction<'_, Postgres>,
    product_id: ProductId,
    expected: i64,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE products SET version = version + 1, updated_at = $3 \
         WHERE id = $1 AND version = $2",
    )
    .bind(product_id)
    .bind(expected)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(version_miss(pool, "products", product_id.as_i32(), expected).await);
    }
    Ok(())
}

const PROMOTION_COLUMNS: &str = "id, product_id, name, discounted_price, starts_at, ends_at, \
     applied_lots, barcode, created_at";

// =============================================================================
// PostgreSQL
// =============================================================================

#[async_trait]
impl PromotionStore for PgStore {
    async fn insert_promotion(
        &self,
        promotion: &ValidPromotion,
        barcode: &Barcode,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        let mut tx = self.pool().begin().await?;
        bump_product(self.pool(), &mut tx, promotion.product_id, product_version, now).await?;

        let query = format!(
            "INSERT INTO promotions (product_id, name, discounted_price, starts_at, ends_at, \
             applied_lots, barcode, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {PROMOTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PromotionRow>(&query)
            .bind(promotion.product_id)
            .bind(&promotion.name)
            .bind(promotion.discounted_price.amount())
            .bind(promotion.window.start)
            .bind(promotion.window.end)
            .bind(lot_strings(&promotion.applied_lots))
            .bind(barcode.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| unique_violation(e, "promotion barcode already in use"))?;

        tx.commit().await?;
        row.try_into()
    }

    async fn update_promotion(
        &self,
        id: PromotionId,
        promotion: &ValidPromotion,
        product_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Promotion, RepositoryError> {
        let mut tx = self.pool().begin().await?;
        let product_id =
            sqlx::query_scalar::<_, ProductId>("SELECT product_id FROM promotions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(RepositoryError::NotFound)?;
        bump_product(self.pool(), &mut tx, product_id, product_version, now).await?;

        let query = format!(
            "UPDATE promotions SET name = $2, discounted_price = $3, starts_at = $4, \
             ends_at = $5, applied_lots = $6 WHERE id = $1 RETURNING {PROMOTION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PromotionRow>(&query)
            .bind(id)
            .bind(&promotion.name)
            .bind(promotion.discounted_price.amount())
            .bind(promotion.window.start)
            .bind(promotion.window.end)
            .bind(lot_strings(&promotion.applied_lots))
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        tx.commit().await?;
        row.try_into()
    }

    async fn delete_promotion(&self, id: PromotionId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM promotions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn get_promotion(&self, id: PromotionId) -> Result<Option<Promotion>, RepositoryError> {
        let query = format!("SELECT {PROMOTION_COLUMNS} FROM promotions WHERE id = $1");
        let row = sqlx::query_as::<_, PromotionRow>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn promotions_for_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<Promotion>, RepositoryError> {
        let query = format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions WHERE product_id = $1 \
             ORDER BY starts_at DESC, id"
        );
        let rows = sqlx::query_as::<_, PromotionRow>(&query)
            .bind(product_id)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_promotions(&self) -> Result<Vec<Promotion>, RepositoryError> {
        let query =
            format!("SELECT {PROMOTION_COLUMNS} FROM promotions ORDER BY starts_at DESC, id");
        let rows = sqlx::query_as::<_, PromotionRow>(&query)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
