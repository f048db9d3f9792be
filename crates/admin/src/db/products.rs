//! Product catalog and lot ledger persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;

use stockroom_core::{Barcode, Lot, LotLedger, Price, Product, ProductId, ValidProduct};

use super::{PgStore, RepositoryError, narrow, unique_violation, version_miss};

/// Store operations on products.
///
/// Catalog fields and the ledger are written separately: catalog edits never
/// touch `lots`, and ledger writes are conditional on `version`.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert a product with an empty ledger at version 0.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if a barcode is already in use.
    async fn create_product(
        &self,
        product: ValidProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, RepositoryError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    /// All products, by name.
    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError>;

    /// Look a product up by its unit or pack barcode.
    async fn find_by_barcode(&self, barcode: &Barcode) -> Result<Option<Product>, RepositoryError>;

    /// Save name, description, category and prices.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product does not exist.
    async fn update_catalog(
        &self,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Replace the ledger if the stored version is still `expected_version`.
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::VersionConflict` if another write got there first.
    /// - `RepositoryError::NotFound` if the product does not exist.
    async fn save_ledger(
        &self,
        id: ProductId,
        ledger: &LotLedger,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError>;

    /// Set or clear `retired_at` if the stored version is still
    /// `expected_version`. Returns the new version. Lots are untouched.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::VersionConflict` if another write got there first.
    /// - `RepositoryError::NotFound` if the product does not exist.
    async fn set_retired(
        &self,
        id: ProductId,
        retired_at: Option<DateTime<Utc>>,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError>;
}

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i32,
    name: String,
    description: Option<String>,
    category: Option<String>,
    barcode_unit: Option<String>,
    barcode_pack: Option<String>,
    pack_size: i32,
    price_per_unit: Decimal,
    price_per_pack: Decimal,
    lots: Json<Vec<Lot>>,
    next_lot_seq: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
}

fn parse_barcode(raw: Option<String>) -> Result<Option<Barcode>, RepositoryError> {
    raw.map(|code| Barcode::parse(&code))
        .transpose()
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid barcode: {e}")))
}

pub(super) fn parse_price(amount: Decimal) -> Result<Price, RepositoryError> {
    Price::new(amount).map_err(|e| RepositoryError::DataCorruption(format!("invalid price: {e}")))
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: ProductId::new(row.id),
            name: row.name,
            description: row.description,
            category: row.category,
            barcode_unit: parse_barcode(row.barcode_unit)?,
            barcode_pack: parse_barcode(row.barcode_pack)?,
            pack_size: narrow(row.pack_size, "pack size")?,
            price_per_unit: parse_price(row.price_per_unit)?,
            price_per_pack: parse_price(row.price_per_pack)?,
            ledger: LotLedger::from_parts(row.lots.0, narrow(row.next_lot_seq, "lot sequence")?),
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            retired_at: row.retired_at,
        })
    }
}

const PRODUCT_COLUMNS: &str = "id, name, description, category, barcode_unit, barcode_pack, \
     pack_size, price_per_unit, price_per_pack, lots, next_lot_seq, version, created_at, updated_at, \
     retired_at";

// =============================================================================
// PostgreSQL
// =============================================================================

#[async_trait]
impl ProductStore for PgStore {
    async fn create_product(
        &self,
        product: ValidProduct,
        now: DateTime<Utc>,
    ) -> Result<Product, RepositoryError> {
        let pack_size: i32 = narrow(product.pack_size, "pack size")?;
        let query = format!(
            "INSERT INTO products (name, description, category, barcode_unit, barcode_pack, \
             pack_size, price_per_unit, price_per_pack, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) RETURNING {PRODUCT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ProductRow>(&query)
            .bind(&product.name)
            .bind(&product.description)
            .bind(&product.category)
            .bind(product.barcode_unit.as_ref().map(Barcode::as_str))
            .bind(product.barcode_pack.as_ref().map(Barcode::as_str))
            .bind(pack_size)
            .bind(product.price_per_unit.amount())
            .bind(product.price_per_pack.amount())
            .bind(now)
            .fetch_one(self.pool())
            .await
            .map_err(|e| unique_violation(e, "barcode already in use"))?;

        row.try_into()
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query_as::<_, ProductRow>(&query)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>, RepositoryError> {
        let query = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY LOWER(name), id");
        let rows = sqlx::query_as::<_, ProductRow>(&query)
            .fetch_all(self.pool())
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_by_barcode(&self, barcode: &Barcode) -> Result<Option<Product>, RepositoryError> {
        let query = format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE barcode_unit = $1 OR barcode_pack = $1"
        );
        let row = sqlx::query_as::<_, ProductRow>(&query)
            .bind(barcode.as_str())
            .fetch_optional(self.pool())
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_catalog(
        &self,
        product: &Product,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE products
            SET name = $2, description = $3, category = $4,
                price_per_unit = $5, price_per_pack = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price_per_unit.amount())
        .bind(product.price_per_pack.amount())
        .bind(now)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn save_ledger(
        &self,
        id: ProductId,
        ledger: &LotLedger,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let next_lot_seq: i32 = narrow(ledger.next_sequence(), "lot sequence")?;
        let version = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE products
            SET lots = $3, next_lot_seq = $4, version = version + 1, updated_at = $5
            WHERE id = $1 AND version = $2
            RETURNING version
            ",
        )
        .bind(id)
        .bind(expected_version)
        .bind(Json(ledger.lots()))
        .bind(next_lot_seq)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        match version {
            Some(version) => Ok(version),
            None => Err(version_miss(self.pool(), "products", id.as_i32(), expected_version).await),
        }
    }

    async fn set_retired(
        &self,
        id: ProductId,
        retired_at: Option<DateTime<Utc>>,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let version = sqlx::query_scalar::<_, i64>(
            r"
            UPDATE products
            SET retired_at = $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND version = $2
            RETURNING version
            ",
        )
        .bind(id)
        .bind(expected_version)
        .bind(retired_at)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        match version {
            Some(version) => Ok(version),
            None => Err(version_miss(self.pool(), "products", id.as_i32(), expected_version).await),
        }
    }
}
