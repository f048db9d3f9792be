//! Persistence for the back office.
//!
//! # Tables
//!
//! - `products` - Catalog fields plus the lot ledger (`lots` JSONB,
//!   `next_lot_seq`, `version`)
//! - `promotions` - Discounted lot reservations with their validity window
//! - `cart_lines` - Per-user carts (no stock is held)
//! - `orders` - Orders with their lines and lot draws (JSONB), versioned
//! - `suppliers`, `purchase_orders` - Purchasing and receiving
//!
//! # Concurrency
//!
//! Product ledgers, orders and purchase orders are written with a
//! compare-and-swap on their `version` column. A write against a stale
//! version fails with [`RepositoryError::VersionConflict`] and changes
//! nothing; the services reload and retry.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/admin/migrations/` and run via:
//! ```bash
//! cargo run -p stockroom-cli -- migrate
//! ```

pub mod carts;
pub mod memory;
pub mod orders;
pub mod products;
pub mod promotions;
pub mod purchasing;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::{CartStore, NewCartLine};
pub use memory::MemoryStore;
pub use orders::OrderStore;
pub use products::ProductStore;
pub use promotions::PromotionStore;
pub use purchasing::PurchasingStore;

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate barcode).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// The row changed since it was read.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: i64, found: i64 },
}

/// Everything the services need from a backing store.
pub trait Store: ProductStore + PromotionStore + CartStore + OrderStore + PurchasingStore {}

impl<T> Store for T where T: ProductStore + PromotionStore + CartStore + OrderStore + PurchasingStore
{}

/// `PostgreSQL`-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Map a unique-constraint violation to `Conflict`, anything else to `Database`.
pub(crate) fn unique_violation(e: sqlx::Error, message: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(message.to_owned());
    }
    RepositoryError::Database(e)
}

/// Resolve a conditional update that touched no row: either the row is gone
/// or its version moved on.
pub(crate) async fn version_miss(
    pool: &PgPool,
    table: &str,
    id: i32,
    expected: i64,
) -> RepositoryError {
    let query = format!("SELECT version FROM {table} WHERE id = $1");
    match sqlx::query_scalar::<_, i64>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await
    {
        Ok(Some(found)) => RepositoryError::VersionConflict { expected, found },
        Ok(None) => RepositoryError::NotFound,
        Err(e) => RepositoryError::Database(e),
    }
}

/// Narrow a stored integer, reporting out-of-range values as corruption.
pub(crate) fn narrow<T, U>(value: T, what: &str) -> Result<U, RepositoryError>
where
    U: TryFrom<T>,
    T: Copy + core::fmt::Display,
{
    U::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("{what} out of range: {value}")))
}
