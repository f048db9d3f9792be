//! Seed the catalog from a YAML file.
//!
//! ```yaml
//! suppliers:
//!   - name: Valley Dairy
//!     contact: orders@valleydairy.test
//! products:
//!   - name: Whole Milk 1L
//!     category: Dairy
//!     pack_size: 6
//!     price_per_unit: "1.20"
//!     price_per_pack: "6.60"
//!     lots:
//!       - quantity: 24
//!         purchase_price: "0.70"
//!         expiration_date: 2026-11-02
//! ```
//!
//! Products whose barcode is already taken are skipped, so a file can be
//! loaded again after adding entries to it.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use stockroom_admin::config::{StockConfig, SweepConfig};
use stockroom_admin::db::{MemoryStore, RepositoryError, Store};
use stockroom_admin::error::AppError;
use stockroom_admin::services::Stockroom;
use stockroom_core::purchasing::NewSupplier;
use stockroom_core::{NewLot, NewProduct};

/// Contents of a seed file.
#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub suppliers: Vec<NewSupplier>,
    #[serde(default)]
    pub products: Vec<SeedProduct>,
}

/// A product with the lots it starts with.
#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    #[serde(flatten)]
    pub product: NewProduct,
    #[serde(default)]
    pub lots: Vec<NewLot>,
}

/// What a seed run created.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub suppliers: usize,
    pub products: usize,
    pub lots: usize,
    pub skipped: usize,
}

/// Seed from `file_path` into the database, or into a throwaway in-memory
/// store when `memory` is set.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, the database is
/// unreachable, or an entry is invalid.
pub async fn run(file_path: &str, memory: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {file_path}").into());
    }

    info!(path = %file_path, "Loading seed file");
    let content = tokio::fs::read_to_string(path).await?;
    let file: SeedFile = serde_yaml::from_str(&content)?;
    info!(
        suppliers = file.suppliers.len(),
        products = file.products.len(),
        "Parsed seed file"
    );

    let summary = if memory {
        let stockroom = Stockroom::new(
            Arc::new(MemoryStore::new()),
            StockConfig::default(),
            SweepConfig::default(),
        );
        seed(&stockroom, file, Utc::now()).await?
    } else {
        let stockroom = super::connect().await?;
        seed(&stockroom, file, Utc::now()).await?
    };

    info!("Seeding complete!");
    info!("  Suppliers created: {}", summary.suppliers);
    info!("  Products created: {}", summary.products);
    info!("  Lots received: {}", summary.lots);
    info!("  Products skipped (barcode taken): {}", summary.skipped);
    Ok(())
}

/// Create everything in `file`.
///
/// # Errors
///
/// Returns the first error other than a barcode conflict.
pub async fn seed<S: Store>(
    stockroom: &Stockroom<S>,
    file: SeedFile,
    now: DateTime<Utc>,
) -> Result<SeedSummary, AppError> {
    let mut summary = SeedSummary::default();

    for supplier in file.suppliers {
        stockroom.purchasing.create_supplier(supplier, now).await?;
        summary.suppliers += 1;
    }

    for entry in file.products {
        let name = entry.product.name.clone();
        let product = match stockroom.inventory.create_product(entry.product, now).await {
            Ok(product) => product,
            Err(AppError::Database(RepositoryError::Conflict(reason))) => {
                warn!(%name, %reason, "Skipping product");
                summary.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        summary.products += 1;

        for lot in entry.lots {
            stockroom.inventory.add_lot(product.id, lot, now).await?;
            summary.lots += 1;
        }
    }

    Ok(summary)
}
