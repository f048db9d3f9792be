//! CLI subcommands.

use std::sync::Arc;

use stockroom_admin::config::AdminConfig;
use stockroom_admin::db::{self, PgStore};
use stockroom_admin::services::Stockroom;

pub mod migrate;
pub mod seed;
pub mod stock;

/// Connect to the database named by `ADMIN_DATABASE_URL` and wire the
/// services to it.
async fn connect() -> Result<Stockroom<PgStore>, Box<dyn std::error::Error>> {
    let config = AdminConfig::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Connected to database");
    Ok(Stockroom::new(
        Arc::new(PgStore::new(pool)),
        config.stock,
        config.sweep,
    ))
}
