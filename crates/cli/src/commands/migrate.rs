//! Database migration command.
//!
//! Migrations live in `crates/admin/migrations/` and are embedded in the
//! `stockroom-admin` library.
//!
//! # Environment Variables
//!
//! - `ADMIN_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)

use stockroom_admin::config::AdminConfig;
use stockroom_admin::db::{self, MIGRATOR};

/// Run every pending migration.
///
/// # Errors
///
/// Returns an error if the configuration is incomplete, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AdminConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
