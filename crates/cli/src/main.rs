//! Stockroom CLI - database migrations and stock maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! stockroom migrate
//!
//! # Load products, lots and suppliers from YAML
//! stockroom seed crates/cli/seed/catalog.yaml
//!
//! # Check a seed file against an in-memory store without touching the database
//! stockroom seed crates/cli/seed/catalog.yaml --memory
//!
//! # Run the expiry and payment-timeout sweep once
//! stockroom sweep
//!
//! # Dispose a lot by hand
//! stockroom dispose 12 LOT003 --reason "damaged in transit"
//!
//! # Retire a product, keeping its lots on record
//! stockroom retire 12
//!
//! # Cancel a purchase order before anything arrives
//! stockroom cancel-po 4
//!
//! # Print a stock summary
//! stockroom stock 12
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use stockroom_core::{ProductId, PurchaseOrderId};

mod commands;

#[derive(Parser)]
#[command(name = "stockroom")]
#[command(author, version, about = "Stockroom CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed products, lots and suppliers from a YAML file
    Seed {
        /// Path to the YAML file
        file: String,

        /// Load into an in-memory store instead of the database
        #[arg(long)]
        memory: bool,
    },
    /// Expire lots past their date and cancel overdue transfers
    Sweep,
    /// Dispose a lot
    Dispose {
        /// Product ID
        product: ProductId,

        /// Lot number
        lot: String,

        /// Why the lot is thrown away
        #[arg(short, long, default_value = "manual correction")]
        reason: String,
    },
    /// Take a product out of the catalog, keeping its lots
    Retire {
        /// Product ID
        product: ProductId,
    },
    /// Cancel a purchase order nothing has been received against
    CancelPo {
        /// Purchase order ID
        order: PurchaseOrderId,
    },
    /// Show available stock, average cost and nearest expiry
    Stock {
        /// Product ID
        product: ProductId,
    },
}

#[tokio::main]
async fn main() {
    // Load .env before reading RUST_LOG
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { file, memory } => commands::seed::run(&file, memory).await?,
        Commands::Sweep => commands::stock::sweep().await?,
        Commands::Dispose {
            product,
            lot,
            reason,
        } => commands::stock::dispose(product, &lot, &reason).await?,
        Commands::Retire { product } => commands::stock::retire(product).await?,
        Commands::CancelPo { order } => commands::stock::cancel_purchase_order(order).await?,
        Commands::Stock { product } => commands::stock::summary(product).await?,
    }
    Ok(())
}
