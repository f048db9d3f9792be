//! Stock maintenance commands against the database.

use chrono::Utc;
use tracing::info;

use stockroom_core::{LotNumber, ProductId, PurchaseOrderId};

/// Run the expiry and payment-timeout sweep once.
///
/// # Errors
///
/// Returns an error if the database is unreachable or the sweep cannot list
/// products or orders.
pub async fn sweep() -> Result<(), Box<dyn std::error::Error>> {
    let stockroom = super::connect().await?;
    let report = stockroom.sweeper.run_once(Utc::now()).await?;

    for (product_id, lot) in &report.expired {
        info!("  expired  product {product_id} lot {lot}");
    }
    for (product_id, lot) in &report.disposed {
        info!("  disposed product {product_id} lot {lot}");
    }
    for order_id in &report.cancelled_orders {
        info!("  cancelled unpaid order {order_id}");
    }
    if report.failures > 0 {
        return Err(format!("{} products or orders could not be swept", report.failures).into());
    }
    Ok(())
}

/// Dispose one lot of a product.
///
/// # Errors
///
/// Returns an error if the product or lot does not exist.
pub async fn dispose(
    product_id: ProductId,
    lot: &str,
    reason: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let lot_number = LotNumber::parse(lot)?;
    let stockroom = super::connect().await?;
    stockroom
        .inventory
        .dispose(product_id, &lot_number, reason, Utc::now())
        .await?;
    info!("Disposed lot {lot_number} of product {product_id}: {reason}");
    Ok(())
}

/// Retire a product. Its lots stay on record.
///
/// # Errors
///
/// Returns an error if the product does not exist.
pub async fn retire(product_id: ProductId) -> Result<(), Box<dyn std::error::Error>> {
    let stockroom = super::connect().await?;
    let product = stockroom
        .inventory
        .retire_product(product_id, Utc::now())
        .await?;
    info!(
        "Retired {} (product {}), {} lots kept",
        product.name,
        product.id,
        product.ledger.lots().len()
    );
    Ok(())
}

/// Cancel a purchase order before any delivery.
///
/// # Errors
///
/// Returns an error if the order does not exist or has received stock.
pub async fn cancel_purchase_order(
    order_id: PurchaseOrderId,
) -> Result<(), Box<dyn std::error::Error>> {
    let stockroom = super::connect().await?;
    let order = stockroom.purchasing.cancel(order_id).await?;
    info!("Cancelled purchase order {}", order.order_number);
    Ok(())
}

/// Log a product's stock summary and its lots.
///
/// # Errors
///
/// Returns an error if the product does not exist.
pub async fn summary(product_id: ProductId) -> Result<(), Box<dyn std::error::Error>> {
    let stockroom = super::connect().await?;
    let product = stockroom.inventory.product(product_id).await?;
    let summary = product.ledger.summary();

    info!("{} (product {})", product.name, product.id);
    info!("  Available: {} units", summary.total_available);
    info!("  Active lots: {}", summary.active_lots);
    info!("  Average cost: {}", summary.average_cost);
    match summary.nearest_expiry {
        Some(date) => info!("  Nearest expiry: {date}"),
        None => info!("  Nearest expiry: none"),
    }
    for lot in product.ledger.lots() {
        info!(
            "  {:<12} {:>6} {:?} expires {}",
            lot.lot_number.as_str(),
            lot.quantity,
            lot.status,
            lot.expiration_date
                .map_or_else(|| "-".to_string(), |d| d.to_string())
        );
    }
    Ok(())
}
