//! End-to-end sales scenarios: cart, checkout, promotions and reversals.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use stockroom_admin::config::{StockConfig, SweepConfig};
use stockroom_admin::error::AppError;
use stockroom_core::promotion::PromotionDraft;
use stockroom_core::{InventoryError, OrderStatus, PaymentMethod, SaleUnit, StockCommitment};
use stockroom_integration_tests::{TestShop, at, date};

fn now() -> DateTime<Utc> {
    at(3, 1)
}

#[tokio::test]
async fn test_checkout_then_cancel_restores_every_lot() {
    let shop = TestShop::new();
    let yogurt = shop.product("Yogurt", 90, 4).await.unwrap();
    shop.receive(yogurt, 6, date(4, 20)).await.unwrap();
    shop.receive(yogurt, 6, date(4, 5)).await.unwrap();
    let before = shop.stockroom.inventory.product(yogurt).await.unwrap();

    shop.add_to_cart("marta", yogurt, 8, None, now()).await.unwrap();
    let order = shop
        .stockroom
        .orders
        .checkout("marta", PaymentMethod::Cash, Some(Decimal::TEN), now())
        .await
        .unwrap();

    assert_eq!(order.total, Decimal::new(720, 2));
    assert_eq!(order.change, Some(Decimal::new(280, 2)));
    let draws = &order.lines[0].draws;
    assert_eq!(draws[0].lot_number.as_str(), "LOT002");
    assert_eq!(draws[0].quantity_taken, 6);
    assert_eq!(draws[1].lot_number.as_str(), "LOT001");
    assert_eq!(draws[1].quantity_taken, 2);
    assert_eq!(shop.available(yogurt).await.unwrap(), 4);

    let cancelled = shop.stockroom.orders.cancel(order.id, at(3, 2)).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.lines[0].commitment, StockCommitment::Reversed);

    let after = shop.stockroom.inventory.product(yogurt).await.unwrap();
    let quantities = |p: &stockroom_core::Product| {
        p.ledger
            .lots()
            .iter()
            .map(|l| (l.lot_number.clone(), l.quantity, l.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(quantities(&after), quantities(&before));

    let again = shop.stockroom.orders.return_order(order.id, at(3, 3)).await;
    assert!(matches!(
        again,
        Err(AppError::Inventory(InventoryError::Conflict(_)))
    ));
    assert_eq!(shop.available(yogurt).await.unwrap(), 12);
}

#[tokio::test]
async fn test_promotion_lots_are_kept_apart_from_regular_sales() {
    let shop = TestShop::new();
    let cheese = shop.product("Brie", 400, 1).await.unwrap();
    shop.receive(cheese, 5, date(3, 10)).await.unwrap();
    shop.receive(cheese, 5, date(4, 30)).await.unwrap();

    let promo = shop
        .stockroom
        .promotions
        .create(
            PromotionDraft {
                product_id: cheese,
                name: "Short dated".to_string(),
                discounted_price: Decimal::new(250, 2),
                start: now() - Duration::days(1),
                end: now() + Duration::days(7),
                applied_lots: vec!["LOT001".to_string()],
            },
            now(),
        )
        .await
        .unwrap();

    // Only LOT002 is sellable at the regular price while the promotion runs.
    let too_many = shop.add_to_cart("olek", cheese, 6, None, now()).await;
    assert_eq!(too_many.unwrap_err().shortage(), Some(1));

    let regular = shop.add_to_cart("olek", cheese, 3, None, now()).await.unwrap();
    let discounted = shop
        .add_to_cart("olek", cheese, 4, Some(promo.id), now())
        .await
        .unwrap();
    assert_ne!(regular.id, discounted.id);

    let order = shop
        .stockroom
        .orders
        .checkout("olek", PaymentMethod::BankTransfer, None, now())
        .await
        .unwrap();

    let regular_line = order
        .lines
        .iter()
        .find(|l| l.promotion_id.is_none())
        .unwrap();
    let promo_line = order
        .lines
        .iter()
        .find(|l| l.promotion_id == Some(promo.id))
        .unwrap();
    assert!(
        regular_line
            .draws
            .iter()
            .all(|d| d.lot_number.as_str() == "LOT002")
    );
    assert!(
        promo_line
            .draws
            .iter()
            .all(|d| d.lot_number.as_str() == "LOT001")
    );
    assert_eq!(promo_line.unit_price.amount(), Decimal::new(250, 2));
    assert_eq!(order.total, Decimal::new(2200, 2));
    assert_eq!(order.discount_total, Decimal::new(600, 2));

    // After the window closes the reserved lot is ordinary stock again.
    let later = now() + Duration::days(8);
    let sale = shop
        .stockroom
        .sales
        .commit_sale(cheese, 3, SaleUnit::Unit, None, later)
        .await
        .unwrap();
    assert_eq!(sale.units, 3);
    assert_eq!(shop.available(cheese).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_sales_never_lose_a_decrement() {
    const BUYERS: i64 = 16;

    let shop = TestShop::with_config(StockConfig { max_retries: 64 }, SweepConfig::default());
    let bread = shop.product("Sourdough", 350, 1).await.unwrap();
    shop.receive(bread, 10, date(3, 4)).await.unwrap();
    shop.receive(bread, 10, date(3, 6)).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..BUYERS {
        let sales = shop.stockroom.sales.clone();
        tasks.push(tokio::spawn(async move {
            sales
                .commit_sale(bread, 1, SaleUnit::Unit, None, now())
                .await
        }));
    }

    let mut sold = 0;
    for task in tasks {
        let sale = task.await.unwrap().unwrap();
        sold += sale.units;
    }

    assert_eq!(sold, BUYERS);
    assert_eq!(shop.available(bread).await.unwrap(), 20 - BUYERS);
    let product = shop.stockroom.inventory.product(bread).await.unwrap();
    assert_eq!(product.ledger.lots()[0].quantity, 0);
    assert_eq!(product.ledger.lots()[1].quantity, 10 - (BUYERS - 10));
}

#[tokio::test]
async fn test_editing_an_order_moves_stock_both_ways() {
    let shop = TestShop::new();
    let apples = shop.product("Apples", 60, 1).await.unwrap();
    shop.receive(apples, 10, date(3, 20)).await.unwrap();

    shop.add_to_cart("jun", apples, 4, None, now()).await.unwrap();
    let order = shop
        .stockroom
        .orders
        .checkout("jun", PaymentMethod::Cash, Some(Decimal::TEN), now())
        .await
        .unwrap();
    assert_eq!(shop.available(apples).await.unwrap(), 6);

    let grown = shop
        .stockroom
        .orders
        .edit_line(order.id, 0, 7, now())
        .await
        .unwrap();
    assert_eq!(grown.lines[0].quantity, 7);
    assert_eq!(shop.available(apples).await.unwrap(), 3);

    let shrunk = shop
        .stockroom
        .orders
        .edit_line(order.id, 0, 2, now())
        .await
        .unwrap();
    assert_eq!(shrunk.lines[0].quantity, 2);
    assert_eq!(shop.available(apples).await.unwrap(), 8);

    let too_many = shop.stockroom.orders.edit_line(order.id, 0, 11, now()).await;
    assert_eq!(too_many.unwrap_err().shortage(), Some(1));
    assert_eq!(shop.available(apples).await.unwrap(), 8);
}
