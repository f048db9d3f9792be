//! Cart lines and the availability guard run on every cart change.
//!
//! A cart line holds no stock. The guard only answers whether the lots a
//! checkout would draw from could cover what the user has in the cart; the
//! authoritative check happens again when the sale is committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InventoryError;
use crate::product::Product;
use crate::promotion::PromotionBinder;
use crate::types::{CartLineId, Price, ProductId, PromotionId, SaleUnit};

/// One line of a user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub user_name: String,
    pub product_id: ProductId,
    pub product_name: String,
    /// Quantity in `sale_unit`s, at least 1.
    pub quantity: i64,
    pub sale_unit: SaleUnit,
    /// Price per sale unit resolved when the line was last changed.
    pub unit_price: Price,
    pub promotion_id: Option<PromotionId>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// Whether `request` would merge into this line.
    #[must_use]
    pub fn same_slot(&self, request: &CartRequest) -> bool {
        self.user_name == request.user_name
            && self.product_id == request.product_id
            && self.sale_unit == request.sale_unit
            && self.promotion_id == request.promotion_id
    }

    fn claims_same_stock(
        &self,
        user_name: &str,
        product_id: ProductId,
        promotion_id: Option<PromotionId>,
    ) -> bool {
        self.user_name == user_name
            && self.product_id == product_id
            && self.promotion_id == promotion_id
    }
}

/// A request to put something in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CartRequest {
    pub user_name: String,
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub sale_unit: SaleUnit,
    #[serde(default)]
    pub promotion_id: Option<PromotionId>,
}

impl CartRequest {
    /// # Errors
    ///
    /// Returns `Validation` for an empty user name or a quantity below 1.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.user_name.trim().is_empty() {
            return Err(InventoryError::Validation(
                "user name cannot be empty".to_string(),
            ));
        }
        ensure_line_quantity(self.quantity)
    }
}

/// Cart quantities are whole sale units, at least one.
///
/// # Errors
///
/// Returns `Validation` if `quantity < 1`.
pub fn ensure_line_quantity(quantity: i64) -> Result<(), InventoryError> {
    if quantity < 1 {
        return Err(InventoryError::Validation(format!(
            "cart quantity must be at least 1 (got {quantity})"
        )));
    }
    Ok(())
}

/// Read-only availability check for one product.
#[derive(Debug, Clone, Copy)]
pub struct CartGuard<'a> {
    product: &'a Product,
    binder: PromotionBinder<'a>,
    now: DateTime<Utc>,
}

impl<'a> CartGuard<'a> {
    #[must_use]
    pub const fn new(product: &'a Product, binder: PromotionBinder<'a>, now: DateTime<Utc>) -> Self {
        Self {
            product,
            binder,
            now,
        }
    }

    /// Units a checkout could draw for this product right now, under the
    /// same segregation as the sale itself.
    ///
    /// # Errors
    ///
    /// Propagates the filter errors of
    /// [`PromotionBinder::resolve_filter_for`].
    pub fn sellable(&self, promotion_id: Option<PromotionId>) -> Result<i64, InventoryError> {
        let filter = self
            .binder
            .resolve_filter_for(self.product, self.now, promotion_id)?;
        Ok(self.product.ledger.sellable_quantity(Some(&filter)))
    }

    /// Reject a line of `quantity` × `sale_unit` if, together with the user's
    /// other lines for the same product and promotion, it exceeds sellable
    /// stock. `replacing` names the line being edited so its old quantity is
    /// not counted twice.
    ///
    /// Returns the sellable quantity on success.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the product is retired.
    /// - `InsufficientStock` with the excess in base units.
    /// - `Validation` if the units claimed overflow.
    /// - Any filter error from [`Self::sellable`].
    pub fn check(
        &self,
        user_name: &str,
        quantity: i64,
        sale_unit: SaleUnit,
        promotion_id: Option<PromotionId>,
        existing: &[CartLine],
        replacing: Option<CartLineId>,
    ) -> Result<i64, InventoryError> {
        self.product.ensure_active()?;
        let sellable = self.sellable(promotion_id)?;
        let too_many = || InventoryError::Validation("cart quantity is too large".to_string());
        let mut wanted = self.product.units_for(quantity, sale_unit)?;
        for line in existing
            .iter()
            .filter(|line| Some(line.id) != replacing)
            .filter(|line| line.claims_same_stock(user_name, self.product.id, promotion_id))
        {
            let units = self.product.units_for(line.quantity, line.sale_unit)?;
            wanted = wanted.checked_add(units).ok_or_else(too_many)?;
        }
        if wanted > sellable {
            return Err(InventoryError::InsufficientStock {
                shortage: wanted - sellable,
            });
        }
        Ok(sellable)
    }

    /// Price per `sale_unit` for a line, promotional when `promotion_id` is
    /// given and live.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the promotion does not belong to this product.
    /// - `Validation` if it is not active now.
    pub fn unit_price(
        &self,
        sale_unit: SaleUnit,
        promotion_id: Option<PromotionId>,
    ) -> Result<Price, InventoryError> {
        let Some(id) = promotion_id else {
            return Ok(self.product.catalog_price(sale_unit));
        };
        let promotion = self.binder.find(self.product.id, id).ok_or_else(|| {
            InventoryError::NotFound(format!("promotion {id} for product {}", self.product.id))
        })?;
        if !promotion.is_active(self.now) {
            return Err(InventoryError::Validation(format!(
                "promotion '{}' is not active",
                promotion.name
            )));
        }
        Ok(promotion.price_for(sale_unit, self.product.pack_size))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;

    use super::*;
    use crate::ledger::{LotLedger, NewLot};
    use crate::promotion::{Promotion, ValidityWindow};
    use crate::types::{Barcode, LotNumber};

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, d, 9, 0, 0).unwrap()
    }

    /// 10 regular units in LOT001 and 4 promotional units in LOT002; packs of 4.
    fn product() -> Product {
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let mut ledger = LotLedger::new();
        ledger.add_lot(NewLot::new(10, Decimal::ONE), today).unwrap();
        ledger.add_lot(NewLot::new(4, Decimal::ONE), today).unwrap();
        Product {
            id: ProductId::new(3),
            name: "Eggs".to_string(),
            description: None,
            category: None,
            barcode_unit: None,
            barcode_pack: None,
            pack_size: 4,
            price_per_unit: Price::new(Decimal::new(50, 2)).unwrap(),
            price_per_pack: Price::new(Decimal::new(180, 2)).unwrap(),
            ledger,
            version: 0,
            created_at: at(1),
            updated_at: at(1),
            retired_at: None,
        }
    }

    fn promotions() -> Vec<Promotion> {
        vec![Promotion {
            id: PromotionId::new(7),
            product_id: ProductId::new(3),
            name: "Half price".to_string(),
            discounted_price: Price::new(Decimal::new(25, 2)).unwrap(),
            window: ValidityWindow::new(at(1), at(20)).unwrap(),
            applied_lots: [LotNumber::parse("LOT002").unwrap()].into(),
            barcode: Barcode::promotion(at(1).date_naive(), 0),
            created_at: at(1),
        }]
    }

    fn cart_line(id: i32, quantity: i64, sale_unit: SaleUnit, promo: Option<i32>) -> CartLine {
        CartLine {
            id: CartLineId::new(id),
            user_name: "ann".to_string(),
            product_id: ProductId::new(3),
            product_name: "Eggs".to_string(),
            quantity,
            sale_unit,
            unit_price: Price::ZERO,
            promotion_id: promo.map(PromotionId::new),
            added_at: at(2),
        }
    }

    #[test]
    fn test_regular_lines_exclude_promotion_stock() {
        let p = product();
        let promos = promotions();
        let guard = CartGuard::new(&p, PromotionBinder::new(&promos), at(5));

        assert_eq!(guard.sellable(None).unwrap(), 10);
        assert_eq!(guard.sellable(Some(PromotionId::new(7))).unwrap(), 4);
        assert_eq!(
            guard.check("ann", 11, SaleUnit::Unit, None, &[], None),
            Err(InventoryError::InsufficientStock { shortage: 1 })
        );
    }

    #[test]
    fn test_other_lines_count_in_base_units() {
        let p = product();
        let promos = promotions();
        let guard = CartGuard::new(&p, PromotionBinder::new(&promos), at(5));
        let existing = [
            cart_line(1, 2, SaleUnit::Pack, None),
            // Promotion lines and other users draw from different stock
            cart_line(2, 4, SaleUnit::Unit, Some(7)),
        ];

        // 8 claimed by the pack line, 2 more fit
        assert!(
            guard
                .check("ann", 2, SaleUnit::Unit, None, &existing, None)
                .is_ok()
        );
        assert_eq!(
            guard.check("ann", 3, SaleUnit::Unit, None, &existing, None),
            Err(InventoryError::InsufficientStock { shortage: 1 })
        );
        assert!(
            guard
                .check("bob", 10, SaleUnit::Unit, None, &existing, None)
                .is_ok()
        );
    }

    #[test]
    fn test_huge_quantities_are_rejected_not_wrapped() {
        let p = product();
        let guard = CartGuard::new(&p, PromotionBinder::new(&[]), at(5));
        assert!(matches!(
            guard.check("ann", i64::MAX / 2, SaleUnit::Pack, None, &[], None),
            Err(InventoryError::Validation(_))
        ));

        let existing = [cart_line(1, i64::MAX, SaleUnit::Unit, None)];
        assert!(matches!(
            guard.check("ann", 1, SaleUnit::Unit, None, &existing, None),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_retired_product_cannot_be_added() {
        let mut p = product();
        p.retired_at = Some(at(4));
        let guard = CartGuard::new(&p, PromotionBinder::new(&[]), at(5));
        assert!(matches!(
            guard.check("ann", 1, SaleUnit::Unit, None, &[], None),
            Err(InventoryError::Conflict(_))
        ));
    }

    #[test]
    fn test_replacing_line_is_not_double_counted() {
        let p = product();
        let guard = CartGuard::new(&p, PromotionBinder::new(&[]), at(5));
        let existing = [cart_line(1, 8, SaleUnit::Unit, None)];
        assert!(
            guard
                .check("ann", 14, SaleUnit::Unit, None, &existing, Some(CartLineId::new(1)))
                .is_ok()
        );
    }

    #[test]
    fn test_unit_price_resolution() {
        let p = product();
        let promos = promotions();
        let guard = CartGuard::new(&p, PromotionBinder::new(&promos), at(5));

        assert_eq!(guard.unit_price(SaleUnit::Pack, None).unwrap().to_string(), "1.80");
        assert_eq!(
            guard
                .unit_price(SaleUnit::Pack, Some(PromotionId::new(7)))
                .unwrap()
                .to_string(),
            "1.00"
        );
        assert!(matches!(
            guard.unit_price(SaleUnit::Unit, Some(PromotionId::new(8))),
            Err(InventoryError::NotFound(_))
        ));

        let late = CartGuard::new(&p, PromotionBinder::new(&promos), at(25));
        assert!(matches!(
            late.unit_price(SaleUnit::Unit, Some(PromotionId::new(7))),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_request_validation() {
        let request = CartRequest {
            user_name: "ann".to_string(),
            product_id: ProductId::new(3),
            quantity: 0,
            sale_unit: SaleUnit::Unit,
            promotion_id: None,
        };
        assert!(request.validate().is_err());
        assert!(cart_line(1, 1, SaleUnit::Unit, None).same_slot(&CartRequest {
            quantity: 2,
            ..request
        }));
    }
}
