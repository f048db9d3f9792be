//! Promotions and the binder that keeps their reserved lots apart.
//!
//! A promotion reserves a set of lots on one product for a time window. The
//! [`PromotionBinder`] enforces that no lot is reserved by two promotions whose
//! windows overlap, and turns the set of live reservations into the
//! [`LotFilter`] an allocation needs:
//!
//! - a sale fulfilling promotion `P` draws only from `P`'s lots (`IncludeOnly`);
//! - any other sale skips every lot reserved by a live promotion (`Exclude`).

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::LotFilter;
use crate::error::InventoryError;
use crate::product::Product;
use crate::types::barcode::MAX_PROMOTION_SEQUENCE;
use crate::types::{Barcode, LotNumber, Price, ProductId, PromotionId, SaleUnit};

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ValidityWindow {
    /// Create a window.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, InventoryError> {
        if start > end {
            return Err(InventoryError::Validation(format!(
                "promotion starts ({start}) after it ends ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether the two windows share at least one instant (bounds inclusive).
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Whether `now` falls inside the window.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

/// A discounted price on a reserved subset of a product's lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub product_id: ProductId,
    pub name: String,
    /// Price per base unit while the promotion runs.
    pub discounted_price: Price,
    pub window: ValidityWindow,
    pub applied_lots: BTreeSet<LotNumber>,
    pub barcode: Barcode,
    pub created_at: DateTime<Utc>,
}

impl Promotion {
    /// Whether the promotion is live at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.window.contains(now)
    }

    /// Promotional price for one `unit` of a product with `pack_size`.
    #[must_use]
    pub fn price_for(&self, unit: SaleUnit, pack_size: u32) -> Price {
        match unit {
            SaleUnit::Unit => self.discounted_price,
            SaleUnit::Pack => self.discounted_price.per_pack_of(pack_size),
        }
    }
}

/// Unvalidated promotion input (create or full update).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromotionDraft {
    pub product_id: ProductId,
    pub name: String,
    pub discounted_price: Decimal,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub applied_lots: Vec<String>,
}

/// A [`PromotionDraft`] whose fields are individually well-formed.
///
/// Whether the lots are eligible and unclaimed is checked separately by
/// [`PromotionBinder::validate_application`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPromotion {
    pub product_id: ProductId,
    pub name: String,
    pub discounted_price: Price,
    pub window: ValidityWindow,
    pub applied_lots: BTreeSet<LotNumber>,
}

impl PromotionDraft {
    /// Check field-level rules.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name, a negative price, an inverted
    /// window, or an empty lot set.
    pub fn validate(self) -> Result<ValidPromotion, InventoryError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(InventoryError::Validation(
                "promotion name cannot be empty".to_string(),
            ));
        }
        let discounted_price = Price::new(self.discounted_price)?;
        let window = ValidityWindow::new(self.start, self.end)?;
        let applied_lots = self
            .applied_lots
            .iter()
            .map(|raw| LotNumber::parse(raw))
            .collect::<Result<BTreeSet<_>, _>>()?;
        if applied_lots.is_empty() {
            return Err(InventoryError::Validation(
                "a promotion must apply to at least one lot".to_string(),
            ));
        }
        Ok(ValidPromotion {
            product_id: self.product_id,
            name,
            discounted_price,
            window,
            applied_lots,
        })
    }
}

/// Rules over the set of promotions that exist for one product.
#[derive(Debug, Clone, Copy)]
pub struct PromotionBinder<'a> {
    promotions: &'a [Promotion],
}

impl<'a> PromotionBinder<'a> {
    /// Bind over `promotions`. Promotions of other products are ignored by
    /// every check, so passing a wider list is harmless.
    #[must_use]
    pub const fn new(promotions: &'a [Promotion]) -> Self {
        Self { promotions }
    }

    fn for_product(&self, product_id: ProductId) -> impl Iterator<Item = &'a Promotion> {
        self.promotions
            .iter()
            .filter(move |p| p.product_id == product_id)
    }

    /// Promotions of the same product whose windows overlap `window`,
    /// skipping the one being updated.
    fn competing(
        &self,
        product_id: ProductId,
        window: &ValidityWindow,
        updating: Option<PromotionId>,
    ) -> impl Iterator<Item = &'a Promotion> {
        let window = *window;
        self.for_product(product_id)
            .filter(move |p| Some(p.id) != updating && p.window.overlaps(&window))
    }

    /// Check that `lots` may be reserved on `product` during `window`.
    ///
    /// Every lot must exist on the product and be promotion-eligible on
    /// `today`; none may already be claimed by another promotion whose window
    /// overlaps. `updating` names the promotion being edited so it does not
    /// conflict with itself.
    ///
    /// # Errors
    ///
    /// - `Validation` if `lots` is empty.
    /// - `Conflict` naming the ineligible or already-claimed lots.
    pub fn validate_application(
        &self,
        product: &Product,
        lots: &BTreeSet<LotNumber>,
        window: &ValidityWindow,
        today: NaiveDate,
        updating: Option<PromotionId>,
    ) -> Result<(), InventoryError> {
        if lots.is_empty() {
            return Err(InventoryError::Validation(
                "a promotion must apply to at least one lot".to_string(),
            ));
        }

        let ineligible: Vec<&str> = lots
            .iter()
            .filter(|number| {
                product
                    .ledger
                    .get(number)
                    .is_none_or(|lot| !lot.is_promotion_eligible(today))
            })
            .map(LotNumber::as_str)
            .collect();
        if !ineligible.is_empty() {
            return Err(InventoryError::Conflict(format!(
                "lots not eligible for a promotion (missing, expired, disposed or out of stock): {}",
                ineligible.join(", ")
            )));
        }

        let claimed: BTreeSet<&LotNumber> = self
            .competing(product.id, window, updating)
            .flat_map(|p| p.applied_lots.iter())
            .collect();
        let overlap: Vec<&str> = lots
            .iter()
            .filter(|number| claimed.contains(number))
            .map(LotNumber::as_str)
            .collect();
        if !overlap.is_empty() {
            return Err(InventoryError::Conflict(format!(
                "lots already reserved by another promotion in an overlapping period: {}",
                overlap.join(", ")
            )));
        }
        Ok(())
    }

    /// Reject a second promotion called `name` on the same product in an
    /// overlapping window (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if such a promotion exists.
    pub fn ensure_unique_name(
        &self,
        product_id: ProductId,
        name: &str,
        window: &ValidityWindow,
        updating: Option<PromotionId>,
    ) -> Result<(), InventoryError> {
        let name = name.trim();
        if self
            .competing(product_id, window, updating)
            .any(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Err(InventoryError::Conflict(format!(
                "a promotion named '{name}' already runs for this product in that period"
            )));
        }
        Ok(())
    }

    /// Lots reserved on `product_id` by any promotion live at `now`.
    #[must_use]
    pub fn reserved_lots(&self, product_id: ProductId, now: DateTime<Utc>) -> BTreeSet<LotNumber> {
        self.for_product(product_id)
            .filter(|p| p.is_active(now))
            .flat_map(|p| p.applied_lots.iter().cloned())
            .collect()
    }

    /// The promotion `id` if it belongs to `product_id`.
    #[must_use]
    pub fn find(&self, product_id: ProductId, id: PromotionId) -> Option<&'a Promotion> {
        self.for_product(product_id).find(|p| p.id == id)
    }

    /// Filter for a sale of `product` at `now`, optionally fulfilling
    /// `promotion`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `promotion` is not a promotion of this product.
    /// - `Validation` if `promotion` is not live at `now`.
    /// - `NoEligibleLots` if the promotion's lots hold no stock.
    /// - `NoSellableStock` if nothing is left once reserved lots are excluded.
    pub fn resolve_filter_for(
        &self,
        product: &Product,
        now: DateTime<Utc>,
        promotion: Option<PromotionId>,
    ) -> Result<LotFilter, InventoryError> {
        if let Some(id) = promotion {
            let promo = self.find(product.id, id).ok_or_else(|| {
                InventoryError::NotFound(format!("promotion {id} for product {}", product.id))
            })?;
            if !promo.is_active(now) {
                return Err(InventoryError::Validation(format!(
                    "promotion '{}' is not active",
                    promo.name
                )));
            }
            let filter = LotFilter::IncludeOnly(promo.applied_lots.clone());
            if product.ledger.sellable_quantity(Some(&filter)) == 0 {
                return Err(InventoryError::NoEligibleLots(format!(
                    "promotion '{}' has no reserved stock left",
                    promo.name
                )));
            }
            return Ok(filter);
        }

        let filter = LotFilter::Exclude(self.reserved_lots(product.id, now));
        if product.ledger.sellable_quantity(Some(&filter)) == 0 {
            return Err(InventoryError::NoSellableStock(format!(
                "product {} has no stock outside promotions",
                product.name
            )));
        }
        Ok(filter)
    }
}

/// First free promotion barcode for `month`.
///
/// # Errors
///
/// Returns `Conflict` once every sequence for the month is taken.
pub fn next_promotion_barcode<'b>(
    taken: impl IntoIterator<Item = &'b Barcode>,
    month: NaiveDate,
) -> Result<Barcode, InventoryError> {
    let taken: BTreeSet<&str> = taken.into_iter().map(Barcode::as_str).collect();
    (0..=MAX_PROMOTION_SEQUENCE)
        .map(|seq| Barcode::promotion(month, seq))
        .find(|code| !taken.contains(code.as_str()))
        .ok_or_else(|| {
            InventoryError::Conflict("promotion barcodes for this month are exhausted".to_string())
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::ledger::{LotLedger, NewLot};
    use crate::types::LotStatus;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 12, 1)
    }

    fn lots(names: &[&str]) -> BTreeSet<LotNumber> {
        names.iter().map(|n| LotNumber::parse(n).unwrap()).collect()
    }

    /// L1..L4, 3 units each; L4 undated.
    fn product() -> Product {
        let mut ledger = LotLedger::new();
        for (name, exp) in [
            ("L1", Some(date(2025, 1, 1))),
            ("L2", Some(date(2024, 12, 20))),
            ("L3", Some(date(2025, 2, 1))),
            ("L4", None),
        ] {
            let mut new = NewLot::new(3, Decimal::ONE);
            new.lot_number = Some(name.to_string());
            new.expiration_date = exp;
            ledger.add_lot(new, today()).unwrap();
        }
        Product {
            id: ProductId::new(1),
            name: "Yoghurt".to_string(),
            description: None,
            category: None,
            barcode_unit: None,
            barcode_pack: None,
            pack_size: 4,
            price_per_unit: Price::new(Decimal::new(300, 2)).unwrap(),
            price_per_pack: Price::new(Decimal::new(1100, 2)).unwrap(),
            ledger,
            version: 0,
            created_at: at(2024, 11, 1),
            updated_at: at(2024, 11, 1),
            retired_at: None,
        }
    }

    fn promotion(id: i32, name: &str, applied: &[&str], start: DateTime<Utc>, end: DateTime<Utc>) -> Promotion {
        Promotion {
            id: PromotionId::new(id),
            product_id: ProductId::new(1),
            name: name.to_string(),
            discounted_price: Price::new(Decimal::new(200, 2)).unwrap(),
            window: ValidityWindow::new(start, end).unwrap(),
            applied_lots: lots(applied),
            barcode: Barcode::promotion(start.date_naive(), u16::try_from(id).unwrap()),
            created_at: start,
        }
    }

    #[test]
    fn test_window_overlap_is_inclusive() {
        let a = ValidityWindow::new(at(2024, 12, 1), at(2024, 12, 10)).unwrap();
        let b = ValidityWindow::new(at(2024, 12, 10), at(2024, 12, 20)).unwrap();
        let c = ValidityWindow::new(at(2024, 12, 11), at(2024, 12, 20)).unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(ValidityWindow::new(at(2024, 12, 2), at(2024, 12, 1)).is_err());
    }

    #[test]
    fn test_overlapping_lot_reservation_conflicts() {
        let existing = [promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 31))];
        let binder = PromotionBinder::new(&existing);
        let window = ValidityWindow::new(at(2024, 12, 15), at(2025, 1, 15)).unwrap();

        let err = binder
            .validate_application(&product(), &lots(&["L1", "L2"]), &window, today(), None)
            .unwrap_err();
        match err {
            InventoryError::Conflict(message) => {
                assert!(message.contains("L2"));
                assert!(!message.contains("L1"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        // Disjoint lots or a later window are fine
        binder
            .validate_application(&product(), &lots(&["L1"]), &window, today(), None)
            .unwrap();
        let later = ValidityWindow::new(at(2025, 1, 1), at(2025, 1, 15)).unwrap();
        binder
            .validate_application(&product(), &lots(&["L2"]), &later, today(), None)
            .unwrap();
    }

    #[test]
    fn test_update_does_not_conflict_with_itself() {
        let existing = [promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 31))];
        let binder = PromotionBinder::new(&existing);
        let window = existing[0].window;
        binder
            .validate_application(
                &product(),
                &lots(&["L2", "L3"]),
                &window,
                today(),
                Some(PromotionId::new(1)),
            )
            .unwrap();
        binder
            .ensure_unique_name(ProductId::new(1), "xmas", &window, Some(PromotionId::new(1)))
            .unwrap();
        assert!(
            binder
                .ensure_unique_name(ProductId::new(1), "XMAS", &window, None)
                .is_err()
        );
    }

    #[test]
    fn test_ineligible_lots_are_rejected() {
        let mut p = product();
        p.ledger
            .dispose(&LotNumber::parse("L3").unwrap(), "damaged", today())
            .unwrap();
        let binder = PromotionBinder::new(&[]);
        let window = ValidityWindow::new(at(2024, 12, 1), at(2024, 12, 31)).unwrap();

        for bad in ["L3", "NOPE"] {
            assert!(matches!(
                binder.validate_application(&p, &lots(&[bad]), &window, today(), None),
                Err(InventoryError::Conflict(_))
            ));
        }
        // L2 expires 2024-12-20: not eligible on that day
        assert!(
            binder
                .validate_application(&p, &lots(&["L2"]), &window, date(2024, 12, 20), None)
                .is_err()
        );
        assert!(matches!(
            binder.validate_application(&p, &BTreeSet::new(), &window, today(), None),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_filter_segregates_stock() {
        let existing = [promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 31))];
        let binder = PromotionBinder::new(&existing);
        let now = at(2024, 12, 5);

        let mut p = product();
        let regular = binder.resolve_filter_for(&p, now, None).unwrap();
        assert_eq!(regular, LotFilter::Exclude(lots(&["L2"])));
        let draws = p.commit_sale(9, Some(&regular)).unwrap();
        assert!(draws.iter().all(|d| d.lot_number.as_str() != "L2"));

        let mut p = product();
        let promo = binder
            .resolve_filter_for(&p, now, Some(PromotionId::new(1)))
            .unwrap();
        assert_eq!(promo, LotFilter::IncludeOnly(lots(&["L2"])));
        assert_eq!(
            p.commit_sale(4, Some(&promo)).unwrap_err(),
            InventoryError::InsufficientStock { shortage: 1 }
        );
    }

    #[test]
    fn test_reservation_ends_with_window() {
        let existing = [promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 3))];
        let binder = PromotionBinder::new(&existing);
        let after = at(2024, 12, 5);
        assert!(binder.reserved_lots(ProductId::new(1), after).is_empty());
        assert!(matches!(
            binder.resolve_filter_for(&product(), after, Some(PromotionId::new(1))),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_resolve_filter_errors() {
        let existing = [promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 31))];
        let binder = PromotionBinder::new(&existing);
        let now = at(2024, 12, 5);

        assert!(matches!(
            binder.resolve_filter_for(&product(), now, Some(PromotionId::new(9))),
            Err(InventoryError::NotFound(_))
        ));

        // Promotion lot sold out
        let mut p = product();
        p.commit_sale(3, Some(&LotFilter::IncludeOnly(lots(&["L2"]))))
            .unwrap();
        assert!(matches!(
            binder.resolve_filter_for(&p, now, Some(PromotionId::new(1))),
            Err(InventoryError::NoEligibleLots(_))
        ));

        // Only reserved stock left
        let mut p = product();
        p.commit_sale(9, Some(&LotFilter::Exclude(lots(&["L2"]))))
            .unwrap();
        assert!(
            p.ledger
                .lots()
                .iter()
                .filter(|l| l.lot_number.as_str() != "L2")
                .all(|l| l.status == LotStatus::Depleted)
        );
        assert!(matches!(
            binder.resolve_filter_for(&p, now, None),
            Err(InventoryError::NoSellableStock(_))
        ));
    }

    #[test]
    fn test_price_for_pack_scales_unit_price() {
        let promo = promotion(1, "Xmas", &["L2"], at(2024, 12, 1), at(2024, 12, 31));
        assert_eq!(promo.price_for(SaleUnit::Unit, 4).to_string(), "2.00");
        assert_eq!(promo.price_for(SaleUnit::Pack, 4).to_string(), "8.00");
    }

    #[test]
    fn test_draft_validation() {
        let draft = PromotionDraft {
            product_id: ProductId::new(1),
            name: "Xmas".to_string(),
            discounted_price: Decimal::ONE,
            start: at(2024, 12, 1),
            end: at(2024, 12, 31),
            applied_lots: vec!["L1".to_string()],
        };
        assert!(draft.clone().validate().is_ok());
        assert!(
            PromotionDraft {
                applied_lots: vec![],
                ..draft.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            PromotionDraft {
                discounted_price: Decimal::NEGATIVE_ONE,
                ..draft.clone()
            }
            .validate()
            .is_err()
        );
        assert!(
            PromotionDraft {
                end: at(2024, 11, 1),
                ..draft
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_next_barcode_skips_taken() {
        let month = date(2026, 1, 1);
        let first = next_promotion_barcode([], month).unwrap();
        assert_eq!(first.as_str(), "2992601000009");
        let second = next_promotion_barcode([&first], month).unwrap();
        assert_eq!(second, Barcode::promotion(month, 1));
    }
}
