//! Product aggregate: catalog fields plus the lot ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::{Draw, LotFilter};
use crate::error::InventoryError;
use crate::ledger::LotLedger;
use crate::order::LotDraw;
use crate::types::{Barcode, Price, ProductId, SaleUnit};

/// A sellable product and its physical stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub barcode_unit: Option<Barcode>,
    pub barcode_pack: Option<Barcode>,
    /// Units per pack, at least 1. Fixed for the life of the product.
    pub pack_size: u32,
    pub price_per_unit: Price,
    pub price_per_pack: Price,
    pub ledger: LotLedger,
    /// Optimistic-concurrency token, bumped on every ledger write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the product leaves the catalog. Its lots stay on record.
    #[serde(default)]
    pub retired_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Convert a line quantity into base units using this product's pack size.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the unit count overflows.
    pub fn units_for(&self, quantity: i64, unit: SaleUnit) -> Result<i64, InventoryError> {
        unit.checked_units(quantity, self.pack_size)
    }

    /// Regular selling price for one `unit`.
    #[must_use]
    pub const fn catalog_price(&self, unit: SaleUnit) -> Price {
        match unit {
            SaleUnit::Unit => self.price_per_unit,
            SaleUnit::Pack => self.price_per_pack,
        }
    }

    #[must_use]
    pub const fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Refuse new stock movement into or out of a retired product.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` naming the retirement date.
    pub fn ensure_active(&self) -> Result<(), InventoryError> {
        match self.retired_at {
            Some(at) => Err(InventoryError::Conflict(format!(
                "{} was retired on {}",
                self.name,
                at.date_naive()
            ))),
            None => Ok(()),
        }
    }

    /// Draw `units` from the ledger under `filter`, all or nothing.
    ///
    /// On a shortage the partial draws are handed straight back, so the
    /// ledger is left exactly as it was before the call.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the product is retired.
    /// - `Validation` if `units` is not positive.
    /// - `InsufficientStock` if the filtered lots cannot cover `units`.
    pub fn commit_sale(
        &mut self,
        units: i64,
        filter: Option<&LotFilter>,
    ) -> Result<Vec<LotDraw>, InventoryError> {
        self.ensure_active()?;
        if units <= 0 {
            return Err(InventoryError::Validation(format!(
                "sale quantity must be positive (got {units})"
            )));
        }

        let allocation = self.ledger.allocate(units, filter);
        if !allocation.fulfilled {
            self.ledger.restore(&allocation.draws)?;
            return Err(InventoryError::InsufficientStock {
                shortage: allocation.shortage,
            });
        }

        allocation
            .draws
            .into_iter()
            .map(|draw| {
                let lot = self.ledger.get(&draw.lot_number).ok_or_else(|| {
                    InventoryError::NotFound(format!("lot {}", draw.lot_number))
                })?;
                Ok(LotDraw {
                    purchase_price: lot.purchase_price,
                    expiration_date: lot.expiration_date,
                    lot_number: draw.lot_number,
                    quantity_taken: draw.quantity_taken,
                })
            })
            .collect()
    }

    /// Replay recorded draws back into the ledger.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if a draw names a lot this product does not have;
    /// nothing is restored in that case.
    pub fn restore_sale(&mut self, draws: &[LotDraw]) -> Result<(), InventoryError> {
        let draws: Vec<Draw> = draws.iter().map(LotDraw::to_draw).collect();
        self.ledger.restore(&draws)
    }

    /// Take recorded draws out of the ledger again, lot for lot.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InsufficientStock` if a lot cannot give back
    /// what the draw recorded; nothing is taken in that case.
    pub fn reapply_sale(&mut self, draws: &[LotDraw]) -> Result<(), InventoryError> {
        let draws: Vec<Draw> = draws.iter().map(LotDraw::to_draw).collect();
        self.ledger.reapply(&draws)
    }
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub barcode_unit: Option<Barcode>,
    #[serde(default)]
    pub barcode_pack: Option<Barcode>,
    #[serde(default = "default_pack_size")]
    pub pack_size: u32,
    pub price_per_unit: Decimal,
    pub price_per_pack: Decimal,
}

const fn default_pack_size() -> u32 {
    1
}

/// A [`NewProduct`] that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidProduct {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub barcode_unit: Option<Barcode>,
    pub barcode_pack: Option<Barcode>,
    pub pack_size: u32,
    pub price_per_unit: Price,
    pub price_per_pack: Price,
}

impl NewProduct {
    /// Check the catalog invariants.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name, a pack size of zero, or a
    /// negative price.
    pub fn validate(self) -> Result<ValidProduct, InventoryError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(InventoryError::Validation(
                "product name cannot be empty".to_string(),
            ));
        }
        if self.pack_size == 0 {
            return Err(InventoryError::Validation(
                "pack size must be at least 1".to_string(),
            ));
        }
        Ok(ValidProduct {
            name,
            description: self.description.filter(|d| !d.trim().is_empty()),
            category: self.category.filter(|c| !c.trim().is_empty()),
            barcode_unit: self.barcode_unit,
            barcode_pack: self.barcode_pack,
            pack_size: self.pack_size,
            price_per_unit: Price::new(self.price_per_unit)?,
            price_per_pack: Price::new(self.price_per_pack)?,
        })
    }
}

/// Catalog fields that may change after creation. Pack size and stock are
/// not editable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price_per_unit: Option<Decimal>,
    #[serde(default)]
    pub price_per_pack: Option<Decimal>,
}

impl ProductUpdate {
    /// Apply the update to `product` in place.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name or a negative price; `product`
    /// is unchanged in that case.
    pub fn apply(self, product: &mut Product) -> Result<(), InventoryError> {
        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(InventoryError::Validation(
                    "product name cannot be empty".to_string(),
                ));
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        let price_per_unit = self.price_per_unit.map(Price::new).transpose()?;
        let price_per_pack = self.price_per_pack.map(Price::new).transpose()?;

        if let Some(name) = name {
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = Some(description);
        }
        if let Some(category) = self.category {
            product.category = Some(category);
        }
        if let Some(price) = price_per_unit {
            product.price_per_unit = price;
        }
        if let Some(price) = price_per_pack {
            product.price_per_pack = price;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::ledger::NewLot;
    use crate::types::{LotNumber, LotStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn product() -> Product {
        let today = date(2024, 12, 1);
        let mut ledger = LotLedger::new();
        ledger
            .add_lot(
                NewLot::new(5, Decimal::new(1000, 2)).expiring(date(2025, 1, 10)),
                today,
            )
            .unwrap();
        ledger
            .add_lot(
                NewLot::new(5, Decimal::new(1200, 2)).expiring(date(2025, 2, 1)),
                today,
            )
            .unwrap();
        Product {
            id: ProductId::new(1),
            name: "Oat milk".to_string(),
            description: None,
            category: None,
            barcode_unit: None,
            barcode_pack: None,
            pack_size: 6,
            price_per_unit: Price::new(Decimal::new(250, 2)).unwrap(),
            price_per_pack: Price::new(Decimal::new(1350, 2)).unwrap(),
            ledger,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            retired_at: None,
        }
    }

    #[test]
    fn test_commit_sale_records_cost_and_expiry() {
        let mut p = product();
        let draws = p.commit_sale(7, None).unwrap();

        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].lot_number.as_str(), "LOT001");
        assert_eq!(draws[0].quantity_taken, 5);
        assert_eq!(draws[0].purchase_price.amount(), Decimal::new(1000, 2));
        assert_eq!(draws[0].expiration_date, Some(date(2025, 1, 10)));
        assert_eq!(draws[1].quantity_taken, 2);
        assert_eq!(p.ledger.total_available(), 3);
    }

    #[test]
    fn test_commit_sale_shortage_leaves_ledger_untouched() {
        let mut p = product();
        let before = p.ledger.clone();

        let err = p.commit_sale(13, None).unwrap_err();
        assert_eq!(err, InventoryError::InsufficientStock { shortage: 3 });
        assert_eq!(p.ledger, before);
        assert!(p.ledger.lots().iter().all(|l| l.status == LotStatus::Active));
    }

    #[test]
    fn test_commit_sale_rejects_non_positive() {
        let mut p = product();
        assert!(matches!(
            p.commit_sale(0, None),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_restore_sale_is_exact() {
        let mut p = product();
        let before = p.ledger.clone();
        let draws = p.commit_sale(7, None).unwrap();

        // Stock moves between the sale and the return
        p.ledger
            .add_lot(
                NewLot::new(10, Decimal::ONE).expiring(date(2024, 12, 20)),
                date(2024, 12, 2),
            )
            .unwrap();

        p.restore_sale(&draws).unwrap();
        assert_eq!(p.ledger.lots()[0], before.lots()[0]);
        assert_eq!(p.ledger.lots()[1], before.lots()[1]);
        assert_eq!(p.ledger.lots()[2].quantity, 10);
    }

    #[test]
    fn test_retired_product_sells_nothing_but_takes_returns() {
        let mut p = product();
        let draws = p.commit_sale(3, None).unwrap();
        p.retired_at = Some(Utc::now());

        assert!(matches!(
            p.commit_sale(1, None),
            Err(InventoryError::Conflict(_))
        ));
        p.restore_sale(&draws).unwrap();
        assert_eq!(p.ledger.total_available(), 10);
        assert_eq!(p.ledger.lots().len(), 2);
    }

    #[test]
    fn test_units_for_pack() {
        let p = product();
        assert_eq!(p.units_for(2, SaleUnit::Pack).unwrap(), 12);
        assert_eq!(p.units_for(2, SaleUnit::Unit).unwrap(), 2);
        assert!(matches!(
            p.units_for(i64::MAX / 2, SaleUnit::Pack),
            Err(InventoryError::Validation(_))
        ));
        assert_eq!(p.catalog_price(SaleUnit::Pack).to_string(), "13.50");
    }

    #[test]
    fn test_include_only_filter_draws_reserved_lots() {
        let mut p = product();
        let reserved = [LotNumber::parse("LOT002").unwrap()].into();
        let draws = p
            .commit_sale(3, Some(&LotFilter::IncludeOnly(reserved)))
            .unwrap();
        assert_eq!(draws[0].lot_number.as_str(), "LOT002");
    }

    #[test]
    fn test_new_product_validation() {
        let new = NewProduct {
            name: "  ".to_string(),
            description: None,
            category: None,
            barcode_unit: None,
            barcode_pack: None,
            pack_size: 1,
            price_per_unit: Decimal::ONE,
            price_per_pack: Decimal::ONE,
        };
        assert!(new.clone().validate().is_err());

        let zero_pack = NewProduct {
            name: "Tea".to_string(),
            pack_size: 0,
            ..new.clone()
        };
        assert!(zero_pack.validate().is_err());

        let ok = NewProduct {
            name: " Tea ".to_string(),
            ..new
        }
        .validate()
        .unwrap();
        assert_eq!(ok.name, "Tea");
    }

    #[test]
    fn test_update_is_all_or_nothing() {
        let mut p = product();
        let update = ProductUpdate {
            name: Some("Soy milk".to_string()),
            price_per_unit: Some(Decimal::NEGATIVE_ONE),
            ..ProductUpdate::default()
        };
        assert!(update.apply(&mut p).is_err());
        assert_eq!(p.name, "Oat milk");
    }
}
