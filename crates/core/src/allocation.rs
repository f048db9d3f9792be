//! FEFO lot allocation.
//!
//! Given a requested quantity in base units and an optional lot filter,
//! [`allocate`] decides which lots to draw from and how much from each:
//!
//! 1. Keep `active` lots with `quantity > 0` that pass the filter.
//! 2. Sort first-expired-first-out: earliest expiration date first, lots
//!    without an expiration date after every dated lot, ties broken by the
//!    earliest received date (then ledger order).
//! 3. Walk the sorted lots taking `min(lot.quantity, remaining)` from each.
//!    A lot that reaches exactly zero becomes `depleted` on the spot.
//!
//! The walk mutates the lots as it goes. A short allocation leaves its partial
//! draws applied; callers that need all-or-nothing semantics hand the returned
//! draws back to [`LotLedger::restore`](crate::LotLedger::restore).

use core::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ledger::Lot;
use crate::types::{LotNumber, LotStatus};

/// Restricts which lots an allocation may draw from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "lots")]
pub enum LotFilter {
    /// Only these lots (fulfilling a promotion from its reserved lots).
    IncludeOnly(BTreeSet<LotNumber>),
    /// Every lot except these (regular-price sales skip promotion-reserved lots).
    Exclude(BTreeSet<LotNumber>),
}

impl LotFilter {
    /// Whether a lot with this number may be drawn from.
    #[must_use]
    pub fn admits(&self, lot_number: &LotNumber) -> bool {
        match self {
            Self::IncludeOnly(lots) => lots.contains(lot_number),
            Self::Exclude(lots) => !lots.contains(lot_number),
        }
    }
}

/// One `(lot, quantity)` pair taken by an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    /// Lot the units were taken from.
    pub lot_number: LotNumber,
    /// Units taken.
    pub quantity_taken: i64,
}

impl Draw {
    /// Create a draw record.
    #[must_use]
    pub const fn new(lot_number: LotNumber, quantity_taken: i64) -> Self {
        Self {
            lot_number,
            quantity_taken,
        }
    }
}

/// Outcome of [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// `true` when the full requested quantity was drawn.
    pub fulfilled: bool,
    /// Draws applied to the ledger, in FEFO order.
    pub draws: Vec<Draw>,
    /// Units that could not be supplied (0 when fulfilled).
    pub shortage: i64,
}

impl Allocation {
    /// Total units drawn.
    #[must_use]
    pub fn drawn(&self) -> i64 {
        self.draws.iter().map(|d| d.quantity_taken).sum()
    }
}

/// Whether a lot can be drawn from at all under `filter`.
pub(crate) fn is_allocatable(lot: &Lot, filter: Option<&LotFilter>) -> bool {
    lot.status == LotStatus::Active
        && lot.quantity > 0
        && filter.is_none_or(|f| f.admits(&lot.lot_number))
}

/// FEFO ordering between two lots.
///
/// Dated lots come before undated ones; within each group the earlier
/// expiration (for dated lots) and then the earlier received date wins.
#[must_use]
pub fn fefo_order(a: &Lot, b: &Lot) -> Ordering {
    let key = |lot: &Lot| {
        (
            lot.expiration_date.is_none(),
            lot.expiration_date,
            lot.received_date,
        )
    };
    key(a).cmp(&key(b))
}

/// Allocate `required` units from `lots` in FEFO order.
///
/// A non-positive `required` is trivially fulfilled with no draws.
pub fn allocate(lots: &mut [Lot], required: i64, filter: Option<&LotFilter>) -> Allocation {
    let mut order: Vec<usize> = lots
        .iter()
        .enumerate()
        .filter(|(_, lot)| is_allocatable(lot, filter))
        .map(|(index, _)| index)
        .collect();
    // sort_by is stable, so equal keys keep ledger (insertion) order
    order.sort_by(|&a, &b| match (lots.get(a), lots.get(b)) {
        (Some(a), Some(b)) => fefo_order(a, b),
        _ => Ordering::Equal,
    });

    let mut remaining = required.max(0);
    let mut draws = Vec::new();

    for index in order {
        if remaining == 0 {
            break;
        }
        let Some(lot) = lots.get_mut(index) else {
            continue;
        };
        let take = lot.quantity.min(remaining);
        lot.quantity -= take;
        remaining -= take;
        if lot.quantity == 0 {
            lot.status = LotStatus::Depleted;
        }
        draws.push(Draw::new(lot.lot_number.clone(), take));
    }

    Allocation {
        fulfilled: remaining == 0,
        draws,
        shortage: remaining,
    }
}
