//! Stockroom Core - domain model and lot allocation engine.
//!
//! This crate holds everything about stock that does not touch I/O:
//! - [`ledger`] - Lots of a product, their lifecycle, and aggregates
//! - [`allocation`] - FEFO allocation with include/exclude lot filters
//! - [`promotion`] - Promotions and the binder that keeps reserved lots apart
//! - [`cart`] - Cart lines and the availability guard
//! - [`order`] - Orders, settlement, and the lot draws that make returns exact
//! - [`purchasing`] - Suppliers, purchase orders, and receiving
//!
//! # Architecture
//!
//! Persistence and concurrency control live in `stockroom-admin`. Every
//! operation here works on an owned value, so callers can run it against a
//! copy and only save the result when it succeeds.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod allocation;
pub mod cart;
pub mod error;
pub mod ledger;
pub mod order;
pub mod product;
pub mod promotion;
pub mod purchasing;
pub mod types;

pub use allocation::{Allocation, Draw, LotFilter};
pub use error::InventoryError;
pub use ledger::{Disposal, Lot, LotLedger, NewLot, StockSummary};
pub use product::{NewProduct, Product, ProductUpdate, ValidProduct};
pub use types::*;
