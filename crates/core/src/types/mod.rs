//! Core types for Stockroom.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod barcode;
pub mod id;
pub mod lot_number;
pub mod price;
pub mod status;

pub use barcode::{Barcode, BarcodeError};
pub use id::*;
pub use lot_number::LotNumber;
pub use price::{Price, sum_amounts};
pub use status::*;
