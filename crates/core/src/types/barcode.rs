//! EAN-13 barcodes, including the shop-internal promotion range.

use core::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Barcode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    /// The input is not exactly 13 characters long.
    #[error("barcode must be 13 digits (got {0})")]
    WrongLength(usize),
    /// The input contains something other than ASCII digits.
    #[error("barcode must contain only digits")]
    NotNumeric,
    /// The last digit does not match the computed check digit.
    #[error("barcode check digit is {found}, expected {expected}")]
    BadCheckDigit {
        /// Check digit present in the input.
        found: u32,
        /// Check digit computed from the first 12 digits.
        expected: u32,
    },
}

/// Prefix reserved for in-store codes (GS1 range 20-29).
const INTERNAL_PREFIX: &str = "29";
/// Type digit marking a promotion code inside the internal range.
const PROMOTION_TYPE_DIGIT: char = '9';
/// Highest running sequence that fits the promotion layout.
pub const MAX_PROMOTION_SEQUENCE: u16 = 9999;

/// A validated EAN-13 barcode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Barcode(String);

impl Barcode {
    /// Parse and verify an EAN-13 code.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not 13 digits or the check digit is wrong.
    pub fn parse(s: &str) -> Result<Self, BarcodeError> {
        if s.len() != 13 {
            return Err(BarcodeError::WrongLength(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BarcodeError::NotNumeric);
        }
        let (body, check) = s.split_at(12);
        let expected = ean13_check_digit(body).ok_or(BarcodeError::NotNumeric)?;
        let found = check
            .chars()
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or(BarcodeError::NotNumeric)?;
        if found != expected {
            return Err(BarcodeError::BadCheckDigit { found, expected });
        }
        Ok(Self(s.to_string()))
    }

    /// Build the promotion barcode for `month` and running `sequence`.
    ///
    /// Layout: `29` + `9` + `YYMM` + 4-digit sequence + `0` + check digit.
    /// Sequences above [`MAX_PROMOTION_SEQUENCE`] are clamped.
    #[must_use]
    pub fn promotion(month: NaiveDate, sequence: u16) -> Self {
        let yy = month.year().rem_euclid(100);
        let mm = month.month();
        let seq = sequence.min(MAX_PROMOTION_SEQUENCE);
        let body = format!("{INTERNAL_PREFIX}{PROMOTION_TYPE_DIGIT}{yy:02}{mm:02}{seq:04}0");
        // body is 12 ASCII digits by construction
        let check = ean13_check_digit(&body).unwrap_or(0);
        Self(format!("{body}{check}"))
    }

    /// Borrow as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Barcode {
    type Error = BarcodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s.trim())
    }
}

impl From<Barcode> for String {
    fn from(barcode: Barcode) -> Self {
        barcode.0
    }
}

impl fmt::Display for Barcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// EAN-13 check digit for a 12-digit body (weights 1,3,1,3,...).
///
/// Returns `None` if `body` is not exactly 12 ASCII digits.
#[must_use]
pub fn ean13_check_digit(body: &str) -> Option<u32> {
    if body.len() != 12 {
        return None;
    }
    let mut sum = 0;
    for (index, c) in body.chars().enumerate() {
        let digit = c.to_digit(10)?;
        sum += if index % 2 == 0 { digit } else { digit * 3 };
    }
    Some((10 - sum % 10) % 10)
}
