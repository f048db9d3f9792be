//! Stockroom back office library.
//!
//! Persistence, services and configuration around the `stockroom-core`
//! domain model, shared by the sweep worker and the CLI.
//!
//! # Layout
//!
//! - [`db`] - Store traits with `PostgreSQL` and in-memory implementations
//! - [`services`] - Inventory, sales, promotions, cart, orders, purchasing, sweeps
//! - [`config`] - Environment configuration
//! - [`error`] - Application error type

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod services;
