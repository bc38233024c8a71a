// =============================================================================
// ORDER SERVICE
// =============================================================================
// Marketplace order processing with inventory consistency:
// - Product ledger: conditional stock reservation / release
// - Carts: per-user lines with live price and stock checks
// - Orders: all-or-nothing creation, forward-only lifecycle, cancellation
//   that restores stock
// - Flash sales: admin-managed windows evaluated against the clock on read
//
// The binary (main.rs) only loads config and picks the store; everything
// else lives here so the API tests can build the same router.
// =============================================================================

pub mod app;
pub mod auth;
pub mod cache;
pub mod cart;
pub mod config;
pub mod error;
pub mod flash_sales;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod orders;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use app::{build_router, AppState};
pub use error::{AppError, AppResult};
