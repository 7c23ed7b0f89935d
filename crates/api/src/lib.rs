// API crate clippy configuration
#![allow(clippy::needless_borrows_for_generic_args)] // Sometimes needed for clarity
#![allow(clippy::result_large_err)] // ApiError carries the maintenance notice and theme
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pointgate API Library
//!
//! Authentication, the metered generation gateway, the maintenance gate and
//! the HTTP routes of the Pointgate server.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod maintenance;
pub mod provider;
pub mod routes;
pub mod security;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
