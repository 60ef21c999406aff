// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Ganache API Library
//!
//! This crate contains the HTTP server components for Ganache: the payment
//! processor webhook, the offline claim/verify endpoints, and the admin
//! trigger endpoints for the reminder sweeps.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
