//! Shared infrastructure for the Ganache services.
//!
//! Database pool construction, the migrations runner, and the money
//! formatting helper used by both the API server and the worker.

pub mod db;
pub mod money;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use money::format_usd;
