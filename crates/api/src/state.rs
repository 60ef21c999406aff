//! Application state

use std::sync::Arc;

use ganache_payments::PaymentsService;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub payments: Arc<PaymentsService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let payments = Arc::new(PaymentsService::from_env(pool.clone())?);
        tracing::info!("Payments service initialized");

        Ok(Self {
            pool,
            config,
            payments,
        })
    }
}
