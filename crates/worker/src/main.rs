//! Ganache Background Worker
//!
//! Runs the scheduled reminder sweeps:
//! - Deposit reminder sweep (hourly)
//! - Event-approach sweep (daily at 8:00, business timezone)
//! - Health check heartbeat (every 5 minutes)
//!
//! The scheduler shuts down cleanly on ctrl-c so in-flight jobs are not
//! orphaned by deploys.

use std::time::Duration;

use ganache_payments::email::EmailService;
use ganache_payments::reminders::{business_timezone_from_env, ReminderService};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Ganache Worker");

    let pool = create_db_pool().await?;

    let email = EmailService::from_env()?;
    if !email.is_enabled() {
        tracing::warn!("Mail API key not configured - reminders will be evaluated but not sent");
    }

    let business_tz = business_timezone_from_env()?;
    info!(timezone = %business_tz, "Business timezone loaded");

    let reminders = ReminderService::new(pool.clone(), email, business_tz);

    let mut scheduler = JobScheduler::new().await?;

    // Job 1: Deposit reminder sweep (hourly)
    // Clients whose signed proposal has waited past the grace period.
    let deposit_service = reminders.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let service = deposit_service.clone();
            Box::pin(async move {
                info!("Running scheduled deposit reminder sweep");
                if let Err(e) = service.run_deposit_sweep().await {
                    error!(error = %e, "Deposit reminder sweep failed");
                }
            })
        })?)
        .await?;
    info!("Scheduled: Deposit reminder sweep (hourly)");

    // Job 2: Event-approach sweep (daily at 8:00 business time)
    // One-month and two-week reminders keyed to days until the event.
    let event_service = reminders.clone();
    scheduler
        .add(Job::new_async_tz(
            "0 0 8 * * *",
            business_tz,
            move |_uuid, _l| {
                let service = event_service.clone();
                Box::pin(async move {
                    info!("Running scheduled event-approach sweep");
                    if let Err(e) = service.run_event_sweep().await {
                        error!(error = %e, "Event-approach sweep failed");
                    }
                })
            },
        )?)
        .await?;
    info!("Scheduled: Event-approach sweep (daily at 8:00 business time)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Ganache Worker started successfully with 3 scheduled jobs");

    // Run until interrupted, then stop the scheduler cleanly.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler");
    scheduler.shutdown().await?;
    info!("Scheduler stopped");

    Ok(())
}
