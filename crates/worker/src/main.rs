// Worker clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Teamsub Background Worker
//!
//! Handles scheduled jobs including:
//! - Startup billing check for every team (once, on boot)
//! - Daily billing check: trial notices, past due and lapsed subscriptions

mod config;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use teamsub_billing::{
    check_all, log_check_results, notifier_for, on_team_started, CheckOutcome, Notifier,
    PgTeamStore, StripeClient, SubscriptionService, TeamStore,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::WorkerConfig;

/// Create a database connection pool
async fn create_db_pool(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Run the start hook for every known team
async fn startup_pass(service: &SubscriptionService, notifier: &dyn Notifier) -> Vec<CheckOutcome> {
    let teams = match service.store().list().await {
        Ok(teams) => teams,
        Err(e) => {
            error!(error = %e, "Failed to list teams for startup check");
            return Vec::new();
        }
    };

    let mut outcomes = Vec::with_capacity(teams.len());
    for team in &teams {
        outcomes.push(on_team_started(service, notifier, team).await);
    }
    outcomes
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Teamsub Worker");

    let config = WorkerConfig::from_env()?;

    let pool = create_db_pool(&config.database_url).await?;
    let store = PgTeamStore::new(pool);
    store.migrate().await?;
    let store: Arc<dyn TeamStore> = Arc::new(store);

    let gateway = Arc::new(StripeClient::new(config.billing.clone()));
    let service = Arc::new(SubscriptionService::new(
        store,
        gateway,
        config.billing.clone(),
    ));
    let notifier = notifier_for(config.slack_webhook_url.as_deref());

    info!("Running startup billing check");
    let outcomes = startup_pass(&service, notifier.as_ref()).await;
    log_check_results(&outcomes);

    let scheduler = JobScheduler::new().await?;

    let daily_service = service.clone();
    let daily_notifier = notifier.clone();
    scheduler
        .add(Job::new_async(config.check_cron.as_str(), move |_uuid, _l| {
            let service = daily_service.clone();
            let notifier = daily_notifier.clone();
            Box::pin(async move {
                info!("Running daily billing check");
                let outcomes = check_all(&service, notifier.as_ref()).await;
                log_check_results(&outcomes);
            })
        })?)
        .await?;
    info!(cron = %config.check_cron, "Scheduled: Daily billing check");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Teamsub Worker started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
