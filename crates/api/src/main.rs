//! Teamsub API Server

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use teamsub_api::{create_router, AppState, Config};
use teamsub_billing::{notifier_for, InMemoryTeamStore, PgTeamStore, StripeClient, TeamStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn create_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn TeamStore>> {
    let Some(database_url) = database_url else {
        tracing::warn!("DATABASE_URL not set, keeping teams in memory");
        return Ok(Arc::new(InMemoryTeamStore::new()));
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    tracing::info!("Database connection established");

    let store = PgTeamStore::new(pool);
    store.migrate().await?;
    tracing::info!("Migrations applied");

    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,teamsub_api=debug,teamsub_billing=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Teamsub API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(
        trial_days = config.billing.trial_duration.whole_days(),
        plan_configured = config.billing.subscription_plan_id.is_some(),
        "Configuration loaded"
    );

    let store = create_store(config.database_url.as_deref()).await?;
    let gateway = Arc::new(StripeClient::new(config.billing.clone()));
    let notifier = notifier_for(config.slack_webhook_url.as_deref());

    let state = AppState::new(store, gateway, notifier, config.billing.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    tracing::info!(address = %config.bind_address, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
