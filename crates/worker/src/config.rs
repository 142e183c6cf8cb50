//! Worker configuration

use teamsub_billing::BillingConfig;

/// Midnight UTC, every day
pub const DEFAULT_CHECK_CRON: &str = "0 0 0 * * *";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Six-field cron expression for the daily billing check
    pub check_cron: String,
    pub slack_webhook_url: Option<String>,
    pub billing: BillingConfig,
}

impl WorkerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            check_cron: std::env::var("CHECK_CRON")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CHECK_CRON.to_string()),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            billing: BillingConfig::from_env()?,
        })
    }
}
