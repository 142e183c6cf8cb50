//! API server configuration

use std::net::SocketAddr;

use teamsub_billing::BillingConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Postgres URL; teams are kept in memory when unset
    pub database_url: Option<String>,
    /// Slack incoming webhook for billing notifications; log only when unset
    pub slack_webhook_url: Option<String>,
    pub billing: BillingConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address = std::env::var("BIND_ADDRESS")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid BIND_ADDRESS: {}", e))?;

        Ok(Self {
            bind_address,
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            billing: BillingConfig::from_env()?,
        })
    }
}
