//! Delivery of billing events to the team
//!
//! The state machine only decides what to say. A [`Notifier`] decides how it
//! reaches the team: a log line, or a message posted to a Slack incoming
//! webhook.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::account::Team;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::BillingEvent;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, team: &Team, text: &str) -> BillingResult<()>;
}

/// Deliver every event, logging failures instead of returning them
pub async fn deliver(
    notifier: &dyn Notifier,
    team: &Team,
    events: &[BillingEvent],
    config: &BillingConfig,
) {
    for event in events {
        let text = event.text(team, config);
        if let Err(e) = notifier.notify(team, &text).await {
            tracing::error!(
                team_id = %team.team_id,
                event = %event,
                error = %e,
                "Failed to deliver billing notification"
            );
        }
    }
}

/// Slack webhook when configured, otherwise log only
pub fn notifier_for(slack_webhook_url: Option<&str>) -> Arc<dyn Notifier> {
    match slack_webhook_url {
        Some(url) => Arc::new(SlackWebhookNotifier::new(url)),
        None => Arc::new(LogNotifier),
    }
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, team: &Team, text: &str) -> BillingResult<()> {
        tracing::info!(team_id = %team.team_id, text = %text, "Billing notification");
        Ok(())
    }
}

/// Posts `{"text": ...}` to a Slack incoming webhook, retrying with backoff
#[derive(Debug, Clone)]
pub struct SlackWebhookNotifier {
    http: reqwest::Client,
    webhook_url: String,
    max_retries: usize,
    base_delay_ms: u64,
}

impl SlackWebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
            max_retries: 3,
            base_delay_ms: 200,
        }
    }

    pub fn with_retries(mut self, max_retries: usize, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms;
        self
    }

    async fn post(&self, body: &serde_json::Value) -> Result<(), reqwest::Error> {
        self.http
            .post(&self.webhook_url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackWebhookNotifier {
    async fn notify(&self, team: &Team, text: &str) -> BillingResult<()> {
        let body = serde_json::json!({ "text": text });
        let strategy = ExponentialBackoff::from_millis(self.base_delay_ms)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        Retry::start(strategy, || self.post(&body))
            .await
            .map_err(|e| {
                BillingError::Internal(format!("Slack webhook delivery failed: {}", e))
            })?;

        tracing::debug!(team_id = %team.team_id, "Posted billing notification to Slack");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every message it is asked to send
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// `(team_id, text)` pairs in delivery order
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent().into_iter().map(|(_, text)| text).collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, team: &Team, text: &str) -> BillingResult<()> {
            self.sent
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push((team.team_id.clone(), text.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingNotifier;
    use super::*;
    use time::macros::datetime;

    fn team() -> Team {
        Team::new("T1", datetime!(2024-03-01 12:00 UTC))
    }

    #[tokio::test]
    async fn test_slack_webhook_posts_text() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "text": "Your team has been subscribed."
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let notifier = SlackWebhookNotifier::new(format!("{}/hook", server.url()));
        notifier
            .notify(&team(), "Your team has been subscribed.")
            .await
            .unwrap();

        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_slack_webhook_retries_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let notifier =
            SlackWebhookNotifier::new(format!("{}/hook", server.url())).with_retries(2, 1);
        let err = notifier.notify(&team(), "hello").await.unwrap_err();

        assert!(matches!(err, BillingError::Internal(_)));
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_deliver_renders_each_event() {
        let notifier = RecordingNotifier::new();
        let config = BillingConfig::default().with_root_url("https://bot.example.com");

        deliver(
            &notifier,
            &team(),
            &[BillingEvent::Subscribed, BillingEvent::SubscriptionPastDue],
            &config,
        )
        .await;

        assert_eq!(
            notifier.sent(),
            vec![
                ("T1".to_string(), "Your team has been subscribed.".to_string()),
                (
                    "T1".to_string(),
                    "Your subscription is past due. Update your credit card info at https://bot.example.com/subscribe?team_id=T1.".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify(&team(), "hello").await.is_ok());
    }
}
