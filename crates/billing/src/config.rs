//! Billing configuration
//!
//! Passed explicitly to the state machine and the Stripe client. Built from
//! the environment by the binaries, or programmatically in tests.

use time::Duration;

use crate::error::{BillingError, BillingResult};

/// Default trial length for new teams
pub const DEFAULT_TRIAL_DAYS: i64 = 14;

/// Upper bound for `TRIAL_DURATION_DAYS`
pub const MAX_TRIAL_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Stripe secret key
    pub stripe_api_key: String,
    /// Stripe publishable key, handed to the payment page
    pub stripe_api_publishable_key: Option<String>,
    /// Plan used when `subscribe` is not given one
    pub subscription_plan_id: Option<String>,
    /// Plan amount in cents, for display on the payment page
    pub subscription_plan_amount: Option<i64>,
    /// Length of the free trial measured from team creation
    pub trial_duration: Duration,
    /// Base URL used to build subscribe / update card links
    pub root_url: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_api_publishable_key: None,
            subscription_plan_id: None,
            subscription_plan_amount: None,
            trial_duration: Duration::days(DEFAULT_TRIAL_DAYS),
            root_url: String::new(),
        }
    }
}

impl BillingConfig {
    /// Load configuration from environment variables
    ///
    /// - `STRIPE_API_KEY` (required)
    /// - `STRIPE_API_PUBLISHABLE_KEY`
    /// - `STRIPE_SUBSCRIPTION_PLAN_ID`
    /// - `STRIPE_SUBSCRIPTION_PLAN_AMOUNT` (cents)
    /// - `TRIAL_DURATION_DAYS` (default 14)
    /// - `URL`
    pub fn from_env() -> BillingResult<Self> {
        let stripe_api_key = std::env::var("STRIPE_API_KEY")
            .map_err(|_| BillingError::Config("STRIPE_API_KEY not set".to_string()))?;

        let subscription_plan_amount = match non_empty_var("STRIPE_SUBSCRIPTION_PLAN_AMOUNT") {
            Some(raw) => Some(raw.parse::<i64>().map_err(|e| {
                BillingError::Config(format!("Invalid STRIPE_SUBSCRIPTION_PLAN_AMOUNT: {}", e))
            })?),
            None => None,
        };

        let trial_days = match non_empty_var("TRIAL_DURATION_DAYS") {
            Some(raw) => raw.parse::<i64>().map_err(|e| {
                BillingError::Config(format!("Invalid TRIAL_DURATION_DAYS: {}", e))
            })?,
            None => DEFAULT_TRIAL_DAYS,
        };

        if !(0..=MAX_TRIAL_DAYS).contains(&trial_days) {
            return Err(BillingError::Config(format!(
                "TRIAL_DURATION_DAYS must be between 0 and {}",
                MAX_TRIAL_DAYS
            )));
        }

        Ok(Self {
            stripe_api_key,
            stripe_api_publishable_key: non_empty_var("STRIPE_API_PUBLISHABLE_KEY"),
            subscription_plan_id: non_empty_var("STRIPE_SUBSCRIPTION_PLAN_ID"),
            subscription_plan_amount,
            trial_duration: Duration::days(trial_days),
            root_url: std::env::var("URL").unwrap_or_default(),
        })
    }

    pub fn with_trial_duration(mut self, trial_duration: Duration) -> Self {
        self.trial_duration = trial_duration;
        self
    }

    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.subscription_plan_id = Some(plan_id.into());
        self
    }

    /// Link where a team can subscribe or update its card
    pub fn subscribe_url(&self, team_id: &str) -> String {
        format!(
            "{}/subscribe?team_id={}",
            self.root_url.trim_end_matches('/'),
            team_id
        )
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
