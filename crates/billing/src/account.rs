//! Team account record
//!
//! One row per team. Holds the subscription flag and the timestamps the
//! state machine uses for its notification windows. Trial queries are only
//! defined for teams that are not subscribed.

use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Team {
    pub id: Uuid,
    /// External workspace id, stable across renames
    pub team_id: String,
    pub name: Option<String>,
    pub domain: Option<String>,
    /// The only user allowed to manage billing
    pub activated_user_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub subscribed: bool,
    pub subscribed_at: Option<OffsetDateTime>,
    pub stripe_customer_id: Option<String>,
    pub subscription_expired_at: Option<OffsetDateTime>,
    pub subscription_past_due_at: Option<OffsetDateTime>,
    pub subscription_past_due_informed_at: Option<OffsetDateTime>,
    pub trial_informed_at: Option<OffsetDateTime>,
    /// Set while a `subscribe` call is creating the Stripe customer
    pub subscribe_started_at: Option<OffsetDateTime>,
    /// Optimistic lock, bumped on every successful update
    pub version: i64,
}

/// Coarse billing state derived from the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingState {
    Trial,
    TrialExpired,
    Active,
    PastDue,
    Lapsed,
}

impl BillingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingState::Trial => "trial",
            BillingState::TrialExpired => "trial_expired",
            BillingState::Active => "active",
            BillingState::PastDue => "past_due",
            BillingState::Lapsed => "lapsed",
        }
    }
}

impl std::fmt::Display for BillingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Team {
    pub fn new(team_id: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id: team_id.into(),
            name: None,
            domain: None,
            activated_user_id: None,
            created_at,
            subscribed: false,
            subscribed_at: None,
            stripe_customer_id: None,
            subscription_expired_at: None,
            subscription_past_due_at: None,
            subscription_past_due_informed_at: None,
            trial_informed_at: None,
            subscribe_started_at: None,
            version: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_activated_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.activated_user_id = Some(user_id.into());
        self
    }

    /// End of the free trial. Fails for subscribed teams.
    pub fn trial_ends_at(&self, config: &BillingConfig) -> BillingResult<OffsetDateTime> {
        if self.subscribed {
            return Err(BillingError::AlreadySubscribed);
        }
        self.created_at
            .checked_add(config.trial_duration)
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "trial end out of range for team {}",
                    self.team_id
                ))
            })
    }

    /// Whole calendar days (UTC) left in the trial, never negative
    pub fn remaining_trial_days(
        &self,
        config: &BillingConfig,
        now: OffsetDateTime,
    ) -> BillingResult<i64> {
        let ends = self.trial_ends_at(config)?.to_offset(UtcOffset::UTC).date();
        let today = now.to_offset(UtcOffset::UTC).date();
        Ok((ends - today).whole_days().max(0))
    }

    pub fn trial_expired(&self, config: &BillingConfig, now: OffsetDateTime) -> BillingResult<bool> {
        Ok(self.remaining_trial_days(config, now)? <= 0)
    }

    /// True for unsubscribed teams whose paid subscription lapsed or whose
    /// trial window has fully elapsed.
    pub fn is_subscription_expired(&self, config: &BillingConfig, now: OffsetDateTime) -> bool {
        if self.subscribed {
            return false;
        }
        if self.subscription_expired_at.is_some() {
            return true;
        }
        now - self.created_at > config.trial_duration
    }

    pub fn billing_state(&self, config: &BillingConfig, now: OffsetDateTime) -> BillingState {
        match (self.subscribed, self.subscription_past_due_at.is_some()) {
            (true, true) => BillingState::PastDue,
            (true, false) => BillingState::Active,
            (false, _) if self.subscription_expired_at.is_some() => BillingState::Lapsed,
            (false, _) if self.is_subscription_expired(config, now) => BillingState::TrialExpired,
            (false, _) => BillingState::Trial,
        }
    }

    /// Mailing list tags
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags = vec![if self.subscribed { "subscribed" } else { "trial" }];
        if self.stripe_customer_id.is_some() {
            tags.push("paid");
        }
        tags
    }

    /// Flip to subscribed, stamping `subscribed_at` and clearing any recorded expiry
    pub fn mark_subscribed(&mut self, now: OffsetDateTime) {
        self.subscribed = true;
        self.subscribed_at = Some(now);
        self.subscription_expired_at = None;
    }
}
