//! Subscription state machine
//!
//! Pure transition rules over a [`Team`] and, where needed, the provider
//! customer fetched by the caller. Every operation takes the prior record and
//! returns a [`Transition`] holding the next record and the events raised.
//! Nothing here talks to Stripe or the database; `SubscriptionService` does
//! the fetching and persisting around these rules.
//!
//! ## Guards
//!
//! Re-running a check is always safe:
//!
//! - trial notices are sent at most once per 7 days (`trial_informed_at`)
//! - past due notices at most once per 3 days (`subscription_past_due_informed_at`)
//! - expiry is recorded once (`subscription_expired_at`)
//!
//! The guards read the record passed in, so callers must hand over the
//! freshly persisted value on every attempt.

use time::{Duration, OffsetDateTime};

use crate::account::Team;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::BillingEvent;
use crate::gateway::{ProviderCustomer, ProviderSubscription, SubscriptionStatus};

/// Minimum time between two trial expiring notices
pub const TRIAL_NOTICE_INTERVAL: Duration = Duration::days(7);

/// Minimum time between two past due notices
pub const PAST_DUE_NOTICE_INTERVAL: Duration = Duration::days(3);

/// Trial notices start once this many days or fewer remain
pub const TRIAL_NOTICE_DAYS: i64 = 3;

/// A subscribe claim older than this is treated as abandoned
pub const SUBSCRIBE_CLAIM_TIMEOUT: Duration = Duration::minutes(10);

/// Next record plus the events raised getting there
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub team: Team,
    pub events: Vec<BillingEvent>,
}

impl Transition {
    /// No change, no events
    pub fn unchanged(team: &Team) -> Self {
        Self {
            team: team.clone(),
            events: Vec::new(),
        }
    }

    pub fn is_changed(&self, prior: &Team) -> bool {
        self.team != *prior
    }

    fn and_then(mut self, step: impl FnOnce(&Team) -> Transition) -> Self {
        let next = step(&self.team);
        self.team = next.team;
        self.events.extend(next.events);
        self
    }
}

/// The active subscription that renews at period end, if any
pub fn active_subscription<'a>(
    team: &Team,
    customer: Option<&'a ProviderCustomer>,
) -> Option<&'a ProviderSubscription> {
    if !team.subscribed {
        return None;
    }
    customer?.subscriptions.iter().find(|s| s.is_renewing())
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    config: BillingConfig,
}

impl StateMachine {
    pub fn new(config: BillingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    /// Checks that must pass before a customer is created with the provider
    pub fn ensure_can_subscribe(&self, team: &Team) -> BillingResult<()> {
        if team.subscribed {
            return Err(BillingError::AlreadySubscribed);
        }
        if team.stripe_customer_id.is_some() {
            return Err(BillingError::CustomerExists);
        }
        Ok(())
    }

    /// Claim the team before the provider is asked to create a customer.
    /// A second claim fails until the first one is recorded, aborted or
    /// times out.
    pub fn begin_subscribe(&self, team: &Team, now: OffsetDateTime) -> BillingResult<Transition> {
        self.ensure_can_subscribe(team)?;
        if let Some(started_at) = team.subscribe_started_at {
            if now < started_at + SUBSCRIBE_CLAIM_TIMEOUT {
                return Err(BillingError::SubscriptionInProgress);
            }
            tracing::warn!(
                team_id = %team.team_id,
                started_at = %started_at,
                "Taking over an abandoned subscribe claim"
            );
        }

        let mut next = team.clone();
        next.subscribe_started_at = Some(now);
        Ok(Transition {
            team: next,
            events: Vec::new(),
        })
    }

    /// Release the claim after the provider call failed
    pub fn abort_subscribe(&self, team: &Team) -> Transition {
        let mut next = team.clone();
        next.subscribe_started_at = None;
        Transition {
            team: next,
            events: Vec::new(),
        }
    }

    /// Record a customer the provider just created for this team
    pub fn subscribe(
        &self,
        team: &Team,
        customer: &ProviderCustomer,
        now: OffsetDateTime,
    ) -> BillingResult<Transition> {
        self.ensure_can_subscribe(team)?;

        let mut next = team.clone();
        next.subscribed = true;
        next.stripe_customer_id = Some(customer.id.clone());
        next.subscription_past_due_at = None;
        next.subscription_past_due_informed_at = None;
        next.subscribe_started_at = None;
        Ok(settle(team, next, Vec::new(), now))
    }

    /// Checks for `update_payment_source` and `unsubscribe`; returns the
    /// subscription those operations act on.
    pub fn ensure_active_subscription<'a>(
        &self,
        team: &Team,
        customer: Option<&'a ProviderCustomer>,
    ) -> BillingResult<&'a ProviderSubscription> {
        if !team.subscribed {
            return Err(BillingError::NotSubscribed);
        }
        active_subscription(team, customer).ok_or(BillingError::MissingStripeCustomer)
    }

    /// Record a cancellation at period end that the provider has accepted
    pub fn unsubscribe(&self, team: &Team, now: OffsetDateTime) -> BillingResult<Transition> {
        if !team.subscribed {
            return Err(BillingError::NotSubscribed);
        }

        let mut next = team.clone();
        next.subscribed = false;
        next.stripe_customer_id = None;
        Ok(settle(team, next, vec![BillingEvent::Unsubscribed], now))
    }

    pub fn check_trial(&self, team: &Team, now: OffsetDateTime) -> BillingResult<Transition> {
        let remaining = team.remaining_trial_days(&self.config, now)?;
        if remaining > TRIAL_NOTICE_DAYS {
            return Ok(Transition::unchanged(team));
        }
        self.trial_expiring(team, now)
    }

    pub fn trial_expiring(&self, team: &Team, now: OffsetDateTime) -> BillingResult<Transition> {
        if team.subscribed || team.is_subscription_expired(&self.config, now) {
            return Ok(Transition::unchanged(team));
        }
        if let Some(informed_at) = team.trial_informed_at {
            if now < informed_at + TRIAL_NOTICE_INTERVAL {
                tracing::debug!(
                    team_id = %team.team_id,
                    informed_at = %informed_at,
                    "Trial notice already sent recently"
                );
                return Ok(Transition::unchanged(team));
            }
        }

        let remaining_days = team.remaining_trial_days(&self.config, now)?;
        let mut next = team.clone();
        next.trial_informed_at = Some(now);
        Ok(settle(
            team,
            next,
            vec![BillingEvent::TrialExpiring { remaining_days }],
            now,
        ))
    }

    pub fn check_subscription(
        &self,
        team: &Team,
        customer: Option<&ProviderCustomer>,
        now: OffsetDateTime,
    ) -> BillingResult<Transition> {
        if !team.subscribed {
            return Err(BillingError::NotSubscribed);
        }
        let customer = customer.ok_or(BillingError::MissingStripeCustomer)?;

        if customer.subscriptions.is_empty() {
            return Ok(self.subscription_expired(team, now));
        }

        let mut transition = Transition::unchanged(team);
        for subscription in &customer.subscriptions {
            transition = match subscription.status {
                SubscriptionStatus::PastDue => {
                    transition.and_then(|t| self.subscription_past_due(t, now))
                }
                SubscriptionStatus::Canceled | SubscriptionStatus::Unpaid => {
                    transition.and_then(|t| self.subscription_expired(t, now))
                }
                _ => transition,
            };
        }
        Ok(transition)
    }

    pub fn subscription_past_due(&self, team: &Team, now: OffsetDateTime) -> Transition {
        if !team.subscribed {
            return Transition::unchanged(team);
        }
        if team.subscription_past_due_at.is_some() {
            if let Some(informed_at) = team.subscription_past_due_informed_at {
                if now < informed_at + PAST_DUE_NOTICE_INTERVAL {
                    tracing::debug!(
                        team_id = %team.team_id,
                        informed_at = %informed_at,
                        "Past due notice already sent recently"
                    );
                    return Transition::unchanged(team);
                }
            }
        }

        let mut next = team.clone();
        next.subscription_past_due_at = Some(team.subscription_past_due_at.unwrap_or(now));
        next.subscription_past_due_informed_at = Some(now);
        settle(team, next, vec![BillingEvent::SubscriptionPastDue], now)
    }

    pub fn subscription_expired(&self, team: &Team, now: OffsetDateTime) -> Transition {
        if team.subscription_expired_at.is_some() {
            return Transition::unchanged(team);
        }

        let mut next = team.clone();
        next.subscribed = false;
        next.subscription_expired_at = Some(now);
        settle(team, next, vec![BillingEvent::SubscriptionExpired], now)
    }

    /// Daily and startup entry point.
    ///
    /// Subscribed teams are checked against the provider only while they hold
    /// an active, renewing subscription; a subscription already set to cancel
    /// at period end is left alone until it lapses.
    pub fn check_stripe_state(
        &self,
        team: &Team,
        customer: Option<&ProviderCustomer>,
        now: OffsetDateTime,
    ) -> BillingResult<Transition> {
        if team.subscribed {
            if active_subscription(team, customer).is_some() {
                return self.check_subscription(team, customer, now);
            }
            tracing::debug!(
                team_id = %team.team_id,
                "No renewing subscription, skipping check"
            );
            return Ok(Transition::unchanged(team));
        }
        self.check_trial(team, now)
    }
}

/// Apply the rules tied to the `subscribed` flag changing between `prior`
/// and `next`.
fn settle(
    prior: &Team,
    mut next: Team,
    mut events: Vec<BillingEvent>,
    now: OffsetDateTime,
) -> Transition {
    match (prior.subscribed, next.subscribed) {
        (false, true) => {
            next.mark_subscribed(now);
            events.push(BillingEvent::Subscribed);
        }
        (true, false) => {
            next.subscribed_at = None;
        }
        _ => {}
    }
    Transition { team: next, events }
}
