//! Subscription management
//!
//! Runs the state machine against persisted teams: loads the latest record,
//! fetches the provider customer when a rule needs it, applies the rule and
//! writes the result with a version check. Events are returned to the caller
//! for delivery.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::account::Team;
use crate::client::customer_metadata;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::BillingEvent;
use crate::gateway::{CreateCustomerParams, ProviderCustomer, ProviderGateway, ProviderSubscription};
use crate::machine::{StateMachine, Transition};
use crate::render;
use crate::store::TeamStore;

/// Attempts per operation when another writer races us
const MAX_ATTEMPTS: usize = 3;

/// Parameters for `subscribe`
#[derive(Debug, Clone, Default)]
pub struct SubscribeParams {
    pub stripe_token: String,
    pub stripe_email: Option<String>,
    /// Falls back to the configured plan
    pub subscription_plan_id: Option<String>,
}

/// The stored team after an operation, the events it raised, and the
/// operation's own result.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub team: Team,
    pub events: Vec<BillingEvent>,
    pub value: T,
}

impl Applied<()> {
    fn from_transition(transition: Transition) -> Self {
        Self {
            team: transition.team,
            events: transition.events,
            value: (),
        }
    }
}

pub struct SubscriptionService {
    store: Arc<dyn TeamStore>,
    gateway: Arc<dyn ProviderGateway>,
    machine: StateMachine,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn TeamStore>,
        gateway: Arc<dyn ProviderGateway>,
        config: BillingConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            machine: StateMachine::new(config),
        }
    }

    pub fn config(&self) -> &BillingConfig {
        self.machine.config()
    }

    pub fn store(&self) -> &Arc<dyn TeamStore> {
        &self.store
    }

    /// The provider customer for the team, when one is registered
    pub async fn fetch_customer(&self, team: &Team) -> BillingResult<Option<ProviderCustomer>> {
        match &team.stripe_customer_id {
            Some(customer_id) => Ok(Some(self.gateway.retrieve_customer(customer_id).await?)),
            None => Ok(None),
        }
    }

    /// The team's active, renewing subscription
    pub async fn active_subscription(
        &self,
        team: &Team,
    ) -> BillingResult<Option<ProviderSubscription>> {
        if !team.subscribed {
            return Ok(None);
        }
        let customer = self.fetch_customer(team).await?;
        Ok(crate::machine::active_subscription(team, customer.as_ref()).cloned())
    }

    /// Apply `rule` to the stored team, retrying on concurrent writes.
    ///
    /// The rule always sees the latest persisted record, so its guards hold
    /// when the same check runs twice in a row or from two places at once.
    async fn apply<F>(&self, team: &Team, rule: F) -> BillingResult<Transition>
    where
        F: Fn(&Team) -> BillingResult<Transition> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            let current = self.store.get(team.id).await?;
            let transition = rule(&current)?;
            if !transition.is_changed(&current) {
                return Ok(transition);
            }

            match self.store.update(&transition.team).await {
                Ok(saved) => {
                    return Ok(Transition {
                        team: saved,
                        events: transition.events,
                    })
                }
                Err(BillingError::ConcurrentModification(team_id)) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        team_id = %team_id,
                        attempt,
                        "Team modified concurrently, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Create a Stripe customer subscribed to the plan and mark the team subscribed.
    ///
    /// The team is claimed with a versioned write before Stripe is called, so
    /// a concurrent `subscribe` for the same team fails with
    /// `SubscriptionInProgress` instead of creating a second customer.
    pub async fn subscribe(
        &self,
        team: &Team,
        params: SubscribeParams,
    ) -> BillingResult<Applied<ProviderCustomer>> {
        let plan_id = params
            .subscription_plan_id
            .or_else(|| self.config().subscription_plan_id.clone())
            .ok_or_else(|| BillingError::Config("No subscription plan configured".to_string()))?;

        let started_at = OffsetDateTime::now_utc();
        let claimed = self
            .apply(team, |t| self.machine.begin_subscribe(t, started_at))
            .await?
            .team;

        let created = self
            .gateway
            .create_customer(CreateCustomerParams {
                payment_token: params.stripe_token,
                plan_id: plan_id.clone(),
                email: params.stripe_email,
                metadata: customer_metadata(
                    &claimed.id,
                    &claimed.team_id,
                    claimed.name.as_deref(),
                    claimed.domain.as_deref(),
                ),
            })
            .await;

        let customer = match created {
            Ok(customer) => customer,
            Err(e) => {
                self.release_subscribe(&claimed).await;
                return Err(e);
            }
        };

        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(&claimed, |t| self.machine.subscribe(t, &customer, now))
            .await
            .inspect_err(|e| {
                tracing::error!(
                    team_id = %claimed.team_id,
                    customer_id = %customer.id,
                    error = %e,
                    "Stripe customer created but not recorded"
                );
            })?;

        tracing::info!(
            team_id = %claimed.team_id,
            customer_id = %customer.id,
            plan_id = %plan_id,
            "Team subscribed"
        );

        Ok(Applied {
            team: transition.team,
            events: transition.events,
            value: customer,
        })
    }

    async fn release_subscribe(&self, team: &Team) {
        let released = self
            .apply(team, |t| Ok(self.machine.abort_subscribe(t)))
            .await;
        if let Err(e) = released {
            tracing::error!(
                team_id = %team.team_id,
                error = %e,
                "Failed to release subscribe claim"
            );
        }
    }

    /// Replace the card on file for a subscribed team
    pub async fn update_payment_source(
        &self,
        team: &Team,
        stripe_token: &str,
    ) -> BillingResult<ProviderCustomer> {
        let team = self.store.get(team.id).await?;
        let customer = self.fetch_customer(&team).await?;
        self.machine
            .ensure_active_subscription(&team, customer.as_ref())?;
        let Some(customer) = customer else {
            return Err(BillingError::MissingStripeCustomer);
        };

        let updated = self
            .gateway
            .update_payment_source(&customer.id, stripe_token)
            .await?;

        tracing::info!(
            team_id = %team.team_id,
            customer_id = %customer.id,
            "Updated payment source"
        );

        Ok(updated)
    }

    /// Cancel the active subscription at period end and mark the team unsubscribed.
    /// Returns the subscription that was canceled.
    pub async fn unsubscribe(&self, team: &Team) -> BillingResult<Applied<ProviderSubscription>> {
        let team = self.store.get(team.id).await?;
        if !team.subscribed {
            return Err(BillingError::NotSubscribed);
        }

        let customer = self.fetch_customer(&team).await?;
        let subscription = self
            .machine
            .ensure_active_subscription(&team, customer.as_ref())?
            .clone();

        self.gateway
            .cancel_subscription(&subscription.id, true)
            .await?;

        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(&team, |t| self.machine.unsubscribe(t, now))
            .await?;

        tracing::info!(
            team_id = %team.team_id,
            subscription_id = %subscription.id,
            "Team unsubscribed, auto-renew canceled"
        );

        Ok(Applied {
            team: transition.team,
            events: transition.events,
            value: subscription,
        })
    }

    pub async fn check_trial(&self, team: &Team) -> BillingResult<Applied<()>> {
        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(team, |t| self.machine.check_trial(t, now))
            .await?;
        Ok(Applied::from_transition(transition))
    }

    pub async fn trial_expiring(&self, team: &Team) -> BillingResult<Applied<()>> {
        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(team, |t| self.machine.trial_expiring(t, now))
            .await?;
        Ok(Applied::from_transition(transition))
    }

    pub async fn check_subscription(&self, team: &Team) -> BillingResult<Applied<()>> {
        let team = self.store.get(team.id).await?;
        if !team.subscribed {
            return Err(BillingError::NotSubscribed);
        }
        let customer = self.fetch_customer(&team).await?;

        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(&team, |t| {
                self.machine.check_subscription(t, customer.as_ref(), now)
            })
            .await?;
        Ok(Applied::from_transition(transition))
    }

    /// Daily and startup check
    pub async fn check_stripe_state(&self, team: &Team) -> BillingResult<Applied<()>> {
        let team = self.store.get(team.id).await?;
        let customer = if team.subscribed {
            self.fetch_customer(&team).await?
        } else {
            None
        };

        let now = OffsetDateTime::now_utc();
        let transition = self
            .apply(&team, |t| {
                self.machine.check_stripe_state(t, customer.as_ref(), now)
            })
            .await?;

        if !transition.events.is_empty() {
            tracing::info!(
                team_id = %team.team_id,
                events = ?transition.events,
                "Billing state changed"
            );
        }

        Ok(Applied::from_transition(transition))
    }

    /// Status text for the `subscription` command
    pub async fn subscription_text(
        &self,
        team: &Team,
        include_admin_info: bool,
    ) -> BillingResult<String> {
        let customer = self.fetch_customer(team).await?;
        render::subscription_text(
            team,
            customer.as_ref(),
            include_admin_info,
            self.config(),
            OffsetDateTime::now_utc(),
        )
    }
}
