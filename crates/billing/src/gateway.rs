//! Provider gateway
//!
//! The typed surface of the billing provider that the state machine consumes.
//! `StripeClient` implements it against the live API; `mock::MockGateway`
//! serves canned customers in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Subscription status as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Trialing,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// "past_due" -> "Past Due"
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub current_period_end: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub plan_name: String,
    pub plan_amount_cents: i64,
}

impl ProviderSubscription {
    /// Active and set to renew
    pub fn is_renewing(&self) -> bool {
        self.status == SubscriptionStatus::Active && !self.cancel_at_period_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderInvoice {
    pub amount_due_cents: i64,
    pub created_at: OffsetDateTime,
    pub paid: bool,
}

/// A payment source on file (cards only for now)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSource {
    pub brand: String,
    /// Stripe object kind, e.g. "card"
    pub kind: String,
    pub name: Option<String>,
    pub last4: String,
    pub exp_month: i64,
    pub exp_year: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub email: Option<String>,
    pub subscriptions: Vec<ProviderSubscription>,
    pub invoices: Vec<ProviderInvoice>,
    pub sources: Vec<PaymentSource>,
}

/// Parameters for creating a customer with a subscription to `plan_id`
#[derive(Debug, Clone)]
pub struct CreateCustomerParams {
    pub payment_token: String,
    pub plan_id: String,
    pub email: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Operations the subscription lifecycle needs from the billing provider
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Create a customer charged through `payment_token` and subscribe it to the plan
    async fn create_customer(&self, params: CreateCustomerParams)
        -> BillingResult<ProviderCustomer>;

    /// Retrieve a customer with its subscriptions, invoices and sources populated
    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer>;

    /// Replace the customer's default payment source
    async fn update_payment_source(
        &self,
        customer_id: &str,
        payment_token: &str,
    ) -> BillingResult<ProviderCustomer>;

    /// Cancel a subscription, either immediately or when the current period ends
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()>;

    async fn list_subscriptions(&self, customer_id: &str)
        -> BillingResult<Vec<ProviderSubscription>>;

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<ProviderInvoice>>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    //! In-memory gateway for tests

    use std::sync::{Mutex, MutexGuard};

    use super::*;
    use crate::error::BillingError;

    /// A call made against the mock, in order
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GatewayCall {
        CreateCustomer { plan_id: String, email: Option<String> },
        RetrieveCustomer(String),
        UpdatePaymentSource { customer_id: String, token: String },
        CancelSubscription { subscription_id: String, at_period_end: bool },
        ListSubscriptions(String),
        ListInvoices(String),
    }

    #[derive(Debug, Clone)]
    struct MockPlan {
        name: String,
        amount_cents: i64,
    }

    #[derive(Default)]
    struct MockState {
        customers: HashMap<String, ProviderCustomer>,
        plans: HashMap<String, MockPlan>,
        tokens: HashMap<String, String>,
        calls: Vec<GatewayCall>,
        counter: u64,
        failure: Option<String>,
    }

    #[derive(Default)]
    pub struct MockGateway {
        state: Mutex<MockState>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        /// Register a plan that `create_customer` can subscribe to
        pub fn with_plan(self, id: &str, name: &str, amount_cents: i64) -> Self {
            self.state().plans.insert(
                id.to_string(),
                MockPlan {
                    name: name.to_string(),
                    amount_cents,
                },
            );
            self
        }

        pub fn insert_customer(&self, customer: ProviderCustomer) {
            self.state()
                .customers
                .insert(customer.id.clone(), customer);
        }

        pub fn customer(&self, customer_id: &str) -> Option<ProviderCustomer> {
            self.state().customers.get(customer_id).cloned()
        }

        pub fn set_subscription_status(
            &self,
            customer_id: &str,
            subscription_id: &str,
            status: SubscriptionStatus,
        ) {
            if let Some(customer) = self.state().customers.get_mut(customer_id) {
                for sub in customer
                    .subscriptions
                    .iter_mut()
                    .filter(|s| s.id == subscription_id)
                {
                    sub.status = status;
                }
            }
        }

        /// The token most recently attached to a customer
        pub fn payment_token(&self, customer_id: &str) -> Option<String> {
            self.state().tokens.get(customer_id).cloned()
        }

        /// Make every following call fail with a provider error
        pub fn fail_with(&self, message: &str) {
            self.state().failure = Some(message.to_string());
        }

        pub fn calls(&self) -> Vec<GatewayCall> {
            self.state().calls.clone()
        }

        pub fn call_count(&self, matches: impl Fn(&GatewayCall) -> bool) -> usize {
            self.state().calls.iter().filter(|c| matches(c)).count()
        }

        fn record(&self, call: GatewayCall) -> BillingResult<MutexGuard<'_, MockState>> {
            let mut state = self.state();
            state.calls.push(call);
            match &state.failure {
                Some(message) => Err(BillingError::StripeApi(message.clone())),
                None => Ok(state),
            }
        }
    }

    /// A customer with one subscription, the shape most tests start from
    pub fn customer_with_subscription(
        customer_id: &str,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> ProviderCustomer {
        let now = OffsetDateTime::now_utc();
        ProviderCustomer {
            id: customer_id.to_string(),
            created_at: now,
            email: Some("user@example.com".to_string()),
            subscriptions: vec![ProviderSubscription {
                id: subscription_id.to_string(),
                status,
                cancel_at_period_end: false,
                current_period_end: now + time::Duration::days(365),
                created_at: now,
                plan_name: "Plan".to_string(),
                plan_amount_cents: 2999,
            }],
            invoices: vec![],
            sources: vec![PaymentSource {
                brand: "Visa".to_string(),
                kind: "card".to_string(),
                name: Some("Johnny App".to_string()),
                last4: "4242".to_string(),
                exp_month: 9,
                exp_year: 2030,
            }],
        }
    }

    #[async_trait]
    impl ProviderGateway for MockGateway {
        async fn create_customer(
            &self,
            params: CreateCustomerParams,
        ) -> BillingResult<ProviderCustomer> {
            let mut state = self.record(GatewayCall::CreateCustomer {
                plan_id: params.plan_id.clone(),
                email: params.email.clone(),
            })?;

            let plan = state.plans.get(&params.plan_id).cloned().ok_or_else(|| {
                BillingError::StripeApi(format!("No such plan: {}", params.plan_id))
            })?;

            state.counter += 1;
            let customer_id = format!("cus_mock_{}", state.counter);
            let subscription_id = format!("sub_mock_{}", state.counter);

            let mut customer = customer_with_subscription(
                &customer_id,
                &subscription_id,
                SubscriptionStatus::Active,
            );
            customer.email = params.email;
            customer.subscriptions[0].plan_name = plan.name;
            customer.subscriptions[0].plan_amount_cents = plan.amount_cents;

            state
                .tokens
                .insert(customer_id.clone(), params.payment_token);
            state.customers.insert(customer_id, customer.clone());
            Ok(customer)
        }

        async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
            let state = self.record(GatewayCall::RetrieveCustomer(customer_id.to_string()))?;
            state
                .customers
                .get(customer_id)
                .cloned()
                .ok_or_else(|| BillingError::StripeApi(format!("No such customer: {}", customer_id)))
        }

        async fn update_payment_source(
            &self,
            customer_id: &str,
            payment_token: &str,
        ) -> BillingResult<ProviderCustomer> {
            let mut state = self.record(GatewayCall::UpdatePaymentSource {
                customer_id: customer_id.to_string(),
                token: payment_token.to_string(),
            })?;
            let customer = state.customers.get(customer_id).cloned().ok_or_else(|| {
                BillingError::StripeApi(format!("No such customer: {}", customer_id))
            })?;
            state
                .tokens
                .insert(customer_id.to_string(), payment_token.to_string());
            Ok(customer)
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
            at_period_end: bool,
        ) -> BillingResult<()> {
            let mut state = self.record(GatewayCall::CancelSubscription {
                subscription_id: subscription_id.to_string(),
                at_period_end,
            })?;
            let sub = state
                .customers
                .values_mut()
                .flat_map(|c| c.subscriptions.iter_mut())
                .find(|s| s.id == subscription_id)
                .ok_or_else(|| {
                    BillingError::StripeApi(format!("No such subscription: {}", subscription_id))
                })?;
            if at_period_end {
                sub.cancel_at_period_end = true;
            } else {
                sub.status = SubscriptionStatus::Canceled;
            }
            Ok(())
        }

        async fn list_subscriptions(
            &self,
            customer_id: &str,
        ) -> BillingResult<Vec<ProviderSubscription>> {
            let state = self.record(GatewayCall::ListSubscriptions(customer_id.to_string()))?;
            Ok(state
                .customers
                .get(customer_id)
                .map(|c| c.subscriptions.clone())
                .unwrap_or_default())
        }

        async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<ProviderInvoice>> {
            let state = self.record(GatewayCall::ListInvoices(customer_id.to_string()))?;
            Ok(state
                .customers
                .get(customer_id)
                .map(|c| c.invoices.clone())
                .unwrap_or_default())
        }
    }
}
