//! Stripe client
//!
//! Wraps the async-stripe client together with the billing configuration and
//! implements [`ProviderGateway`] against the live Stripe API.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use stripe::{
    CancelSubscription, CreateCustomer, CreateSubscription, CreateSubscriptionItems, Customer,
    CustomerId, Invoice, ListInvoices, ListSubscriptions, PaymentSourceParams, SourceId,
    Subscription, SubscriptionId, SubscriptionStatus as StripeSubStatus, TokenId, UpdateCustomer,
    UpdateSubscription,
};
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CreateCustomerParams, PaymentSource, ProviderCustomer, ProviderGateway, ProviderInvoice,
    ProviderSubscription, SubscriptionStatus,
};

#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: BillingConfig,
}

impl StripeClient {
    pub fn new(config: BillingConfig) -> Self {
        let inner = stripe::Client::new(config.stripe_api_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(BillingConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id
        .parse::<CustomerId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    subscription_id
        .parse::<SubscriptionId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid subscription ID: {}", e)))
}

/// Checkout hands us either a token (`tok_...`) or a source (`src_...`)
fn payment_source(token: &str) -> BillingResult<PaymentSourceParams> {
    if token.starts_with("src_") {
        let source = token
            .parse::<SourceId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid source ID: {}", e)))?;
        return Ok(PaymentSourceParams::Source(source));
    }
    let token = token
        .parse::<TokenId>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid payment token: {}", e)))?;
    Ok(PaymentSourceParams::Token(token))
}

fn timestamp(ts: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| BillingError::Internal(format!("Invalid timestamp {}: {}", ts, e)))
}

fn convert_status(status: &StripeSubStatus) -> SubscriptionStatus {
    match status {
        StripeSubStatus::Active => SubscriptionStatus::Active,
        StripeSubStatus::PastDue => SubscriptionStatus::PastDue,
        StripeSubStatus::Canceled => SubscriptionStatus::Canceled,
        StripeSubStatus::Unpaid => SubscriptionStatus::Unpaid,
        StripeSubStatus::Trialing => SubscriptionStatus::Trialing,
        StripeSubStatus::Incomplete => SubscriptionStatus::Incomplete,
        StripeSubStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        StripeSubStatus::Paused => SubscriptionStatus::Paused,
    }
}

fn convert_subscription(subscription: &Subscription) -> BillingResult<ProviderSubscription> {
    let price = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref());

    let plan_name = price
        .and_then(|p| p.nickname.clone())
        .or_else(|| price.map(|p| p.id.to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(ProviderSubscription {
        id: subscription.id.to_string(),
        status: convert_status(&subscription.status),
        cancel_at_period_end: subscription.cancel_at_period_end,
        current_period_end: timestamp(subscription.current_period_end)?,
        created_at: timestamp(subscription.created)?,
        plan_name,
        plan_amount_cents: price.and_then(|p| p.unit_amount).unwrap_or(0),
    })
}

fn convert_invoice(invoice: &Invoice) -> BillingResult<ProviderInvoice> {
    Ok(ProviderInvoice {
        amount_due_cents: invoice.amount_due.unwrap_or(0),
        created_at: timestamp(invoice.created.unwrap_or(0))?,
        paid: invoice.paid.unwrap_or(false),
    })
}

/// Shape of the `sources` list on a serialized customer
#[derive(Debug, Default, Deserialize)]
struct SourceList {
    #[serde(default)]
    data: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    object: Option<String>,
    brand: Option<String>,
    name: Option<String>,
    last4: Option<String>,
    exp_month: Option<i64>,
    exp_year: Option<i64>,
}

/// Cards on file, read from the customer's expanded `sources`
fn parse_sources(customer: &serde_json::Value) -> Vec<PaymentSource> {
    let list = customer
        .get("sources")
        .cloned()
        .and_then(|sources| serde_json::from_value::<SourceList>(sources).ok())
        .unwrap_or_default();

    list.data
        .into_iter()
        .filter_map(|entry| {
            Some(PaymentSource {
                brand: entry.brand?,
                kind: entry.object.unwrap_or_else(|| "card".to_string()),
                name: entry.name,
                last4: entry.last4?,
                exp_month: entry.exp_month.unwrap_or(0),
                exp_year: entry.exp_year.unwrap_or(0),
            })
        })
        .collect()
}

#[async_trait]
impl ProviderGateway for StripeClient {
    async fn create_customer(
        &self,
        params: CreateCustomerParams,
    ) -> BillingResult<ProviderCustomer> {
        let source = payment_source(&params.payment_token)?;

        let create = CreateCustomer {
            email: params.email.as_deref(),
            source: Some(source),
            metadata: Some(params.metadata.clone()),
            ..Default::default()
        };
        let customer = Customer::create(&self.inner, create).await?;

        let mut subscription = CreateSubscription::new(customer.id.clone());
        subscription.items = Some(vec![CreateSubscriptionItems {
            price: Some(params.plan_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        subscription.metadata = Some(params.metadata);
        let subscription = Subscription::create(&self.inner, subscription).await?;

        tracing::info!(
            customer_id = %customer.id,
            subscription_id = %subscription.id,
            plan_id = %params.plan_id,
            "Created Stripe customer and subscription"
        );

        self.retrieve_customer(customer.id.as_str()).await
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
        let id = parse_customer_id(customer_id)?;
        let customer = Customer::retrieve(&self.inner, &id, &["sources"]).await?;

        let sources = serde_json::to_value(&customer)
            .map(|value| parse_sources(&value))
            .unwrap_or_default();

        Ok(ProviderCustomer {
            id: customer.id.to_string(),
            created_at: timestamp(customer.created.unwrap_or(0))?,
            email: customer.email.clone(),
            subscriptions: self.list_subscriptions(customer_id).await?,
            invoices: self.list_invoices(customer_id).await?,
            sources,
        })
    }

    async fn update_payment_source(
        &self,
        customer_id: &str,
        payment_token: &str,
    ) -> BillingResult<ProviderCustomer> {
        let id = parse_customer_id(customer_id)?;

        let params = UpdateCustomer {
            source: Some(payment_source(payment_token)?),
            ..Default::default()
        };
        Customer::update(&self.inner, &id, params).await?;

        tracing::info!(customer_id = %customer_id, "Updated Stripe payment source");

        self.retrieve_customer(customer_id).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()> {
        let id = parse_subscription_id(subscription_id)?;

        if at_period_end {
            let params = UpdateSubscription {
                cancel_at_period_end: Some(true),
                ..Default::default()
            };
            Subscription::update(&self.inner, &id, params).await?;
        } else {
            Subscription::cancel(&self.inner, &id, CancelSubscription::default()).await?;
        }

        tracing::info!(
            subscription_id = %subscription_id,
            at_period_end,
            "Canceled Stripe subscription"
        );

        Ok(())
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        let params = ListSubscriptions {
            customer: Some(parse_customer_id(customer_id)?),
            ..Default::default()
        };

        Subscription::list(&self.inner, &params)
            .await?
            .data
            .iter()
            .map(convert_subscription)
            .collect()
    }

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<ProviderInvoice>> {
        let mut params = ListInvoices::new();
        params.customer = Some(parse_customer_id(customer_id)?);

        Invoice::list(&self.inner, &params)
            .await?
            .data
            .iter()
            .map(convert_invoice)
            .collect()
    }
}

/// Customer metadata recorded on creation
pub(crate) fn customer_metadata(
    id: &uuid::Uuid,
    team_id: &str,
    name: Option<&str>,
    domain: Option<&str>,
) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("id".to_string(), id.to_string());
    metadata.insert("team_id".to_string(), team_id.to_string());
    metadata.insert("name".to_string(), name.unwrap_or_default().to_string());
    metadata.insert("domain".to_string(), domain.unwrap_or_default().to_string());
    metadata
}
