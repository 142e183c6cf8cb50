use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use teamsub_billing::{
    gateway::mock::{GatewayCall, MockGateway},
    notify::mock::RecordingNotifier,
    BillingConfig, BillingResult, CreateCustomerParams, InMemoryTeamStore, ProviderCustomer,
    ProviderGateway, ProviderInvoice, ProviderSubscription, Team, TeamStore,
};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;

use super::create_router;
use crate::state::AppState;

struct TestApp {
    router: Router,
    store: Arc<InMemoryTeamStore>,
    gateway: Arc<MockGateway>,
    notifier: Arc<RecordingNotifier>,
}

fn test_config() -> BillingConfig {
    BillingConfig::default()
        .with_root_url("https://bot.example.com")
        .with_plan_id("yearly")
}

fn test_app() -> TestApp {
    let store = Arc::new(InMemoryTeamStore::new());
    let gateway = Arc::new(MockGateway::new().with_plan("yearly", "Plan", 2999));
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::new(store.clone(), gateway.clone(), notifier.clone(), test_config());
    TestApp {
        router: create_router(state),
        store,
        gateway,
        notifier,
    }
}

async fn insert_team(app: &TestApp) -> Team {
    let team = Team::new("T1", OffsetDateTime::now_utc() - Duration::days(1))
        .with_name("Team One")
        .with_activated_user_id("U_ADMIN");
    app.store.insert(&team).await.unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_root_links() {
    let app = test_app();
    let (status, body) = send(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["links"]["subscriptions"],
        "https://bot.example.com/api/subscriptions"
    );
}

#[tokio::test]
async fn test_get_team() {
    let app = test_app();
    insert_team(&app).await;

    let (status, body) = send(&app, get("/api/teams/T1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["team_id"], "T1");
    assert_eq!(body["subscribed"], false);
    assert_eq!(body["billing_state"], "trial");
}

#[tokio::test]
async fn test_get_team_not_found() {
    let app = test_app();
    let (status, body) = send(&app, get("/api/teams/T404")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Team Not Found");
}

#[tokio::test]
async fn test_create_subscription() {
    let app = test_app();
    let team = insert_team(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({
                "team_id": "T1",
                "stripe_token": "tok_visa",
                "stripe_token_type": "card",
                "stripe_email": "admin@example.com",
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribed"], true);
    assert_eq!(body["billing_state"], "active");

    let stored = app.store.get(team.id).await.unwrap();
    assert!(stored.subscribed);
    assert!(stored.stripe_customer_id.is_some());
    assert_eq!(
        app.notifier.texts(),
        vec!["Your team has been subscribed.".to_string()]
    );
}

#[tokio::test]
async fn test_update_payment_source_for_subscribed_team() {
    let app = test_app();
    insert_team(&app).await;
    let subscribe = json!({ "team_id": "T1", "stripe_token": "tok_visa" });
    let (status, _) = send(&app, post_json("/api/subscriptions", subscribe)).await;
    assert_eq!(status, StatusCode::OK);

    let update = json!({ "team_id": "T1", "stripe_token": "tok_mastercard" });
    let (status, body) = send(&app, post_json("/api/subscriptions", update)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscribed"], true);

    let team = app.store.find_by_team_id("T1").await.unwrap().unwrap();
    let customer_id = team.stripe_customer_id.unwrap();
    assert_eq!(
        app.gateway.payment_token(&customer_id).as_deref(),
        Some("tok_mastercard")
    );
    assert_eq!(app.notifier.texts().len(), 1);
}

#[tokio::test]
async fn test_create_subscription_existing_customer() {
    let app = test_app();
    let mut team = insert_team(&app).await;
    team.stripe_customer_id = Some("cus_old".to_string());
    app.store.update(&team).await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Customer Already Registered");
}

#[tokio::test]
async fn test_create_subscription_missing_token() {
    let app = test_app();
    insert_team(&app).await;

    let (status, body) = send(&app, post_json("/subscriptions", json!({ "team_id": "T1" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "param_error");
}

#[tokio::test]
async fn test_create_subscription_unknown_team() {
    let app = test_app();

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T404", "stripe_token": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Team Not Found");
}

#[tokio::test]
async fn test_create_subscription_provider_failure() {
    let app = test_app();
    insert_team(&app).await;
    app.gateway.fail_with("Your card was declined.");

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");
    assert!(app.notifier.texts().is_empty());
}

#[tokio::test]
async fn test_subscription_command_on_trial() {
    let app = test_app();
    insert_team(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/commands",
            json!({ "team_id": "T1", "user_id": "U_OTHER", "text": "subscription" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["text"],
        "Your trial subscription expires in 13 days. Subscribe your team at https://bot.example.com/subscribe?team_id=T1."
    );
}

#[tokio::test]
async fn test_unsubscribe_command_requires_admin() {
    let app = test_app();
    insert_team(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/commands",
            json!({ "team_id": "T1", "user_id": "U_OTHER", "text": "unsubscribe" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Sorry, only <@U_ADMIN> can do that.");
}

#[tokio::test]
async fn test_unsubscribe_command_confirmed() {
    let app = test_app();
    insert_team(&app).await;
    let (status, _) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &app,
        post_json(
            "/api/commands",
            json!({ "team_id": "T1", "user_id": "U_ADMIN", "text": "unsubscribe" }),
        ),
    )
    .await;
    let prompt = body["text"].as_str().unwrap().to_string();
    assert!(prompt.starts_with("Send \"unsubscribe "));
    let subscription_id = prompt
        .trim_start_matches("Send \"unsubscribe ")
        .trim_end_matches("\" to confirm.")
        .to_string();

    let (status, body) = send(
        &app,
        post_json(
            "/api/commands",
            json!({
                "team_id": "T1",
                "user_id": "U_ADMIN",
                "text": format!("unsubscribe {}", subscription_id),
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["text"],
        "Successfully canceled auto-renew for Plan ($29.99)."
    );
}

#[tokio::test]
async fn test_unknown_command() {
    let app = test_app();
    insert_team(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/api/commands",
            json!({ "team_id": "T1", "user_id": "U_ADMIN", "text": "dance" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["type"], "param_error");
}

/// Another request finishes subscribing the team while this one is talking
/// to Stripe.
struct SubscribedElsewhereGateway {
    inner: Arc<MockGateway>,
    store: Arc<InMemoryTeamStore>,
}

#[async_trait]
impl ProviderGateway for SubscribedElsewhereGateway {
    async fn create_customer(
        &self,
        params: CreateCustomerParams,
    ) -> BillingResult<ProviderCustomer> {
        if let Some(mut team) = self.store.find_by_team_id("T1").await? {
            team.mark_subscribed(OffsetDateTime::now_utc());
            team.stripe_customer_id = Some("cus_elsewhere".to_string());
            team.subscribe_started_at = None;
            self.store.update(&team).await?;
        }
        self.inner.create_customer(params).await
    }

    async fn retrieve_customer(&self, customer_id: &str) -> BillingResult<ProviderCustomer> {
        self.inner.retrieve_customer(customer_id).await
    }

    async fn update_payment_source(
        &self,
        customer_id: &str,
        payment_token: &str,
    ) -> BillingResult<ProviderCustomer> {
        self.inner
            .update_payment_source(customer_id, payment_token)
            .await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> BillingResult<()> {
        self.inner
            .cancel_subscription(subscription_id, at_period_end)
            .await
    }

    async fn list_subscriptions(
        &self,
        customer_id: &str,
    ) -> BillingResult<Vec<ProviderSubscription>> {
        self.inner.list_subscriptions(customer_id).await
    }

    async fn list_invoices(&self, customer_id: &str) -> BillingResult<Vec<ProviderInvoice>> {
        self.inner.list_invoices(customer_id).await
    }
}

#[tokio::test]
async fn test_create_subscription_already_subscribed() {
    let store = Arc::new(InMemoryTeamStore::new());
    let mock = Arc::new(MockGateway::new().with_plan("yearly", "Plan", 2999));
    let gateway = Arc::new(SubscribedElsewhereGateway {
        inner: mock.clone(),
        store: store.clone(),
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::new(store.clone(), gateway, notifier.clone(), test_config());
    let app = TestApp {
        router: create_router(state),
        store,
        gateway: mock,
        notifier,
    };
    insert_team(&app).await;

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Already Subscribed");
    assert!(app.notifier.texts().is_empty());

    let team = app.store.find_by_team_id("T1").await.unwrap().unwrap();
    assert_eq!(team.stripe_customer_id.as_deref(), Some("cus_elsewhere"));
}

#[tokio::test]
async fn test_update_subscription_pending_cancellation() {
    let app = test_app();
    insert_team(&app).await;
    let (status, _) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let team = app.store.find_by_team_id("T1").await.unwrap().unwrap();
    let customer_id = team.stripe_customer_id.unwrap();
    let mut customer = app.gateway.customer(&customer_id).unwrap();
    customer.subscriptions[0].cancel_at_period_end = true;
    app.gateway.insert_customer(customer);

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_mastercard" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing Stripe Customer");
    assert_eq!(
        app.gateway
            .call_count(|c| matches!(c, GatewayCall::UpdatePaymentSource { .. })),
        0
    );
}

#[tokio::test]
async fn test_create_subscription_in_progress() {
    let app = test_app();
    let mut team = insert_team(&app).await;
    team.subscribe_started_at = Some(OffsetDateTime::now_utc());
    app.store.update(&team).await.unwrap();

    let (status, body) = send(
        &app,
        post_json(
            "/subscriptions",
            json!({ "team_id": "T1", "stripe_token": "tok_visa" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Subscription In Progress");
    assert!(app.gateway.calls().is_empty());
}
