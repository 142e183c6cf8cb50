//! Create or update a subscription
//!
//! Called by the payment page with a Stripe Checkout token. Teams on trial
//! get subscribed; subscribed teams get their card replaced.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Deserialize;
use teamsub_billing::{notify::deliver, SubscribeParams};
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    presenters::TeamPresenter,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    pub team_id: String,
    pub stripe_token: String,
    pub stripe_token_type: Option<String>,
    pub stripe_email: Option<String>,
}

pub async fn create_or_update_subscription(
    State(state): State<AppState>,
    payload: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> ApiResult<Json<TeamPresenter>> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected subscription request");
        ApiError::InvalidParameters
    })?;

    if request.team_id.trim().is_empty() || request.stripe_token.trim().is_empty() {
        return Err(ApiError::InvalidParameters);
    }

    let team = state
        .store()
        .find_by_team_id(&request.team_id)
        .await?
        .ok_or(ApiError::TeamNotFound)?;

    let team = if team.subscribed {
        tracing::info!(team_id = %team.team_id, "Updating a subscription");
        let customer = state
            .subscriptions
            .update_payment_source(&team, &request.stripe_token)
            .await?;
        tracing::info!(
            team_id = %team.team_id,
            stripe_customer_id = %customer.id,
            "Updated subscription"
        );
        team
    } else {
        tracing::info!(
            team_id = %team.team_id,
            token_type = ?request.stripe_token_type,
            "Creating a subscription"
        );
        let applied = state
            .subscriptions
            .subscribe(
                &team,
                SubscribeParams {
                    stripe_token: request.stripe_token,
                    stripe_email: request.stripe_email,
                    subscription_plan_id: None,
                },
            )
            .await?;
        tracing::info!(
            team_id = %applied.team.team_id,
            stripe_customer_id = %applied.value.id,
            "Subscription created"
        );
        deliver(
            state.notifier.as_ref(),
            &applied.team,
            &applied.events,
            state.billing_config(),
        )
        .await;
        applied.team
    };

    Ok(Json(TeamPresenter::new(
        &team,
        state.billing_config(),
        OffsetDateTime::now_utc(),
    )))
}
