//! HTTP routes

mod commands;
mod subscriptions;
mod teams;

#[cfg(test)]
mod tests;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{presenters::RootPresenter, state::AppState};

pub use commands::{CommandRequest, CommandResponse};
pub use subscriptions::SubscriptionRequest;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api", get(root))
        .route("/api/teams/{team_id}", get(teams::get_team))
        .route(
            "/api/subscriptions",
            post(subscriptions::create_or_update_subscription),
        )
        .route(
            "/subscriptions",
            post(subscriptions::create_or_update_subscription),
        )
        .route("/api/commands", post(commands::run_command))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<RootPresenter> {
    Json(RootPresenter::new(&state.billing_config().root_url))
}
