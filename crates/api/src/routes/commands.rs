//! Chat command bridge

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use teamsub_billing::{commands, notify::deliver, ChatCommand};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub team_id: String,
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub text: String,
}

pub async fn run_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<Json<CommandResponse>> {
    let Json(request) = payload.map_err(|_| ApiError::InvalidParameters)?;
    let command = ChatCommand::parse(&request.text).ok_or(ApiError::InvalidParameters)?;

    let team = state
        .store()
        .find_by_team_id(&request.team_id)
        .await?
        .ok_or(ApiError::TeamNotFound)?;

    let reply = commands::run(&state.subscriptions, &team, &request.user_id, command).await?;

    if !reply.events.is_empty() {
        let team = state.store().get(team.id).await?;
        deliver(
            state.notifier.as_ref(),
            &team,
            &reply.events,
            state.billing_config(),
        )
        .await;
    }

    Ok(Json(CommandResponse { text: reply.text }))
}
