//! Team lookup

use axum::{
    extract::{Path, State},
    Json,
};
use time::OffsetDateTime;

use crate::{
    error::{ApiError, ApiResult},
    presenters::TeamPresenter,
    state::AppState,
};

pub async fn get_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> ApiResult<Json<TeamPresenter>> {
    let team = state
        .store()
        .find_by_team_id(&team_id)
        .await?
        .ok_or(ApiError::TeamNotFound)?;

    Ok(Json(TeamPresenter::new(
        &team,
        state.billing_config(),
        OffsetDateTime::now_utc(),
    )))
}
