//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use teamsub_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Team Not Found")]
    TeamNotFound,
    #[error("Invalid parameters")]
    InvalidParameters,
    #[error(transparent)]
    Billing(#[from] BillingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::TeamNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Team Not Found" })),
            )
                .into_response(),
            ApiError::InvalidParameters => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": "Invalid parameters.", "type": "param_error" })),
            )
                .into_response(),
            ApiError::Billing(err) => match err.user_message() {
                Some(message) => {
                    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
                }
                None => {
                    tracing::error!(error = %err, "Request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": "Internal server error" })),
                    )
                        .into_response()
                }
            },
        }
    }
}
