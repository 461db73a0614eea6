//! API handlers for the milestone oracle service

pub mod oracle;
pub mod resolution;
pub mod webhook;

use axum::{http::StatusCode, Json};

use crate::error::OracleError;
use crate::models::ApiResponse;

pub use oracle::{oracle_health, submit_attestation, verify_milestone};
pub use resolution::{cancel_schedule, get_job, list_campaign_jobs, schedule_resolution, trigger_resolution};
pub use webhook::receive_webhook;

/// Error half of every JSON handler.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::err(error)))
}

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        let status = match &err {
            OracleError::UnknownOracle(_) => StatusCode::NOT_FOUND,
            OracleError::Inactive(_) => StatusCode::CONFLICT,
            OracleError::Attestation(_) => StatusCode::UNAUTHORIZED,
            OracleError::Transport(_) | OracleError::Timeout(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        };
        api_error(status, err.to_string())
    }
}
