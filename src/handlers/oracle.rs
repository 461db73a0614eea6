use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use super::{api_error, ApiError};
use crate::models::{ApiResponse, MilestoneCondition, QueryParams, VerificationResult};
use crate::oracle::{Attestation, AttestationSubmission};
use crate::services::OracleRouter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub campaign_id: String,
    pub milestone_id: String,
    pub condition: MilestoneCondition,
    #[serde(default)]
    pub params: QueryParams,
}

pub async fn verify_milestone(
    State(router): State<Arc<OracleRouter>>,
    Path(oracle_id): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<VerificationResult>>, ApiError> {
    if router.provider(&oracle_id).is_none() {
        return Err(api_error(StatusCode::NOT_FOUND, format!("Oracle not found: {oracle_id}")));
    }

    let result = router
        .verify_milestone(
            &oracle_id,
            &request.campaign_id,
            &request.milestone_id,
            &request.condition,
            &request.params,
        )
        .await;
    Ok(Json(ApiResponse::ok(result)))
}

pub async fn oracle_health(State(router): State<Arc<OracleRouter>>) -> Json<ApiResponse<HashMap<String, bool>>> {
    Json(ApiResponse::ok(router.health_check_all().await))
}

pub async fn submit_attestation(
    State(router): State<Arc<OracleRouter>>,
    Path(oracle_id): Path<String>,
    Json(submission): Json<AttestationSubmission>,
) -> Result<(StatusCode, Json<ApiResponse<Attestation>>), ApiError> {
    let attestation = router.submit_attestation(&oracle_id, submission)?;
    info!(
        oracle_id = %oracle_id,
        campaign_id = %attestation.campaign_id,
        milestone_id = %attestation.milestone_id,
        "attestation recorded"
    );
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(attestation))))
}
