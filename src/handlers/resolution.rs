use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{api_error, ApiError};
use crate::models::{ApiResponse, ResolutionJob, TriggerSource};
use crate::services::{ResolutionEngine, ScheduleOutcome};

pub async fn trigger_resolution(
    State(engine): State<Arc<ResolutionEngine>>,
    Path(campaign_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<ResolutionJob>>) {
    let job = engine.trigger_resolution(&campaign_id, TriggerSource::Manual);
    (StatusCode::ACCEPTED, Json(ApiResponse::ok(job)))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    /// Unix seconds.
    pub deadline: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub campaign_id: String,
    pub armed: bool,
    pub fires_at: Option<DateTime<Utc>>,
    pub job: Option<ResolutionJob>,
}

pub async fn schedule_resolution(
    State(engine): State<Arc<ResolutionEngine>>,
    Path(campaign_id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ApiResponse<ScheduleResponse>>, ApiError> {
    let outcome = engine
        .schedule_resolution(&campaign_id, request.deadline)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let response = match outcome {
        ScheduleOutcome::Armed { fires_at } => ScheduleResponse {
            campaign_id,
            armed: true,
            fires_at: Some(fires_at),
            job: None,
        },
        ScheduleOutcome::TriggeredImmediately(job) => ScheduleResponse {
            campaign_id,
            armed: false,
            fires_at: None,
            job: Some(job),
        },
    };
    Ok(Json(ApiResponse::ok(response)))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

pub async fn cancel_schedule(
    State(engine): State<Arc<ResolutionEngine>>,
    Path(campaign_id): Path<String>,
) -> Json<ApiResponse<CancelResponse>> {
    let cancelled = engine.cancel_scheduled_resolution(&campaign_id);
    Json(ApiResponse::ok(CancelResponse { cancelled }))
}

pub async fn get_job(
    State(engine): State<Arc<ResolutionEngine>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ResolutionJob>>, ApiError> {
    engine
        .job(job_id)
        .map(|job| Json(ApiResponse::ok(job)))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Resolution job not found"))
}

pub async fn list_campaign_jobs(
    State(engine): State<Arc<ResolutionEngine>>,
    Path(campaign_id): Path<String>,
) -> Json<ApiResponse<Vec<ResolutionJob>>> {
    Json(ApiResponse::ok(engine.jobs_for_campaign(&campaign_id)))
}
