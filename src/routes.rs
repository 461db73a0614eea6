//! Route definitions for the milestone oracle API

use axum::{
    routing::{get, post},
    Router,
};

use crate::app_state::AppState;
use crate::handlers::*;

// Inbound oracle webhooks
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/oracles/:oracle_id/webhook", post(receive_webhook))
}

// Oracle verification and attestation routes
pub fn oracle_routes() -> Router<AppState> {
    Router::new()
        .route("/api/oracles/health", get(oracle_health))
        .route("/api/oracles/:oracle_id/verify", post(verify_milestone))
        .route("/api/oracles/:oracle_id/attestations", post(submit_attestation))
}

// Resolution routes
pub fn resolution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/campaigns/:campaign_id/resolve", post(trigger_resolution))
        .route(
            "/api/campaigns/:campaign_id/schedule",
            post(schedule_resolution).delete(cancel_schedule),
        )
        .route("/api/campaigns/:campaign_id/jobs", get(list_campaign_jobs))
        .route("/api/resolution-jobs/:job_id", get(get_job))
}

/// Full application router with state applied. Middleware is layered on by
/// the caller.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(webhook_routes())
        .merge(oracle_routes())
        .merge(resolution_routes())
        .with_state(state)
}

async fn root() -> &'static str {
    "Milestone Oracle API Server"
}

async fn health_check() -> &'static str {
    "OK"
}
