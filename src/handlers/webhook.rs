use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::models::WebhookResponse;
use crate::services::WebhookHandler;

/// Signature checks need the exact bytes the sender signed, so the body is
/// taken raw rather than through `Json`.
pub async fn receive_webhook(
    State(webhooks): State<Arc<WebhookHandler>>,
    Path(oracle_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    let response = webhooks.handle_webhook(&oracle_id, &body, &headers).await;
    (response.status, Json(response))
}
