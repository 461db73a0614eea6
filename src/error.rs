//! Error types for oracle dispatch, resolution jobs and webhook ingestion

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised by providers and the router.
///
/// Configuration variants are returned to the caller immediately. Transport
/// variants never cross the provider boundary; they are folded into
/// `OracleResponse.error` after retries are exhausted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OracleError {
    #[error("unknown oracle: {0}")]
    UnknownOracle(String),

    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    #[error("invalid oracle config: {0}")]
    InvalidConfig(String),

    #[error("oracle {0} is inactive")]
    Inactive(String),

    #[error("aggregator {aggregator} references unregistered source {source_id}")]
    MissingSource {
        aggregator: String,
        source_id: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("attestation rejected: {0}")]
    Attestation(String),

    #[error("oracle {0} does not accept attestations")]
    NotAttestation(String),

    #[error("subscription rejected: {0}")]
    Subscription(String),
}

impl OracleError {
    /// Configuration problems are fatal to the call that hit them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownOracle(_)
                | Self::UnknownProviderType(_)
                | Self::InvalidConfig(_)
                | Self::MissingSource { .. }
        )
    }
}

/// Errors raised while resolving a campaign.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("data provider error: {0}")]
    Data(#[from] anyhow::Error),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Errors raised while processing an inbound webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no webhook configuration for oracle {0}")]
    UnknownOracle(String),

    #[error("missing signature header {0}")]
    MissingSignature(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// HTTP status for this failure at the webhook boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownOracle(_)
            | Self::MissingSignature(_)
            | Self::InvalidSignature
            | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message returned to the sender. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}
