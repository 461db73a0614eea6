//! Webhook configuration and payload models

use std::collections::HashMap;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    Sha1,
    #[default]
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    /// Prefix some vendors put in front of the digest, e.g. `sha256=`.
    pub fn header_prefix(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
            SignatureAlgorithm::Sha512 => "sha512=",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignatureEncoding {
    #[default]
    Hex,
    Base64,
}

/// Per-oracle webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub oracle_id: String,
    #[serde(default)]
    pub secret: String,
    /// Environment variable holding the secret; takes precedence when set.
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
    #[serde(default)]
    pub encoding: SignatureEncoding,
    /// Vendor event name -> canonical event name.
    #[serde(default)]
    pub event_mapping: HashMap<String, String>,
    #[serde(default = "default_event_field")]
    pub event_field: String,
    /// Header carrying the event name instead of the body, e.g. `x-github-event`.
    #[serde(default)]
    pub event_header: Option<String>,
    #[serde(default = "default_campaign_field")]
    pub campaign_field: String,
}

fn default_signature_header() -> String {
    "x-signature".to_string()
}

fn default_event_field() -> String {
    "event".to_string()
}

fn default_campaign_field() -> String {
    "campaignId".to_string()
}

impl WebhookConfig {
    pub fn new(oracle_id: &str, secret: &str) -> Self {
        Self {
            oracle_id: oracle_id.to_string(),
            secret: secret.to_string(),
            secret_env: None,
            signature_header: default_signature_header(),
            algorithm: SignatureAlgorithm::default(),
            encoding: SignatureEncoding::default(),
            event_mapping: HashMap::new(),
            event_field: default_event_field(),
            event_header: None,
            campaign_field: default_campaign_field(),
        }
    }

    /// Resolves `secret_env` into `secret`. Missing variables leave the
    /// inline secret in place.
    pub fn resolve_secret(mut self) -> Self {
        if let Some(var) = &self.secret_env {
            if let Ok(secret) = std::env::var(var) {
                self.secret = secret;
            }
        }
        self
    }
}

/// Canonical event types every vendor name is translated into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    RaceCompleted,
    PullRequestMerged,
    MilestoneCompleted,
    DataAvailable,
    Other(String),
}

impl CanonicalEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "race.completed" | "race_completed" => CanonicalEvent::RaceCompleted,
            "pr.merged" | "pull_request.merged" | "pr_merged" => CanonicalEvent::PullRequestMerged,
            "milestone.completed" | "milestone_completed" => CanonicalEvent::MilestoneCompleted,
            "data.available" | "data_available" => CanonicalEvent::DataAvailable,
            other => CanonicalEvent::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CanonicalEvent::RaceCompleted => "race.completed",
            CanonicalEvent::PullRequestMerged => "pr.merged",
            CanonicalEvent::MilestoneCompleted => "milestone.completed",
            CanonicalEvent::DataAvailable => "data.available",
            CanonicalEvent::Other(name) => name,
        }
    }
}

/// One inbound delivery after translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub oracle_id: String,
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Body returned to webhook senders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip, default = "default_status")]
    pub status: StatusCode,
}

fn default_status() -> StatusCode {
    StatusCode::OK
}

impl WebhookResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: StatusCode::OK,
        }
    }

    pub fn rejected(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status,
        }
    }
}
