//! Inbound oracle webhooks.
//!
//! Delivery order: config lookup, HMAC check over the raw body, replay
//! check, event translation, then a canonical handler that invalidates the
//! oracle's cached answers and triggers campaign resolution.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tracing::{error, info, warn};

use super::resolution::ResolutionEngine;
use crate::error::WebhookError;
use crate::models::{
    CanonicalEvent, SignatureAlgorithm, SignatureEncoding, TriggerSource, WebhookConfig, WebhookPayload,
    WebhookResponse,
};
use crate::oracle::path::extract_field;

/// Default cap on remembered delivery keys.
pub const DEFAULT_MAX_PROCESSED: usize = 10_000;

/// Recently processed delivery keys. Once the cap is exceeded the oldest
/// half is forgotten.
pub struct ProcessedDeliveries {
    max_entries: usize,
    inner: Mutex<DeliveryLog>,
}

#[derive(Default)]
struct DeliveryLog {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedDeliveries {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(DeliveryLog::default()),
        }
    }

    /// Claims `key`. Returns `Ok(false)` if it was already claimed.
    pub fn reserve(&self, key: &str) -> Result<bool, WebhookError> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| WebhookError::Internal("delivery log poisoned".to_string()))?;
        if !log.seen.insert(key.to_string()) {
            return Ok(false);
        }
        log.order.push_back(key.to_string());

        if log.order.len() > self.max_entries {
            let evict = log.order.len() / 2;
            for _ in 0..evict {
                if let Some(old) = log.order.pop_front() {
                    log.seen.remove(&old);
                }
            }
        }
        Ok(true)
    }

    /// Forgets a claim so the sender may retry.
    pub fn release(&self, key: &str) {
        if let Ok(mut log) = self.inner.lock() {
            if log.seen.remove(key) {
                log.order.retain(|k| k != key);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().is_ok_and(|log| log.seen.contains(key))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|log| log.seen.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct WebhookHandler {
    configs: DashMap<String, WebhookConfig>,
    processed: ProcessedDeliveries,
    engine: Arc<ResolutionEngine>,
}

impl WebhookHandler {
    pub fn new(engine: Arc<ResolutionEngine>, max_processed: usize) -> Self {
        Self {
            configs: DashMap::new(),
            processed: ProcessedDeliveries::new(max_processed),
            engine,
        }
    }

    pub fn register(&self, config: WebhookConfig) {
        let config = config.resolve_secret();
        if config.secret.is_empty() {
            warn!(oracle_id = %config.oracle_id, "webhook registered with an empty secret");
        }
        info!(oracle_id = %config.oracle_id, header = %config.signature_header, "webhook registered");
        self.configs.insert(config.oracle_id.clone(), config);
    }

    pub fn is_registered(&self, oracle_id: &str) -> bool {
        self.configs.contains_key(oracle_id)
    }

    pub fn processed(&self) -> &ProcessedDeliveries {
        &self.processed
    }

    /// Never fails; problems come back as `success == false` with the HTTP
    /// status to answer with.
    pub async fn handle_webhook(&self, oracle_id: &str, body: &[u8], headers: &HeaderMap) -> WebhookResponse {
        match self.process(oracle_id, body, headers) {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    WebhookError::UnknownOracle(_)
                    | WebhookError::MissingSignature(_)
                    | WebhookError::InvalidSignature => {
                        warn!(security = true, oracle_id, error = %err, "webhook rejected");
                    }
                    WebhookError::InvalidPayload(_) => {
                        warn!(oracle_id, error = %err, "webhook payload rejected");
                    }
                    WebhookError::Internal(_) => {
                        error!(oracle_id, error = %err, "webhook processing failed");
                    }
                }
                WebhookResponse::rejected(err.status_code(), err.public_message())
            }
        }
    }

    fn process(&self, oracle_id: &str, body: &[u8], headers: &HeaderMap) -> Result<WebhookResponse, WebhookError> {
        let config = self
            .configs
            .get(oracle_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| WebhookError::UnknownOracle(oracle_id.to_string()))?;

        let signature = headers
            .get(config.signature_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| WebhookError::MissingSignature(config.signature_header.clone()))?;
        verify_signature(&config, body, signature)?;

        let key = idempotency_key(oracle_id, body);
        if !self.processed.reserve(&key)? {
            info!(oracle_id, "duplicate webhook delivery ignored");
            return Ok(WebhookResponse::accepted("Already processed"));
        }

        self.dispatch(&config, body, headers).map_err(|err| {
            self.processed.release(&key);
            err
        })
    }

    fn dispatch(&self, config: &WebhookConfig, body: &[u8], headers: &HeaderMap) -> Result<WebhookResponse, WebhookError> {
        let data: Value =
            serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let raw_event = event_name(config, &data, headers)
            .ok_or_else(|| WebhookError::InvalidPayload("missing event name".to_string()))?;
        let translated = config
            .event_mapping
            .get(&raw_event)
            .cloned()
            .unwrap_or(raw_event);
        let event = CanonicalEvent::parse(&translated);

        let payload = WebhookPayload {
            oracle_id: config.oracle_id.clone(),
            event_type: event.as_str().to_string(),
            data,
            timestamp: Utc::now(),
        };
        info!(oracle_id = %payload.oracle_id, event = %payload.event_type, "webhook received");

        match event {
            CanonicalEvent::RaceCompleted | CanonicalEvent::MilestoneCompleted | CanonicalEvent::DataAvailable => {
                Ok(self.trigger(config, &payload))
            }
            CanonicalEvent::PullRequestMerged => {
                if merged_flag(&payload.data) == Some(false) {
                    return Ok(WebhookResponse::accepted("Pull request not merged; ignored"));
                }
                Ok(self.trigger(config, &payload))
            }
            CanonicalEvent::Other(_) => Ok(WebhookResponse::accepted("Event ignored")),
        }
    }

    fn trigger(&self, config: &WebhookConfig, payload: &WebhookPayload) -> WebhookResponse {
        let Some(campaign_id) = campaign_id(&payload.data, &config.campaign_field) else {
            return WebhookResponse::accepted("No campaign to resolve");
        };

        self.engine.router().invalidate(&config.oracle_id);
        let job = self.engine.trigger_resolution(&campaign_id, TriggerSource::Webhook);
        info!(
            oracle_id = %config.oracle_id,
            campaign_id = %campaign_id,
            job_id = %job.id,
            event = %payload.event_type,
            "resolution triggered by webhook"
        );
        WebhookResponse::accepted(format!("Resolution triggered: job {}", job.id))
    }
}

/// `"{oracle_id}:{sha256(body) as hex}"`
pub fn idempotency_key(oracle_id: &str, body: &[u8]) -> String {
    format!("{oracle_id}:{}", hex::encode(Sha256::digest(body)))
}

/// Constant-time HMAC check of `header_value` against the raw body.
pub fn verify_signature(config: &WebhookConfig, body: &[u8], header_value: &str) -> Result<(), WebhookError> {
    let encoded = strip_algorithm_prefix(header_value.trim(), config.algorithm);
    let expected = match config.encoding {
        SignatureEncoding::Hex => hex::decode(encoded).map_err(|_| WebhookError::InvalidSignature)?,
        SignatureEncoding::Base64 => BASE64.decode(encoded).map_err(|_| WebhookError::InvalidSignature)?,
    };

    let secret = config.secret.as_bytes();
    let matches = match config.algorithm {
        SignatureAlgorithm::Sha1 => mac_matches::<Hmac<Sha1>>(secret, body, &expected),
        SignatureAlgorithm::Sha256 => mac_matches::<Hmac<Sha256>>(secret, body, &expected),
        SignatureAlgorithm::Sha512 => mac_matches::<Hmac<Sha512>>(secret, body, &expected),
    };

    if matches {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Signature a sender would put in the header for `body`.
pub fn compute_signature(
    algorithm: SignatureAlgorithm,
    encoding: SignatureEncoding,
    secret: &str,
    body: &[u8],
) -> String {
    let digest = match algorithm {
        SignatureAlgorithm::Sha1 => mac_bytes::<Hmac<Sha1>>(secret.as_bytes(), body),
        SignatureAlgorithm::Sha256 => mac_bytes::<Hmac<Sha256>>(secret.as_bytes(), body),
        SignatureAlgorithm::Sha512 => mac_bytes::<Hmac<Sha512>>(secret.as_bytes(), body),
    };
    match encoding {
        SignatureEncoding::Hex => hex::encode(digest),
        SignatureEncoding::Base64 => BASE64.encode(digest),
    }
}

fn mac_matches<M: Mac + KeyInit>(secret: &[u8], body: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = <M as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(expected).is_ok()
}

fn mac_bytes<M: Mac + KeyInit>(secret: &[u8], body: &[u8]) -> Vec<u8> {
    match <M as Mac>::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    }
}

fn strip_algorithm_prefix(value: &str, algorithm: SignatureAlgorithm) -> &str {
    let prefix = algorithm.header_prefix();
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &value[prefix.len()..],
        _ => value,
    }
}

fn event_name(config: &WebhookConfig, data: &Value, headers: &HeaderMap) -> Option<String> {
    if let Some(header) = &config.event_header {
        if let Some(name) = headers.get(header.as_str()).and_then(|v| v.to_str().ok()) {
            return Some(name.to_string());
        }
    }
    [config.event_field.as_str(), "type", "eventType"]
        .iter()
        .find_map(|field| extract_field(data, field).and_then(Value::as_str))
        .map(str::to_string)
}

fn merged_flag(data: &Value) -> Option<bool> {
    ["merged", "pull_request.merged", "data.merged"]
        .iter()
        .find_map(|path| extract_field(data, path).and_then(Value::as_bool))
}

fn campaign_id(data: &Value, field: &str) -> Option<String> {
    match extract_field(data, field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
