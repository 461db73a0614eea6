//! HTTP-backed oracle provider

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::{Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::cache::TtlCache;
use super::path::project;
use super::OracleProvider;
use crate::error::OracleError;
use crate::models::{AuthConfig, HttpMethod, OracleConfig, OracleResponse, QueryParams};

/// Generic API provider: maps params onto a request, retries with
/// exponential backoff, maps the JSON answer back into oracle data and
/// caches successes per `(oracle id, params)`.
pub struct ApiProvider {
    config: OracleConfig,
    http: Client,
    cache: TtlCache<OracleResponse>,
}

impl ApiProvider {
    pub fn new(config: OracleConfig, http: Client) -> Self {
        let cache = TtlCache::new(Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            http,
            cache,
        }
    }

    /// Builds a provider whose mappings start from `query_preset` and
    /// `response_preset`; entries in the config win field by field.
    pub fn with_presets(
        mut config: OracleConfig,
        http: Client,
        query_preset: &[(&str, &str)],
        response_preset: &[(&str, &str)],
    ) -> Self {
        config.query_mapping = merge_mapping(query_preset, &config.query_mapping);
        config.response_mapping = merge_mapping(response_preset, &config.response_mapping);
        Self::new(config, http)
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn cache(&self) -> &TtlCache<OracleResponse> {
        &self.cache
    }

    /// Cached, retried fetch. Never returns an error; failures are reported
    /// in the response.
    pub async fn fetch(&self, params: &QueryParams) -> OracleResponse {
        let key = self.cache_key(params);
        if let Some(mut hit) = self.cache.get(&key) {
            debug!(oracle_id = %self.config.id, "provider cache hit");
            hit.cached = true;
            return hit;
        }

        let mut last_error = String::new();
        for attempt in 0..=self.config.retries {
            match self.send_once(params).await {
                Ok(raw) => {
                    let data = self.map_response(&raw);
                    let response = OracleResponse::ok(&self.config.id, data, Some(raw));
                    self.cache.insert(key, response.clone());
                    return response;
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < self.config.retries {
                        let delay = self.backoff(attempt);
                        warn!(
                            oracle_id = %self.config.id,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "oracle request failed; retrying"
                        );
                        sleep(delay).await;
                    }
                }
            }
        }

        warn!(oracle_id = %self.config.id, error = %last_error, "oracle request exhausted retries");
        OracleResponse::failure(&self.config.id, last_error)
    }

    /// `retry_delay * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.config.retry_delay_ms.saturating_mul(factor))
    }

    fn cache_key(&self, params: &QueryParams) -> String {
        let serialized = serde_json::to_string(params).unwrap_or_default();
        format!("{}:{}", self.config.id, serialized)
    }

    async fn send_once(&self, params: &QueryParams) -> Result<Value, OracleError> {
        let request = self.build_request(params)?;
        let timeout_ms = self.config.timeout_ms;

        let outcome = timeout(Duration::from_millis(timeout_ms), async move {
            let response = request
                .send()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(OracleError::Transport(format!("HTTP {status}")));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| OracleError::Transport(format!("malformed response body: {e}")))
        })
        .await;

        outcome.unwrap_or(Err(OracleError::Timeout(timeout_ms)))
    }

    fn build_request(&self, params: &QueryParams) -> Result<RequestBuilder, OracleError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| OracleError::InvalidConfig(format!("{} has no endpoint", self.config.id)))?;

        let (url, remaining) = fill_endpoint(endpoint, params)?;
        let outbound = map_params(&remaining, &self.config.query_mapping);

        let mut request = match self.config.method {
            HttpMethod::Get => {
                let pairs: Vec<(String, String)> = outbound
                    .iter()
                    .map(|(k, v)| (k.clone(), param_string(v)))
                    .collect();
                self.http.get(url).query(&pairs)
            }
            HttpMethod::Post => self.http.post(url).json(&Value::Object(outbound)),
            HttpMethod::Put => self.http.put(url).json(&Value::Object(outbound)),
        };

        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        Ok(apply_auth(request, &self.config.auth))
    }

    fn map_response(&self, raw: &Value) -> Value {
        if self.config.response_mapping.is_empty() {
            raw.clone()
        } else {
            project(raw, &self.config.response_mapping)
        }
    }

    pub async fn check_health(&self) -> bool {
        let Some(url) = self
            .config
            .health_endpoint
            .as_deref()
            .or(self.config.endpoint.as_deref())
        else {
            return false;
        };

        let request = apply_auth(self.http.get(url), &self.config.auth);
        match timeout(Duration::from_millis(self.config.timeout_ms), request.send()).await {
            Ok(Ok(response)) => !response.status().is_server_error(),
            _ => false,
        }
    }
}

#[async_trait]
impl OracleProvider for ApiProvider {
    fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn query(&self, params: &QueryParams) -> OracleResponse {
        self.fetch(params).await
    }

    async fn health_check(&self) -> bool {
        self.check_health().await
    }

    fn invalidate(&self) {
        self.cache.clear();
    }
}

fn merge_mapping(
    preset: &[(&str, &str)],
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged: BTreeMap<String, String> = preset
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Substitutes `{name}` path segments from params. Used params are removed
/// from the set sent as query string or body.
fn fill_endpoint(endpoint: &str, params: &QueryParams) -> Result<(Url, QueryParams), OracleError> {
    let template = Url::parse(endpoint).map_err(|e| OracleError::InvalidConfig(format!("{endpoint}: {e}")))?;
    let mut remaining = params.clone();
    let Some(segments) = template.path_segments() else {
        return Ok((template, remaining));
    };
    let segments: Vec<String> = segments.map(str::to_string).collect();

    let mut url = template.clone();
    url.set_path("");
    for segment in &segments {
        match placeholder(segment).and_then(|name| params.get(name).map(|value| (name, value))) {
            Some((name, value)) => {
                url.path_segments_mut()
                    .map_err(|_| OracleError::InvalidConfig(format!("{endpoint}: cannot be a base URL")))?
                    .push(&param_string(value));
                remaining.remove(name);
            }
            None => {
                // Already percent-encoded by the parser; `set_path` keeps escapes as they are.
                let path = format!("{}/{}", url.path().trim_end_matches('/'), segment);
                url.set_path(&path);
            }
        }
    }
    Ok((url, remaining))
}

/// Name inside a `{name}` segment, as the URL parser encodes it.
fn placeholder(segment: &str) -> Option<&str> {
    segment
        .strip_prefix("%7B")
        .and_then(|rest| rest.strip_suffix("%7D"))
        .filter(|name| !name.is_empty())
}

/// With a mapping, only mapped params go out (renamed). Without one, all do.
fn map_params(params: &QueryParams, mapping: &BTreeMap<String, String>) -> Map<String, Value> {
    if mapping.is_empty() {
        return params.clone();
    }
    mapping
        .iter()
        .filter_map(|(from, to)| params.get(from).map(|v| (to.clone(), v.clone())))
        .collect()
}

fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_auth(request: RequestBuilder, auth: &AuthConfig) -> RequestBuilder {
    match auth {
        AuthConfig::None => request,
        AuthConfig::ApiKey { header, key } => request.header(header.as_str(), key.as_str()),
        AuthConfig::Bearer { token } => request.bearer_auth(token),
        AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
    }
}
