//! Oracle configuration, milestone conditions and verification results

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::{Validate, ValidationError};

/// Parameters handed to a provider query.
pub type QueryParams = Map<String, Value>;

/// Oracle category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OracleType {
    Api,
    Attestation,
    Aggregator,
    #[serde(other)]
    Unknown,
}

/// Concrete implementation behind an `api` oracle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    #[default]
    Generic,
    RaceTiming,
    SourceControl,
    Academic,
    Streaming,
}

/// Trust level of the data source
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Official,
    Verified,
    Community,
    #[default]
    Custom,
}

impl TrustLevel {
    /// Default consensus weight for sources that have no explicit weight.
    pub fn default_weight(self) -> f64 {
        match self {
            TrustLevel::Official => 1.0,
            TrustLevel::Verified => 0.8,
            TrustLevel::Community => 0.5,
            TrustLevel::Custom => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
}

/// Credentials attached to outbound provider requests
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthConfig {
    #[default]
    None,
    ApiKey { header: String, key: String },
    Bearer { token: String },
    Basic { username: String, password: String },
}

/// Consensus method used by aggregator oracles
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    All,
    #[default]
    Majority,
    Any,
    Weighted,
    Threshold,
}

impl AggregationMethod {
    pub fn default_threshold(self) -> f64 {
        match self {
            AggregationMethod::Threshold => 1.0,
            _ => 0.5,
        }
    }
}

/// Registration-time oracle description. Immutable once registered except
/// for the `active` flag, which the router tracks separately.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_oracle_config"))]
pub struct OracleConfig {
    #[validate(length(min = 1))]
    pub id: String,
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub oracle_type: OracleType,
    #[serde(default)]
    pub provider: ProviderKind,
    /// Named external service whose field mappings seed a specialized provider.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub trust_level: TrustLevel,
    #[serde(default = "default_active")]
    pub active: bool,

    #[validate(url)]
    #[serde(default)]
    pub endpoint: Option<String>,
    #[validate(url)]
    #[serde(default)]
    pub health_endpoint: Option<String>,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Request param name -> outbound param name.
    #[serde(default)]
    pub query_mapping: BTreeMap<String, String>,
    /// Output field -> dot path into the raw response body.
    #[serde(default)]
    pub response_mapping: BTreeMap<String, String>,

    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    #[serde(default)]
    pub aggregation_threshold: Option<f64>,
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,

    /// Hex ed25519 keys allowed to sign attestations. Empty means unsigned
    /// submissions are accepted.
    #[serde(default)]
    pub attester_keys: Vec<String>,
}

fn default_active() -> bool {
    true
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn validate_oracle_config(config: &OracleConfig) -> Result<(), ValidationError> {
    match config.oracle_type {
        OracleType::Api if config.endpoint.is_none() => {
            return Err(ValidationError::new("api_oracle_requires_endpoint"));
        }
        OracleType::Aggregator if config.sources.is_empty() => {
            return Err(ValidationError::new("aggregator_requires_sources"));
        }
        _ => {}
    }

    if let Some(threshold) = config.aggregation_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ValidationError::new("threshold_out_of_range"));
        }
    }

    if config.source_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(ValidationError::new("negative_source_weight"));
    }

    Ok(())
}

impl OracleConfig {
    fn base(id: &str, oracle_type: OracleType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            oracle_type,
            provider: ProviderKind::Generic,
            preset: None,
            trust_level: TrustLevel::default(),
            active: true,
            endpoint: None,
            health_endpoint: None,
            method: HttpMethod::Get,
            headers: HashMap::new(),
            auth: AuthConfig::None,
            query_mapping: BTreeMap::new(),
            response_mapping: BTreeMap::new(),
            retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            poll_interval_secs: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            sources: Vec::new(),
            aggregation_method: AggregationMethod::default(),
            aggregation_threshold: None,
            source_weights: HashMap::new(),
            attester_keys: Vec::new(),
        }
    }

    pub fn api(id: &str, endpoint: &str) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            ..Self::base(id, OracleType::Api)
        }
    }

    pub fn attestation(id: &str) -> Self {
        Self::base(id, OracleType::Attestation)
    }

    pub fn aggregator(id: &str, sources: &[&str], method: AggregationMethod) -> Self {
        Self {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            aggregation_method: method,
            ..Self::base(id, OracleType::Aggregator)
        }
    }

    pub fn threshold(&self) -> f64 {
        self.aggregation_threshold
            .unwrap_or_else(|| self.aggregation_method.default_threshold())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    #[default]
    Completion,
    Threshold,
    Range,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Exists,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    #[serde(other)]
    Unknown,
}

/// Condition a milestone's oracle data must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneCondition {
    #[serde(rename = "type", default)]
    pub condition_type: ConditionType,
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_end: Option<Value>,
}

impl MilestoneCondition {
    pub fn new(field: &str, operator: ConditionOperator, value: Option<Value>) -> Self {
        let condition_type = match operator {
            ConditionOperator::Exists => ConditionType::Completion,
            ConditionOperator::Between => ConditionType::Range,
            ConditionOperator::Unknown => ConditionType::Custom,
            _ => ConditionType::Threshold,
        };
        Self {
            condition_type,
            field: field.to_string(),
            operator,
            value,
            value_end: None,
        }
    }

    pub fn between(field: &str, low: Value, high: Value) -> Self {
        Self {
            value_end: Some(high),
            ..Self::new(field, ConditionOperator::Between, Some(low))
        }
    }
}

/// Result of a single provider query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleResponse {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OracleResponse {
    pub fn ok(source: &str, data: Value, raw_data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            raw_data,
            timestamp: Utc::now(),
            source: source.to_string(),
            cached: false,
            error: None,
        }
    }

    pub fn failure(source: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            raw_data: None,
            timestamp: Utc::now(),
            source: source.to_string(),
            cached: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of checking one milestone. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub milestone_id: String,
    pub campaign_id: String,
    pub oracle_id: String,
    pub verified: bool,
    pub oracle_data: Value,
    pub evaluated_condition: MilestoneCondition,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
