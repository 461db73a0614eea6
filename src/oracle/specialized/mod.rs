//! Domain-specific API providers.
//!
//! Each domain wraps the generic [`ApiProvider`] with preset field mappings
//! for well-known services and a normalization pass that turns service
//! vocabulary into a fixed set of fields milestone conditions can target.

use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tracing::debug;

use super::api::ApiProvider;
use super::path::{as_number, number_value};
use super::OracleProvider;
use crate::error::OracleError;
use crate::models::{OracleConfig, OracleResponse, QueryParams};

pub mod academic;
pub mod race_timing;
pub mod source_control;
pub mod streaming;

pub use academic::Academic;
pub use race_timing::RaceTiming;
pub use source_control::SourceControl;
pub use streaming::Streaming;

pub type RaceTimingProvider = SpecializedProvider<RaceTiming>;
pub type SourceControlProvider = SpecializedProvider<SourceControl>;
pub type AcademicProvider = SpecializedProvider<Academic>;
pub type StreamingProvider = SpecializedProvider<Streaming>;

/// Field mappings for a named external service.
#[derive(Debug, Clone, Copy)]
pub struct Preset {
    pub query: &'static [(&'static str, &'static str)],
    pub response: &'static [(&'static str, &'static str)],
}

pub trait Domain: Send + Sync + 'static {
    const NAME: &'static str;

    fn preset(name: &str) -> Option<Preset>;

    /// Rewrites mapped fields into the domain's normalized vocabulary.
    fn normalize(data: &mut Map<String, Value>);
}

pub struct SpecializedProvider<D: Domain> {
    inner: ApiProvider,
    _domain: PhantomData<D>,
}

impl<D: Domain> SpecializedProvider<D> {
    pub fn new(config: OracleConfig, http: Client) -> Result<Self, OracleError> {
        let preset = match config.preset.as_deref() {
            Some(name) => D::preset(name).ok_or_else(|| {
                OracleError::InvalidConfig(format!("unknown {} preset: {name}", D::NAME))
            })?,
            None => Preset {
                query: &[],
                response: &[],
            },
        };

        Ok(Self {
            inner: ApiProvider::with_presets(config, http, preset.query, preset.response),
            _domain: PhantomData,
        })
    }
}

#[async_trait]
impl<D: Domain> OracleProvider for SpecializedProvider<D> {
    fn config(&self) -> &OracleConfig {
        self.inner.config()
    }

    async fn query(&self, params: &QueryParams) -> OracleResponse {
        let mut response = self.inner.fetch(params).await;
        if response.success {
            if let Value::Object(data) = &mut response.data {
                D::normalize(data);
                debug!(oracle_id = %self.inner.config().id, domain = D::NAME, "normalized oracle data");
            }
        }
        response
    }

    async fn health_check(&self) -> bool {
        self.inner.check_health().await
    }

    fn invalidate(&self) {
        self.inner.invalidate();
    }
}

/// Lowercased, trimmed string form of a field, if it is a string.
pub(crate) fn lower_str(data: &Map<String, Value>, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_ascii_lowercase())
}

pub(crate) fn number_field(data: &Map<String, Value>, field: &str) -> Option<f64> {
    data.get(field).and_then(as_number)
}

/// Accepts JSON booleans and the usual textual spellings.
pub(crate) fn flag_field(data: &Map<String, Value>, field: &str) -> Option<bool> {
    match data.get(field)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn set_number(data: &mut Map<String, Value>, field: &str, n: f64) {
    data.insert(field.to_string(), number_value(n));
}

pub(crate) fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
