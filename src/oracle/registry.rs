//! Provider construction keyed by declared provider type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use super::aggregator::AggregatorProvider;
use super::api::ApiProvider;
use super::attestation::AttestationProvider;
use super::specialized::{AcademicProvider, RaceTimingProvider, SourceControlProvider, StreamingProvider};
use super::OracleProvider;
use crate::error::OracleError;
use crate::models::{OracleConfig, OracleType, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderType {
    Api(ProviderKind),
    Attestation,
    Aggregator,
}

impl ProviderType {
    pub fn of(config: &OracleConfig) -> Option<Self> {
        match config.oracle_type {
            OracleType::Api => Some(Self::Api(config.provider)),
            OracleType::Attestation => Some(Self::Attestation),
            OracleType::Aggregator => Some(Self::Aggregator),
            OracleType::Unknown => None,
        }
    }
}

/// What a constructor may need beyond the config itself.
pub struct ProviderContext<'a> {
    pub http: &'a Client,
    /// Already-registered providers, for aggregator members.
    pub lookup: &'a (dyn Fn(&str) -> Option<Arc<dyn OracleProvider>> + Sync),
    /// Upper bound on each aggregator member call.
    pub aggregator_timeout: Duration,
}

pub type ProviderConstructor =
    fn(&OracleConfig, &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError>;

pub struct ProviderRegistry {
    constructors: HashMap<ProviderType, ProviderConstructor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ProviderType::Api(ProviderKind::Generic), build_api);
        registry.register(ProviderType::Api(ProviderKind::RaceTiming), build_race_timing);
        registry.register(ProviderType::Api(ProviderKind::SourceControl), build_source_control);
        registry.register(ProviderType::Api(ProviderKind::Academic), build_academic);
        registry.register(ProviderType::Api(ProviderKind::Streaming), build_streaming);
        registry.register(ProviderType::Attestation, build_attestation);
        registry.register(ProviderType::Aggregator, build_aggregator);
        registry
    }

    pub fn register(&mut self, provider_type: ProviderType, constructor: ProviderConstructor) {
        self.constructors.insert(provider_type, constructor);
    }

    pub fn build(
        &self,
        config: &OracleConfig,
        ctx: &ProviderContext<'_>,
    ) -> Result<Arc<dyn OracleProvider>, OracleError> {
        let provider_type = ProviderType::of(config).ok_or_else(|| {
            OracleError::UnknownProviderType(format!("{:?} ({})", config.oracle_type, config.id))
        })?;
        let constructor = self
            .constructors
            .get(&provider_type)
            .ok_or_else(|| OracleError::UnknownProviderType(format!("{provider_type:?}")))?;
        constructor(config, ctx)
    }
}

fn build_api(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(ApiProvider::new(config.clone(), ctx.http.clone())))
}

fn build_race_timing(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(RaceTimingProvider::new(config.clone(), ctx.http.clone())?))
}

fn build_source_control(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(SourceControlProvider::new(config.clone(), ctx.http.clone())?))
}

fn build_academic(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(AcademicProvider::new(config.clone(), ctx.http.clone())?))
}

fn build_streaming(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(StreamingProvider::new(config.clone(), ctx.http.clone())?))
}

fn build_attestation(config: &OracleConfig, _ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    Ok(Arc::new(AttestationProvider::new(config.clone())?))
}

fn build_aggregator(config: &OracleConfig, ctx: &ProviderContext<'_>) -> Result<Arc<dyn OracleProvider>, OracleError> {
    let members = config
        .sources
        .iter()
        .map(|source_id| {
            (ctx.lookup)(source_id).ok_or_else(|| OracleError::MissingSource {
                aggregator: config.id.clone(),
                source_id: source_id.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let timeout = Duration::from_millis(config.timeout_ms).min(ctx.aggregator_timeout);
    Ok(Arc::new(AggregatorProvider::new(config.clone(), members, timeout)))
}
