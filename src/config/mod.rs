//! Environment configuration and the oracle registry file

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::{Campaign, OracleConfig, OracleType, PledgeForResolution, WebhookConfig};
use crate::services::resolution::DEFAULT_MAX_JOBS;
use crate::services::webhook::DEFAULT_MAX_PROCESSED;
use crate::services::{InMemoryDataProvider, OracleRouter, RouterSettings, WebhookHandler};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub registry_file: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub default_poll_interval: Duration,
    pub aggregator_timeout: Duration,
    pub webhook_max_processed: usize,
    pub max_retained_jobs: usize,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let router = RouterSettings::default();
        Self {
            port: 3001,
            registry_file: None,
            cache_ttl: router.cache_ttl,
            default_poll_interval: router.default_poll_interval,
            aggregator_timeout: router.aggregator_timeout,
            webhook_max_processed: DEFAULT_MAX_PROCESSED,
            max_retained_jobs: DEFAULT_MAX_JOBS,
            cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_var("PORT")?.unwrap_or(defaults.port),
            registry_file: env::var("ORACLE_REGISTRY_FILE")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            cache_ttl: parse_var("ROUTER_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            default_poll_interval: parse_var("DEFAULT_POLL_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_poll_interval),
            aggregator_timeout: parse_var("AGGREGATOR_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.aggregator_timeout),
            webhook_max_processed: parse_var("WEBHOOK_MAX_PROCESSED")?.unwrap_or(defaults.webhook_max_processed),
            max_retained_jobs: parse_var("MAX_RETAINED_JOBS")?.unwrap_or(defaults.max_retained_jobs),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_allowed_origins),
        })
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            cache_ttl: self.cache_ttl,
            default_poll_interval: self.default_poll_interval,
            aggregator_timeout: self.aggregator_timeout,
        }
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        _ => Ok(None),
    }
}

/// Oracles, webhooks and seed data loaded at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFile {
    #[serde(default)]
    pub oracles: Vec<OracleConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub pledges: Vec<PledgeForResolution>,
}

impl RegistryFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading oracle registry {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing oracle registry {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Registers oracles (aggregators after their members), webhooks and
    /// seed data. Any oracle that fails to register aborts startup.
    pub fn apply(&self, router: &OracleRouter, webhooks: &WebhookHandler, data: &InMemoryDataProvider) -> Result<()> {
        let (aggregators, members): (Vec<&OracleConfig>, Vec<&OracleConfig>) = self
            .oracles
            .iter()
            .partition(|c| c.oracle_type == OracleType::Aggregator);

        for config in members.into_iter().chain(aggregators) {
            router
                .register_provider(config.clone())
                .with_context(|| format!("registering oracle {}", config.id))?;
        }

        for webhook in &self.webhooks {
            if router.provider(&webhook.oracle_id).is_none() {
                warn!(oracle_id = %webhook.oracle_id, "webhook configured for an unregistered oracle");
            }
            webhooks.register(webhook.clone());
        }

        for campaign in &self.campaigns {
            data.insert_campaign(campaign.clone());
        }
        for pledge in &self.pledges {
            data.insert_pledge(pledge.clone());
        }

        info!(
            oracles = self.oracles.len(),
            webhooks = self.webhooks.len(),
            campaigns = self.campaigns.len(),
            pledges = self.pledges.len(),
            "oracle registry loaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ResolutionEngine;
    use std::sync::Arc;

    const REGISTRY: &str = r#"{
        "oracles": [
            {"id": "consensus", "name": "Consensus", "type": "aggregator",
             "sources": ["witness-a", "witness-b"], "aggregationMethod": "all"},
            {"id": "witness-a", "name": "Witness A", "type": "attestation"},
            {"id": "witness-b", "name": "Witness B", "type": "attestation", "trustLevel": "official"}
        ],
        "webhooks": [{"oracleId": "witness-a", "secret": "s"}],
        "campaigns": [{"id": "c1", "name": "Marathon", "milestones": []}],
        "pledges": [{"id": "p1", "campaignId": "c1", "backer": "b", "escrowedAmount": "1000", "pledgeType": "flat"}]
    }"#;

    #[tokio::test]
    async fn registry_registers_members_before_aggregators() {
        let registry = RegistryFile::parse(REGISTRY).unwrap();
        let router = Arc::new(OracleRouter::new(RouterSettings::default()));
        let data = Arc::new(InMemoryDataProvider::new());
        let engine = ResolutionEngine::new(Arc::clone(&router), data.clone());
        let webhooks = WebhookHandler::new(engine, 100);

        registry.apply(&router, &webhooks, &data).unwrap();

        assert_eq!(router.provider_ids(), vec!["consensus", "witness-a", "witness-b"]);
        assert!(webhooks.is_registered("witness-a"));
        assert!(data.campaign("c1").is_some());
        assert!(data.pledge("p1").is_some());
    }

    #[tokio::test]
    async fn registry_rejects_invalid_oracles() {
        let registry =
            RegistryFile::parse(r#"{"oracles": [{"id": "x", "name": "X", "type": "api"}]}"#).unwrap();
        let router = Arc::new(OracleRouter::new(RouterSettings::default()));
        let data = Arc::new(InMemoryDataProvider::new());
        let engine = ResolutionEngine::new(Arc::clone(&router), data.clone());
        let webhooks = WebhookHandler::new(engine, 100);

        assert!(registry.apply(&router, &webhooks, &data).is_err());
    }

    #[test]
    fn router_settings_follow_config() {
        let config = AppConfig {
            cache_ttl: Duration::from_secs(5),
            ..AppConfig::default()
        };
        assert_eq!(config.router_settings().cache_ttl, Duration::from_secs(5));
        assert_eq!(config.port, 3001);
    }
}
