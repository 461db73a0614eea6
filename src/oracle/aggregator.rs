//! Multi-source oracle: fans a query out to member providers and reduces
//! their answers with a consensus method.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use super::consensus::{aggregate, AggregatedResult, SourceResult};
use super::OracleProvider;
use crate::models::{OracleConfig, OracleResponse, QueryParams};

pub struct AggregatorSource {
    pub id: String,
    pub provider: Arc<dyn OracleProvider>,
    pub weight: f64,
}

pub struct AggregatorProvider {
    config: OracleConfig,
    sources: Vec<AggregatorSource>,
    timeout: Duration,
}

impl AggregatorProvider {
    /// Member weights come from `sourceWeights`, falling back to the member's
    /// trust level.
    pub fn new(
        config: OracleConfig,
        members: Vec<Arc<dyn OracleProvider>>,
        timeout: Duration,
    ) -> Self {
        let sources = members
            .into_iter()
            .map(|provider| {
                let id = provider.id().to_string();
                let weight = config
                    .source_weights
                    .get(&id)
                    .copied()
                    .unwrap_or_else(|| provider.config().trust_level.default_weight());
                AggregatorSource {
                    id,
                    provider,
                    weight,
                }
            })
            .collect();

        Self {
            config,
            sources,
            timeout,
        }
    }

    pub fn sources(&self) -> &[AggregatorSource] {
        &self.sources
    }

    pub async fn query_aggregated(&self, params: &QueryParams) -> AggregatedResult {
        let queries = self.sources.iter().map(|source| async move {
            let started = Instant::now();
            let outcome = timeout(self.timeout, source.provider.query(params)).await;
            let response_time_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(response) => SourceResult {
                    source_id: source.id.clone(),
                    success: response.success,
                    data: response.data,
                    weight: source.weight,
                    response_time_ms,
                    error: response.error,
                },
                Err(_) => SourceResult {
                    source_id: source.id.clone(),
                    success: false,
                    data: Value::Null,
                    weight: source.weight,
                    response_time_ms,
                    error: Some(format!("timed out after {}ms", self.timeout.as_millis())),
                },
            }
        });

        let results = join_all(queries).await;
        let aggregated = aggregate(self.config.aggregation_method, self.config.threshold(), results);

        if aggregated.consensus_reached {
            info!(
                oracle_id = %self.config.id,
                consensus_percentage = aggregated.consensus_percentage,
                "aggregator consensus reached"
            );
        } else {
            warn!(
                oracle_id = %self.config.id,
                method = ?self.config.aggregation_method,
                consensus_percentage = aggregated.consensus_percentage,
                "aggregator consensus not reached"
            );
        }
        aggregated
    }
}

#[async_trait]
impl OracleProvider for AggregatorProvider {
    fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn query(&self, params: &QueryParams) -> OracleResponse {
        let aggregated = self.query_aggregated(params).await;
        let raw = serde_json::to_value(&aggregated).ok();

        if aggregated.consensus_reached {
            OracleResponse::ok(&self.config.id, aggregated.final_data, raw)
        } else {
            let mut response = OracleResponse::failure(
                &self.config.id,
                format!(
                    "Consensus not reached ({:?}, {}% agreement)",
                    self.config.aggregation_method, aggregated.consensus_percentage
                ),
            );
            response.raw_data = raw;
            response
        }
    }

    /// Healthy while at least one member is.
    async fn health_check(&self) -> bool {
        let checks = self.sources.iter().map(|s| s.provider.health_check());
        join_all(checks).await.into_iter().any(|healthy| healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationMethod, TrustLevel};
    use serde_json::json;

    struct Fixed {
        config: OracleConfig,
        answer: Option<Value>,
        delay: Duration,
        healthy: bool,
    }

    impl Fixed {
        fn new(id: &str, answer: Option<Value>) -> Self {
            Self {
                config: OracleConfig::attestation(id),
                answer,
                delay: Duration::ZERO,
                healthy: true,
            }
        }
    }

    #[async_trait]
    impl OracleProvider for Fixed {
        fn config(&self) -> &OracleConfig {
            &self.config
        }

        async fn query(&self, _params: &QueryParams) -> OracleResponse {
            tokio::time::sleep(self.delay).await;
            match &self.answer {
                Some(data) => OracleResponse::ok(&self.config.id, data.clone(), None),
                None => OracleResponse::failure(&self.config.id, "source down"),
            }
        }

        async fn health_check(&self) -> bool {
            self.healthy
        }
    }

    fn members(list: Vec<Fixed>) -> Vec<Arc<dyn OracleProvider>> {
        list.into_iter()
            .map(|f| Arc::new(f) as Arc<dyn OracleProvider>)
            .collect()
    }

    #[tokio::test]
    async fn majority_of_three_with_one_failure_verifies() {
        let config = OracleConfig::aggregator("agg", &["a", "b", "c"], AggregationMethod::Majority);
        let provider = AggregatorProvider::new(
            config,
            members(vec![
                Fixed::new("a", Some(json!({"distanceKm": 42}))),
                Fixed::new("b", Some(json!({"distanceKm": 42}))),
                Fixed::new("c", None),
            ]),
            Duration::from_secs(1),
        );

        let aggregated = provider.query_aggregated(&QueryParams::new()).await;
        assert!(aggregated.consensus_reached);
        assert!(aggregated.final_verified);
        assert_eq!(aggregated.source_results.len(), 3);
        assert_eq!(aggregated.source_results[2].error.as_deref(), Some("source down"));

        let response = provider.query(&QueryParams::new()).await;
        assert!(response.success);
        assert_eq!(response.data, json!({"distanceKm": 42}));
        assert!(response.raw_data.unwrap().get("sourceResults").is_some());
    }

    #[tokio::test]
    async fn slow_sources_count_as_failures() {
        let mut slow = Fixed::new("slow", Some(json!({"ok": true})));
        slow.delay = Duration::from_millis(300);
        let config = OracleConfig::aggregator("agg", &["fast", "slow"], AggregationMethod::All);
        let provider = AggregatorProvider::new(
            config,
            members(vec![Fixed::new("fast", Some(json!({"ok": true}))), slow]),
            Duration::from_millis(50),
        );

        let response = provider.query(&QueryParams::new()).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("Consensus not reached"));
    }

    #[test]
    fn weights_fall_back_to_trust_level() {
        let mut official = Fixed::new("official", None);
        official.config.trust_level = TrustLevel::Official;
        let community = Fixed::new("community", None);

        let mut config = OracleConfig::aggregator("agg", &["official", "community"], AggregationMethod::Weighted);
        config.source_weights.insert("community".into(), 0.9);
        let provider = AggregatorProvider::new(config, members(vec![official, community]), Duration::from_secs(1));

        assert_eq!(provider.sources()[0].weight, 1.0);
        assert_eq!(provider.sources()[1].weight, 0.9);
    }

    #[tokio::test]
    async fn healthy_while_any_member_is() {
        let mut down = Fixed::new("down", None);
        down.healthy = false;
        let mut also_down = Fixed::new("also-down", None);
        also_down.healthy = false;

        let config = OracleConfig::aggregator("agg", &["down", "up"], AggregationMethod::Any);
        let mixed = AggregatorProvider::new(
            config.clone(),
            members(vec![down, Fixed::new("up", None)]),
            Duration::from_secs(1),
        );
        assert!(mixed.health_check().await);

        let mut d2 = Fixed::new("down", None);
        d2.healthy = false;
        let dead = AggregatorProvider::new(config, members(vec![d2, also_down]), Duration::from_secs(1));
        assert!(!dead.health_check().await);
    }
}
