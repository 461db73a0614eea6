//! Oracle router: registry of live providers, shared response cache,
//! polling subscriptions and milestone verification.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::scheduler::Scheduler;
use crate::error::OracleError;
use crate::models::{MilestoneCondition, OracleConfig, OracleResponse, QueryParams, VerificationResult};
use crate::oracle::cache::TtlCache;
use crate::oracle::{Attestation, AttestationSubmission, OracleProvider, ProviderContext, ProviderRegistry};

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub cache_ttl: Duration,
    pub default_poll_interval: Duration,
    pub aggregator_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            default_poll_interval: Duration::from_secs(30),
            aggregator_timeout: Duration::from_secs(10),
        }
    }
}

struct ProviderEntry {
    provider: Arc<dyn OracleProvider>,
    active: AtomicBool,
}

pub type SubscriptionCallback = Arc<dyn Fn(OracleResponse) + Send + Sync>;

/// Handle returned by [`OracleRouter::subscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: String,
    oracle_id: String,
    scheduler: Scheduler,
    router: Weak<OracleRouter>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn oracle_id(&self) -> &str {
        &self.oracle_id
    }

    /// Stops future polls. Returns false if already cancelled.
    pub fn cancel(&self) -> bool {
        match self.router.upgrade() {
            Some(router) => router.unsubscribe(&self.id),
            None => self.scheduler.cancel(&self.id),
        }
    }

    pub fn is_active(&self) -> bool {
        self.scheduler.is_armed(&self.id)
    }
}

pub struct OracleRouter {
    providers: DashMap<String, Arc<ProviderEntry>>,
    registry: ProviderRegistry,
    cache: TtlCache<OracleResponse>,
    subscriptions: Scheduler,
    subscription_owners: DashMap<String, String>,
    http: Client,
    settings: RouterSettings,
}

impl OracleRouter {
    pub fn new(settings: RouterSettings) -> Self {
        Self::with_registry(settings, ProviderRegistry::with_defaults())
    }

    pub fn with_registry(settings: RouterSettings, registry: ProviderRegistry) -> Self {
        Self {
            providers: DashMap::new(),
            registry,
            cache: TtlCache::new(settings.cache_ttl),
            subscriptions: Scheduler::new(),
            subscription_owners: DashMap::new(),
            http: Client::new(),
            settings,
        }
    }

    /// Validates `config`, builds its provider and makes it routable.
    /// Re-registering an id replaces the previous provider.
    pub fn register_provider(&self, config: OracleConfig) -> Result<Arc<dyn OracleProvider>, OracleError> {
        config
            .validate()
            .map_err(|e| OracleError::InvalidConfig(format!("{}: {e}", config.id)))?;

        let lookup = |id: &str| self.providers.get(id).map(|entry| Arc::clone(&entry.provider));
        let ctx = ProviderContext {
            http: &self.http,
            lookup: &lookup,
            aggregator_timeout: self.settings.aggregator_timeout,
        };
        let provider = self.registry.build(&config, &ctx)?;

        let entry = Arc::new(ProviderEntry {
            provider: Arc::clone(&provider),
            active: AtomicBool::new(config.active),
        });
        if self.providers.insert(config.id.clone(), entry).is_some() {
            warn!(oracle_id = %config.id, "oracle re-registered; previous provider replaced");
            self.invalidate(&config.id);
        }

        info!(
            oracle_id = %config.id,
            oracle_type = ?config.oracle_type,
            provider = ?config.provider,
            "oracle registered"
        );
        Ok(provider)
    }

    /// Removes an oracle, its cached responses and its subscriptions.
    pub fn unregister(&self, oracle_id: &str) -> bool {
        let removed = self.providers.remove(oracle_id).is_some();
        if removed {
            self.invalidate(oracle_id);
            let owned: Vec<String> = self
                .subscription_owners
                .iter()
                .filter(|entry| entry.value() == oracle_id)
                .map(|entry| entry.key().clone())
                .collect();
            for subscription_id in owned {
                self.unsubscribe(&subscription_id);
            }
            info!(oracle_id, "oracle unregistered");
        }
        removed
    }

    pub fn provider(&self, oracle_id: &str) -> Option<Arc<dyn OracleProvider>> {
        self.providers.get(oracle_id).map(|entry| Arc::clone(&entry.provider))
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn config(&self, oracle_id: &str) -> Option<OracleConfig> {
        self.providers.get(oracle_id).map(|entry| {
            let mut config = entry.provider.config().clone();
            config.active = entry.active.load(Ordering::SeqCst);
            config
        })
    }

    pub fn set_active(&self, oracle_id: &str, active: bool) -> Result<(), OracleError> {
        let entry = self.entry(oracle_id)?;
        entry.active.store(active, Ordering::SeqCst);
        info!(oracle_id, active, "oracle active flag changed");
        Ok(())
    }

    pub fn is_active(&self, oracle_id: &str) -> bool {
        self.providers
            .get(oracle_id)
            .is_some_and(|entry| entry.active.load(Ordering::SeqCst))
    }

    fn entry(&self, oracle_id: &str) -> Result<Arc<ProviderEntry>, OracleError> {
        self.providers
            .get(oracle_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OracleError::UnknownOracle(oracle_id.to_string()))
    }

    /// Cache-checked dispatch. Only configuration problems are errors; a
    /// failed query is an `OracleResponse` with `success == false`.
    pub async fn query(
        &self,
        oracle_id: &str,
        campaign_id: &str,
        milestone_id: &str,
        params: &QueryParams,
    ) -> Result<OracleResponse, OracleError> {
        self.dispatch(oracle_id, campaign_id, milestone_id, params, true).await
    }

    async fn dispatch(
        &self,
        oracle_id: &str,
        campaign_id: &str,
        milestone_id: &str,
        params: &QueryParams,
        use_cache: bool,
    ) -> Result<OracleResponse, OracleError> {
        let entry = self.entry(oracle_id)?;
        if !entry.active.load(Ordering::SeqCst) {
            return Err(OracleError::Inactive(oracle_id.to_string()));
        }

        let key = cache_key(oracle_id, campaign_id, milestone_id, params);
        if use_cache {
            if let Some(mut hit) = self.cache.get(&key) {
                debug!(oracle_id, campaign_id, milestone_id, "router cache hit");
                hit.cached = true;
                return Ok(hit);
            }
        }

        let mut request = params.clone();
        request
            .entry("campaignId")
            .or_insert_with(|| Value::from(campaign_id));
        request
            .entry("milestoneId")
            .or_insert_with(|| Value::from(milestone_id));

        let response = entry.provider.query(&request).await;
        if response.success {
            self.cache.insert(key, response.clone());
        } else {
            warn!(
                oracle_id,
                campaign_id,
                milestone_id,
                error = response.error.as_deref().unwrap_or(""),
                "oracle query failed"
            );
        }
        Ok(response)
    }

    /// Never fails: any problem becomes `verified == false` with the error.
    pub async fn verify_milestone(
        &self,
        oracle_id: &str,
        campaign_id: &str,
        milestone_id: &str,
        condition: &MilestoneCondition,
        params: &QueryParams,
    ) -> VerificationResult {
        let outcome = self.query(oracle_id, campaign_id, milestone_id, params).await;

        let (verified, oracle_data, error) = match outcome {
            Ok(response) if response.success => {
                let verified = self
                    .provider(oracle_id)
                    .is_some_and(|provider| provider.verify_condition(&response.data, condition));
                (verified, response.data, None)
            }
            Ok(response) => (false, response.data, response.error),
            Err(err) => (false, Value::Null, Some(err.to_string())),
        };

        info!(oracle_id, campaign_id, milestone_id, verified, "milestone verified");
        VerificationResult {
            milestone_id: milestone_id.to_string(),
            campaign_id: campaign_id.to_string(),
            oracle_id: oracle_id.to_string(),
            verified,
            oracle_data,
            evaluated_condition: condition.clone(),
            timestamp: Utc::now(),
            error,
        }
    }

    /// Polls the oracle every `interval` (default from settings), bypassing
    /// the router cache, and hands each response to `callback`.
    pub fn subscribe(
        self: &Arc<Self>,
        oracle_id: &str,
        campaign_id: &str,
        params: QueryParams,
        callback: SubscriptionCallback,
        interval: Option<Duration>,
    ) -> Result<Subscription, OracleError> {
        let provider = self.entry(oracle_id)?;
        let interval = interval
            .or_else(|| provider.provider.config().poll_interval_secs.map(Duration::from_secs))
            .unwrap_or(self.settings.default_poll_interval);
        if interval.is_zero() {
            return Err(OracleError::Subscription("poll interval must be greater than zero".into()));
        }

        let id = format!("sub:{}", Uuid::new_v4());
        let router: Weak<Self> = Arc::downgrade(self);
        let oracle = oracle_id.to_string();
        let campaign = campaign_id.to_string();
        let params = Arc::new(params);

        self.subscriptions.arm_interval(&id, interval, move || {
            let router = router.clone();
            let oracle = oracle.clone();
            let campaign = campaign.clone();
            let params = Arc::clone(&params);
            let callback = Arc::clone(&callback);
            async move {
                let Some(router) = router.upgrade() else {
                    return;
                };
                match router.dispatch(&oracle, &campaign, "", &params, false).await {
                    Ok(response) => callback(response),
                    Err(err) => warn!(oracle_id = %oracle, error = %err, "subscription poll skipped"),
                }
            }
        });
        self.subscription_owners.insert(id.clone(), oracle_id.to_string());

        info!(oracle_id, campaign_id, subscription_id = %id, interval_secs = interval.as_secs_f64(), "subscription started");
        Ok(Subscription {
            id,
            oracle_id: oracle_id.to_string(),
            scheduler: self.subscriptions.clone(),
            router: Arc::downgrade(self),
        })
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscription_owners.remove(subscription_id);
        let cancelled = self.subscriptions.cancel(subscription_id);
        if cancelled {
            info!(subscription_id, "subscription cancelled");
        }
        cancelled
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.armed_count()
    }

    /// Runs every provider's health check concurrently.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let providers: Vec<(String, Arc<dyn OracleProvider>)> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.provider)))
            .collect();

        let checks = providers.into_iter().map(|(id, provider)| async move {
            let healthy = provider.health_check().await;
            (id, healthy)
        });
        join_all(checks).await.into_iter().collect()
    }

    /// Drops cached responses for one oracle: the provider's own cache, the
    /// router entries, and the router entries of every aggregator that
    /// depends on it directly or through another aggregator.
    pub fn invalidate(&self, oracle_id: &str) {
        if let Some(provider) = self.provider(oracle_id) {
            provider.invalidate();
        }

        let mut pending = vec![oracle_id.to_string()];
        let mut cleared = HashSet::new();
        while let Some(id) = pending.pop() {
            if !cleared.insert(id.clone()) {
                continue;
            }
            self.cache.invalidate_prefix(&format!("{id}:"));
            pending.extend(
                self.providers
                    .iter()
                    .filter(|entry| entry.provider.config().sources.iter().any(|source| *source == id))
                    .map(|entry| entry.key().clone()),
            );
        }
        debug!(oracle_id, dependents = cleared.len() - 1, "oracle cache invalidated");
    }

    pub fn cache(&self) -> &TtlCache<OracleResponse> {
        &self.cache
    }

    pub fn submit_attestation(
        &self,
        oracle_id: &str,
        submission: AttestationSubmission,
    ) -> Result<Attestation, OracleError> {
        let entry = self.entry(oracle_id)?;
        let attestor = entry
            .provider
            .as_attestation()
            .ok_or_else(|| OracleError::NotAttestation(oracle_id.to_string()))?;
        let attestation = attestor.submit(submission)?;
        self.invalidate(oracle_id);
        Ok(attestation)
    }

    pub fn revoke_attestation(
        &self,
        oracle_id: &str,
        campaign_id: &str,
        milestone_id: &str,
    ) -> Result<bool, OracleError> {
        let entry = self.entry(oracle_id)?;
        let attestor = entry
            .provider
            .as_attestation()
            .ok_or_else(|| OracleError::NotAttestation(oracle_id.to_string()))?;
        let revoked = attestor.revoke(campaign_id, milestone_id);
        self.invalidate(oracle_id);
        Ok(revoked)
    }
}

impl Drop for OracleRouter {
    fn drop(&mut self) {
        self.subscriptions.cancel_all();
    }
}

fn cache_key(oracle_id: &str, campaign_id: &str, milestone_id: &str, params: &QueryParams) -> String {
    let serialized = serde_json::to_string(params).unwrap_or_default();
    format!("{oracle_id}:{campaign_id}:{milestone_id}:{serialized}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregationMethod, ConditionOperator};
    use serde_json::json;
    use std::sync::Mutex;

    fn router() -> Arc<OracleRouter> {
        Arc::new(OracleRouter::new(RouterSettings::default()))
    }

    fn attest(router: &OracleRouter, oracle: &str, campaign: &str, milestone: &str, data: Value) {
        router
            .submit_attestation(oracle, AttestationSubmission::new(campaign, milestone, data))
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_oracle_is_a_configuration_error() {
        let router = router();
        let err = router
            .query("nope", "c1", "m1", &QueryParams::new())
            .await
            .unwrap_err();
        assert_eq!(err, OracleError::UnknownOracle("nope".into()));
    }

    #[tokio::test]
    async fn verify_milestone_folds_errors_into_result() {
        let router = router();
        let condition = MilestoneCondition::new("approved", ConditionOperator::Eq, Some(json!(true)));
        let result = router
            .verify_milestone("ghost", "c1", "m1", &condition, &QueryParams::new())
            .await;
        assert!(!result.verified);
        assert!(result.error.unwrap().contains("unknown oracle"));
    }

    #[tokio::test]
    async fn verifies_attested_milestones() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        attest(&router, "judge", "c1", "m1", json!({"approved": true, "score": 88}));

        let condition = MilestoneCondition::new("score", ConditionOperator::Gte, Some(json!(80)));
        let verified = router
            .verify_milestone("judge", "c1", "m1", &condition, &QueryParams::new())
            .await;
        assert!(verified.verified);
        assert_eq!(verified.oracle_data["approved"], true);

        let missing = router
            .verify_milestone("judge", "c1", "m2", &condition, &QueryParams::new())
            .await;
        assert!(!missing.verified);
        assert_eq!(missing.error.as_deref(), Some("No attestation found"));
    }

    #[tokio::test]
    async fn caches_successes_until_invalidated() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        attest(&router, "judge", "c1", "m1", json!({"v": 1}));

        let first = router.query("judge", "c1", "m1", &QueryParams::new()).await.unwrap();
        let second = router.query("judge", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);

        // Revocation invalidates, so the failure is visible immediately.
        router.revoke_attestation("judge", "c1", "m1").unwrap();
        let third = router.query("judge", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert!(!third.success);
        assert!(router.cache().is_empty());
    }

    #[tokio::test]
    async fn inactive_oracles_reject_queries() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        router.set_active("judge", false).unwrap();
        assert!(!router.config("judge").unwrap().active);

        let err = router.query("judge", "c1", "m1", &QueryParams::new()).await.unwrap_err();
        assert_eq!(err, OracleError::Inactive("judge".into()));

        router.set_active("judge", true).unwrap();
        assert!(router.query("judge", "c1", "m1", &QueryParams::new()).await.is_ok());
    }

    #[tokio::test]
    async fn registration_validates_and_orders_aggregators() {
        let router = router();
        let mut invalid = OracleConfig::api("api", "https://example.com");
        invalid.endpoint = None;
        assert!(matches!(
            router.register_provider(invalid),
            Err(OracleError::InvalidConfig(_))
        ));

        let agg = OracleConfig::aggregator("agg", &["a", "b"], AggregationMethod::Any);
        assert!(matches!(
            router.register_provider(agg.clone()),
            Err(OracleError::MissingSource { .. })
        ));

        router.register_provider(OracleConfig::attestation("a")).unwrap();
        router.register_provider(OracleConfig::attestation("b")).unwrap();
        router.register_provider(agg).unwrap();
        assert_eq!(router.provider_ids(), vec!["a", "agg", "b"]);

        attest(&router, "b", "c1", "m1", json!({"done": true}));
        let response = router.query("agg", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.data, json!({"done": true}));
    }

    #[tokio::test]
    async fn attestations_only_go_to_attestation_oracles() {
        let router = router();
        router
            .register_provider(OracleConfig::api("api", "https://example.com"))
            .unwrap();
        let err = router
            .submit_attestation("api", AttestationSubmission::new("c", "m", json!({})))
            .unwrap_err();
        assert_eq!(err, OracleError::NotAttestation("api".into()));
    }

    #[tokio::test]
    async fn subscriptions_poll_until_cancelled() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        attest(&router, "judge", "c1", "", json!({"live": true}));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = router
            .subscribe(
                "judge",
                "c1",
                QueryParams::new(),
                Arc::new(move |response: OracleResponse| sink.lock().unwrap().push(response.success)),
                Some(Duration::from_millis(20)),
            )
            .unwrap();
        assert_eq!(router.subscription_count(), 1);

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(subscription.cancel());
        let polls = seen.lock().unwrap().len();
        assert!(polls >= 2);
        assert!(seen.lock().unwrap().iter().all(|ok| *ok));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(seen.lock().unwrap().len(), polls);
        assert_eq!(router.subscription_count(), 0);
        assert!(router.subscription_owners.is_empty());
        assert!(!subscription.cancel());
    }

    #[tokio::test]
    async fn cancelled_handles_do_not_outlive_their_oracle_mapping() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        let subscribe = || {
            router
                .subscribe("judge", "c1", QueryParams::new(), Arc::new(|_: OracleResponse| {}), Some(Duration::from_secs(5)))
                .unwrap()
        };

        let handles: Vec<Subscription> = (0..3).map(|_| subscribe()).collect();
        assert_eq!(router.subscription_owners.len(), 3);
        for handle in &handles {
            assert!(handle.cancel());
        }
        assert!(router.subscription_owners.is_empty());

        let survivor = subscribe();
        router.unregister("judge");
        assert!(!survivor.is_active());
        assert!(router.subscription_owners.is_empty());
    }

    #[tokio::test]
    async fn unregister_cancels_subscriptions() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        let subscription = router
            .subscribe("judge", "c1", QueryParams::new(), Arc::new(|_: OracleResponse| {}), Some(Duration::from_secs(5)))
            .unwrap();

        assert!(router.unregister("judge"));
        assert!(!subscription.is_active());
        assert!(router.subscribe("judge", "c1", QueryParams::new(), Arc::new(|_: OracleResponse| {}), None).is_err());
    }

    #[tokio::test]
    async fn health_check_covers_every_provider() {
        let router = router();
        router.register_provider(OracleConfig::attestation("a")).unwrap();
        router.register_provider(OracleConfig::attestation("b")).unwrap();
        let health = router.health_check_all().await;
        assert_eq!(health.len(), 2);
        assert!(health.values().all(|ok| *ok));
    }

    #[tokio::test]
    async fn invalidation_reaches_provider_cache() {
        use axum::{extract::State, routing::get, Json, Router};
        use std::sync::atomic::AtomicUsize;

        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/feed",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"n": n}))
                }),
            )
            .with_state(Arc::clone(&hits));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let router = router();
        router
            .register_provider(OracleConfig::api("feed", &format!("http://{addr}/feed")))
            .unwrap();

        let first = router.query("feed", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert_eq!(first.data, json!({"n": 0}));

        router.invalidate("feed");
        let second = router.query("feed", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert!(!second.cached);
        assert_eq!(second.data, json!({"n": 1}));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidation_clears_dependent_aggregators() {
        let router = router();
        router.register_provider(OracleConfig::attestation("judge")).unwrap();
        router.register_provider(OracleConfig::attestation("other")).unwrap();
        router
            .register_provider(OracleConfig::aggregator("panel", &["judge"], AggregationMethod::Any))
            .unwrap();
        router
            .register_provider(OracleConfig::aggregator("board", &["panel"], AggregationMethod::Any))
            .unwrap();
        router
            .register_provider(OracleConfig::aggregator("bystander", &["other"], AggregationMethod::Any))
            .unwrap();
        attest(&router, "judge", "c1", "m1", json!({"done": false}));
        attest(&router, "other", "c1", "m1", json!({"done": false}));

        for id in ["panel", "board", "bystander"] {
            assert!(router.query(id, "c1", "m1", &QueryParams::new()).await.unwrap().success);
        }
        assert_eq!(router.cache().len(), 3);

        // Direct write to the provider, bypassing the router's own invalidation.
        router
            .provider("judge")
            .unwrap()
            .as_attestation()
            .unwrap()
            .submit(AttestationSubmission::new("c1", "m1", json!({"done": true})))
            .unwrap();
        router.invalidate("judge");
        assert_eq!(router.cache().len(), 1);

        let board = router.query("board", "c1", "m1", &QueryParams::new()).await.unwrap();
        assert!(!board.cached);
        assert_eq!(board.data, json!({"done": true}));
    }
}
