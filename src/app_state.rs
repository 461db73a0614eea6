//! Application state shared across handlers

use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRef;

use crate::config::{AppConfig, RegistryFile};
use crate::services::resolution::DEFAULT_MAX_JOBS;
use crate::services::{DataProvider, InMemoryDataProvider, OracleRouter, ResolutionEngine, WebhookHandler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<OracleRouter>,
    pub engine: Arc<ResolutionEngine>,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    pub fn new(router: Arc<OracleRouter>, data: Arc<dyn DataProvider>, max_processed: usize) -> Self {
        Self::with_limits(router, data, max_processed, DEFAULT_MAX_JOBS)
    }

    pub fn with_limits(
        router: Arc<OracleRouter>,
        data: Arc<dyn DataProvider>,
        max_processed: usize,
        max_jobs: usize,
    ) -> Self {
        let engine = ResolutionEngine::with_retention(Arc::clone(&router), data, max_jobs);
        let webhooks = Arc::new(WebhookHandler::new(Arc::clone(&engine), max_processed));
        Self {
            router,
            engine,
            webhooks,
        }
    }

    /// Builds the service graph from config, backed by an in-memory store
    /// seeded from the registry file when one is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let router = Arc::new(OracleRouter::new(config.router_settings()));
        let data = Arc::new(InMemoryDataProvider::new());
        let state = Self::with_limits(
            router,
            data.clone(),
            config.webhook_max_processed,
            config.max_retained_jobs,
        );

        if let Some(path) = &config.registry_file {
            RegistryFile::load(path)?.apply(&state.router, &state.webhooks, &data)?;
        }
        Ok(state)
    }
}

impl FromRef<AppState> for Arc<OracleRouter> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.router.clone()
    }
}

impl FromRef<AppState> for Arc<ResolutionEngine> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.engine.clone()
    }
}

impl FromRef<AppState> for Arc<WebhookHandler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.webhooks.clone()
    }
}
