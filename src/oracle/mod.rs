//! Oracle providers: the pluggable data sources milestones are verified
//! against.
//!
//! Every provider answers three questions: what does the source say right
//! now (`query`), does that data satisfy a milestone condition
//! (`verify_condition`), and is the source reachable (`health_check`).
//! Transport failures never escape `query`; they come back as an
//! `OracleResponse` with `success == false`.

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{MilestoneCondition, OracleConfig, OracleResponse, QueryParams};

pub mod aggregator;
pub mod api;
pub mod attestation;
pub mod cache;
pub mod condition;
pub mod consensus;
pub mod path;
pub mod registry;
pub mod specialized;

pub use aggregator::AggregatorProvider;
pub use api::ApiProvider;
pub use attestation::{Attestation, AttestationProvider, AttestationSubmission};
pub use registry::{ProviderContext, ProviderRegistry, ProviderType};

#[async_trait]
pub trait OracleProvider: Send + Sync {
    fn config(&self) -> &OracleConfig;

    fn id(&self) -> &str {
        &self.config().id
    }

    async fn query(&self, params: &QueryParams) -> OracleResponse;

    fn verify_condition(&self, data: &Value, condition: &MilestoneCondition) -> bool {
        condition::evaluate(data, condition)
    }

    async fn health_check(&self) -> bool;

    /// Drops anything the provider cached so the next query goes upstream.
    fn invalidate(&self) {}

    /// Attestation oracles accept submitted facts through the router.
    fn as_attestation(&self) -> Option<&AttestationProvider> {
        None
    }
}
