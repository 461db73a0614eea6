//! Campaign, pledge and resolution job models

use chrono::{DateTime, Utc};
use ethnum::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::amount;
use super::oracle::{ConditionOperator, MilestoneCondition, QueryParams, VerificationResult};

/// Campaign status as stored by the data provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Active,
    Resolving,
    Resolved,
    Cancelled,
}

/// Milestone declared on a campaign. Declaration order is significant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: String,
    pub oracle_id: String,
    pub condition: MilestoneCondition,
    /// Share of flat pledges released when this milestone verifies (0-100).
    pub release_percentage: u8,
    #[serde(default)]
    pub query_params: QueryParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: CampaignStatus,
    pub milestones: Vec<Milestone>,
    /// Unix seconds.
    #[serde(default)]
    pub deadline: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PledgeType {
    Flat,
    PerUnit,
    Tiered,
    Conditional,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PledgeStatus {
    #[default]
    Active,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerUnitParams {
    #[serde(with = "amount")]
    pub per_unit_amount: U256,
    pub unit_field: String,
    #[serde(default, with = "amount::option")]
    pub cap: Option<U256>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    #[serde(with = "amount")]
    pub threshold: U256,
    #[serde(with = "amount")]
    pub rate: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TieredParams {
    pub tiers: Vec<Tier>,
    pub unit_field: String,
    #[serde(default, with = "amount::option")]
    pub cap: Option<U256>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalParams {
    pub condition_field: String,
    pub condition_operator: ConditionOperator,
    pub condition_value: Value,
    #[serde(default)]
    pub value_end: Option<Value>,
}

impl ConditionalParams {
    pub fn as_condition(&self) -> MilestoneCondition {
        MilestoneCondition {
            value_end: self.value_end.clone(),
            ..MilestoneCondition::new(
                &self.condition_field,
                self.condition_operator,
                Some(self.condition_value.clone()),
            )
        }
    }
}

/// Calculation parameters, discriminated by pledge type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalculationParams {
    Flat,
    PerUnit(PerUnitParams),
    Tiered(TieredParams),
    Conditional(ConditionalParams),
}

/// Outstanding pledge handed to the resolution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeForResolution {
    pub id: String,
    pub campaign_id: String,
    pub backer: String,
    #[serde(with = "amount")]
    pub escrowed_amount: U256,
    pub pledge_type: PledgeType,
    #[serde(default)]
    pub calculation_params: Option<CalculationParams>,
    #[serde(default)]
    pub status: PledgeStatus,
}

/// Release/refund split. `release + refund == escrowed` always.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PayoutSplit {
    #[serde(with = "amount")]
    pub release_amount: U256,
    #[serde(with = "amount")]
    pub refund_amount: U256,
}

impl PayoutSplit {
    /// Releases `release` (bounded by `escrowed`) and refunds the rest.
    pub fn release(escrowed: U256, release: U256) -> Self {
        let release_amount = release.min(escrowed);
        Self {
            release_amount,
            refund_amount: escrowed - release_amount,
        }
    }

    pub fn full_refund(escrowed: U256) -> Self {
        Self::release(escrowed, U256::ZERO)
    }

    pub fn full_release(escrowed: U256) -> Self {
        Self::release(escrowed, escrowed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PledgeResolution {
    pub pledge_id: String,
    pub backer: String,
    pub pledge_type: PledgeType,
    #[serde(with = "amount")]
    pub escrowed_amount: U256,
    #[serde(flatten)]
    pub split: PayoutSplit,
}

/// Summary recorded on a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub campaign_id: String,
    pub milestones_total: usize,
    pub milestones_verified: usize,
    pub verification_results: Vec<VerificationResult>,
    pub pledges: Vec<PledgeResolution>,
    #[serde(with = "amount")]
    pub total_released: U256,
    #[serde(with = "amount")]
    pub total_refunded: U256,
    pub mints_succeeded: usize,
    pub mints_failed: usize,
    /// Set when the job found nothing left to resolve and changed nothing.
    #[serde(default)]
    pub already_resolved: bool,
}

impl ResolutionResult {
    pub fn already_resolved(campaign_id: &str, milestones_total: usize) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            milestones_total,
            milestones_verified: 0,
            verification_results: Vec::new(),
            pledges: Vec::new(),
            total_released: U256::ZERO,
            total_refunded: U256::ZERO,
            mints_succeeded: 0,
            mints_failed: 0,
            already_resolved: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// pending -> processing -> {completed, failed}; nothing leaves a
    /// terminal state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Webhook,
    Poll,
    Schedule,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Webhook => write!(f, "webhook"),
            TriggerSource::Poll => write!(f, "poll"),
            TriggerSource::Schedule => write!(f, "schedule"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionJob {
    pub id: Uuid,
    pub campaign_id: String,
    pub status: JobStatus,
    pub triggered_by: TriggerSource,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result: Option<ResolutionResult>,
    pub error: Option<String>,
}

impl ResolutionJob {
    pub fn new(campaign_id: &str, triggered_by: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id: campaign_id.to_string(),
            status: JobStatus::Pending,
            triggered_by,
            created_at: Utc::now(),
            processed_at: None,
            result: None,
            error: None,
        }
    }

    /// Moves the job forward. Returns false (and leaves the job untouched)
    /// for any transition the state machine does not allow.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.processed_at = Some(Utc::now());
        }
        true
    }
}

/// Job lifecycle notifications delivered to registered listeners.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Created(ResolutionJob),
    Started(ResolutionJob),
    Completed(ResolutionJob),
    Failed(ResolutionJob),
}

impl JobEvent {
    pub fn job(&self) -> &ResolutionJob {
        match self {
            JobEvent::Created(job)
            | JobEvent::Started(job)
            | JobEvent::Completed(job)
            | JobEvent::Failed(job) => job,
        }
    }
}
