//! Campaign resolution: verifies milestones, splits every outstanding pledge
//! and records the outcome through the data provider.
//!
//! Each trigger creates a `ResolutionJob` that moves
//! `pending -> processing -> completed | failed` on a background task.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethnum::U256;
use tokio::sync::{mpsc, Mutex as CampaignLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::data_provider::DataProvider;
use super::router::OracleRouter;
use super::scheduler::Scheduler;
use crate::error::ResolutionError;
use crate::models::{
    CampaignStatus, JobEvent, JobStatus, PledgeResolution, PledgeStatus, ResolutionJob, ResolutionResult,
    TriggerSource, VerificationResult,
};

pub mod payout;

pub use payout::MilestoneOutcome;

/// Finished jobs kept for lookup before the oldest are dropped.
pub const DEFAULT_MAX_JOBS: usize = 10_000;

/// What `schedule_resolution` did with a deadline.
#[derive(Debug, Clone)]
pub enum ScheduleOutcome {
    Armed { fires_at: DateTime<Utc> },
    TriggeredImmediately(ResolutionJob),
}

pub struct ResolutionEngine {
    router: Arc<OracleRouter>,
    data: Arc<dyn DataProvider>,
    jobs: DashMap<Uuid, ResolutionJob>,
    max_jobs: usize,
    campaign_locks: DashMap<String, Arc<CampaignLock<()>>>,
    deadlines: Scheduler,
    listeners: Mutex<Vec<mpsc::UnboundedSender<JobEvent>>>,
}

impl ResolutionEngine {
    pub fn new(router: Arc<OracleRouter>, data: Arc<dyn DataProvider>) -> Arc<Self> {
        Self::with_retention(router, data, DEFAULT_MAX_JOBS)
    }

    /// `max_jobs` bounds the job table; finished jobs are evicted oldest
    /// first once it is exceeded.
    pub fn with_retention(router: Arc<OracleRouter>, data: Arc<dyn DataProvider>, max_jobs: usize) -> Arc<Self> {
        Arc::new(Self {
            router,
            data,
            jobs: DashMap::new(),
            max_jobs: max_jobs.max(1),
            campaign_locks: DashMap::new(),
            deadlines: Scheduler::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn router(&self) -> &Arc<OracleRouter> {
        &self.router
    }

    /// Registers a listener for job lifecycle events. Dropping the receiver
    /// unregisters it.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }

    fn emit(&self, event: JobEvent) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn job(&self, job_id: Uuid) -> Option<ResolutionJob> {
        self.jobs.get(&job_id).map(|job| job.value().clone())
    }

    /// Jobs for a campaign, newest first.
    pub fn jobs_for_campaign(&self, campaign_id: &str) -> Vec<ResolutionJob> {
        let mut jobs: Vec<ResolutionJob> = self
            .jobs
            .iter()
            .filter(|job| job.campaign_id == campaign_id)
            .map(|job| job.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Creates a pending job and processes it in the background. Returns
    /// without waiting on any I/O.
    pub fn trigger_resolution(self: &Arc<Self>, campaign_id: &str, triggered_by: TriggerSource) -> ResolutionJob {
        let job = ResolutionJob::new(campaign_id, triggered_by);
        self.jobs.insert(job.id, job.clone());
        self.prune_jobs();
        info!(job_id = %job.id, campaign_id, triggered_by = %triggered_by, "resolution job created");
        self.emit(JobEvent::Created(job.clone()));

        let engine = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            engine.process_job(job_id).await;
        });

        job
    }

    async fn process_job(self: Arc<Self>, job_id: Uuid) {
        let Some(started) = self.transition(job_id, JobStatus::Processing, |_| {}) else {
            return;
        };
        info!(job_id = %job_id, campaign_id = %started.campaign_id, "resolution job started");
        self.emit(JobEvent::Started(started.clone()));

        // Run the pipeline on its own task so a panic fails this job only.
        let engine = Arc::clone(&self);
        let campaign_id = started.campaign_id.clone();
        let outcome = tokio::spawn(async move { engine.resolve_campaign(&campaign_id).await }).await;

        let outcome = match outcome {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join_error) if join_error.is_panic() => Err("resolution task panicked".to_string()),
            Err(join_error) => Err(join_error.to_string()),
        };

        match outcome {
            Ok(result) => {
                if let Some(job) = self.transition(job_id, JobStatus::Completed, |job| job.result = Some(result)) {
                    info!(job_id = %job_id, campaign_id = %job.campaign_id, "resolution job completed");
                    self.emit(JobEvent::Completed(job));
                }
            }
            Err(message) => {
                let error_message = message.clone();
                if let Some(job) = self.transition(job_id, JobStatus::Failed, |job| job.error = Some(message)) {
                    error!(job_id = %job_id, campaign_id = %job.campaign_id, error = %error_message, "resolution job failed");
                    self.emit(JobEvent::Failed(job));
                }
            }
        }
    }

    /// Drops the oldest finished jobs down to half the cap. Pending and
    /// processing jobs are never evicted.
    fn prune_jobs(&self) {
        if self.jobs.len() <= self.max_jobs {
            return;
        }
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = self
            .jobs
            .iter()
            .filter(|job| job.status.is_terminal())
            .map(|job| (job.created_at, job.id))
            .collect();
        finished.sort();

        let excess = self.jobs.len().saturating_sub(self.max_jobs / 2);
        let evicted = finished.len().min(excess);
        for (_, job_id) in finished.into_iter().take(evicted) {
            self.jobs.remove(&job_id);
        }
        debug!(evicted, retained = self.jobs.len(), "finished resolution jobs evicted");
    }

    /// Applies a state transition and returns the updated job, or `None` if
    /// the job is unknown or the transition is not allowed.
    fn transition(
        &self,
        job_id: Uuid,
        next: JobStatus,
        update: impl FnOnce(&mut ResolutionJob),
    ) -> Option<ResolutionJob> {
        let mut job = self.jobs.get_mut(&job_id)?;
        if !job.advance(next) {
            warn!(job_id = %job_id, from = ?job.status, to = ?next, "illegal job transition ignored");
            return None;
        }
        update(&mut job);
        Some(job.clone())
    }

    /// The resolution pipeline run by every job. Runs for one campaign at a
    /// time; a campaign that is already resolved is left untouched.
    pub async fn resolve_campaign(&self, campaign_id: &str) -> Result<ResolutionResult, ResolutionError> {
        let lock = Arc::clone(&*self.campaign_locks.entry(campaign_id.to_string()).or_default());
        let guard = lock.lock().await;
        let outcome = self.resolve_exclusive(campaign_id).await;
        drop(guard);
        drop(lock);
        self.campaign_locks
            .remove_if(campaign_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn resolve_exclusive(&self, campaign_id: &str) -> Result<ResolutionResult, ResolutionError> {
        let campaign = self
            .data
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| ResolutionError::CampaignNotFound(campaign_id.to_string()))?;
        if campaign.status == CampaignStatus::Resolved {
            info!(campaign_id, "campaign already resolved; nothing to do");
            return Ok(ResolutionResult::already_resolved(campaign_id, campaign.milestones.len()));
        }

        let pledges = self.data.get_pledges_for_campaign(campaign_id).await?;
        let outstanding = pledges.len();
        let pledges: Vec<_> = pledges
            .into_iter()
            .filter(|pledge| pledge.status == PledgeStatus::Active)
            .collect();
        if pledges.is_empty() && outstanding > 0 {
            info!(campaign_id, "every pledge already resolved; nothing to do");
            return Ok(ResolutionResult::already_resolved(campaign_id, campaign.milestones.len()));
        }

        // Sequential: payout math pairs each result with its milestone.
        let mut verification_results: Vec<VerificationResult> = Vec::with_capacity(campaign.milestones.len());
        for milestone in &campaign.milestones {
            let result = self
                .router
                .verify_milestone(
                    &milestone.oracle_id,
                    &campaign.id,
                    &milestone.id,
                    &milestone.condition,
                    &milestone.query_params,
                )
                .await;
            verification_results.push(result);
        }

        let outcomes: Vec<MilestoneOutcome> = campaign
            .milestones
            .iter()
            .zip(&verification_results)
            .map(|(milestone, result)| MilestoneOutcome {
                release_percentage: milestone.release_percentage,
                verified: result.verified,
                oracle_data: result.oracle_data.clone(),
            })
            .collect();
        let milestones_verified = outcomes.iter().filter(|o| o.verified).count();

        let mut total_released = U256::ZERO;
        let mut total_refunded = U256::ZERO;
        let mut resolutions = Vec::with_capacity(pledges.len());
        for pledge in &pledges {
            let split = payout::calculate(pledge, &outcomes);
            self.data
                .resolve_pledge(&pledge.id, split.release_amount, split.refund_amount)
                .await?;
            total_released = total_released.saturating_add(split.release_amount);
            total_refunded = total_refunded.saturating_add(split.refund_amount);
            resolutions.push(PledgeResolution {
                pledge_id: pledge.id.clone(),
                backer: pledge.backer.clone(),
                pledge_type: pledge.pledge_type,
                escrowed_amount: pledge.escrowed_amount,
                split,
            });
        }

        self.data
            .update_campaign_status(campaign_id, CampaignStatus::Resolved, total_released, total_refunded)
            .await?;

        let mut mints_succeeded = 0;
        let mut mints_failed = 0;
        for resolution in &resolutions {
            let summary = outcome_summary(&campaign.name, milestones_verified, outcomes.len(), resolution);
            match self
                .data
                .mint_commemorative(&resolution.pledge_id, &resolution.backer, campaign_id, &summary)
                .await
            {
                Ok(()) => mints_succeeded += 1,
                Err(err) => {
                    mints_failed += 1;
                    warn!(
                        campaign_id,
                        pledge_id = %resolution.pledge_id,
                        error = %err,
                        "commemorative mint failed; skipping"
                    );
                }
            }
        }

        info!(
            campaign_id,
            milestones_verified,
            pledges = resolutions.len(),
            total_released = %total_released,
            total_refunded = %total_refunded,
            "campaign resolved"
        );

        Ok(ResolutionResult {
            campaign_id: campaign_id.to_string(),
            milestones_total: outcomes.len(),
            milestones_verified,
            verification_results,
            pledges: resolutions,
            total_released,
            total_refunded,
            mints_succeeded,
            mints_failed,
            already_resolved: false,
        })
    }

    /// Arms a one-shot resolution at `deadline` (unix seconds). A deadline in
    /// the past triggers immediately. Re-scheduling replaces the old timer.
    pub fn schedule_resolution(self: &Arc<Self>, campaign_id: &str, deadline: i64) -> Result<ScheduleOutcome, ResolutionError> {
        let fires_at = DateTime::<Utc>::from_timestamp(deadline, 0)
            .ok_or_else(|| ResolutionError::InvalidSchedule(format!("deadline out of range: {deadline}")))?;

        let now = Utc::now();
        if fires_at <= now {
            self.deadlines.cancel(campaign_id);
            info!(campaign_id, deadline, "deadline already passed; resolving now");
            return Ok(ScheduleOutcome::TriggeredImmediately(
                self.trigger_resolution(campaign_id, TriggerSource::Schedule),
            ));
        }

        let delay = (fires_at - now).to_std().unwrap_or(Duration::ZERO);
        let engine = Arc::downgrade(self);
        let campaign = campaign_id.to_string();
        self.deadlines.arm_once(campaign_id, delay, move || async move {
            if let Some(engine) = engine.upgrade() {
                engine.trigger_resolution(&campaign, TriggerSource::Schedule);
            }
        });

        info!(campaign_id, fires_at = %fires_at, "resolution scheduled");
        Ok(ScheduleOutcome::Armed { fires_at })
    }

    /// No-op when nothing is armed for the campaign.
    pub fn cancel_scheduled_resolution(&self, campaign_id: &str) -> bool {
        let cancelled = self.deadlines.cancel(campaign_id);
        if cancelled {
            info!(campaign_id, "scheduled resolution cancelled");
        }
        cancelled
    }

    pub fn scheduled_campaigns(&self) -> Vec<String> {
        let mut campaigns = self.deadlines.armed_keys();
        campaigns.sort();
        campaigns
    }
}

impl Drop for ResolutionEngine {
    fn drop(&mut self) {
        self.deadlines.cancel_all();
    }
}

fn outcome_summary(
    campaign_name: &str,
    verified: usize,
    total: usize,
    resolution: &PledgeResolution,
) -> String {
    let name = if campaign_name.is_empty() { "campaign" } else { campaign_name };
    format!(
        "{name}: {verified}/{total} milestones verified; released {} of {}",
        resolution.split.release_amount, resolution.escrowed_amount
    )
}
