//! Persistence collaborator used by the resolution engine.
//!
//! Storage lives outside this service; the engine only sees this narrow
//! interface. `InMemoryDataProvider` backs local runs (seeded from the
//! registry file) and tests, and records every write it receives.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use ethnum::U256;
use tracing::info;

use crate::models::{Campaign, CampaignStatus, PayoutSplit, PledgeForResolution, PledgeStatus};

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>>;

    async fn get_pledges_for_campaign(&self, campaign_id: &str) -> Result<Vec<PledgeForResolution>>;

    async fn resolve_pledge(&self, pledge_id: &str, release: U256, refund: U256) -> Result<()>;

    async fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
        total_released: U256,
        total_refunded: U256,
    ) -> Result<()>;

    async fn mint_commemorative(
        &self,
        pledge_id: &str,
        holder: &str,
        campaign_id: &str,
        outcome_summary: &str,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintRecord {
    pub pledge_id: String,
    pub holder: String,
    pub campaign_id: String,
    pub outcome_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignTotals {
    pub status: CampaignStatus,
    pub total_released: U256,
    pub total_refunded: U256,
}

#[derive(Default)]
pub struct InMemoryDataProvider {
    campaigns: DashMap<String, Campaign>,
    pledges: DashMap<String, PledgeForResolution>,
    resolutions: DashMap<String, PayoutSplit>,
    totals: DashMap<String, CampaignTotals>,
    mints: Mutex<Vec<MintRecord>>,
    failing_mints: Mutex<HashSet<String>>,
}

impl InMemoryDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn insert_pledge(&self, pledge: PledgeForResolution) {
        self.pledges.insert(pledge.id.clone(), pledge);
    }

    /// Makes every mint for `pledge_id` fail.
    pub fn fail_mints_for(&self, pledge_id: &str) {
        if let Ok(mut failing) = self.failing_mints.lock() {
            failing.insert(pledge_id.to_string());
        }
    }

    pub fn campaign(&self, campaign_id: &str) -> Option<Campaign> {
        self.campaigns.get(campaign_id).map(|c| c.value().clone())
    }

    pub fn pledge(&self, pledge_id: &str) -> Option<PledgeForResolution> {
        self.pledges.get(pledge_id).map(|p| p.value().clone())
    }

    pub fn resolution(&self, pledge_id: &str) -> Option<PayoutSplit> {
        self.resolutions.get(pledge_id).map(|r| *r.value())
    }

    pub fn totals(&self, campaign_id: &str) -> Option<CampaignTotals> {
        self.totals.get(campaign_id).map(|t| *t.value())
    }

    pub fn mints(&self) -> Vec<MintRecord> {
        self.mints.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DataProvider for InMemoryDataProvider {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        Ok(self.campaign(campaign_id))
    }

    async fn get_pledges_for_campaign(&self, campaign_id: &str) -> Result<Vec<PledgeForResolution>> {
        let mut pledges: Vec<PledgeForResolution> = self
            .pledges
            .iter()
            .filter(|p| p.campaign_id == campaign_id)
            .map(|p| p.value().clone())
            .collect();
        pledges.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pledges)
    }

    async fn resolve_pledge(&self, pledge_id: &str, release: U256, refund: U256) -> Result<()> {
        let mut pledge = self
            .pledges
            .get_mut(pledge_id)
            .ok_or_else(|| anyhow!("pledge not found: {pledge_id}"))?;
        if release.saturating_add(refund) != pledge.escrowed_amount {
            return Err(anyhow!("split for {pledge_id} does not conserve the escrowed amount"));
        }
        pledge.status = PledgeStatus::Resolved;
        drop(pledge);

        self.resolutions.insert(
            pledge_id.to_string(),
            PayoutSplit {
                release_amount: release,
                refund_amount: refund,
            },
        );
        info!(pledge_id, release = %release, refund = %refund, "pledge resolved");
        Ok(())
    }

    async fn update_campaign_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
        total_released: U256,
        total_refunded: U256,
    ) -> Result<()> {
        let mut campaign = self
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| anyhow!("campaign not found: {campaign_id}"))?;
        campaign.status = status;
        drop(campaign);

        self.totals.insert(
            campaign_id.to_string(),
            CampaignTotals {
                status,
                total_released,
                total_refunded,
            },
        );
        Ok(())
    }

    async fn mint_commemorative(
        &self,
        pledge_id: &str,
        holder: &str,
        campaign_id: &str,
        outcome_summary: &str,
    ) -> Result<()> {
        let failing = self
            .failing_mints
            .lock()
            .map(|f| f.contains(pledge_id))
            .unwrap_or(false);
        if failing {
            return Err(anyhow!("mint rejected for pledge {pledge_id}"));
        }

        let mut mints = self
            .mints
            .lock()
            .map_err(|_| anyhow!("mint ledger poisoned"))?;
        mints.push(MintRecord {
            pledge_id: pledge_id.to_string(),
            holder: holder.to_string(),
            campaign_id: campaign_id.to_string(),
            outcome_summary: outcome_summary.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PledgeType;

    fn pledge(id: &str, campaign: &str, escrowed: u64) -> PledgeForResolution {
        PledgeForResolution {
            id: id.to_string(),
            campaign_id: campaign.to_string(),
            backer: format!("backer-{id}"),
            escrowed_amount: U256::from(escrowed),
            pledge_type: PledgeType::Flat,
            calculation_params: None,
            status: PledgeStatus::Active,
        }
    }

    #[tokio::test]
    async fn pledges_are_scoped_to_campaign() {
        let store = InMemoryDataProvider::new();
        store.insert_pledge(pledge("p2", "c1", 10));
        store.insert_pledge(pledge("p1", "c1", 10));
        store.insert_pledge(pledge("p3", "c2", 10));

        let pledges = store.get_pledges_for_campaign("c1").await.unwrap();
        let ids: Vec<&str> = pledges.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn resolve_rejects_non_conserving_splits() {
        let store = InMemoryDataProvider::new();
        store.insert_pledge(pledge("p1", "c1", 100));

        assert!(store
            .resolve_pledge("p1", U256::from(60u8), U256::from(30u8))
            .await
            .is_err());
        store
            .resolve_pledge("p1", U256::from(60u8), U256::from(40u8))
            .await
            .unwrap();
        assert_eq!(store.pledge("p1").unwrap().status, PledgeStatus::Resolved);
        assert_eq!(store.resolution("p1").unwrap().release_amount, U256::from(60u8));
    }

    #[tokio::test]
    async fn failing_mints_are_not_recorded() {
        let store = InMemoryDataProvider::new();
        store.fail_mints_for("p1");
        assert!(store.mint_commemorative("p1", "b", "c1", "x").await.is_err());
        store.mint_commemorative("p2", "b", "c1", "x").await.unwrap();
        assert_eq!(store.mints().len(), 1);
    }
}
