//! Webhook delivery through to persisted pledge splits.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use ethnum::U256;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use milestone_oracle_server::app_state::AppState;
use milestone_oracle_server::models::{
    AggregationMethod, CalculationParams, Campaign, CampaignStatus, ConditionOperator, JobEvent, JobStatus,
    Milestone, MilestoneCondition, OracleConfig, PerUnitParams, PledgeForResolution, PledgeStatus, PledgeType,
    QueryParams, SignatureAlgorithm, SignatureEncoding, WebhookConfig,
};
use milestone_oracle_server::oracle::AttestationSubmission;
use milestone_oracle_server::services::webhook::compute_signature;
use milestone_oracle_server::services::{InMemoryDataProvider, OracleRouter, RouterSettings};

const SECRET: &str = "race-day-secret";

fn milestone(id: &str, oracle: &str, field: &str, release_percentage: u8) -> Milestone {
    Milestone {
        id: id.to_string(),
        oracle_id: oracle.to_string(),
        condition: MilestoneCondition::new(field, ConditionOperator::Eq, Some(json!(true))),
        release_percentage,
        query_params: QueryParams::new(),
    }
}

fn pledge(id: &str, escrowed: u64, pledge_type: PledgeType, params: Option<CalculationParams>) -> PledgeForResolution {
    PledgeForResolution {
        id: id.to_string(),
        campaign_id: "marathon".to_string(),
        backer: format!("backer-{id}"),
        escrowed_amount: U256::from(escrowed),
        pledge_type,
        calculation_params: params,
        status: PledgeStatus::Active,
    }
}

fn setup() -> (AppState, Arc<InMemoryDataProvider>) {
    let router = Arc::new(OracleRouter::new(RouterSettings::default()));
    router.register_provider(OracleConfig::attestation("timing")).unwrap();

    let data = Arc::new(InMemoryDataProvider::new());
    data.insert_campaign(Campaign {
        id: "marathon".to_string(),
        name: "City Marathon".to_string(),
        status: CampaignStatus::Active,
        milestones: vec![
            milestone("finish", "timing", "finished", 60),
            milestone("podium", "timing", "podium", 40),
        ],
        deadline: None,
    });
    data.insert_pledge(pledge("p-flat", 1000, PledgeType::Flat, None));
    data.insert_pledge(pledge(
        "p-km",
        500,
        PledgeType::PerUnit,
        Some(CalculationParams::PerUnit(PerUnitParams {
            per_unit_amount: U256::from(2u8),
            unit_field: "distanceKm".to_string(),
            cap: Some(U256::from(100u8)),
        })),
    ));

    let state = AppState::new(router, data.clone(), 1000);
    state.webhooks.register(WebhookConfig::new("timing", SECRET));
    (state, data)
}

fn signed_headers(body: &[u8]) -> HeaderMap {
    let signature = compute_signature(SignatureAlgorithm::Sha256, SignatureEncoding::Hex, SECRET, body);
    let mut headers = HeaderMap::new();
    headers.insert("x-signature", HeaderValue::from_str(&signature).unwrap());
    headers
}

async fn wait_for_terminal(events: &mut UnboundedReceiver<JobEvent>) -> JobEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("job did not finish in time")
            .expect("event channel closed");
        if matches!(event, JobEvent::Completed(_) | JobEvent::Failed(_)) {
            return event;
        }
    }
}

#[tokio::test]
async fn signed_webhook_resolves_campaign() {
    let (state, data) = setup();
    state
        .router
        .submit_attestation(
            "timing",
            AttestationSubmission::new("marathon", "finish", json!({"finished": true, "distanceKm": 80.4})),
        )
        .unwrap();

    let mut events = state.engine.subscribe();
    let body = serde_json::to_vec(&json!({"event": "race.completed", "campaignId": "marathon"})).unwrap();
    let response = state.webhooks.handle_webhook("timing", &body, &signed_headers(&body)).await;
    assert!(response.success, "{}", response.message);

    let JobEvent::Completed(job) = wait_for_terminal(&mut events).await else {
        panic!("resolution job failed");
    };
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.expect("completed job carries a result");
    assert_eq!(result.milestones_verified, 1);
    assert_eq!(result.milestones_total, 2);

    let flat = data.resolution("p-flat").unwrap();
    assert_eq!(flat.release_amount, U256::from(600u16));
    assert_eq!(flat.refund_amount, U256::from(400u16));

    let per_km = data.resolution("p-km").unwrap();
    assert_eq!(per_km.release_amount, U256::from(100u16));
    assert_eq!(per_km.refund_amount, U256::from(400u16));

    let totals = data.totals("marathon").unwrap();
    assert_eq!(totals.status, CampaignStatus::Resolved);
    assert_eq!(totals.total_released, U256::from(700u16));
    assert_eq!(totals.total_refunded, U256::from(800u16));
    assert_eq!(data.mints().len(), 2);
}

#[tokio::test]
async fn replayed_webhook_creates_one_job() {
    let (state, _data) = setup();
    let body = serde_json::to_vec(&json!({"event": "milestone.completed", "campaignId": "marathon"})).unwrap();
    let headers = signed_headers(&body);

    let first = state.webhooks.handle_webhook("timing", &body, &headers).await;
    let replay = state.webhooks.handle_webhook("timing", &body, &headers).await;

    assert!(first.success);
    assert!(replay.success);
    assert_eq!(replay.message, "Already processed");
    assert_eq!(state.engine.jobs_for_campaign("marathon").len(), 1);
}

#[tokio::test]
async fn tampered_webhook_leaves_pledges_untouched() {
    let (state, data) = setup();
    let body = serde_json::to_vec(&json!({"event": "race.completed", "campaignId": "marathon"})).unwrap();
    let mut headers = signed_headers(&body);
    headers.insert("x-signature", HeaderValue::from_static("deadbeef"));

    let response = state.webhooks.handle_webhook("timing", &body, &headers).await;
    assert!(!response.success);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(state.engine.jobs_for_campaign("marathon").is_empty());
    assert!(data.resolution("p-flat").is_none());
    assert_eq!(data.pledge("p-flat").unwrap().status, PledgeStatus::Active);
}

#[tokio::test]
async fn consensus_method_decides_verification() {
    let router = Arc::new(OracleRouter::new(RouterSettings::default()));
    router.register_provider(OracleConfig::attestation("judge-a")).unwrap();
    router.register_provider(OracleConfig::attestation("judge-b")).unwrap();
    router
        .register_provider(OracleConfig::aggregator("any-judge", &["judge-a", "judge-b"], AggregationMethod::Any))
        .unwrap();
    router
        .register_provider(OracleConfig::aggregator("all-judges", &["judge-a", "judge-b"], AggregationMethod::All))
        .unwrap();

    router
        .submit_attestation("judge-a", AttestationSubmission::new("c1", "m1", json!({"passed": true})))
        .unwrap();

    let condition = MilestoneCondition::new("passed", ConditionOperator::Eq, Some(json!(true)));
    let params = QueryParams::new();

    let any = router.verify_milestone("any-judge", "c1", "m1", &condition, &params).await;
    assert!(any.verified, "{:?}", any.error);

    let all = router.verify_milestone("all-judges", "c1", "m1", &condition, &params).await;
    assert!(!all.verified);
    assert!(all.error.unwrap_or_default().contains("Consensus not reached"));
}
