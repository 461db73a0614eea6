//! Manually attested facts.
//!
//! A trusted party submits the data for a `(campaign, milestone)` pair; the
//! provider serves it back on query. When attester keys are configured every
//! submission must carry an ed25519 signature over
//! `"{campaignId}:{milestoneId}:{data as compact JSON}"` from one of them.

use std::convert::TryInto;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::OracleProvider;
use crate::error::OracleError;
use crate::models::{OracleConfig, OracleResponse, QueryParams};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationSubmission {
    pub campaign_id: String,
    pub milestone_id: String,
    pub data: Value,
    /// Hex public key of the signer; narrows verification to that key.
    #[serde(default)]
    pub attester: Option<String>,
    /// Hex ed25519 signature.
    #[serde(default)]
    pub signature: Option<String>,
}

impl AttestationSubmission {
    pub fn new(campaign_id: &str, milestone_id: &str, data: Value) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            milestone_id: milestone_id.to_string(),
            data,
            attester: None,
            signature: None,
        }
    }

    pub fn signing_message(&self) -> String {
        format!(
            "{}:{}:{}",
            self.campaign_id,
            self.milestone_id,
            serde_json::to_string(&self.data).unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub campaign_id: String,
    pub milestone_id: String,
    pub data: Value,
    pub attester: Option<String>,
    pub attested_at: DateTime<Utc>,
}

pub struct AttestationProvider {
    config: OracleConfig,
    keys: Vec<(String, VerifyingKey)>,
    facts: DashMap<(String, String), Attestation>,
}

impl AttestationProvider {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let keys = config
            .attester_keys
            .iter()
            .map(|hex_key| parse_key(hex_key).map(|key| (hex_key.to_ascii_lowercase(), key)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            keys,
            facts: DashMap::new(),
        })
    }

    pub fn requires_signature(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Stores the attested data, replacing any earlier attestation for the
    /// same milestone.
    pub fn submit(&self, submission: AttestationSubmission) -> Result<Attestation, OracleError> {
        if self.requires_signature() {
            self.verify(&submission).map_err(|reason| {
                warn!(
                    security = true,
                    oracle_id = %self.config.id,
                    campaign_id = %submission.campaign_id,
                    milestone_id = %submission.milestone_id,
                    reason = %reason,
                    "attestation signature rejected"
                );
                OracleError::Attestation(reason)
            })?;
        }

        let attestation = Attestation {
            campaign_id: submission.campaign_id.clone(),
            milestone_id: submission.milestone_id.clone(),
            data: submission.data,
            attester: submission.attester,
            attested_at: Utc::now(),
        };

        self.facts.insert(
            (submission.campaign_id, submission.milestone_id),
            attestation.clone(),
        );
        info!(
            oracle_id = %self.config.id,
            campaign_id = %attestation.campaign_id,
            milestone_id = %attestation.milestone_id,
            "attestation recorded"
        );
        Ok(attestation)
    }

    pub fn revoke(&self, campaign_id: &str, milestone_id: &str) -> bool {
        let removed = self
            .facts
            .remove(&(campaign_id.to_string(), milestone_id.to_string()))
            .is_some();
        if removed {
            info!(oracle_id = %self.config.id, campaign_id, milestone_id, "attestation revoked");
        }
        removed
    }

    pub fn attestation(&self, campaign_id: &str, milestone_id: &str) -> Option<Attestation> {
        self.facts
            .get(&(campaign_id.to_string(), milestone_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn verify(&self, submission: &AttestationSubmission) -> Result<(), String> {
        let sig_hex = submission
            .signature
            .as_deref()
            .ok_or_else(|| "signature required".to_string())?;
        let sig_vec = hex::decode(sig_hex).map_err(|e| format!("invalid signature hex: {e}"))?;
        let sig_bytes: [u8; 64] = sig_vec
            .try_into()
            .map_err(|_| "invalid signature length".to_string())?;
        let signature = Signature::from_bytes(&sig_bytes);

        let candidates: Vec<&VerifyingKey> = match submission.attester.as_deref() {
            Some(attester) => {
                let attester = attester.to_ascii_lowercase();
                self.keys
                    .iter()
                    .filter(|(hex_key, _)| *hex_key == attester)
                    .map(|(_, key)| key)
                    .collect()
            }
            None => self.keys.iter().map(|(_, key)| key).collect(),
        };
        if candidates.is_empty() {
            return Err("attester is not trusted".to_string());
        }

        let message = submission.signing_message();
        if candidates
            .iter()
            .any(|key| key.verify(message.as_bytes(), &signature).is_ok())
        {
            Ok(())
        } else {
            Err("signature verification failed".to_string())
        }
    }
}

#[async_trait]
impl OracleProvider for AttestationProvider {
    fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn query(&self, params: &QueryParams) -> OracleResponse {
        let campaign_id = params.get("campaignId").and_then(Value::as_str);
        let milestone_id = params.get("milestoneId").and_then(Value::as_str);

        match campaign_id
            .zip(milestone_id)
            .and_then(|(c, m)| self.attestation(c, m))
        {
            Some(attestation) => {
                let raw = serde_json::to_value(&attestation).ok();
                OracleResponse::ok(&self.config.id, attestation.data, raw)
            }
            None => OracleResponse::failure(&self.config.id, "No attestation found"),
        }
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn as_attestation(&self) -> Option<&AttestationProvider> {
        Some(self)
    }
}

fn parse_key(hex_key: &str) -> Result<VerifyingKey, OracleError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| OracleError::InvalidConfig(format!("invalid attester key hex: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| OracleError::InvalidConfig("attester key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| OracleError::InvalidConfig(format!("invalid attester key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use serde_json::json;

    fn params(campaign: &str, milestone: &str) -> QueryParams {
        json!({"campaignId": campaign, "milestoneId": milestone})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    #[tokio::test]
    async fn serves_submitted_facts() {
        let provider = AttestationProvider::new(OracleConfig::attestation("judge")).unwrap();
        provider
            .submit(AttestationSubmission::new("c1", "m1", json!({"approved": true})))
            .unwrap();

        let response = provider.query(&params("c1", "m1")).await;
        assert!(response.success);
        assert_eq!(response.data, json!({"approved": true}));

        let missing = provider.query(&params("c1", "m2")).await;
        assert!(!missing.success);
        assert_eq!(missing.error.as_deref(), Some("No attestation found"));
    }

    #[tokio::test]
    async fn revoked_facts_disappear() {
        let provider = AttestationProvider::new(OracleConfig::attestation("judge")).unwrap();
        provider
            .submit(AttestationSubmission::new("c1", "m1", json!({"ok": 1})))
            .unwrap();
        assert!(provider.revoke("c1", "m1"));
        assert!(!provider.revoke("c1", "m1"));
        assert!(!provider.query(&params("c1", "m1")).await.success);
    }

    #[test]
    fn signed_submissions_are_verified() {
        let key = signing_key(7);
        let public_hex = hex::encode(key.verifying_key().to_bytes());
        let mut config = OracleConfig::attestation("notary");
        config.attester_keys = vec![public_hex.clone()];
        let provider = AttestationProvider::new(config).unwrap();

        let mut submission = AttestationSubmission::new("c1", "m1", json!({"score": 91}));
        submission.signature = Some(hex::encode(key.sign(submission.signing_message().as_bytes()).to_bytes()));
        submission.attester = Some(public_hex);
        assert!(provider.submit(submission.clone()).is_ok());

        submission.data = json!({"score": 99});
        assert!(matches!(provider.submit(submission), Err(OracleError::Attestation(_))));
        assert_eq!(provider.attestation("c1", "m1").unwrap().data, json!({"score": 91}));
    }

    #[test]
    fn unsigned_or_untrusted_submissions_are_rejected() {
        let trusted = signing_key(1);
        let stranger = signing_key(2);
        let mut config = OracleConfig::attestation("notary");
        config.attester_keys = vec![hex::encode(trusted.verifying_key().to_bytes())];
        let provider = AttestationProvider::new(config).unwrap();

        let unsigned = AttestationSubmission::new("c1", "m1", json!({}));
        assert!(provider.submit(unsigned.clone()).is_err());

        let mut forged = unsigned;
        forged.signature = Some(hex::encode(stranger.sign(forged.signing_message().as_bytes()).to_bytes()));
        assert!(provider.submit(forged).is_err());
    }

    #[test]
    fn bad_keys_fail_construction() {
        let mut config = OracleConfig::attestation("notary");
        config.attester_keys = vec!["zz".into()];
        assert!(matches!(
            AttestationProvider::new(config),
            Err(OracleError::InvalidConfig(_))
        ));
    }
}
