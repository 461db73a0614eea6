//! Consensus reduction over per-source results.
//!
//! Pure functions: the aggregator provider collects `SourceResult`s and
//! hands them here. Nothing in this module performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::path::number_value;
use crate::models::AggregationMethod;

/// Outcome of querying one member source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResult {
    pub source_id: String,
    pub success: bool,
    pub data: Value,
    pub weight: f64,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Recommendation {
    Accept,
    ManualReview,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisputeAssessment {
    pub agreement_percentage: f64,
    pub recommendation: Recommendation,
    /// Sources split between success and failure.
    pub disputed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub final_data: Value,
    pub final_verified: bool,
    pub aggregation_method: AggregationMethod,
    pub source_results: Vec<SourceResult>,
    pub consensus_reached: bool,
    pub consensus_percentage: f64,
    pub dispute: DisputeAssessment,
    pub timestamp: DateTime<Utc>,
}

pub fn aggregate(
    method: AggregationMethod,
    threshold: f64,
    source_results: Vec<SourceResult>,
) -> AggregatedResult {
    let total = source_results.len();
    let successes: Vec<&SourceResult> = source_results.iter().filter(|r| r.success).collect();
    let succeeded = successes.len();
    let success_fraction = if total == 0 {
        0.0
    } else {
        succeeded as f64 / total as f64
    };

    let (consensus_reached, fraction) = match method {
        AggregationMethod::All => (total > 0 && succeeded == total, success_fraction),
        AggregationMethod::Majority => (success_fraction > threshold, success_fraction),
        AggregationMethod::Any => (succeeded >= 1, success_fraction),
        AggregationMethod::Weighted => {
            let ratio = weight_ratio(&source_results);
            (ratio > threshold, ratio)
        }
        AggregationMethod::Threshold => (succeeded >= required_successes(total, threshold), success_fraction),
    };

    let final_data = match method {
        AggregationMethod::Any => successes.first().map(|r| r.data.clone()).unwrap_or(Value::Null),
        AggregationMethod::Weighted => merge(&successes, true),
        _ => merge(&successes, false),
    };

    AggregatedResult {
        final_data,
        final_verified: consensus_reached,
        aggregation_method: method,
        consensus_reached,
        consensus_percentage: round2(fraction * 100.0),
        dispute: assess_dispute(succeeded, total),
        source_results,
        timestamp: Utc::now(),
    }
}

/// `max(ceil(n * threshold), 1)`
pub fn required_successes(total: usize, threshold: f64) -> usize {
    ((total as f64 * threshold).ceil() as usize).max(1)
}

fn weight_ratio(results: &[SourceResult]) -> f64 {
    let total: f64 = results.iter().map(|r| r.weight).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let agreeing: f64 = results.iter().filter(|r| r.success).map(|r| r.weight).sum();
    agreeing / total
}

/// Merges successful source payloads. Numeric fields are averaged (weighted
/// by source weight when `weighted`); other fields keep the first non-null
/// value seen. Non-object payloads fall back to the first success.
pub fn merge(successes: &[&SourceResult], weighted: bool) -> Value {
    let objects: Vec<(&Map<String, Value>, f64)> = successes
        .iter()
        .filter_map(|r| r.data.as_object().map(|o| (o, r.weight)))
        .collect();

    if objects.is_empty() {
        return successes.first().map(|r| r.data.clone()).unwrap_or(Value::Null);
    }

    let mut merged = Map::new();
    let mut keys: Vec<&String> = Vec::new();
    for (object, _) in &objects {
        for key in object.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    for key in keys {
        let first = objects
            .iter()
            .filter_map(|(o, _)| o.get(key))
            .find(|v| !v.is_null());

        let value = match first {
            Some(Value::Number(_)) => {
                let samples: Vec<(f64, f64)> = objects
                    .iter()
                    .filter_map(|(o, w)| o.get(key).and_then(Value::as_f64).map(|n| (n, *w)))
                    .collect();
                average(&samples, weighted).map(number_value)
            }
            Some(other) => Some(other.clone()),
            None => Some(Value::Null),
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }

    Value::Object(merged)
}

fn average(samples: &[(f64, f64)], weighted: bool) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    if weighted {
        let total_weight: f64 = samples.iter().map(|(_, w)| w).sum();
        if total_weight > 0.0 {
            return Some(samples.iter().map(|(n, w)| n * w).sum::<f64>() / total_weight);
        }
    }
    Some(samples.iter().map(|(n, _)| n).sum::<f64>() / samples.len() as f64)
}

/// Agreement below 50% recommends rejection, 50 to 75% manual review,
/// 75% and above acceptance.
pub fn assess_dispute(succeeded: usize, total: usize) -> DisputeAssessment {
    let agreement = if total == 0 {
        0.0
    } else {
        succeeded as f64 / total as f64 * 100.0
    };

    let recommendation = if agreement >= 75.0 {
        Recommendation::Accept
    } else if agreement >= 50.0 {
        Recommendation::ManualReview
    } else {
        Recommendation::Reject
    };

    DisputeAssessment {
        agreement_percentage: round2(agreement),
        recommendation,
        disputed: succeeded > 0 && succeeded < total,
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}
