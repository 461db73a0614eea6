//! Release/refund calculation for the four pledge models.
//!
//! Every function here returns a split that conserves the escrowed amount.
//! Missing or unusable data resolves to a full refund.

use ethnum::U256;
use serde_json::Value;

use crate::models::{
    CalculationParams, ConditionalParams, PayoutSplit, PerUnitParams, PledgeForResolution, PledgeType, Tier,
    TieredParams,
};
use crate::oracle::condition::apply_operator;
use crate::oracle::path::{as_number, extract_field};

/// A verified-or-not milestone as seen by the payout math.
#[derive(Debug, Clone)]
pub struct MilestoneOutcome {
    pub release_percentage: u8,
    pub verified: bool,
    pub oracle_data: Value,
}

pub fn calculate(pledge: &PledgeForResolution, outcomes: &[MilestoneOutcome]) -> PayoutSplit {
    let escrowed = pledge.escrowed_amount;
    match (pledge.pledge_type, &pledge.calculation_params) {
        (PledgeType::Flat, None | Some(CalculationParams::Flat)) => flat(escrowed, outcomes),
        (PledgeType::PerUnit, Some(CalculationParams::PerUnit(params))) => per_unit(escrowed, params, outcomes),
        (PledgeType::Tiered, Some(CalculationParams::Tiered(params))) => tiered(escrowed, params, outcomes),
        (PledgeType::Conditional, Some(CalculationParams::Conditional(params))) => {
            conditional(escrowed, params, outcomes)
        }
        _ => PayoutSplit::full_refund(escrowed),
    }
}

/// `escrowed * min(sum of verified percentages, 100) / 100`, rounded down.
pub fn flat(escrowed: U256, outcomes: &[MilestoneOutcome]) -> PayoutSplit {
    let percentage: u32 = outcomes
        .iter()
        .filter(|o| o.verified)
        .map(|o| u32::from(o.release_percentage))
        .sum::<u32>()
        .min(100);

    let release = escrowed.saturating_mul(U256::from(percentage)) / U256::from(100u8);
    PayoutSplit::release(escrowed, release)
}

pub fn per_unit(escrowed: U256, params: &PerUnitParams, outcomes: &[MilestoneOutcome]) -> PayoutSplit {
    match find_units(outcomes, &params.unit_field) {
        Some(units) => {
            let owed = units.saturating_mul(params.per_unit_amount);
            PayoutSplit::release(escrowed, apply_cap(owed, params.cap))
        }
        None => PayoutSplit::full_refund(escrowed),
    }
}

pub fn tiered(escrowed: U256, params: &TieredParams, outcomes: &[MilestoneOutcome]) -> PayoutSplit {
    match find_units(outcomes, &params.unit_field) {
        Some(units) => {
            let owed = tiered_amount(&params.tiers, units);
            PayoutSplit::release(escrowed, apply_cap(owed, params.cap))
        }
        None => PayoutSplit::full_refund(escrowed),
    }
}

/// Sum over tiers (ascending by threshold) of the units falling in
/// `[max(threshold, processed), min(total, next threshold))` at that tier's
/// rate. Units below the first threshold earn nothing.
pub fn tiered_amount(tiers: &[Tier], units: U256) -> U256 {
    let mut sorted: Vec<&Tier> = tiers.iter().collect();
    sorted.sort_by(|a, b| a.threshold.cmp(&b.threshold));

    let mut owed = U256::ZERO;
    let mut processed = U256::ZERO;
    for (i, tier) in sorted.iter().enumerate() {
        let start = tier.threshold.max(processed);
        let end = sorted
            .get(i + 1)
            .map(|next| next.threshold.min(units))
            .unwrap_or(units);
        if end > start {
            owed = owed.saturating_add((end - start).saturating_mul(tier.rate));
            processed = end;
        }
        if processed >= units {
            break;
        }
    }
    owed
}

/// All or nothing on the first verified milestone that reports the field.
pub fn conditional(escrowed: U256, params: &ConditionalParams, outcomes: &[MilestoneOutcome]) -> PayoutSplit {
    let reported = outcomes
        .iter()
        .filter(|o| o.verified)
        .find_map(|o| extract_field(&o.oracle_data, &params.condition_field));

    let satisfied = reported.is_some_and(|actual| {
        apply_operator(
            params.condition_operator,
            actual,
            Some(&params.condition_value),
            params.value_end.as_ref(),
        )
    });

    if satisfied {
        PayoutSplit::full_release(escrowed)
    } else {
        PayoutSplit::full_refund(escrowed)
    }
}

/// Units from the first verified milestone reporting a numeric `field`,
/// floored. Negative readings count as zero.
fn find_units(outcomes: &[MilestoneOutcome], field: &str) -> Option<U256> {
    outcomes
        .iter()
        .filter(|o| o.verified)
        .find_map(|o| extract_field(&o.oracle_data, field).and_then(as_number))
        .map(to_units)
}

fn to_units(reading: f64) -> U256 {
    if reading.is_finite() && reading > 0.0 {
        U256::from(reading.floor() as u128)
    } else {
        U256::ZERO
    }
}

fn apply_cap(owed: U256, cap: Option<U256>) -> U256 {
    match cap {
        Some(cap) => owed.min(cap),
        None => owed,
    }
}
