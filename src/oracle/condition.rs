//! Milestone condition evaluation

use serde_json::Value;

use super::path::{as_number, extract_field};
use crate::models::{ConditionOperator, MilestoneCondition};

/// Evaluates `condition` against `data`. Absent fields fail every operator,
/// unknown operators evaluate false.
pub fn evaluate(data: &Value, condition: &MilestoneCondition) -> bool {
    let Some(actual) = extract_field(data, &condition.field) else {
        return false;
    };
    apply_operator(
        condition.operator,
        actual,
        condition.value.as_ref(),
        condition.value_end.as_ref(),
    )
}

pub fn apply_operator(
    operator: ConditionOperator,
    actual: &Value,
    expected: Option<&Value>,
    expected_end: Option<&Value>,
) -> bool {
    match operator {
        ConditionOperator::Exists => !actual.is_null(),
        ConditionOperator::Eq => expected.is_some_and(|e| values_equal(actual, e)),
        ConditionOperator::Gt => compare(actual, expected, |a, b| a > b),
        ConditionOperator::Gte => compare(actual, expected, |a, b| a >= b),
        ConditionOperator::Lt => compare(actual, expected, |a, b| a < b),
        ConditionOperator::Lte => compare(actual, expected, |a, b| a <= b),
        ConditionOperator::Between => {
            compare(actual, expected, |a, low| a >= low)
                && compare(actual, expected_end, |a, high| a <= high)
        }
        ConditionOperator::Unknown => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(_), _) | (_, Value::Number(_)) => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => actual == expected,
            }
        }
        _ => actual == expected,
    }
}

fn compare(actual: &Value, expected: Option<&Value>, op: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(actual), expected.and_then(as_number)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConditionOperator::*;
    use serde_json::json;

    fn cond(field: &str, op: ConditionOperator, value: Option<Value>) -> MilestoneCondition {
        MilestoneCondition::new(field, op, value)
    }

    #[test]
    fn exists_ignores_null_but_accepts_false() {
        let data = json!({"done": false, "note": null});
        assert!(evaluate(&data, &cond("done", Exists, None)));
        assert!(!evaluate(&data, &cond("note", Exists, None)));
        assert!(!evaluate(&data, &cond("missing", Exists, None)));
    }

    #[test]
    fn equality_handles_numbers_strings_and_bools() {
        let data = json!({"status": "finished", "laps": 10, "ok": true, "distance": "42.195"});
        assert!(evaluate(&data, &cond("status", Eq, Some(json!("finished")))));
        assert!(!evaluate(&data, &cond("status", Eq, Some(json!("Finished")))));
        assert!(evaluate(&data, &cond("laps", Eq, Some(json!(10.0)))));
        assert!(evaluate(&data, &cond("ok", Eq, Some(json!(true)))));
        assert!(evaluate(&data, &cond("distance", Eq, Some(json!(42.195)))));
        assert!(!evaluate(&data, &cond("laps", Eq, None)));
    }

    #[test]
    fn ordering_operators() {
        let data = json!({"km": 21.1});
        assert!(evaluate(&data, &cond("km", Gt, Some(json!(21)))));
        assert!(evaluate(&data, &cond("km", Gte, Some(json!(21.1)))));
        assert!(evaluate(&data, &cond("km", Lt, Some(json!("30")))));
        assert!(!evaluate(&data, &cond("km", Lte, Some(json!(20)))));
        assert!(!evaluate(&data, &cond("km", Gt, Some(json!("fast")))));
    }

    #[test]
    fn between_is_inclusive_and_needs_both_bounds() {
        let data = json!({"score": 80});
        assert!(evaluate(&data, &MilestoneCondition::between("score", json!(80), json!(90))));
        assert!(evaluate(&data, &MilestoneCondition::between("score", json!(70), json!(80))));
        assert!(!evaluate(&data, &MilestoneCondition::between("score", json!(81), json!(90))));
        assert!(!evaluate(&data, &cond("score", Between, Some(json!(0)))));
    }

    #[test]
    fn unknown_operator_is_false() {
        let data = json!({"a": 1});
        assert!(!evaluate(&data, &cond("a", Unknown, Some(json!(1)))));
    }
}
