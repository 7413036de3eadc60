//! Conditions shared by `if-else` cases and loop break checks

use crate::variables::{Segment, VariablePool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not contains")]
    NotContains,
    #[serde(rename = "start with")]
    StartWith,
    #[serde(rename = "end with")]
    EndWith,
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "is not")]
    IsNot,
    #[serde(rename = "empty")]
    Empty,
    #[serde(rename = "not empty")]
    NotEmpty,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "≠")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "≥")]
    GreaterOrEqual,
    #[serde(rename = "≤")]
    LessOrEqual,
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "not null")]
    NotNull,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// `variable_selector <operator> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable_selector: Vec<String>,

    pub comparison_operator: ComparisonOperator,

    /// Expected value; strings may hold `{{#node.var#}}` placeholders
    #[serde(default)]
    pub value: Value,
}

fn is_empty(actual: &Segment) -> bool {
    match actual {
        Segment::None => true,
        Segment::String(s) => s.is_empty(),
        Segment::Array(items) => items.is_empty(),
        Segment::ArrayFile(files) => files.is_empty(),
        Segment::Object(map) => map.is_empty(),
        Segment::Group(group) => group.is_empty(),
        _ => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Condition {
    /// Expected value with placeholders resolved against `pool`
    fn expected(&self, pool: &VariablePool) -> Value {
        match &self.value {
            Value::String(text) => Value::String(pool.convert_template(text).text()),
            other => other.clone(),
        }
    }

    pub fn check(&self, pool: &VariablePool) -> bool {
        let actual = pool.get(self.variable_selector.as_slice()).unwrap_or(Segment::None);
        let expected = self.expected(pool);

        match self.comparison_operator {
            ComparisonOperator::Contains => contains(&actual, &expected),
            ComparisonOperator::NotContains => !contains(&actual, &expected),
            ComparisonOperator::StartWith => actual
                .as_str()
                .map_or(false, |s| s.starts_with(&value_text(&expected))),
            ComparisonOperator::EndWith => actual
                .as_str()
                .map_or(false, |s| s.ends_with(&value_text(&expected))),
            ComparisonOperator::Is => !actual.is_none() && actual.text() == value_text(&expected),
            ComparisonOperator::IsNot => actual.is_none() || actual.text() != value_text(&expected),
            ComparisonOperator::Empty => is_empty(&actual),
            ComparisonOperator::NotEmpty => !is_empty(&actual),
            ComparisonOperator::In => is_in(&actual, &expected),
            ComparisonOperator::NotIn => !is_in(&actual, &expected),
            ComparisonOperator::Equal => compare(&actual, &expected, |a, b| a == b),
            ComparisonOperator::NotEqual => compare(&actual, &expected, |a, b| a != b),
            ComparisonOperator::GreaterThan => compare(&actual, &expected, |a, b| a > b),
            ComparisonOperator::LessThan => compare(&actual, &expected, |a, b| a < b),
            ComparisonOperator::GreaterOrEqual => compare(&actual, &expected, |a, b| a >= b),
            ComparisonOperator::LessOrEqual => compare(&actual, &expected, |a, b| a <= b),
            ComparisonOperator::Null => actual.is_none(),
            ComparisonOperator::NotNull => !actual.is_none(),
        }
    }
}

fn contains(actual: &Segment, expected: &Value) -> bool {
    if let Some(text) = actual.as_str() {
        return text.contains(&value_text(expected));
    }
    match actual.to_array() {
        Some(items) => {
            let needle = value_text(expected);
            items.iter().any(|item| item == expected || value_text(item) == needle)
        }
        None => false,
    }
}

fn is_in(actual: &Segment, expected: &Value) -> bool {
    let Value::Array(candidates) = expected else {
        return false;
    };
    let value = actual.to_value();
    let text = actual.text();
    candidates
        .iter()
        .any(|candidate| *candidate == value || value_text(candidate) == text)
}

fn compare(actual: &Segment, expected: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    let left = actual
        .as_f64()
        .or_else(|| actual.as_str().and_then(|s| s.trim().parse().ok()));
    match (left, number(expected)) {
        (Some(left), Some(right)) => op(left, right),
        _ => false,
    }
}

/// Combine `conditions` with `operator`; an empty list never matches
pub fn evaluate_conditions(
    pool: &VariablePool,
    conditions: &[Condition],
    operator: LogicalOperator,
) -> bool {
    if conditions.is_empty() {
        return false;
    }
    match operator {
        LogicalOperator::And => conditions.iter().all(|c| c.check(pool)),
        LogicalOperator::Or => conditions.iter().any(|c| c.check(pool)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pool() -> VariablePool {
        let mut pool = VariablePool::empty();
        pool.add(&["start", "name"], "graphflow").unwrap();
        pool.add(&["start", "count"], 5).unwrap();
        pool.add(&["start", "tags"], vec![json!("a"), json!("b")]).unwrap();
        pool.add(&["start", "expected"], "graph").unwrap();
        pool
    }

    fn condition(selector: &[&str], operator: &str, value: Value) -> Condition {
        serde_json::from_value(json!({
            "variable_selector": selector,
            "comparison_operator": operator,
            "value": value
        }))
        .unwrap()
    }

    #[test]
    fn test_string_operators() {
        let pool = pool();
        assert!(condition(&["start", "name"], "contains", json!("flow")).check(&pool));
        assert!(condition(&["start", "name"], "start with", json!("graph")).check(&pool));
        assert!(condition(&["start", "name"], "end with", json!("flow")).check(&pool));
        assert!(condition(&["start", "name"], "is not", json!("other")).check(&pool));
        assert!(!condition(&["start", "name"], "empty", Value::Null).check(&pool));
    }

    #[test]
    fn test_numeric_operators() {
        let pool = pool();
        assert!(condition(&["start", "count"], ">", json!(3)).check(&pool));
        assert!(condition(&["start", "count"], "≤", json!("5")).check(&pool));
        assert!(!condition(&["start", "count"], "=", json!("five")).check(&pool));
    }

    #[test]
    fn test_array_and_null_operators() {
        let pool = pool();
        assert!(condition(&["start", "tags"], "contains", json!("b")).check(&pool));
        assert!(condition(&["start", "missing"], "null", Value::Null).check(&pool));
        assert!(condition(&["start", "missing"], "not contains", json!("x")).check(&pool));
        assert!(condition(&["start", "name"], "in", json!(["graphflow", "x"])).check(&pool));
    }

    #[test]
    fn test_expected_value_placeholders() {
        let pool = pool();
        let cond = condition(&["start", "name"], "start with", json!("{{#start.expected#}}"));
        assert!(cond.check(&pool));
    }

    #[test]
    fn test_logical_combination() {
        let pool = pool();
        let conditions = vec![
            condition(&["start", "count"], ">", json!(10)),
            condition(&["start", "name"], "is", json!("graphflow")),
        ];
        assert!(!evaluate_conditions(&pool, &conditions, LogicalOperator::And));
        assert!(evaluate_conditions(&pool, &conditions, LogicalOperator::Or));
        assert!(!evaluate_conditions(&pool, &[], LogicalOperator::And));
    }
}
