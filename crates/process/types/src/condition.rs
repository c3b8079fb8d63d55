//! Condition expressions: a small boolean expression tree
//!
//! Routing rules and transition gates match a context object against a
//! tagged expression tree (field, operator, value, and/or/not). The tree
//! is evaluated by a pure recursive interpreter over a read-only JSON
//! context — no scripting language is embedded.
//!
//! A missing field never errors: comparisons against an absent field
//! evaluate to `false`, so rules stay total over sparse contexts.

use crate::errors::ConditionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operator for field conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Context value is one of the configured array's elements
    In,
    /// Context array/string contains the configured value
    Contains,
}

impl std::fmt::Display for ConditionOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
        };
        write!(f, "{}", name)
    }
}

/// A boolean condition over a JSON context
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Compare one context field against a constant
    Field {
        /// Dotted path into the context object (e.g. `metadata.department`)
        field: String,
        op: ConditionOp,
        value: Value,
    },
    /// All sub-conditions must hold
    All { conditions: Vec<Condition> },
    /// At least one sub-condition must hold
    Any { conditions: Vec<Condition> },
    /// Negation
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn field(field: impl Into<String>, op: ConditionOp, value: impl Into<Value>) -> Self {
        Self::Field {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::All { conditions }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Any { conditions }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    /// Evaluate this condition against a JSON context object.
    pub fn evaluate(&self, ctx: &Value) -> Result<bool, ConditionError> {
        match self {
            Self::Field { field, op, value } => {
                let actual = lookup_path(ctx, field);
                match actual {
                    Some(actual) => compare(field, *op, actual, value),
                    // Absent fields never match (and never mismatch for Ne)
                    None => Ok(matches!(op, ConditionOp::Ne)),
                }
            }
            Self::All { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { conditions } => {
                for condition in conditions {
                    if condition.evaluate(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { condition } => Ok(!condition.evaluate(ctx)?),
        }
    }
}

/// Resolve a dotted path through nested JSON objects.
fn lookup_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn compare(
    field: &str,
    op: ConditionOp,
    actual: &Value,
    expected: &Value,
) -> Result<bool, ConditionError> {
    match op {
        ConditionOp::Eq => Ok(json_eq(actual, expected)),
        ConditionOp::Ne => Ok(!json_eq(actual, expected)),
        ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
            ordered_compare(field, op, actual, expected)
        }
        ConditionOp::In => {
            let candidates = expected.as_array().ok_or_else(|| ConditionError::ExpectedArray {
                field: field.to_string(),
                op: op.to_string(),
            })?;
            Ok(candidates.iter().any(|candidate| json_eq(actual, candidate)))
        }
        ConditionOp::Contains => match actual {
            Value::Array(items) => Ok(items.iter().any(|item| json_eq(item, expected))),
            Value::String(haystack) => match expected.as_str() {
                Some(needle) => Ok(haystack.contains(needle)),
                None => Err(ConditionError::InvalidOperand {
                    field: field.to_string(),
                    op: op.to_string(),
                }),
            },
            _ => Ok(false),
        },
    }
}

/// Equality with numeric coercion so `2` and `2.0` compare equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn ordered_compare(
    field: &str,
    op: ConditionOp,
    actual: &Value,
    expected: &Value,
) -> Result<bool, ConditionError> {
    if let (Some(x), Some(y)) = (actual.as_f64(), expected.as_f64()) {
        return Ok(apply_ordering(op, x.partial_cmp(&y)));
    }
    if let (Some(x), Some(y)) = (actual.as_str(), expected.as_str()) {
        return Ok(apply_ordering(op, Some(x.cmp(y))));
    }
    Err(ConditionError::InvalidOperand {
        field: field.to_string(),
        op: op.to_string(),
    })
}

fn apply_ordering(op: ConditionOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;
    match (op, ordering) {
        (ConditionOp::Gt, Some(Greater)) => true,
        (ConditionOp::Gte, Some(Greater | Equal)) => true,
        (ConditionOp::Lt, Some(Less)) => true,
        (ConditionOp::Lte, Some(Less | Equal)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "amount": 12000,
            "currency": "EUR",
            "metadata": { "department": "finance", "urgent": true },
            "roles": ["requester", "employee"],
        })
    }

    #[test]
    fn test_field_eq() {
        let cond = Condition::field("currency", ConditionOp::Eq, "EUR");
        assert!(cond.evaluate(&ctx()).unwrap());

        let cond = Condition::field("currency", ConditionOp::Eq, "USD");
        assert!(!cond.evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_dotted_path() {
        let cond = Condition::field("metadata.department", ConditionOp::Eq, "finance");
        assert!(cond.evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(Condition::field("amount", ConditionOp::Gt, 10000)
            .evaluate(&ctx())
            .unwrap());
        assert!(Condition::field("amount", ConditionOp::Lte, 12000)
            .evaluate(&ctx())
            .unwrap());
        assert!(!Condition::field("amount", ConditionOp::Lt, 12000)
            .evaluate(&ctx())
            .unwrap());
    }

    #[test]
    fn test_numeric_coercion_eq() {
        assert!(Condition::field("amount", ConditionOp::Eq, 12000.0)
            .evaluate(&ctx())
            .unwrap());
    }

    #[test]
    fn test_in_operator() {
        let cond = Condition::field("currency", ConditionOp::In, json!(["USD", "EUR"]));
        assert!(cond.evaluate(&ctx()).unwrap());

        let cond = Condition::field("currency", ConditionOp::In, json!(["USD", "GBP"]));
        assert!(!cond.evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_in_requires_array() {
        let cond = Condition::field("currency", ConditionOp::In, "EUR");
        assert!(matches!(
            cond.evaluate(&ctx()),
            Err(ConditionError::ExpectedArray { .. })
        ));
    }

    #[test]
    fn test_contains_on_array_and_string() {
        assert!(Condition::field("roles", ConditionOp::Contains, "employee")
            .evaluate(&ctx())
            .unwrap());
        assert!(Condition::field("currency", ConditionOp::Contains, "EU")
            .evaluate(&ctx())
            .unwrap());
    }

    #[test]
    fn test_missing_field_is_false_except_ne() {
        assert!(!Condition::field("missing", ConditionOp::Eq, 1)
            .evaluate(&ctx())
            .unwrap());
        assert!(Condition::field("missing", ConditionOp::Ne, 1)
            .evaluate(&ctx())
            .unwrap());
    }

    #[test]
    fn test_all_any_not() {
        let cond = Condition::all(vec![
            Condition::field("currency", ConditionOp::Eq, "EUR"),
            Condition::any(vec![
                Condition::field("amount", ConditionOp::Gt, 100000),
                Condition::field("metadata.urgent", ConditionOp::Eq, true),
            ]),
        ]);
        assert!(cond.evaluate(&ctx()).unwrap());

        let cond = Condition::not(cond);
        assert!(!cond.evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_empty_groups() {
        assert!(Condition::all(vec![]).evaluate(&ctx()).unwrap());
        assert!(!Condition::any(vec![]).evaluate(&ctx()).unwrap());
    }

    #[test]
    fn test_serde_round_trip() {
        let cond = Condition::all(vec![
            Condition::field("amount", ConditionOp::Gte, 500),
            Condition::not(Condition::field("currency", ConditionOp::Eq, "USD")),
        ]);
        let encoded = serde_json::to_string(&cond).unwrap();
        let decoded: Condition = serde_json::from_str(&encoded).unwrap();
        assert!(decoded.evaluate(&ctx()).unwrap());
    }
}
