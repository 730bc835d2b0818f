//! Condition evaluation with `for`-duration semantics
//!
//! Conditions are conjunctive field/operator/value triples over the
//! trigger context. A condition with a duration only counts as true once
//! it has been continuously true for at least that long; continuity is
//! tracked per (rule, condition index) and reset the moment the condition
//! observes false. An evaluation error leaves the tracker untouched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::{Condition, ConditionOperator};
use crate::errors::{EngineError, Result};

/// Evaluates rule conditions against trigger contexts
#[derive(Default)]
pub struct ConditionEvaluator {
    first_true: DashMap<(String, usize), Instant>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conjunction over all conditions; empty lists are vacuously true
    pub fn evaluate_all(
        &self,
        rule_id: &str,
        conditions: &[Condition],
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        for (index, condition) in conditions.iter().enumerate() {
            if !self.evaluate(rule_id, index, condition, context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate one condition, applying its duration if present
    pub fn evaluate(
        &self,
        rule_id: &str,
        index: usize,
        condition: &Condition,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        let raw = self.compare(condition, context)?;
        let key = (rule_id.to_string(), index);

        let Some(duration_secs) = condition.duration_secs else {
            // Keep the tracker coherent for conditions that gain a
            // duration on rule update
            if raw {
                self.first_true.entry(key).or_insert_with(Instant::now);
            } else {
                self.first_true.remove(&key);
            }
            return Ok(raw);
        };

        if !raw {
            self.first_true.remove(&key);
            return Ok(false);
        }

        let first = *self.first_true.entry(key).or_insert_with(Instant::now);
        let held = first.elapsed();
        let required = Duration::from_secs(duration_secs);
        debug!(
            rule_id = %rule_id,
            condition = index,
            held_ms = held.as_millis() as u64,
            required_ms = required.as_millis() as u64,
            "Duration condition holding"
        );
        Ok(held >= required)
    }

    /// Drop all trackers for a removed rule
    pub fn forget_rule(&self, rule_id: &str) {
        self.first_true.retain(|(id, _), _| id != rule_id);
    }

    fn compare(
        &self,
        condition: &Condition,
        context: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        let actual = lookup(context, &condition.field).ok_or_else(|| {
            EngineError::ExpressionRuntime(format!(
                "condition field {:?} not present in context",
                condition.field
            ))
        })?;
        apply_operator(condition.operator, actual, &condition.value)
    }
}

/// Resolve a field path against the context: exact key first, then
/// dot-path navigation into nested objects.
fn lookup<'a>(
    context: &'a HashMap<String, serde_json::Value>,
    field: &str,
) -> Option<&'a serde_json::Value> {
    if let Some(value) = context.get(field) {
        return Some(value);
    }
    let mut parts = field.split('.');
    let mut current = context.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

fn apply_operator(
    operator: ConditionOperator,
    actual: &serde_json::Value,
    expected: &serde_json::Value,
) -> Result<bool> {
    use ConditionOperator::*;

    match operator {
        Equals => Ok(actual == expected),
        NotEquals => Ok(actual != expected),
        GreaterThan | LessThan | GreaterThanOrEqual | LessThanOrEqual => {
            let (a, b) = numeric_pair(actual, expected)?;
            Ok(match operator {
                GreaterThan => a > b,
                LessThan => a < b,
                GreaterThanOrEqual => a >= b,
                LessThanOrEqual => a <= b,
                _ => unreachable!(),
            })
        }
        Contains | NotContains => {
            let contained = match (actual, expected) {
                (serde_json::Value::String(haystack), serde_json::Value::String(needle)) => {
                    haystack.contains(needle.as_str())
                }
                (serde_json::Value::Array(items), needle) => items.contains(needle),
                (actual, expected) => {
                    return Err(type_error("contains", actual, expected));
                }
            };
            Ok(if operator == Contains {
                contained
            } else {
                !contained
            })
        }
        StartsWith => {
            let (a, b) = string_pair(actual, expected, "starts_with")?;
            Ok(a.starts_with(b))
        }
        EndsWith => {
            let (a, b) = string_pair(actual, expected, "ends_with")?;
            Ok(a.ends_with(b))
        }
        Regex => {
            let (subject, pattern) = string_pair(actual, expected, "regex")?;
            let re = regex::Regex::new(pattern).map_err(|e| {
                EngineError::ExpressionRuntime(format!("invalid regex {pattern:?}: {e}"))
            })?;
            Ok(re.is_match(subject))
        }
        In | NotIn => {
            let serde_json::Value::Array(items) = expected else {
                return Err(type_error("in", actual, expected));
            };
            let contained = items.contains(actual);
            Ok(if operator == In { contained } else { !contained })
        }
    }
}

fn numeric_pair(a: &serde_json::Value, b: &serde_json::Value) -> Result<(f64, f64)> {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(type_error("numeric comparison", a, b)),
    }
}

fn string_pair<'a>(
    a: &'a serde_json::Value,
    b: &'a serde_json::Value,
    operator: &str,
) -> Result<(&'a str, &'a str)> {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(type_error(operator, a, b)),
    }
}

fn type_error(operator: &str, a: &serde_json::Value, b: &serde_json::Value) -> EngineError {
    EngineError::ExpressionRuntime(format!(
        "operator {operator} cannot compare {a} with {b}"
    ))
}
