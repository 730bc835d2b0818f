//! Policy evaluation
//!
//! The evaluator filters policies by applicability, delegates per-policy
//! rule evaluation to the [`RuleEngine`], and composes the final score from
//! rule outcomes, a cost score and a priority score. It holds no mutable
//! state, so concurrent evaluations of distinct arguments proceed in
//! parallel.

mod conflict;
mod engine;
mod rules;

#[cfg(test)]
mod tests;

pub use conflict::ConflictResolver;
pub use engine::{
    BulkEvaluation, BulkFailure, EvaluationConfig, EvaluationEngine, EvaluationStatistics,
};
pub use rules::RuleEngine;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::models::{
    DecisionType, EvaluationOutcome, EvaluationResult, Policy, Recommendation, RuleOutcome,
    Workload,
};
use crate::storage::StorageManager;

/// Blend weights for the composite score
const RULE_SCORE_WEIGHT: f64 = 0.6;
const COST_SCORE_WEIGHT: f64 = 0.25;
const PRIORITY_SCORE_WEIGHT: f64 = 0.15;

/// Nominal per-workload budget the cost score normalizes against
const NOMINAL_CPU_MILLIS: f64 = 4000.0;
const NOMINAL_MEMORY_BYTES: f64 = 8.0 * 1024.0 * 1024.0 * 1024.0;

/// Evaluates single (workload, policy) pairs
pub struct PolicyEvaluator {
    storage: Arc<dyn StorageManager>,
    rules: RuleEngine,
}

impl PolicyEvaluator {
    pub fn new(storage: Arc<dyn StorageManager>, rules: RuleEngine) -> Self {
        Self { storage, rules }
    }

    /// Evaluate one policy against one workload.
    ///
    /// Errors: `PolicyInactive` when the policy is not active,
    /// `PolicyNotApplicable` when the target selector rejects the workload,
    /// `InvalidInput` on structural problems.
    pub fn evaluate(&self, workload: &Workload, policy: &Policy) -> Result<EvaluationResult> {
        policy.validate()?;

        if !policy.is_active() {
            return Err(EngineError::PolicyInactive(policy.metadata.name.clone()));
        }

        if let Err(reason) = policy.spec.target.accepts(workload) {
            return Err(EngineError::PolicyNotApplicable {
                policy: policy.metadata.name.clone(),
                workload: workload.id.clone(),
                reason,
            });
        }

        let (rule_outcomes, rule_score) = self.rules.evaluate(workload, policy);
        let cost_score = cost_score(workload, policy);
        let priority_score = priority_score(workload);

        let score = (RULE_SCORE_WEIGHT * rule_score
            + COST_SCORE_WEIGHT * cost_score
            + PRIORITY_SCORE_WEIGHT * priority_score)
            .clamp(0.0, 100.0);

        let outcome = classify(&rule_outcomes);
        let recommendation = recommend(&rule_outcomes);

        debug!(
            policy_id = %policy.id,
            workload_id = %workload.id,
            score = score,
            outcome = ?outcome,
            "Policy evaluated"
        );

        Ok(EvaluationResult {
            policy_id: policy.id.clone(),
            policy_name: policy.metadata.name.clone(),
            policy_priority: policy.spec.priority,
            workload_id: workload.id.clone(),
            outcome,
            score,
            rule_outcomes,
            recommendation,
            constraints: policy.spec.constraints.clone(),
            evaluated_at: Utc::now(),
        })
    }

    /// Whether the policy is active and its selector accepts the workload
    pub fn is_applicable(&self, workload: &Workload, policy: &Policy) -> bool {
        policy.is_active() && policy.spec.target.accepts(workload).is_ok()
    }

    /// Filter a policy catalog down to the ones applicable to a workload
    pub fn applicable_policies<'a>(
        &self,
        workload: &Workload,
        policies: &'a [Policy],
    ) -> Vec<&'a Policy> {
        policies
            .iter()
            .filter(|p| self.is_applicable(workload, p))
            .collect()
    }

    pub async fn health(&self) -> Result<()> {
        self.storage.health().await
    }
}

/// Pass if any rule matched, Error if all rules errored, Warning when a
/// subset errored, Fail otherwise
fn classify(outcomes: &[RuleOutcome]) -> EvaluationOutcome {
    if outcomes.is_empty() {
        return EvaluationOutcome::Pass;
    }
    let errors = outcomes.iter().filter(|o| o.error).count();
    if errors == outcomes.len() {
        return EvaluationOutcome::Error;
    }
    if errors > 0 {
        return EvaluationOutcome::Warning;
    }
    if outcomes.iter().any(|o| o.matched) {
        EvaluationOutcome::Pass
    } else {
        EvaluationOutcome::Fail
    }
}

/// Lower declared resource requirements score higher against the nominal
/// budget; unparsable quantities fall back to the midpoint.
fn cost_score(workload: &Workload, policy: &Policy) -> f64 {
    let cpu = workload
        .requirements
        .cpu_millicores()
        .map(|m| m as f64)
        .unwrap_or(NOMINAL_CPU_MILLIS / 2.0);
    let memory = workload
        .requirements
        .memory_bytes()
        .map(|b| b as f64)
        .unwrap_or(NOMINAL_MEMORY_BYTES / 2.0);

    let cpu_part = (1.0 - (cpu / NOMINAL_CPU_MILLIS).min(1.0)) * 50.0;
    let memory_part = (1.0 - (memory / NOMINAL_MEMORY_BYTES).min(1.0)) * 50.0;
    let base = cpu_part + memory_part;

    // Without a cost objective the requirement signal is damped toward
    // the midpoint
    let has_cost_objective = policy
        .spec
        .objectives
        .iter()
        .any(|o| o.objective_type.contains("cost"));
    if has_cost_objective {
        base
    } else {
        base * 0.5 + 25.0
    }
}

/// Derived from the workload's `priority` label
fn priority_score(workload: &Workload) -> f64 {
    match workload.labels.get("priority").map(String::as_str) {
        Some("critical") => 100.0,
        Some("high") => 80.0,
        Some("medium") => 60.0,
        Some("low") => 30.0,
        _ => 50.0,
    }
}

/// Derive the recommendation from the highest-scoring matched rule
fn recommend(outcomes: &[RuleOutcome]) -> Option<Recommendation> {
    let best = outcomes
        .iter()
        .filter(|o| o.matched && !o.error)
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))?;

    let (decision_type, details) = action_to_decision(&best.action);
    Some(Recommendation {
        action: best.action.clone(),
        decision_type,
        details,
    })
}

/// Map a rule action name onto a decision class with type-specific details
fn action_to_decision(action: &str) -> (DecisionType, HashMap<String, serde_json::Value>) {
    let action = action.to_lowercase();
    let mut details = HashMap::new();

    let decision_type = if action.contains("scale-down") {
        details.insert("scale_direction".into(), serde_json::json!("down"));
        details.insert("scale_factor".into(), serde_json::json!(0.5));
        DecisionType::Scale
    } else if action.contains("scale-up") {
        details.insert("scale_direction".into(), serde_json::json!("up"));
        details.insert("scale_factor".into(), serde_json::json!(2.0));
        DecisionType::Scale
    } else if action.contains("scale") {
        details.insert("scale_direction".into(), serde_json::json!("down"));
        details.insert("scale_factor".into(), serde_json::json!(0.5));
        DecisionType::Scale
    } else if action.contains("reschedule") {
        DecisionType::Reschedule
    } else if action.contains("schedule") {
        DecisionType::Schedule
    } else if action.contains("migrate") {
        DecisionType::Migrate
    } else if action.contains("terminate") {
        DecisionType::Terminate
    } else if action.contains("suspend") {
        DecisionType::Suspend
    } else if action.contains("resume") {
        DecisionType::Resume
    } else if action.contains("optimize")
        || action.contains("reduce-")
        || action.contains("resource-adjustment")
    {
        details.insert("optimizations".into(), serde_json::json!([action]));
        DecisionType::Optimize
    } else {
        DecisionType::NoOp
    };

    (decision_type, details)
}
