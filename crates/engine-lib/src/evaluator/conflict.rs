//! Conflict resolution
//!
//! Merges multiple evaluation results for one workload into a single
//! decision. Pure and deterministic for a given input ordering; callers
//! pass results in policy-priority-descending order.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{Decision, DecisionStatus, DecisionType, EvaluationOutcome, EvaluationResult};

/// Reason recorded when a hard constraint blocks the winning action
pub const REASON_CONFLICT_BLOCKED: &str = "conflict_blocked";

/// Resolves conflicting evaluation results into one decision
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `results` into exactly one decision. An empty input yields a
    /// NoOp decision.
    pub fn resolve(&self, workload_id: &str, results: &[EvaluationResult]) -> Decision {
        // Error results cannot enforce safely; log and drop them
        let usable: Vec<&EvaluationResult> = results
            .iter()
            .filter(|r| {
                if r.outcome == EvaluationOutcome::Error {
                    warn!(
                        policy_id = %r.policy_id,
                        workload_id = %workload_id,
                        "Dropping errored evaluation result from conflict resolution"
                    );
                    false
                } else {
                    true
                }
            })
            .collect();

        // Only results that recommend an action compete; NoOp-recommending
        // policies still contribute constraints below.
        let candidates: Vec<&EvaluationResult> = usable
            .iter()
            .copied()
            .filter(|r| {
                r.recommendation
                    .as_ref()
                    .map(|rec| rec.decision_type != DecisionType::NoOp)
                    .unwrap_or(false)
            })
            .collect();

        let Some(winner) = pick_winner(&candidates) else {
            return Decision::noop(workload_id, "no actionable recommendation");
        };

        let Some(recommendation) = winner.recommendation.as_ref() else {
            return Decision::noop(workload_id, "no actionable recommendation");
        };

        // A winner that would violate another matching policy's hard
        // constraint is downgraded to NoOp with the blocker recorded.
        if let Some(blocker) = find_blocker(winner, recommendation.decision_type, &usable) {
            debug!(
                workload_id = %workload_id,
                winner = %winner.policy_id,
                blocker = %blocker.policy_id,
                blocked_type = %recommendation.decision_type,
                "Winning action blocked by constraint"
            );
            let mut decision = Decision::noop(workload_id, REASON_CONFLICT_BLOCKED);
            decision.blocker_policy_id = Some(blocker.policy_id.clone());
            decision.details.insert(
                "blocked_action".into(),
                serde_json::json!(recommendation.decision_type.to_string()),
            );
            decision.details.insert(
                "message".into(),
                serde_json::json!(format!(
                    "{} blocked by pin constraint of policy {}",
                    recommendation.decision_type, blocker.policy_name
                )),
            );
            return decision;
        }

        let now = Utc::now();
        Decision {
            id: uuid::Uuid::new_v4().to_string(),
            workload_id: workload_id.to_string(),
            policy_id: Some(winner.policy_id.clone()),
            decision_type: recommendation.decision_type,
            recommended_cluster: detail_string(&recommendation.details, "recommended_cluster"),
            recommended_node: detail_string(&recommendation.details, "recommended_node"),
            details: recommendation.details.clone(),
            reason: format!(
                "policy {} recommends {}",
                winner.policy_name, recommendation.action
            ),
            blocker_policy_id: None,
            status: DecisionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One action class: best score wins. Multiple classes: highest policy
/// priority wins, ties broken by score, then lexicographically smaller
/// policy name.
fn pick_winner<'a>(candidates: &[&'a EvaluationResult]) -> Option<&'a EvaluationResult> {
    if candidates.is_empty() {
        return None;
    }

    let classes: std::collections::HashSet<DecisionType> = candidates
        .iter()
        .filter_map(|r| r.recommendation.as_ref().map(|rec| rec.decision_type))
        .collect();

    let best = if classes.len() == 1 {
        candidates.iter().copied().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.policy_name.cmp(&a.policy_name))
        })
    } else {
        candidates.iter().copied().max_by(|a, b| {
            a.policy_priority
                .cmp(&b.policy_priority)
                .then_with(|| {
                    a.score
                        .partial_cmp(&b.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.policy_name.cmp(&a.policy_name))
        })
    };
    best
}

/// Pin constraints declared by other matching policies block movement
fn find_blocker<'a>(
    winner: &EvaluationResult,
    decision_type: DecisionType,
    all: &[&'a EvaluationResult],
) -> Option<&'a EvaluationResult> {
    let moves_workload = matches!(
        decision_type,
        DecisionType::Migrate | DecisionType::Reschedule
    );
    if !moves_workload {
        return None;
    }
    all.iter()
        .copied()
        .find(|other| other.policy_id != winner.policy_id && other.constraints.pin)
}

fn detail_string(
    details: &HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    details
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
