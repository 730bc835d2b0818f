//! Rule evaluation
//!
//! Applies a policy's rule set to a workload. Rules run in priority order;
//! a rule that fails to compile or evaluate is recorded as an error outcome
//! and its siblings still run.

use crate::expr::{self, ClusterResources, EvalContext};
use crate::models::{Policy, Rule, RuleOutcome, Workload};

/// Score a matched rule gets when it has no scoring expression
const DEFAULT_MATCH_SCORE: f64 = 100.0;

/// Evaluates policy rules against workloads via the expression sandbox
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    cluster: ClusterResources,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a cluster capacity snapshot for `cluster.resources.*` lookups
    pub fn with_cluster(cluster: ClusterResources) -> Self {
        Self { cluster }
    }

    /// Evaluate every rule of `policy` against `workload`.
    ///
    /// Returns the per-rule outcomes in evaluation order plus the
    /// objective-weighted aggregate score, clamped to [0, 100].
    pub fn evaluate(&self, workload: &Workload, policy: &Policy) -> (Vec<RuleOutcome>, f64) {
        let ctx = EvalContext::new()
            .with_workload(workload)
            .with_policy(policy)
            .with_cluster(&self.cluster);

        let mut ordered: Vec<&Rule> = policy.spec.rules.iter().collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let outcomes: Vec<RuleOutcome> = ordered
            .iter()
            .map(|rule| self.evaluate_rule(rule, &ctx))
            .collect();

        let aggregate = aggregate_score(policy, &outcomes);
        (outcomes, aggregate)
    }

    fn evaluate_rule(&self, rule: &Rule, ctx: &EvalContext) -> RuleOutcome {
        let program = match expr::compile(&rule.condition) {
            Ok(program) => program,
            Err(err) => {
                return RuleOutcome {
                    rule_name: rule.name.clone(),
                    matched: false,
                    score: 0.0,
                    message: err.to_string(),
                    action: rule.action.clone(),
                    error: true,
                };
            }
        };

        let matched = match program.eval_condition(ctx) {
            Ok(matched) => matched,
            Err(err) => {
                return RuleOutcome {
                    rule_name: rule.name.clone(),
                    matched: false,
                    score: 0.0,
                    message: err.to_string(),
                    action: rule.action.clone(),
                    error: true,
                };
            }
        };

        if !matched {
            return RuleOutcome {
                rule_name: rule.name.clone(),
                matched: false,
                score: 0.0,
                message: "condition not met".into(),
                action: rule.action.clone(),
                error: false,
            };
        }

        let score = match &rule.score {
            Some(source) => match expr::compile(source).and_then(|p| p.eval_score(ctx)) {
                Ok(score) => score,
                Err(err) => {
                    return RuleOutcome {
                        rule_name: rule.name.clone(),
                        matched: true,
                        score: 0.0,
                        message: err.to_string(),
                        action: rule.action.clone(),
                        error: true,
                    };
                }
            },
            None => DEFAULT_MATCH_SCORE,
        };

        RuleOutcome {
            rule_name: rule.name.clone(),
            matched: true,
            score,
            message: "condition met".into(),
            action: rule.action.clone(),
            error: false,
        }
    }
}

/// Objective-weighted aggregate: each objective contributes
/// `weight × best matched rule score` among the rules bound to it; an
/// objective with no matched rules contributes 0.
fn aggregate_score(policy: &Policy, outcomes: &[RuleOutcome]) -> f64 {
    let rule_objective = |rule_name: &str| -> Option<String> {
        let rule = policy.spec.rules.iter().find(|r| r.name == rule_name)?;
        match &rule.objective {
            Some(objective) => Some(objective.clone()),
            None => policy
                .spec
                .objectives
                .first()
                .map(|o| o.objective_type.clone()),
        }
    };

    let mut total = 0.0;
    for objective in &policy.spec.objectives {
        let best = outcomes
            .iter()
            .filter(|o| o.matched && !o.error)
            .filter(|o| rule_objective(&o.rule_name).as_deref() == Some(&objective.objective_type))
            .map(|o| o.score)
            .fold(0.0f64, f64::max);
        total += objective.weight * best;
    }
    total.clamp(0.0, 100.0)
}
