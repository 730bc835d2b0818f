//! Validation engine
//!
//! Structural and expression validation for policies and automation rules,
//! applied before anything reaches storage or the rule registry. Expression
//! checks reuse the sandbox compiler so nothing that would be rejected at
//! evaluation time is ever stored.

use tracing::debug;

use crate::automation::{AutomationRule, Trigger};
use crate::errors::{EngineError, Result};
use crate::expr;
use crate::models::{Policy, Rule};

/// Action vocabulary accepted in policy rules; `custom-` prefixed actions
/// are passed through for downstream executors to interpret.
const KNOWN_ACTIONS: &[&str] = &[
    "scale-up",
    "scale-down",
    "scale-workload",
    "schedule",
    "reschedule",
    "migrate",
    "terminate",
    "suspend",
    "resume",
    "reduce-cpu",
    "reduce-memory",
    "reduce-storage",
    "optimize-storage",
    "resource-adjustment",
    "notification",
    "alert",
    "log",
];

/// Validates policies and automation rules
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Full policy validation: metadata, objectives, and every rule
    pub fn validate_policy(&self, policy: &Policy) -> Result<()> {
        policy.validate()?;
        for rule in &policy.spec.rules {
            self.validate_rule(rule)?;
        }
        debug!(policy = %policy.metadata.name, "Policy validated");
        Ok(())
    }

    /// Validate a single policy rule: structure, condition expression,
    /// optional score expression and the action vocabulary
    pub fn validate_rule(&self, rule: &Rule) -> Result<()> {
        if rule.name.is_empty() {
            return Err(EngineError::InvalidInput("rule name is empty".into()));
        }
        if rule.condition.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "rule {} has an empty condition",
                rule.name
            )));
        }
        if rule.action.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "rule {} has an empty action",
                rule.name
            )));
        }

        expr::compile(&rule.condition).map_err(|err| {
            EngineError::InvalidInput(format!(
                "rule {} condition rejected: {err}",
                rule.name
            ))
        })?;
        if let Some(score) = &rule.score {
            expr::compile(score).map_err(|err| {
                EngineError::InvalidInput(format!(
                    "rule {} score expression rejected: {err}",
                    rule.name
                ))
            })?;
        }

        self.validate_action(&rule.name, &rule.action)
    }

    fn validate_action(&self, rule_name: &str, action: &str) -> Result<()> {
        let lowered = action.to_lowercase();
        if lowered.starts_with("custom-") {
            return Ok(());
        }
        if KNOWN_ACTIONS.iter().any(|known| lowered.contains(known)) {
            return Ok(());
        }
        Err(EngineError::InvalidInput(format!(
            "rule {rule_name} has unknown action {action:?}"
        )))
    }

    /// Validate an automation rule beyond its structural checks: trigger
    /// shape and event-filter sanity
    pub fn validate_automation_rule(&self, rule: &AutomationRule) -> Result<()> {
        rule.validate()?;
        for (index, trigger) in rule.triggers.iter().enumerate() {
            match trigger {
                Trigger::Event { event, .. } => {
                    if event.is_empty() {
                        return Err(EngineError::InvalidInput(format!(
                            "rule {} trigger {index} has an empty event type",
                            rule.name
                        )));
                    }
                }
                Trigger::Threshold { metric, .. } => {
                    if metric.is_empty() {
                        return Err(EngineError::InvalidInput(format!(
                            "rule {} trigger {index} has an empty metric",
                            rule.name
                        )));
                    }
                }
                Trigger::Schedule { .. } => {
                    // Cron syntax checked by AutomationRule::validate
                }
            }
        }
        for (index, action) in rule.actions.iter().enumerate() {
            if action.action_type.is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "rule {} action {index} has an empty type",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Objective, PolicyKind, PolicyMetadata, PolicySpec, PolicyStatus, TargetSelector,
    };
    use chrono::Utc;
    use std::collections::HashMap;

    fn rule(condition: &str, action: &str) -> Rule {
        Rule {
            name: "r".into(),
            condition: condition.into(),
            action: action.into(),
            priority: 0,
            score: None,
            objective: None,
        }
    }

    fn policy_with(rules: Vec<Rule>) -> Policy {
        Policy {
            id: "pol-1".into(),
            kind: PolicyKind::CostOptimization,
            metadata: PolicyMetadata::new("cost-p"),
            spec: PolicySpec {
                priority: 100,
                target: TargetSelector::default(),
                objectives: vec![Objective {
                    objective_type: "cost-reduction".into(),
                    weight: 1.0,
                    target: None,
                }],
                constraints: Default::default(),
                rules,
            },
            status: PolicyStatus::Active,
        }
    }

    #[test]
    fn test_valid_policy_passes() {
        let engine = ValidationEngine::new();
        let policy = policy_with(vec![rule("workload.cpu.usage > 0.8", "scale-down")]);
        assert!(engine.validate_policy(&policy).is_ok());
    }

    #[test]
    fn test_dangerous_condition_rejected() {
        let engine = ValidationEngine::new();
        let policy = policy_with(vec![rule("exec('rm -rf /') && workload.cpu.usage > 0", "scale-down")]);
        assert!(engine.validate_policy(&policy).is_err());
    }

    #[test]
    fn test_condition_must_reference_context() {
        let engine = ValidationEngine::new();
        let err = engine
            .validate_rule(&rule("1 + 1 == 2", "scale-down"))
            .unwrap_err();
        assert!(err.to_string().contains("condition rejected"));
    }

    #[test]
    fn test_unknown_action_rejected_custom_allowed() {
        let engine = ValidationEngine::new();
        assert!(engine
            .validate_rule(&rule("workload.cpu.usage > 0.8", "frobnicate"))
            .is_err());
        assert!(engine
            .validate_rule(&rule("workload.cpu.usage > 0.8", "custom-defrag"))
            .is_ok());
    }

    #[test]
    fn test_score_expression_checked() {
        let engine = ValidationEngine::new();
        let mut scored = rule("workload.cpu.usage > 0.8", "scale-down");
        scored.score = Some("import('x')".into());
        assert!(engine.validate_rule(&scored).is_err());
    }

    #[test]
    fn test_automation_rule_trigger_checks() {
        let engine = ValidationEngine::new();
        let now = Utc::now();
        let mut auto_rule = AutomationRule {
            id: "r1".into(),
            name: "nightly".into(),
            description: None,
            enabled: true,
            priority: 100,
            triggers: vec![Trigger::Schedule {
                cron: Some("0 3 * * *".into()),
                interval_secs: None,
            }],
            conditions: vec![],
            actions: vec![crate::automation::ActionTemplate {
                action_type: "notify".into(),
                target: None,
                parameters: HashMap::new(),
                timeout_secs: None,
                retry: None,
            }],
            created_at: now,
            updated_at: now,
        };
        assert!(engine.validate_automation_rule(&auto_rule).is_ok());

        auto_rule.triggers = vec![Trigger::Event {
            event: String::new(),
            filters: HashMap::new(),
        }];
        assert!(engine.validate_automation_rule(&auto_rule).is_err());

        auto_rule.triggers = vec![Trigger::Schedule {
            cron: Some("not a cron".into()),
            interval_secs: None,
        }];
        assert!(engine.validate_automation_rule(&auto_rule).is_err());
    }
}
