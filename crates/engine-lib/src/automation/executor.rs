//! Rule executor
//!
//! Runs a triggered rule's actions through the enforcement engine's
//! executor registry under a bounded concurrency pool, collects per-action
//! results, and maintains rule status counters and execution history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use super::{ActionResult, ActionTemplate, AutomationRule, ExecutionResult, RuleState, RuleStatus};
use crate::enforcer::{Action, ActionType, EnforcementEngine};
use crate::errors::EngineError;

/// Default per-action timeout for automation actions
const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes automation rules with a bounded pool
pub struct RuleExecutor {
    enforcement: Arc<EnforcementEngine>,
    statuses: Arc<DashMap<String, RuleStatus>>,
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    idle: Notify,
    history: DashMap<String, VecDeque<ExecutionResult>>,
    history_limit: usize,
}

impl RuleExecutor {
    pub fn new(
        enforcement: Arc<EnforcementEngine>,
        statuses: Arc<DashMap<String, RuleStatus>>,
        pool_size: usize,
        history_limit: usize,
    ) -> Self {
        Self {
            enforcement,
            statuses,
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            history: DashMap::new(),
            history_limit,
        }
    }

    /// Execute every action of the rule in order. The execution succeeds
    /// only if all actions succeed; the first exhausted-retries failure
    /// stops the sequence.
    pub async fn execute(
        &self,
        rule: Arc<AutomationRule>,
        context: HashMap<String, serde_json::Value>,
    ) -> ExecutionResult {
        let _permit = self.semaphore.acquire().await;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.mark_running(&rule.id);

        let start = std::time::Instant::now();
        let mut actions = Vec::with_capacity(rule.actions.len());
        let mut error: Option<String> = None;

        for template in &rule.actions {
            let action_start = std::time::Instant::now();
            match self.run_action(&rule, template, &context).await {
                Ok(result) => {
                    actions.push(result);
                }
                Err(err) => {
                    actions.push(ActionResult {
                        action_type: template.action_type.clone(),
                        success: false,
                        message: err.to_string(),
                        duration_ms: action_start.elapsed().as_millis() as u64,
                        retry_count: 0,
                    });
                    error = Some(err.to_string());
                    break;
                }
            }
        }

        let success = error.is_none();
        let result = ExecutionResult {
            rule_id: rule.id.clone(),
            success,
            message: if success {
                format!("{} actions executed", actions.len())
            } else {
                "rule execution failed".to_string()
            },
            duration_ms: start.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            actions,
            error,
        };

        self.record(&rule, &result);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
        result
    }

    async fn run_action(
        &self,
        rule: &AutomationRule,
        template: &ActionTemplate,
        context: &HashMap<String, serde_json::Value>,
    ) -> crate::errors::Result<ActionResult> {
        let action_type = ActionType::parse(&template.action_type).ok_or_else(|| {
            EngineError::UnsupportedDecision(template.action_type.clone())
        })?;

        let mut parameters = template.parameters.clone();
        parameters.insert("rule_id".into(), serde_json::json!(rule.id));
        parameters.insert("context".into(), serde_json::json!(context));

        let action = Action {
            action_type,
            target: template
                .target
                .clone()
                .unwrap_or_else(|| rule.name.clone()),
            parameters,
            timeout: template
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ACTION_TIMEOUT),
            retry: template.retry.clone(),
        };

        let start = std::time::Instant::now();
        let record = self.enforcement.execute_action(&action).await?;
        debug!(
            rule_id = %rule.id,
            action_type = %action.action_type,
            attempts = record.attempts.len(),
            "Automation action executed"
        );
        Ok(ActionResult {
            action_type: template.action_type.clone(),
            success: true,
            message: record.message,
            duration_ms: start.elapsed().as_millis() as u64,
            retry_count: record.attempts.len().saturating_sub(1) as u32,
        })
    }

    fn mark_running(&self, rule_id: &str) {
        if let Some(mut status) = self.statuses.get_mut(rule_id) {
            status.state = RuleState::Running;
        }
    }

    fn record(&self, rule: &AutomationRule, result: &ExecutionResult) {
        if let Some(mut status) = self.statuses.get_mut(&rule.id) {
            status.execution_count += 1;
            status.last_executed = Some(result.timestamp);
            if result.success {
                status.success_count += 1;
                status.state = if rule.enabled {
                    RuleState::Active
                } else {
                    RuleState::Disabled
                };
                status.last_error = None;
            } else {
                status.failure_count += 1;
                status.state = RuleState::Failed;
                status.last_error = result.error.clone();
            }
        } else {
            warn!(rule_id = %rule.id, "Execution finished for unregistered rule");
        }

        let mut history = self.history.entry(rule.id.clone()).or_default();
        history.push_back(result.clone());
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// Recent executions for a rule, oldest first
    pub fn history(&self, rule_id: &str) -> Vec<ExecutionResult> {
        self.history
            .get(rule_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no executions are in flight
    pub async fn drain(&self) {
        while self.in_flight() > 0 {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                break;
            }
            notified.await;
        }
    }
}
