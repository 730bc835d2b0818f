//! Automation rule engine
//!
//! Long-running subsystem with three trigger sources: the event
//! dispatcher (bus events), the scheduler (cron/interval) and the
//! threshold monitor (metric polling). Triggered rules pass conjunctive
//! condition evaluation with `for`-duration semantics before the rule
//! executor runs their actions with bounded retries.
//!
//! Rules may be added or removed at any time; trigger tasks consume
//! snapshots so registry writers never block on a running cycle.

mod conditions;
mod cron;
mod dispatcher;
mod executor;
mod monitor;
mod scheduler;


pub use conditions::ConditionEvaluator;
pub use cron::CronSchedule;
pub use executor::RuleExecutor;
pub use monitor::{MetricsSource, StaticMetricsSource};

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::enforcer::{EnforcementEngine, RetryConfig};
use crate::errors::{EngineError, Result};
use crate::events::EventBus;
use crate::observability::EngineMetrics;

/// Default cadence of the threshold monitor
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on concurrently executing rules
pub const DEFAULT_EXECUTION_POOL: usize = 8;

/// Comparison operator used by conditions and threshold triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
    In,
    NotIn,
}

/// A trigger source for a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Fire on bus events of the given type; filters are field → value
    /// equality constraints over the event data
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        filters: HashMap<String, serde_json::Value>,
    },
    /// Fire on a cron expression or fixed interval
    Schedule {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cron: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_secs: Option<u64>,
    },
    /// Fire when a metric condition holds continuously for `duration_secs`
    Threshold {
        metric: String,
        operator: ConditionOperator,
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
    },
}

/// A conjunctive condition over the trigger context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
    /// Only counts as true after holding continuously this long
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
}

/// An action template executed when a rule fires
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTemplate {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

/// An autonomous trigger → condition → action bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationRule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionTemplate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationRule {
    /// Structural validation: id, name, at least one trigger and action
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidInput("rule id is empty".into()));
        }
        if self.name.is_empty() {
            return Err(EngineError::InvalidInput("rule name is empty".into()));
        }
        if self.triggers.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "rule {} must declare at least one trigger",
                self.name
            )));
        }
        if self.actions.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "rule {} must declare at least one action",
                self.name
            )));
        }
        for trigger in &self.triggers {
            if let Trigger::Schedule {
                cron,
                interval_secs,
            } = trigger
            {
                match (cron, interval_secs) {
                    (Some(expr), _) => {
                        CronSchedule::parse(expr)?;
                    }
                    (None, Some(0)) | (None, None) => {
                        return Err(EngineError::InvalidInput(format!(
                            "rule {} schedule trigger needs a cron expression or interval",
                            self.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Execution lifecycle of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    Active,
    Disabled,
    Running,
    Failed,
}

/// Per-rule status and counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    pub rule_id: String,
    pub name: String,
    pub state: RuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of one action inside a rule execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub retry_count: u32,
}

/// Result of one rule execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub rule_id: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub actions: Vec<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate automation statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatistics {
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub total_executions: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub in_flight: usize,
}

/// Configuration for the automation engine
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub monitor_interval: Duration,
    pub max_concurrent_executions: usize,
    pub history_limit: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            max_concurrent_executions: DEFAULT_EXECUTION_POOL,
            history_limit: 50,
        }
    }
}

struct TriggerTasks {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

/// The automation engine: rule registry plus the three trigger tasks.
/// Clones share the registry, statuses and trigger task handles.
#[derive(Clone)]
pub struct AutomationEngine {
    rules: Arc<StdRwLock<HashMap<String, Arc<AutomationRule>>>>,
    statuses: Arc<DashMap<String, RuleStatus>>,
    executor: Arc<RuleExecutor>,
    conditions: Arc<ConditionEvaluator>,
    events: EventBus,
    metrics_source: Arc<dyn MetricsSource>,
    config: AutomationConfig,
    tasks: Arc<Mutex<Option<TriggerTasks>>>,
    rules_changed: Arc<Notify>,
    metrics: EngineMetrics,
}

impl AutomationEngine {
    pub fn new(
        enforcement: Arc<EnforcementEngine>,
        events: EventBus,
        metrics_source: Arc<dyn MetricsSource>,
        config: AutomationConfig,
    ) -> Self {
        let statuses = Arc::new(DashMap::new());
        Self {
            rules: Arc::new(StdRwLock::new(HashMap::new())),
            statuses: statuses.clone(),
            executor: Arc::new(RuleExecutor::new(
                enforcement,
                statuses,
                config.max_concurrent_executions,
                config.history_limit,
            )),
            conditions: Arc::new(ConditionEvaluator::new()),
            events,
            metrics_source,
            config,
            tasks: Arc::new(Mutex::new(None)),
            rules_changed: Arc::new(Notify::new()),
            metrics: EngineMetrics::new(),
        }
    }

    /// Spawn the three trigger tasks. Fails with `Conflict` when already
    /// started.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            return Err(EngineError::Conflict("automation engine already started".into()));
        }

        let (shutdown, _) = broadcast::channel(1);
        let handles = vec![
            tokio::spawn(dispatcher::run(self.clone(), shutdown.subscribe())),
            tokio::spawn(scheduler::run(self.clone(), shutdown.subscribe())),
            tokio::spawn(monitor::run(self.clone(), shutdown.subscribe())),
        ];
        *tasks = Some(TriggerTasks { shutdown, handles });

        info!(
            monitor_interval_secs = self.config.monitor_interval.as_secs(),
            execution_pool = self.config.max_concurrent_executions,
            "Automation engine started"
        );
        Ok(())
    }

    /// Cancel the trigger tasks and wait, bounded by `deadline`, for them
    /// and any in-flight rule executions to finish.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        let Some(TriggerTasks { shutdown, handles }) = self.tasks.lock().await.take() else {
            return Ok(());
        };
        let _ = shutdown.send(());

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
            self.executor.drain().await;
        };
        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("Automation engine stop timed out with work in flight");
        }
        info!("Automation engine stopped");
        Ok(())
    }

    /// Register a rule; visible to triggers within one cycle
    pub fn register_rule(&self, rule: AutomationRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write().map_err(|_| lock_poisoned())?;
        if rules.contains_key(&rule.id) {
            return Err(EngineError::Conflict(format!(
                "rule id {} already registered",
                rule.id
            )));
        }
        self.statuses.insert(
            rule.id.clone(),
            RuleStatus {
                rule_id: rule.id.clone(),
                name: rule.name.clone(),
                state: if rule.enabled {
                    RuleState::Active
                } else {
                    RuleState::Disabled
                },
                last_executed: None,
                next_execution: None,
                execution_count: 0,
                success_count: 0,
                failure_count: 0,
                last_error: None,
            },
        );
        rules.insert(rule.id.clone(), Arc::new(rule));
        self.metrics.set_rules_registered(rules.len() as i64);
        drop(rules);
        self.rules_changed.notify_waiters();
        Ok(())
    }

    /// Replace a registered rule
    pub fn update_rule(&self, mut rule: AutomationRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write().map_err(|_| lock_poisoned())?;
        if !rules.contains_key(&rule.id) {
            return Err(EngineError::not_found("rule", rule.id));
        }
        rule.updated_at = Utc::now();
        if let Some(mut status) = self.statuses.get_mut(&rule.id) {
            status.name = rule.name.clone();
            status.state = if rule.enabled {
                RuleState::Active
            } else {
                RuleState::Disabled
            };
        }
        rules.insert(rule.id.clone(), Arc::new(rule));
        drop(rules);
        self.rules_changed.notify_waiters();
        Ok(())
    }

    pub fn unregister_rule(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().map_err(|_| lock_poisoned())?;
        rules
            .remove(rule_id)
            .ok_or_else(|| EngineError::not_found("rule", rule_id))?;
        self.statuses.remove(rule_id);
        self.metrics.set_rules_registered(rules.len() as i64);
        drop(rules);
        self.conditions.forget_rule(rule_id);
        self.rules_changed.notify_waiters();
        Ok(())
    }

    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<()> {
        let mut rules = self.rules.write().map_err(|_| lock_poisoned())?;
        let rule = rules
            .get(rule_id)
            .ok_or_else(|| EngineError::not_found("rule", rule_id))?;
        let mut updated = (**rule).clone();
        updated.enabled = enabled;
        updated.updated_at = Utc::now();
        rules.insert(rule_id.to_string(), Arc::new(updated));
        if let Some(mut status) = self.statuses.get_mut(rule_id) {
            status.state = if enabled {
                RuleState::Active
            } else {
                RuleState::Disabled
            };
        }
        drop(rules);
        self.rules_changed.notify_waiters();
        Ok(())
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<Arc<AutomationRule>> {
        let rules = self.rules.read().map_err(|_| lock_poisoned())?;
        rules
            .get(rule_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("rule", rule_id))
    }

    pub fn get_rules(&self) -> Vec<Arc<AutomationRule>> {
        self.snapshot()
    }

    /// Manually execute a rule, bypassing trigger matching, and wait for
    /// the result
    pub async fn trigger_rule(
        &self,
        rule_id: &str,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<ExecutionResult> {
        let rule = self.get_rule(rule_id)?;
        let mut context = context;
        context.insert("trigger".into(), serde_json::json!("manual"));
        let result = self.executor.execute(rule, context).await;
        self.metrics
            .inc_automation_execution(if result.success { "success" } else { "failure" });
        Ok(result)
    }

    pub fn rule_status(&self, rule_id: &str) -> Result<RuleStatus> {
        self.statuses
            .get(rule_id)
            .map(|status| status.clone())
            .ok_or_else(|| EngineError::not_found("rule", rule_id))
    }

    /// Recent execution results for a rule, newest last
    pub fn rule_history(&self, rule_id: &str) -> Result<Vec<ExecutionResult>> {
        // A registered rule with no executions yet has empty history
        self.get_rule(rule_id)?;
        Ok(self.executor.history(rule_id))
    }

    pub fn statistics(&self) -> AutomationStatistics {
        let rules = self.snapshot();
        let enabled = rules.iter().filter(|r| r.enabled).count();
        let mut executions = 0;
        let mut successes = 0;
        let mut failures = 0;
        for status in self.statuses.iter() {
            executions += status.execution_count;
            successes += status.success_count;
            failures += status.failure_count;
        }
        AutomationStatistics {
            total_rules: rules.len(),
            enabled_rules: enabled,
            total_executions: executions,
            total_successes: successes,
            total_failures: failures,
            in_flight: self.executor.in_flight(),
        }
    }

    pub async fn health(&self) -> Result<()> {
        if self.tasks.lock().await.is_none() {
            return Err(EngineError::Internal("automation engine not started".into()));
        }
        Ok(())
    }

    /// Copy-out snapshot so trigger tasks never hold the registry lock
    /// across an await point
    pub(crate) fn snapshot(&self) -> Vec<Arc<AutomationRule>> {
        self.rules
            .read()
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn conditions(&self) -> &Arc<ConditionEvaluator> {
        &self.conditions
    }

    pub(crate) fn metrics_source(&self) -> &Arc<dyn MetricsSource> {
        &self.metrics_source
    }

    pub(crate) fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub(crate) fn rules_changed(&self) -> &Arc<Notify> {
        &self.rules_changed
    }

    pub(crate) fn set_next_execution(&self, rule_id: &str, at: Option<DateTime<Utc>>) {
        if let Some(mut status) = self.statuses.get_mut(rule_id) {
            status.next_execution = at;
        }
    }

    /// Submit a triggered rule for background execution. An individual
    /// rule failure never crashes the calling trigger task.
    pub(crate) fn submit(
        &self,
        rule: Arc<AutomationRule>,
        context: HashMap<String, serde_json::Value>,
        source: &'static str,
    ) {
        let engine = self.clone();
        tokio::spawn(async move {
            let rule_id = rule.id.clone();
            let result = engine.executor.execute(rule, context).await;
            engine
                .metrics
                .inc_automation_execution(if result.success { "success" } else { "failure" });
            if !result.success {
                warn!(
                    rule_id = %rule_id,
                    source = source,
                    error = result.error.as_deref().unwrap_or(""),
                    "Automation rule execution failed"
                );
            }
        });
    }
}

fn lock_poisoned() -> EngineError {
    EngineError::Internal("rule registry lock poisoned".into())
}
