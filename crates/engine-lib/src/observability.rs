//! Observability infrastructure
//!
//! Provides:
//! - Prometheus metrics (evaluation/enforcement latency, decision counters,
//!   automation execution counters, active enforcement gauge)
//! - A bound structured logger carrying per-request fields

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    evaluation_latency_seconds: Histogram,
    enforcement_latency_seconds: Histogram,
    evaluations_total: IntCounter,
    evaluation_errors_total: IntCounter,
    decisions_total: IntCounterVec,
    enforcements_active: IntGauge,
    enforcement_failures_total: IntCounter,
    automation_executions_total: IntCounterVec,
    automation_rules_registered: IntGauge,
    expression_compile_errors_total: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "policy_engine_evaluation_latency_seconds",
                "Time spent evaluating policies for a workload",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            enforcement_latency_seconds: register_histogram!(
                "policy_engine_enforcement_latency_seconds",
                "Time spent enforcing a decision end to end",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register enforcement_latency_seconds"),

            evaluations_total: register_int_counter!(
                "policy_engine_evaluations_total",
                "Total number of policy evaluations performed"
            )
            .expect("Failed to register evaluations_total"),

            evaluation_errors_total: register_int_counter!(
                "policy_engine_evaluation_errors_total",
                "Total number of failed policy evaluations"
            )
            .expect("Failed to register evaluation_errors_total"),

            decisions_total: register_int_counter_vec!(
                "policy_engine_decisions_total",
                "Decisions produced, by decision type",
                &["type"]
            )
            .expect("Failed to register decisions_total"),

            enforcements_active: register_int_gauge!(
                "policy_engine_enforcements_active",
                "Number of enforcements currently running"
            )
            .expect("Failed to register enforcements_active"),

            enforcement_failures_total: register_int_counter!(
                "policy_engine_enforcement_failures_total",
                "Total number of failed enforcements"
            )
            .expect("Failed to register enforcement_failures_total"),

            automation_executions_total: register_int_counter_vec!(
                "policy_engine_automation_executions_total",
                "Automation rule executions, by outcome",
                &["outcome"]
            )
            .expect("Failed to register automation_executions_total"),

            automation_rules_registered: register_int_gauge!(
                "policy_engine_automation_rules_registered",
                "Number of registered automation rules"
            )
            .expect("Failed to register automation_rules_registered"),

            expression_compile_errors_total: register_int_counter!(
                "policy_engine_expression_compile_errors_total",
                "Total number of expression compilation failures"
            )
            .expect("Failed to register expression_compile_errors_total"),
        }
    }
}

/// Lightweight handle to the global metrics instance; clones share the
/// same underlying registry.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn observe_enforcement_latency(&self, duration_secs: f64) {
        self.inner()
            .enforcement_latency_seconds
            .observe(duration_secs);
    }

    pub fn inc_evaluations(&self) {
        self.inner().evaluations_total.inc();
    }

    pub fn inc_evaluation_errors(&self) {
        self.inner().evaluation_errors_total.inc();
    }

    pub fn inc_decision(&self, decision_type: &str) {
        self.inner()
            .decisions_total
            .with_label_values(&[decision_type])
            .inc();
    }

    pub fn enforcement_started(&self) {
        self.inner().enforcements_active.inc();
    }

    pub fn enforcement_finished(&self) {
        self.inner().enforcements_active.dec();
    }

    pub fn inc_enforcement_failures(&self) {
        self.inner().enforcement_failures_total.inc();
    }

    pub fn inc_automation_execution(&self, outcome: &str) {
        self.inner()
            .automation_executions_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_rules_registered(&self, count: i64) {
        self.inner().automation_rules_registered.set(count);
    }

    pub fn inc_expression_compile_errors(&self) {
        self.inner().expression_compile_errors_total.inc();
    }
}

/// A structured logger bound to per-request fields
///
/// Builder methods return a new logger with the field added; there is no
/// global mutable state. Absent fields are logged as empty strings so log
/// queries stay uniform.
#[derive(Clone, Default)]
pub struct BoundLogger {
    policy_id: Option<String>,
    workload_id: Option<String>,
    evaluation_id: Option<String>,
}

impl BoundLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(&self, policy_id: impl Into<String>) -> Self {
        let mut bound = self.clone();
        bound.policy_id = Some(policy_id.into());
        bound
    }

    pub fn with_workload(&self, workload_id: impl Into<String>) -> Self {
        let mut bound = self.clone();
        bound.workload_id = Some(workload_id.into());
        bound
    }

    pub fn with_evaluation(&self, evaluation_id: impl Into<String>) -> Self {
        let mut bound = self.clone();
        bound.evaluation_id = Some(evaluation_id.into());
        bound
    }

    pub fn info(&self, event: &str, message: &str) {
        info!(
            event = %event,
            policy_id = self.policy_id.as_deref().unwrap_or(""),
            workload_id = self.workload_id.as_deref().unwrap_or(""),
            evaluation_id = self.evaluation_id.as_deref().unwrap_or(""),
            "{message}"
        );
    }

    pub fn warn(&self, event: &str, message: &str) {
        warn!(
            event = %event,
            policy_id = self.policy_id.as_deref().unwrap_or(""),
            workload_id = self.workload_id.as_deref().unwrap_or(""),
            evaluation_id = self.evaluation_id.as_deref().unwrap_or(""),
            "{message}"
        );
    }
}
