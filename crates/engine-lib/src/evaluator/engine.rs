//! Evaluation façade
//!
//! Orchestrates evaluator + conflict resolver for single and bulk workload
//! evaluation, persists the resulting records (evaluation before decision)
//! and publishes decision events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{ConflictResolver, PolicyEvaluator};
use crate::errors::{EngineError, Result};
use crate::events::{event_types, Event, EventBus};
use crate::models::{Decision, Evaluation, EvaluationResult, Workload};
use crate::observability::{BoundLogger, EngineMetrics};
use crate::storage::{with_retries, ListFilter, StorageManager, TimeRange};

/// Upper bound on concurrently evaluated workloads in a bulk request
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Per-workload deadline inside a bulk request
pub const DEFAULT_WORKLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for an entire bulk request
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A failed workload inside a bulk evaluation
#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub workload_id: String,
    pub error: String,
}

/// Outcome of a bulk evaluation; failures do not abort the batch
#[derive(Debug, Clone, Serialize)]
pub struct BulkEvaluation {
    pub decisions: Vec<Decision>,
    pub partial: Vec<BulkFailure>,
}

/// Aggregate numbers served by the statistics endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStatistics {
    pub total_evaluations: usize,
    pub total_decisions: usize,
    pub total_policies: usize,
    pub total_workloads: usize,
    pub average_score: f64,
    pub decisions_by_type: HashMap<String, usize>,
}

/// Configuration for the evaluation engine
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    pub max_workers: usize,
    pub workload_timeout: Duration,
    pub bulk_timeout: Duration,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            workload_timeout: DEFAULT_WORKLOAD_TIMEOUT,
            bulk_timeout: DEFAULT_BULK_TIMEOUT,
        }
    }
}

/// Façade serving single and bulk workload evaluation. Clones share the
/// same storage, bus and metrics handles.
#[derive(Clone)]
pub struct EvaluationEngine {
    evaluator: Arc<PolicyEvaluator>,
    resolver: ConflictResolver,
    storage: Arc<dyn StorageManager>,
    events: EventBus,
    metrics: EngineMetrics,
    config: EvaluationConfig,
}

impl EvaluationEngine {
    pub fn new(
        evaluator: Arc<PolicyEvaluator>,
        resolver: ConflictResolver,
        storage: Arc<dyn StorageManager>,
        events: EventBus,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            evaluator,
            resolver,
            storage,
            events,
            metrics: EngineMetrics::new(),
            config,
        }
    }

    /// Evaluate one workload against every applicable active policy and
    /// resolve the results into a single persisted decision.
    pub async fn evaluate_one(&self, workload_id: &str) -> Result<Decision> {
        let start = std::time::Instant::now();
        let workload = self.storage.workload().get(workload_id).await?;

        let filter = ListFilter {
            status: Some("active".into()),
            ..Default::default()
        };
        let policies = self.storage.policy().list(&filter).await?;
        let applicable = self.evaluator.applicable_policies(&workload, &policies);

        let mut results: Vec<EvaluationResult> = Vec::with_capacity(applicable.len());
        for policy in applicable {
            match self.evaluator.evaluate(&workload, policy) {
                Ok(result) => results.push(result),
                Err(err) if err.is_evaluation_outcome() => {
                    // Raced with a status/selector change since listing
                    warn!(policy_id = %policy.id, error = %err, "Policy filtered during evaluation");
                }
                Err(err) => {
                    self.metrics.inc_evaluation_errors();
                    return Err(err);
                }
            }
        }

        // Priority-descending order makes the resolver's priority step a
        // no-op in the common case
        results.sort_by(|a, b| b.policy_priority.cmp(&a.policy_priority));

        let decision = self.resolver.resolve(&workload.id, &results);
        self.persist(&workload, &results, &decision).await?;

        self.metrics.inc_evaluations();
        self.metrics
            .inc_decision(&decision.decision_type.to_string());
        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());

        self.events.publish(
            Event::new(event_types::DECISION_CREATED, "evaluation-engine")
                .with_data("decision_id", serde_json::json!(decision.id))
                .with_data("workload_id", serde_json::json!(workload.id))
                .with_data(
                    "decision_type",
                    serde_json::json!(decision.decision_type.to_string()),
                ),
        );

        info!(
            workload_id = %workload.id,
            decision_id = %decision.id,
            decision_type = %decision.decision_type,
            evaluated_policies = results.len(),
            "Workload evaluated"
        );

        Ok(decision)
    }

    /// Evaluate many workloads with a bounded worker pool. Per-workload
    /// failures land in `partial` instead of aborting the batch.
    pub async fn evaluate_many(&self, workload_ids: &[String]) -> BulkEvaluation {
        let permits = self.config.max_workers.min(workload_ids.len().max(1));
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut handles = Vec::with_capacity(workload_ids.len());

        for workload_id in workload_ids {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let task_workload_id = workload_id.clone();
            let deadline = self.config.workload_timeout;
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                match timeout(deadline, engine.evaluate_one(&task_workload_id)).await {
                    Ok(inner) => inner,
                    Err(_) => Err(EngineError::StorageUnavailable(format!(
                        "evaluation of {task_workload_id} timed out"
                    ))),
                }
            });
            handles.push((workload_id.clone(), handle));
        }

        let bulk_deadline = tokio::time::Instant::now() + self.config.bulk_timeout;
        let mut decisions = Vec::new();
        let mut partial = Vec::new();
        for (workload_id, handle) in handles {
            match tokio::time::timeout_at(bulk_deadline, handle).await {
                Ok(Ok(Ok(decision))) => decisions.push(decision),
                Ok(Ok(Err(err))) => partial.push(BulkFailure {
                    workload_id,
                    error: err.to_string(),
                }),
                Ok(Err(join_err)) => partial.push(BulkFailure {
                    workload_id,
                    error: format!("evaluation task panicked: {join_err}"),
                }),
                Err(_) => {
                    partial.push(BulkFailure {
                        workload_id,
                        error: "bulk evaluation deadline exceeded".into(),
                    });
                }
            }
        }

        BulkEvaluation { decisions, partial }
    }

    /// Evaluation history for one workload
    pub async fn history(&self, workload_id: &str, range: TimeRange) -> Result<Vec<Evaluation>> {
        self.storage
            .evaluation()
            .list_for_workload(workload_id, range)
            .await
    }

    /// Aggregate evaluation and decision statistics
    pub async fn statistics(&self) -> Result<EvaluationStatistics> {
        let filter = ListFilter::default();
        let total_evaluations = self.storage.evaluation().count(&filter).await?;
        let total_decisions = self.storage.decision().count(&filter).await?;
        let total_policies = self.storage.policy().count(&filter).await?;
        let total_workloads = self.storage.workload().count(&filter).await?;

        let evaluations = self.storage.evaluation().list(&filter).await?;
        let average_score = if evaluations.is_empty() {
            0.0
        } else {
            evaluations.iter().map(|e| e.score).sum::<f64>() / evaluations.len() as f64
        };

        let mut decisions_by_type = HashMap::new();
        for decision in self.storage.decision().list(&filter).await? {
            *decisions_by_type
                .entry(decision.decision_type.to_string())
                .or_insert(0) += 1;
        }

        Ok(EvaluationStatistics {
            total_evaluations,
            total_decisions,
            total_policies,
            total_workloads,
            average_score,
            decisions_by_type,
        })
    }

    pub async fn health(&self) -> Result<()> {
        self.storage.health().await
    }

    /// Evaluation records are written before the decision record so a
    /// decision never references missing evaluations.
    async fn persist(
        &self,
        workload: &Workload,
        results: &[EvaluationResult],
        decision: &Decision,
    ) -> Result<()> {
        for result in results {
            let evaluation = Evaluation {
                id: uuid::Uuid::new_v4().to_string(),
                workload_id: workload.id.clone(),
                policy_id: result.policy_id.clone(),
                score: result.score,
                result: result.outcome,
                rule_outcomes: result.rule_outcomes.clone(),
                created_at: Utc::now(),
            };
            let store = self.storage.evaluation();
            with_retries(|| {
                let store = store.clone();
                let evaluation = evaluation.clone();
                async move { store.create(evaluation).await }
            })
            .await?;

            BoundLogger::new()
                .with_workload(workload.id.as_str())
                .with_policy(result.policy_id.as_str())
                .with_evaluation(evaluation.id.as_str())
                .info("evaluation_persisted", "evaluation record written");
        }

        let store = self.storage.decision();
        with_retries(|| {
            let store = store.clone();
            let decision = decision.clone();
            async move { store.create(decision).await }
        })
        .await?;
        Ok(())
    }
}
