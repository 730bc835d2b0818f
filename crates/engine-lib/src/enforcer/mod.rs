//! Policy enforcement
//!
//! Tracks every decision's progress through asynchronous action dispatch:
//! per-decision mutual exclusion, cooperative cancellation, an append-only
//! event log per enforcement, and idempotent status snapshots.

mod actions;
mod engine;

pub use actions::{Action, ActionGenerator, ActionType, RetryConfig};
pub use engine::{
    ActionExecutor, ActionOutput, AttemptRecord, EnforcementEngine, ExecutionRecord, LogExecutor,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::{EngineError, Result};
use crate::events::{event_types, Event, EventBus};
use crate::models::{Decision, DecisionStatus};
use crate::observability::EngineMetrics;
use crate::storage::StorageManager;

/// Enforcement lifecycle state
///
/// ```text
/// Pending ──start──▶ Running ──success──▶ Completed
///                       │      ──failure──▶ Failed
///                       └──cancel()──────▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One entry in an enforcement's event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl EnforcementEvent {
    fn new(event_type: &str, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
            data: HashMap::new(),
        }
    }

    fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

/// Snapshot of one decision's enforcement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementStatus {
    pub decision_id: String,
    pub state: EnforcementState,
    /// Completed actions / total actions × 100
    pub progress: f64,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub events: Vec<EnforcementEvent>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

struct Entry {
    status: EnforcementStatus,
    cancel: Arc<AtomicBool>,
}

/// Tracks and drives per-decision enforcement. Clones share the status
/// map and executor registry.
#[derive(Clone)]
pub struct PolicyEnforcer {
    engine: Arc<EnforcementEngine>,
    generator: ActionGenerator,
    storage: Arc<dyn StorageManager>,
    metrics: EngineMetrics,
    events: Option<EventBus>,
    enforcements: Arc<RwLock<HashMap<String, Entry>>>,
}

impl PolicyEnforcer {
    pub fn new(engine: Arc<EnforcementEngine>, storage: Arc<dyn StorageManager>) -> Self {
        Self {
            engine,
            generator: ActionGenerator::new(),
            storage,
            metrics: EngineMetrics::new(),
            events: None,
            enforcements: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish decision completion/failure events to the bus
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn publish_decision_event(&self, event_type: &str, decision: &Decision) {
        if let Some(events) = &self.events {
            events.publish(
                Event::new(event_type, "policy-enforcer")
                    .with_data("decision_id", serde_json::json!(decision.id))
                    .with_data("workload_id", serde_json::json!(decision.workload_id)),
            );
        }
    }

    /// Start enforcing a decision in the background and return immediately.
    ///
    /// Rejects with `Conflict` when an enforcement for the same decision is
    /// already running. Re-enforcing a terminal decision replaces its
    /// status record.
    pub async fn enforce(&self, decision: Decision) -> Result<()> {
        let cancel = Arc::new(AtomicBool::new(false));
        {
            let mut enforcements = self.enforcements.write().await;
            if let Some(entry) = enforcements.get(&decision.id) {
                if entry.status.state == EnforcementState::Running
                    || entry.status.state == EnforcementState::Pending
                {
                    return Err(EngineError::Conflict(format!(
                        "enforcement already in progress for decision {}",
                        decision.id
                    )));
                }
            }
            enforcements.insert(
                decision.id.clone(),
                Entry {
                    status: EnforcementStatus {
                        decision_id: decision.id.clone(),
                        state: EnforcementState::Pending,
                        progress: 0.0,
                        message: "enforcement pending".into(),
                        started_at: Utc::now(),
                        completed_at: None,
                        duration_ms: None,
                        events: Vec::new(),
                        details: HashMap::new(),
                    },
                    cancel: cancel.clone(),
                },
            );
        }

        let enforcer = self.clone();
        tokio::spawn(async move {
            enforcer.run_enforcement(decision, cancel).await;
        });
        Ok(())
    }

    /// Fan-out of [`enforce`](Self::enforce); collects submission errors
    /// without waiting for completion.
    pub async fn enforce_many(&self, decisions: Vec<Decision>) -> Vec<(String, EngineError)> {
        let mut failures = Vec::new();
        for decision in decisions {
            let id = decision.id.clone();
            if let Err(err) = self.enforce(decision).await {
                failures.push((id, err));
            }
        }
        failures
    }

    /// Snapshot copy of a decision's enforcement status; callers cannot
    /// mutate engine state through it.
    pub async fn get_status(&self, decision_id: &str) -> Result<EnforcementStatus> {
        let enforcements = self.enforcements.read().await;
        enforcements
            .get(decision_id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| EngineError::not_found("enforcement", decision_id))
    }

    /// Cancel a running enforcement. Only `Running` may be cancelled; the
    /// in-flight action may still complete, but no further actions start.
    pub async fn cancel(&self, decision_id: &str) -> Result<()> {
        let mut enforcements = self.enforcements.write().await;
        let entry = enforcements
            .get_mut(decision_id)
            .ok_or_else(|| EngineError::not_found("enforcement", decision_id))?;

        if entry.status.state != EnforcementState::Running {
            return Err(EngineError::Conflict(format!(
                "cannot cancel enforcement in state {:?}",
                entry.status.state
            )));
        }

        entry.cancel.store(true, Ordering::SeqCst);
        let now = Utc::now();
        entry.status.state = EnforcementState::Cancelled;
        entry.status.message = "enforcement cancelled".into();
        entry.status.completed_at = Some(now);
        entry.status.duration_ms =
            Some((now - entry.status.started_at).num_milliseconds());
        entry
            .status
            .events
            .push(EnforcementEvent::new("cancelled", "enforcement cancelled by caller"));

        info!(decision_id = %decision_id, "Cancelled enforcement");
        Ok(())
    }

    /// Remove terminal statuses older than the retention horizon; returns
    /// the number removed.
    pub async fn sweep(&self, horizon: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(horizon).unwrap_or_default();
        let mut enforcements = self.enforcements.write().await;
        let before = enforcements.len();
        enforcements.retain(|_, entry| {
            let terminal = matches!(
                entry.status.state,
                EnforcementState::Completed
                    | EnforcementState::Failed
                    | EnforcementState::Cancelled
            );
            !(terminal && entry.status.completed_at.map_or(false, |at| at < cutoff))
        });
        before - enforcements.len()
    }

    /// Number of tracked enforcements, by state
    pub async fn counts(&self) -> HashMap<String, usize> {
        let enforcements = self.enforcements.read().await;
        let mut counts = HashMap::new();
        for entry in enforcements.values() {
            *counts
                .entry(format!("{:?}", entry.status.state).to_lowercase())
                .or_insert(0) += 1;
        }
        counts
    }

    pub async fn health(&self) -> Result<()> {
        self.engine.health().await?;
        self.storage.health().await
    }

    async fn run_enforcement(self, decision: Decision, cancel: Arc<AtomicBool>) {
        let start = std::time::Instant::now();
        self.metrics.enforcement_started();

        self.transition(&decision.id, EnforcementState::Running, "enforcement in progress")
            .await;
        self.push_event(&decision.id, EnforcementEvent::new("started", "enforcement started"))
            .await;

        let outcome = self.execute_actions(&decision, &cancel).await;

        match outcome {
            Ok(true) => {
                self.finish(
                    &decision.id,
                    EnforcementState::Completed,
                    "enforcement completed successfully",
                )
                .await;
                self.push_event(
                    &decision.id,
                    EnforcementEvent::new("completed", "enforcement completed successfully"),
                )
                .await;
                if let Err(err) = self
                    .storage
                    .decision()
                    .update_status(&decision.id, DecisionStatus::Completed)
                    .await
                {
                    warn!(decision_id = %decision.id, error = %err, "Failed to update decision status");
                }
                self.publish_decision_event(event_types::DECISION_COMPLETED, &decision);
            }
            Ok(false) => {
                // Cancelled mid-sequence; cancel() already moved the state
                // and stamped the completion time
                if let Err(err) = self
                    .storage
                    .decision()
                    .update_status(&decision.id, DecisionStatus::Cancelled)
                    .await
                {
                    warn!(decision_id = %decision.id, error = %err, "Failed to update decision status");
                }
            }
            Err(err) => {
                self.metrics.inc_enforcement_failures();
                self.finish(&decision.id, EnforcementState::Failed, err.to_string())
                    .await;
                self.push_event(
                    &decision.id,
                    EnforcementEvent::new("failed", err.to_string()),
                )
                .await;
                if let Err(update_err) = self
                    .storage
                    .decision()
                    .update_status(&decision.id, DecisionStatus::Failed)
                    .await
                {
                    warn!(decision_id = %decision.id, error = %update_err, "Failed to update decision status");
                }
                self.publish_decision_event(event_types::DECISION_FAILED, &decision);
            }
        }

        self.metrics.enforcement_finished();
        self.metrics
            .observe_enforcement_latency(start.elapsed().as_secs_f64());
    }

    /// Returns Ok(true) on full completion, Ok(false) when cancelled
    async fn execute_actions(&self, decision: &Decision, cancel: &AtomicBool) -> Result<bool> {
        let workload = self.storage.workload().get(&decision.workload_id).await?;
        let actions = self.generator.generate(decision, &workload)?;
        let total = actions.len();

        for (index, action) in actions.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                info!(
                    decision_id = %decision.id,
                    completed = index,
                    total = total,
                    "Enforcement cancelled, skipping remaining actions"
                );
                return Ok(false);
            }

            self.set_progress(&decision.id, index as f64 / total as f64 * 100.0)
                .await;
            self.push_event(
                &decision.id,
                EnforcementEvent::new(
                    "action_started",
                    format!("executing action: {}", action.action_type),
                )
                .with_data("action_type", serde_json::json!(action.action_type.to_string()))
                .with_data("action_target", serde_json::json!(action.target)),
            )
            .await;

            match self.engine.execute_action(action).await {
                Ok(record) => {
                    self.push_event(
                        &decision.id,
                        EnforcementEvent::new(
                            "action_completed",
                            format!("action completed: {}", action.action_type),
                        )
                        .with_data("action_type", serde_json::json!(action.action_type.to_string()))
                        .with_data("attempts", serde_json::json!(record.attempts.len())),
                    )
                    .await;
                }
                Err(err) => {
                    self.push_event(
                        &decision.id,
                        EnforcementEvent::new(
                            "action_failed",
                            format!("action failed: {err}"),
                        )
                        .with_data("action_type", serde_json::json!(action.action_type.to_string()))
                        .with_data("error", serde_json::json!(err.to_string())),
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        if cancel.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(true)
    }

    async fn transition(&self, decision_id: &str, state: EnforcementState, message: &str) {
        let mut enforcements = self.enforcements.write().await;
        if let Some(entry) = enforcements.get_mut(decision_id) {
            // Cancellation wins races against the background task
            if entry.status.state == EnforcementState::Cancelled {
                return;
            }
            entry.status.state = state;
            entry.status.message = message.to_string();
        }
    }

    /// Terminal transition: completion time is stamped exactly once
    async fn finish(&self, decision_id: &str, state: EnforcementState, message: impl Into<String>) {
        let mut enforcements = self.enforcements.write().await;
        if let Some(entry) = enforcements.get_mut(decision_id) {
            if entry.status.state == EnforcementState::Cancelled {
                return;
            }
            let now = Utc::now();
            entry.status.state = state;
            entry.status.message = message.into();
            entry.status.completed_at = Some(now);
            entry.status.duration_ms =
                Some((now - entry.status.started_at).num_milliseconds());
            if state == EnforcementState::Completed {
                entry.status.progress = 100.0;
            }
        }
    }

    async fn set_progress(&self, decision_id: &str, progress: f64) {
        let mut enforcements = self.enforcements.write().await;
        if let Some(entry) = enforcements.get_mut(decision_id) {
            entry.status.progress = progress;
        }
    }

    async fn push_event(&self, decision_id: &str, event: EnforcementEvent) {
        let mut enforcements = self.enforcements.write().await;
        if let Some(entry) = enforcements.get_mut(decision_id) {
            entry.status.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecisionType, Requirements, Workload, WorkloadKind, WorkloadStatus};
    use crate::storage::memory::MemoryStorageManager;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn workload(id: &str) -> Workload {
        let now = Utc::now();
        Workload {
            id: id.into(),
            name: "api".into(),
            namespace: "default".into(),
            kind: WorkloadKind::Deployment,
            status: WorkloadStatus::Running,
            labels: HashMap::new(),
            requirements: Requirements::default(),
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn migrate_decision(workload_id: &str) -> Decision {
        let mut decision = Decision::noop(workload_id, "rebalance");
        decision.decision_type = DecisionType::Migrate;
        decision
    }

    async fn setup(
        executors: Vec<Arc<dyn ActionExecutor>>,
    ) -> (Arc<PolicyEnforcer>, Arc<MemoryStorageManager>) {
        let storage = Arc::new(MemoryStorageManager::new());
        storage.workload().create(workload("w1")).await.unwrap();
        let manager: Arc<dyn StorageManager> = storage.clone();
        let engine = Arc::new(EnforcementEngine::new(executors));
        (Arc::new(PolicyEnforcer::new(engine, manager)), storage)
    }

    /// Executor that parks on a barrier so tests can observe Running state
    struct GatedExecutor {
        release: tokio::sync::Semaphore,
        executed: AtomicU32,
    }

    impl GatedExecutor {
        fn new() -> Self {
            Self {
                release: tokio::sync::Semaphore::new(0),
                executed: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for GatedExecutor {
        fn name(&self) -> &str {
            "gated"
        }
        fn can_execute(&self, _action_type: ActionType) -> bool {
            true
        }
        async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
            let _permit = self.release.acquire().await.map_err(|_| {
                EngineError::ExecutorFailure("gate closed".into())
            })?;
            self.executed.fetch_add(1, Ordering::SeqCst);
            Ok(ActionOutput::ok("released"))
        }
    }

    async fn wait_for_state(
        enforcer: &Arc<PolicyEnforcer>,
        decision_id: &str,
        state: EnforcementState,
    ) -> EnforcementStatus {
        for _ in 0..200 {
            if let Ok(status) = enforcer.get_status(decision_id).await {
                if status.state == state {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("enforcement never reached {state:?}");
    }

    #[tokio::test]
    async fn test_enforce_completes_and_updates_decision() {
        let (enforcer, storage) = setup(vec![Arc::new(LogExecutor)]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        storage.decision().create(decision.clone()).await.unwrap();

        enforcer.enforce(decision).await.unwrap();
        let status = wait_for_state(&enforcer, &decision_id, EnforcementState::Completed).await;

        assert_eq!(status.progress, 100.0);
        assert!(status.completed_at.is_some());
        assert!(status.started_at <= status.completed_at.unwrap());
        assert_eq!(
            status.duration_ms.unwrap(),
            (status.completed_at.unwrap() - status.started_at).num_milliseconds()
        );
        let event_types: Vec<&str> =
            status.events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(event_types.contains(&"started"));
        assert!(event_types.contains(&"action_started"));
        assert!(event_types.contains(&"action_completed"));
        assert!(event_types.contains(&"completed"));

        let stored = storage.decision().get(&decision_id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Completed);
    }

    #[tokio::test]
    async fn test_enforce_rejects_concurrent_enforcement() {
        let gate = Arc::new(GatedExecutor::new());
        let (enforcer, _storage) = setup(vec![gate.clone()]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();

        enforcer.enforce(decision.clone()).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Running).await;

        let err = enforcer.enforce(decision).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        gate.release.add_permits(10);
    }

    #[tokio::test]
    async fn test_cancel_stops_remaining_actions() {
        let gate = Arc::new(GatedExecutor::new());
        let (enforcer, _storage) = setup(vec![gate.clone()]).await;

        // Schedule decisions generate two actions; gate the first one
        let mut decision = migrate_decision("w1");
        decision.decision_type = DecisionType::Schedule;
        let decision_id = decision.id.clone();
        enforcer.enforce(decision).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Running).await;

        enforcer.cancel(&decision_id).await.unwrap();
        // Let the in-flight action finish
        gate.release.add_permits(10);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = enforcer.get_status(&decision_id).await.unwrap();
        assert_eq!(status.state, EnforcementState::Cancelled);
        assert!(status.events.iter().any(|e| e.event_type == "cancelled"));
        assert!(status.completed_at.is_some());

        // No action may start after the cancel event
        let cancel_at = status
            .events
            .iter()
            .find(|e| e.event_type == "cancelled")
            .unwrap()
            .timestamp;
        assert!(status
            .events
            .iter()
            .filter(|e| e.event_type == "action_started")
            .all(|e| e.timestamp <= cancel_at));
        // Only the first of the two actions ever ran
        assert!(gate.executed.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn test_cancel_terminal_is_conflict() {
        let (enforcer, _storage) = setup(vec![Arc::new(LogExecutor)]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        enforcer.enforce(decision).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Completed).await;

        let err = enforcer.cancel(&decision_id).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_action_failure_fails_enforcement() {
        struct FailingExecutor;
        #[async_trait]
        impl ActionExecutor for FailingExecutor {
            fn name(&self) -> &str {
                "failing"
            }
            fn can_execute(&self, _action_type: ActionType) -> bool {
                true
            }
            async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
                Err(EngineError::ExecutorFailure("downstream rejected".into()))
            }
        }

        let (enforcer, storage) = setup(vec![Arc::new(FailingExecutor)]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        storage.decision().create(decision.clone()).await.unwrap();

        enforcer.enforce(decision).await.unwrap();
        let status = wait_for_state(&enforcer, &decision_id, EnforcementState::Failed).await;

        assert!(status.message.contains("downstream rejected"));
        assert!(status.events.iter().any(|e| e.event_type == "action_failed"));
        let stored = storage.decision().get(&decision_id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Failed);
    }

    #[tokio::test]
    async fn test_get_status_returns_snapshot() {
        let (enforcer, _storage) = setup(vec![Arc::new(LogExecutor)]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        enforcer.enforce(decision).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Completed).await;

        let mut snapshot = enforcer.get_status(&decision_id).await.unwrap();
        snapshot.message = "mutated".into();
        snapshot.events.clear();

        let fresh = enforcer.get_status(&decision_id).await.unwrap();
        assert_ne!(fresh.message, "mutated");
        assert!(!fresh.events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_status_is_not_found() {
        let (enforcer, _storage) = setup(vec![Arc::new(LogExecutor)]).await;
        assert!(matches!(
            enforcer.get_status("nope").await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_old_terminal_statuses() {
        let (enforcer, _storage) = setup(vec![Arc::new(LogExecutor)]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        enforcer.enforce(decision).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Completed).await;

        // Generous horizon keeps it
        assert_eq!(enforcer.sweep(Duration::from_secs(3600)).await, 0);
        // Zero horizon removes it
        assert_eq!(enforcer.sweep(Duration::ZERO).await, 1);
        assert!(enforcer.get_status(&decision_id).await.is_err());
    }

    #[tokio::test]
    async fn test_completion_publishes_decision_event() {
        let storage = Arc::new(crate::storage::memory::MemoryStorageManager::new());
        storage.workload().create(workload("w1")).await.unwrap();
        let manager: Arc<dyn StorageManager> = storage.clone();
        let bus = EventBus::default();
        let mut subscription = bus.subscribe_to(&[event_types::DECISION_COMPLETED]);
        let enforcer = Arc::new(
            PolicyEnforcer::new(Arc::new(EnforcementEngine::with_defaults()), manager)
                .with_events(bus),
        );

        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();
        enforcer.enforce(decision).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Completed).await;

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.data["decision_id"], serde_json::json!(decision_id));
    }

    #[tokio::test]
    async fn test_enforce_many_collects_submission_errors() {
        let gate = Arc::new(GatedExecutor::new());
        let (enforcer, _storage) = setup(vec![gate.clone()]).await;
        let decision = migrate_decision("w1");
        let decision_id = decision.id.clone();

        enforcer.enforce(decision.clone()).await.unwrap();
        wait_for_state(&enforcer, &decision_id, EnforcementState::Running).await;

        // Same decision again plus a fresh one
        let fresh = migrate_decision("w1");
        let failures = enforcer.enforce_many(vec![decision, fresh]).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, decision_id);

        gate.release.add_permits(10);
    }
}
