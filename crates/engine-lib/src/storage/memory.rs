//! In-memory reference storage
//!
//! One reader/writer lock per store: writes are exclusive, reads proceed
//! in parallel. Lock windows never span an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::{ListFilter, PolicyStore, StorageManager, TimeRange, WorkloadStore};
use super::{DecisionStore, EvaluationStore};
use crate::errors::{EngineError, Result};
use crate::models::{Decision, DecisionStatus, Evaluation, Policy, PolicyStatus, Workload};

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Internal("storage lock poisoned".into())
}

/// In-memory policy store with append-only version history
pub struct MemoryPolicyStore {
    policies: RwLock<HashMap<String, Policy>>,
    versions: RwLock<HashMap<String, Vec<Policy>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryPolicyStore {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }
}

fn policy_matches(policy: &Policy, filter: &ListFilter) -> bool {
    if let Some(namespace) = &filter.namespace {
        if policy.metadata.namespace.as_deref() != Some(namespace.as_str()) {
            return false;
        }
    }
    for (key, value) in &filter.labels {
        if policy.metadata.labels.get(key) != Some(value) {
            return false;
        }
    }
    if let Some(status) = &filter.status {
        if format!("{:?}", policy.status).to_lowercase() != status.to_lowercase() {
            return false;
        }
    }
    true
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn create(&self, policy: Policy) -> Result<Policy> {
        self.ensure_open()?;
        policy.validate()?;
        let mut policies = self.policies.write().map_err(poisoned)?;
        if policies.contains_key(&policy.id) {
            return Err(EngineError::Conflict(format!(
                "policy id {} already exists",
                policy.id
            )));
        }
        if policies
            .values()
            .any(|p| p.metadata.name == policy.metadata.name)
        {
            return Err(EngineError::Conflict(format!(
                "policy name {} already exists",
                policy.metadata.name
            )));
        }
        policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn get(&self, id: &str) -> Result<Policy> {
        self.ensure_open()?;
        let policies = self.policies.read().map_err(poisoned)?;
        policies
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("policy", id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Policy> {
        self.ensure_open()?;
        let policies = self.policies.read().map_err(poisoned)?;
        policies
            .values()
            .find(|p| p.metadata.name == name)
            .cloned()
            .ok_or_else(|| EngineError::not_found("policy", name.to_string()))
    }

    async fn update(&self, mut policy: Policy) -> Result<Policy> {
        self.ensure_open()?;
        policy.validate()?;
        let mut policies = self.policies.write().map_err(poisoned)?;
        let existing = policies
            .get(&policy.id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("policy", policy.id.clone()))?;

        // Keep the prior version retrievable before replacing it
        {
            let mut versions = self.versions.write().map_err(poisoned)?;
            versions
                .entry(existing.metadata.name.clone())
                .or_default()
                .push(existing.clone());
        }

        policy.metadata.version = existing.metadata.version + 1;
        policy.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        policy.metadata.last_modified = Utc::now();
        policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut policies = self.policies.write().map_err(poisoned)?;
        policies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("policy", id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Policy>> {
        self.ensure_open()?;
        let policies = self.policies.read().map_err(poisoned)?;
        let mut matched: Vec<Policy> = policies
            .values()
            .filter(|p| policy_matches(p, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(filter.page(matched))
    }

    async fn count(&self, filter: &ListFilter) -> Result<usize> {
        self.ensure_open()?;
        let policies = self.policies.read().map_err(poisoned)?;
        Ok(policies.values().filter(|p| policy_matches(p, filter)).count())
    }

    async fn search(&self, query: &str) -> Result<Vec<Policy>> {
        self.ensure_open()?;
        let query = query.to_lowercase();
        let policies = self.policies.read().map_err(poisoned)?;
        let mut matched: Vec<Policy> = policies
            .values()
            .filter(|p| p.metadata.name.to_lowercase().contains(&query))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(matched)
    }

    async fn get_versions(&self, name: &str) -> Result<Vec<Policy>> {
        self.ensure_open()?;
        let mut history: Vec<Policy> = self
            .versions
            .read()
            .map_err(poisoned)?
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Ok(current) = self.get_by_name(name).await {
            history.push(current);
        }
        if history.is_empty() {
            return Err(EngineError::not_found("policy", name.to_string()));
        }
        history.sort_by_key(|p| p.metadata.version);
        Ok(history)
    }

    async fn set_status(&self, id: &str, status: PolicyStatus) -> Result<Policy> {
        self.ensure_open()?;
        let mut policies = self.policies.write().map_err(poisoned)?;
        let policy = policies
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("policy", id))?;
        policy.status = status;
        policy.metadata.last_modified = Utc::now();
        Ok(policy.clone())
    }

    async fn health(&self) -> Result<()> {
        self.ensure_open()
    }
}

fn workload_matches(workload: &Workload, filter: &ListFilter) -> bool {
    if let Some(namespace) = &filter.namespace {
        if &workload.namespace != namespace {
            return false;
        }
    }
    for (key, value) in &filter.labels {
        if workload.labels.get(key) != Some(value) {
            return false;
        }
    }
    if let Some(status) = &filter.status {
        if format!("{:?}", workload.status).to_lowercase() != status.to_lowercase() {
            return false;
        }
    }
    true
}

/// In-memory workload store
pub struct MemoryWorkloadStore {
    workloads: RwLock<HashMap<String, Workload>>,
    closed: Arc<AtomicBool>,
}

impl MemoryWorkloadStore {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            workloads: RwLock::new(HashMap::new()),
            closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for MemoryWorkloadStore {
    async fn create(&self, workload: Workload) -> Result<Workload> {
        self.ensure_open()?;
        if workload.id.is_empty() {
            return Err(EngineError::InvalidInput("workload id is empty".into()));
        }
        let mut workloads = self.workloads.write().map_err(poisoned)?;
        if workloads.contains_key(&workload.id) {
            return Err(EngineError::Conflict(format!(
                "workload id {} already exists",
                workload.id
            )));
        }
        workloads.insert(workload.id.clone(), workload.clone());
        Ok(workload)
    }

    async fn get(&self, id: &str) -> Result<Workload> {
        self.ensure_open()?;
        let workloads = self.workloads.read().map_err(poisoned)?;
        workloads
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("workload", id))
    }

    async fn update(&self, mut workload: Workload) -> Result<Workload> {
        self.ensure_open()?;
        let mut workloads = self.workloads.write().map_err(poisoned)?;
        if !workloads.contains_key(&workload.id) {
            return Err(EngineError::not_found("workload", workload.id));
        }
        workload.updated_at = Utc::now();
        workloads.insert(workload.id.clone(), workload.clone());
        Ok(workload)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut workloads = self.workloads.write().map_err(poisoned)?;
        workloads
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("workload", id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Workload>> {
        self.ensure_open()?;
        let workloads = self.workloads.read().map_err(poisoned)?;
        let mut matched: Vec<Workload> = workloads
            .values()
            .filter(|w| workload_matches(w, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(filter.page(matched))
    }

    async fn count(&self, filter: &ListFilter) -> Result<usize> {
        self.ensure_open()?;
        let workloads = self.workloads.read().map_err(poisoned)?;
        Ok(workloads
            .values()
            .filter(|w| workload_matches(w, filter))
            .count())
    }

    async fn search(&self, query: &str) -> Result<Vec<Workload>> {
        self.ensure_open()?;
        let query = query.to_lowercase();
        let workloads = self.workloads.read().map_err(poisoned)?;
        let mut matched: Vec<Workload> = workloads
            .values()
            .filter(|w| w.name.to_lowercase().contains(&query))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matched)
    }

    async fn health(&self) -> Result<()> {
        self.ensure_open()
    }
}

/// In-memory decision store
pub struct MemoryDecisionStore {
    decisions: RwLock<HashMap<String, Decision>>,
    closed: Arc<AtomicBool>,
}

impl MemoryDecisionStore {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            decisions: RwLock::new(HashMap::new()),
            closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DecisionStore for MemoryDecisionStore {
    async fn create(&self, decision: Decision) -> Result<Decision> {
        self.ensure_open()?;
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        if decisions.contains_key(&decision.id) {
            return Err(EngineError::Conflict(format!(
                "decision id {} already exists",
                decision.id
            )));
        }
        decisions.insert(decision.id.clone(), decision.clone());
        Ok(decision)
    }

    async fn get(&self, id: &str) -> Result<Decision> {
        self.ensure_open()?;
        let decisions = self.decisions.read().map_err(poisoned)?;
        decisions
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("decision", id))
    }

    async fn update(&self, mut decision: Decision) -> Result<Decision> {
        self.ensure_open()?;
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        if !decisions.contains_key(&decision.id) {
            return Err(EngineError::not_found("decision", decision.id));
        }
        decision.updated_at = Utc::now();
        decisions.insert(decision.id.clone(), decision.clone());
        Ok(decision)
    }

    async fn update_status(&self, id: &str, status: DecisionStatus) -> Result<Decision> {
        self.ensure_open()?;
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        let decision = decisions
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("decision", id))?;
        decision.status = status;
        decision.updated_at = Utc::now();
        Ok(decision.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut decisions = self.decisions.write().map_err(poisoned)?;
        decisions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("decision", id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Decision>> {
        self.ensure_open()?;
        let decisions = self.decisions.read().map_err(poisoned)?;
        let mut all: Vec<Decision> = decisions.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        Ok(filter.page(all))
    }

    async fn list_for_workload(
        &self,
        workload_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Decision>> {
        self.ensure_open()?;
        let decisions = self.decisions.read().map_err(poisoned)?;
        let mut matched: Vec<Decision> = decisions
            .values()
            .filter(|d| d.workload_id == workload_id && range.contains(d.created_at))
            .cloned()
            .collect();
        matched.sort_by_key(|d| d.created_at);
        Ok(matched)
    }

    async fn count(&self, _filter: &ListFilter) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.decisions.read().map_err(poisoned)?.len())
    }

    async fn health(&self) -> Result<()> {
        self.ensure_open()
    }
}

/// In-memory evaluation store
pub struct MemoryEvaluationStore {
    evaluations: RwLock<HashMap<String, Evaluation>>,
    closed: Arc<AtomicBool>,
}

impl MemoryEvaluationStore {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            evaluations: RwLock::new(HashMap::new()),
            closed,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("store is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EvaluationStore for MemoryEvaluationStore {
    async fn create(&self, evaluation: Evaluation) -> Result<Evaluation> {
        self.ensure_open()?;
        let mut evaluations = self.evaluations.write().map_err(poisoned)?;
        if evaluations.contains_key(&evaluation.id) {
            return Err(EngineError::Conflict(format!(
                "evaluation id {} already exists",
                evaluation.id
            )));
        }
        evaluations.insert(evaluation.id.clone(), evaluation.clone());
        Ok(evaluation)
    }

    async fn get(&self, id: &str) -> Result<Evaluation> {
        self.ensure_open()?;
        let evaluations = self.evaluations.read().map_err(poisoned)?;
        evaluations
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("evaluation", id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut evaluations = self.evaluations.write().map_err(poisoned)?;
        evaluations
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found("evaluation", id))
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Evaluation>> {
        self.ensure_open()?;
        let evaluations = self.evaluations.read().map_err(poisoned)?;
        let mut all: Vec<Evaluation> = evaluations.values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        Ok(filter.page(all))
    }

    async fn list_for_workload(
        &self,
        workload_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Evaluation>> {
        self.ensure_open()?;
        let evaluations = self.evaluations.read().map_err(poisoned)?;
        let mut matched: Vec<Evaluation> = evaluations
            .values()
            .filter(|e| e.workload_id == workload_id && range.contains(e.created_at))
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.created_at);
        Ok(matched)
    }

    async fn count(&self, _filter: &ListFilter) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.evaluations.read().map_err(poisoned)?.len())
    }

    async fn health(&self) -> Result<()> {
        self.ensure_open()
    }
}

/// In-memory storage manager wiring the four stores together
pub struct MemoryStorageManager {
    policy: Arc<MemoryPolicyStore>,
    workload: Arc<MemoryWorkloadStore>,
    decision: Arc<MemoryDecisionStore>,
    evaluation: Arc<MemoryEvaluationStore>,
    closed: Arc<AtomicBool>,
}

impl Default for MemoryStorageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageManager {
    pub fn new() -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        Self {
            policy: Arc::new(MemoryPolicyStore::new(closed.clone())),
            workload: Arc::new(MemoryWorkloadStore::new(closed.clone())),
            decision: Arc::new(MemoryDecisionStore::new(closed.clone())),
            evaluation: Arc::new(MemoryEvaluationStore::new(closed.clone())),
            closed,
        }
    }
}

#[async_trait]
impl StorageManager for MemoryStorageManager {
    fn policy(&self) -> Arc<dyn PolicyStore> {
        self.policy.clone()
    }

    fn workload(&self) -> Arc<dyn WorkloadStore> {
        self.workload.clone()
    }

    fn decision(&self) -> Arc<dyn DecisionStore> {
        self.decision.clone()
    }

    fn evaluation(&self) -> Arc<dyn EvaluationStore> {
        self.evaluation.clone()
    }

    async fn health(&self) -> Result<()> {
        self.policy.health().await?;
        self.workload.health().await?;
        self.decision.health().await?;
        self.evaluation.health().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Objective, PolicyKind, PolicyMetadata, PolicySpec, PolicyStatus, Requirements,
        TargetSelector, WorkloadKind, WorkloadStatus,
    };

    fn policy(id: &str, name: &str) -> Policy {
        Policy {
            id: id.into(),
            kind: PolicyKind::CostOptimization,
            metadata: PolicyMetadata::new(name),
            spec: PolicySpec {
                priority: 100,
                target: TargetSelector::default(),
                objectives: vec![Objective {
                    objective_type: "cost-reduction".into(),
                    weight: 1.0,
                    target: Some("20%".into()),
                }],
                constraints: Default::default(),
                rules: vec![],
            },
            status: PolicyStatus::Active,
        }
    }

    fn workload(id: &str, namespace: &str) -> Workload {
        let now = Utc::now();
        Workload {
            id: id.into(),
            name: format!("workload-{id}"),
            namespace: namespace.into(),
            kind: WorkloadKind::Deployment,
            status: WorkloadStatus::Running,
            labels: HashMap::new(),
            requirements: Requirements::default(),
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_policy_round_trip_by_name() {
        let manager = MemoryStorageManager::new();
        let store = manager.policy();
        let created = store.create(policy("p1", "cost-p")).await.unwrap();

        let fetched = store.get_by_name("cost-p").await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.metadata.name, created.metadata.name);
        assert_eq!(fetched.spec.priority, created.spec.priority);
        assert_eq!(fetched.status, created.status);
        assert_eq!(
            fetched.spec.objectives[0].target,
            created.spec.objectives[0].target
        );
    }

    #[tokio::test]
    async fn test_policy_duplicate_name_conflict() {
        let manager = MemoryStorageManager::new();
        let store = manager.policy();
        store.create(policy("p1", "cost-p")).await.unwrap();
        let err = store.create(policy("p2", "cost-p")).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_policy_versions_ascending() {
        let manager = MemoryStorageManager::new();
        let store = manager.policy();
        let created = store.create(policy("p1", "cost-p")).await.unwrap();

        let mut updated = created.clone();
        updated.spec.priority = 500;
        let updated = store.update(updated).await.unwrap();
        assert_eq!(updated.metadata.version, 2);

        let mut again = updated.clone();
        again.spec.priority = 1000;
        store.update(again).await.unwrap();

        let versions = store.get_versions("cost-p").await.unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(
            versions.iter().map(|p| p.metadata.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(versions[0].spec.priority, 100);
        assert_eq!(versions[2].spec.priority, 1000);
    }

    #[tokio::test]
    async fn test_policy_create_validates() {
        let manager = MemoryStorageManager::new();
        let store = manager.policy();
        let mut bad = policy("p1", "cost-p");
        bad.spec.objectives[0].weight = 0.5;
        assert!(matches!(
            store.create(bad).await,
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_workload_list_by_namespace() {
        let manager = MemoryStorageManager::new();
        let store = manager.workload();
        store.create(workload("w1", "default")).await.unwrap();
        store.create(workload("w2", "production")).await.unwrap();

        let filter = ListFilter {
            namespace: Some("default".into()),
            ..Default::default()
        };
        let listed = store.list(&filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "w1");
        assert_eq!(store.count(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_decision_status_update() {
        let manager = MemoryStorageManager::new();
        let store = manager.decision();
        let decision = Decision::noop("w1", "nothing to do");
        let id = decision.id.clone();
        store.create(decision).await.unwrap();

        let updated = store
            .update_status(&id, DecisionStatus::Completed)
            .await
            .unwrap();
        assert_eq!(updated.status, DecisionStatus::Completed);
    }

    #[tokio::test]
    async fn test_evaluation_history_range() {
        let manager = MemoryStorageManager::new();
        let store = manager.evaluation();
        let old = Evaluation {
            id: "e1".into(),
            workload_id: "w1".into(),
            policy_id: "p1".into(),
            score: 50.0,
            result: crate::models::EvaluationOutcome::Pass,
            rule_outcomes: vec![],
            created_at: Utc::now() - chrono::Duration::hours(2),
        };
        let recent = Evaluation {
            id: "e2".into(),
            created_at: Utc::now(),
            ..old.clone()
        };
        store.create(old).await.unwrap();
        store.create(recent).await.unwrap();

        let range = TimeRange {
            since: Some(Utc::now() - chrono::Duration::hours(1)),
            until: None,
        };
        let history = store.list_for_workload("w1", range).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "e2");
    }

    #[tokio::test]
    async fn test_closed_manager_rejects_operations() {
        let manager = MemoryStorageManager::new();
        manager.close().await.unwrap();
        let err = manager.policy().get("p1").await.unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
        assert!(manager.health().await.is_err());
    }
}
