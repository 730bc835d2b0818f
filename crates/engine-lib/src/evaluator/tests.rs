//! Evaluation pipeline tests covering applicability filtering, conflict
//! resolution and the bulk fan-out path

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::*;
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::models::{
    Constraints, DecisionType, Objective, Policy, PolicyKind, PolicyMetadata, PolicySpec,
    PolicyStatus, Requirements, Rule, TargetSelector, Workload, WorkloadKind, WorkloadMetrics,
    WorkloadStatus,
};
use crate::storage::memory::MemoryStorageManager;
use crate::storage::StorageManager;

fn workload(id: &str, namespace: &str, cpu_usage: f64) -> Workload {
    let now = Utc::now();
    Workload {
        id: id.into(),
        name: format!("workload-{id}"),
        namespace: namespace.into(),
        kind: WorkloadKind::Deployment,
        status: WorkloadStatus::Running,
        labels: HashMap::from([("env".to_string(), "production".to_string())]),
        requirements: Requirements {
            cpu: "100m".into(),
            memory: "128Mi".into(),
        },
        metrics: Some(WorkloadMetrics {
            cpu_usage,
            ..Default::default()
        }),
        created_at: now,
        updated_at: now,
    }
}

fn policy(id: &str, name: &str, priority: i32, rules: Vec<Rule>) -> Policy {
    Policy {
        id: id.into(),
        kind: PolicyKind::CostOptimization,
        metadata: PolicyMetadata::new(name),
        spec: PolicySpec {
            priority,
            target: TargetSelector {
                namespaces: vec!["default".into()],
                workload_kinds: vec![],
                match_labels: HashMap::from([(
                    "env".to_string(),
                    "production".to_string(),
                )]),
            },
            objectives: vec![Objective {
                objective_type: "cost-reduction".into(),
                weight: 1.0,
                target: Some("20%".into()),
            }],
            constraints: Constraints::default(),
            rules,
        },
        status: PolicyStatus::Active,
    }
}

fn scale_down_rule() -> Rule {
    Rule {
        name: "cpu-high".into(),
        condition: "workload.cpu.usage > 0.8".into(),
        action: "scale-down".into(),
        priority: 0,
        score: None,
        objective: None,
    }
}

fn evaluator(storage: &Arc<MemoryStorageManager>) -> PolicyEvaluator {
    let storage: Arc<dyn StorageManager> = storage.clone();
    PolicyEvaluator::new(storage, RuleEngine::new())
}

fn engine(storage: &Arc<MemoryStorageManager>) -> Arc<EvaluationEngine> {
    let manager: Arc<dyn StorageManager> = storage.clone();
    Arc::new(EvaluationEngine::new(
        Arc::new(evaluator(storage)),
        ConflictResolver::new(),
        manager,
        EventBus::default(),
        Default::default(),
    ))
}

#[tokio::test]
async fn test_active_matching_policy_yields_scale_decision() {
    let storage = Arc::new(MemoryStorageManager::new());
    storage
        .workload()
        .create(workload("w1", "default", 0.9))
        .await
        .unwrap();
    storage
        .policy()
        .create(policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]))
        .await
        .unwrap();

    let engine = engine(&storage);
    let decision = engine.evaluate_one("w1").await.unwrap();

    assert_eq!(decision.decision_type, DecisionType::Scale);
    assert_eq!(decision.policy_id.as_deref(), Some("pol-cost"));
    assert_eq!(
        decision.details["scale_direction"],
        serde_json::json!("down")
    );

    // Evaluation persisted before decision, both retrievable
    let evaluations = storage
        .evaluation()
        .list_for_workload("w1", Default::default())
        .await
        .unwrap();
    assert_eq!(evaluations.len(), 1);
    assert!(evaluations[0].rule_outcomes[0].matched);
    assert!(evaluations[0].score > 0.0);
    assert!(storage.decision().get(&decision.id).await.is_ok());
}

#[tokio::test]
async fn test_winning_policy_selector_accepts_workload() {
    let storage = Arc::new(MemoryStorageManager::new());
    let w = workload("w1", "default", 0.9);
    storage.workload().create(w.clone()).await.unwrap();
    storage
        .policy()
        .create(policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]))
        .await
        .unwrap();
    // Policy targeting a different namespace never wins
    let mut other = policy("pol-other", "other-p", 1000, vec![scale_down_rule()]);
    other.spec.target.namespaces = vec!["production".into()];
    storage.policy().create(other).await.unwrap();

    let engine = engine(&storage);
    let decision = engine.evaluate_one("w1").await.unwrap();

    let winner = storage
        .policy()
        .get(decision.policy_id.as_deref().unwrap())
        .await
        .unwrap();
    assert!(winner.spec.target.accepts(&w).is_ok());
}

#[test]
fn test_inactive_policy_rejected() {
    let storage = Arc::new(MemoryStorageManager::new());
    let evaluator = evaluator(&storage);
    let mut inactive = policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]);
    inactive.status = PolicyStatus::Inactive;

    let err = evaluator
        .evaluate(&workload("w1", "default", 0.9), &inactive)
        .unwrap_err();
    assert!(matches!(err, EngineError::PolicyInactive(_)));
}

#[test]
fn test_selector_namespace_mismatch() {
    let storage = Arc::new(MemoryStorageManager::new());
    let evaluator = evaluator(&storage);
    let mut scoped = policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]);
    scoped.spec.target.namespaces = vec!["production".into()];

    let err = evaluator
        .evaluate(&workload("w1", "default", 0.9), &scoped)
        .unwrap_err();
    assert!(matches!(err, EngineError::PolicyNotApplicable { .. }));
}

#[tokio::test]
async fn test_pin_constraint_blocks_migrate_winner() {
    let storage = Arc::new(MemoryStorageManager::new());
    storage
        .workload()
        .create(workload("w1", "default", 0.9))
        .await
        .unwrap();

    // A recommends Migrate at normal priority
    let migrate_rule = Rule {
        name: "rebalance".into(),
        condition: "workload.cpu.usage > 0.8".into(),
        action: "migrate".into(),
        priority: 0,
        score: None,
        objective: None,
    };
    storage
        .policy()
        .create(policy("pol-a", "migrator", 100, vec![migrate_rule]))
        .await
        .unwrap();

    // B pins the workload at high priority and recommends nothing
    let mut pinner = policy("pol-b", "pinner", 500, vec![]);
    pinner.spec.constraints.pin = true;
    storage.policy().create(pinner).await.unwrap();

    let engine = engine(&storage);
    let decision = engine.evaluate_one("w1").await.unwrap();

    assert_eq!(decision.decision_type, DecisionType::NoOp);
    assert_eq!(decision.reason, "conflict_blocked");
    assert_eq!(decision.blocker_policy_id.as_deref(), Some("pol-b"));
}

#[test]
fn test_resolver_empty_input_is_noop() {
    let resolver = ConflictResolver::new();
    let decision = resolver.resolve("w1", &[]);
    assert_eq!(decision.decision_type, DecisionType::NoOp);
}

#[test]
fn test_resolver_priority_tiebreak() {
    let storage = Arc::new(MemoryStorageManager::new());
    let evaluator = evaluator(&storage);
    let w = workload("w1", "default", 0.9);

    let scale = evaluator
        .evaluate(&w, &policy("pol-a", "a-scaler", 100, vec![scale_down_rule()]))
        .unwrap();
    let terminate_rule = Rule {
        name: "kill".into(),
        condition: "workload.cpu.usage > 0.8".into(),
        action: "terminate".into(),
        priority: 0,
        score: None,
        objective: None,
    };
    let terminate = evaluator
        .evaluate(&w, &policy("pol-b", "b-killer", 500, vec![terminate_rule]))
        .unwrap();

    let resolver = ConflictResolver::new();
    let decision = resolver.resolve("w1", &[terminate.clone(), scale]);
    assert_eq!(decision.decision_type, DecisionType::Terminate);
    assert_eq!(decision.policy_id.as_deref(), Some("pol-b"));
}

#[test]
fn test_resolver_single_class_best_score_wins() {
    let storage = Arc::new(MemoryStorageManager::new());
    let evaluator = evaluator(&storage);

    // Same action class from both policies; the higher-scoring one wins
    // even though its priority is lower
    let w_hot = workload("w1", "default", 0.95);
    let mut weak = scale_down_rule();
    weak.score = Some("workload.cpu.usage * 50".into());
    let low_score = evaluator
        .evaluate(&w_hot, &policy("pol-a", "a-weak", 500, vec![weak]))
        .unwrap();
    let high_score = evaluator
        .evaluate(&w_hot, &policy("pol-b", "b-strong", 100, vec![scale_down_rule()]))
        .unwrap();

    let resolver = ConflictResolver::new();
    let decision = resolver.resolve("w1", &[low_score, high_score]);
    assert_eq!(decision.policy_id.as_deref(), Some("pol-b"));
}

#[test]
fn test_deterministic_resolution() {
    let storage = Arc::new(MemoryStorageManager::new());
    let evaluator = evaluator(&storage);
    let w = workload("w1", "default", 0.9);
    let result = evaluator
        .evaluate(&w, &policy("pol-a", "a-scaler", 100, vec![scale_down_rule()]))
        .unwrap();

    let resolver = ConflictResolver::new();
    let first = resolver.resolve("w1", std::slice::from_ref(&result));
    let second = resolver.resolve("w1", std::slice::from_ref(&result));
    assert_eq!(first.decision_type, second.decision_type);
    assert_eq!(first.policy_id, second.policy_id);
    assert_eq!(first.reason, second.reason);
}

#[tokio::test]
async fn test_no_applicable_policies_yields_noop() {
    let storage = Arc::new(MemoryStorageManager::new());
    storage
        .workload()
        .create(workload("w1", "default", 0.9))
        .await
        .unwrap();

    let engine = engine(&storage);
    let decision = engine.evaluate_one("w1").await.unwrap();
    assert_eq!(decision.decision_type, DecisionType::NoOp);
    assert!(decision.policy_id.is_none());
}

#[tokio::test]
async fn test_bulk_partial_failure_does_not_abort() {
    let storage = Arc::new(MemoryStorageManager::new());
    storage
        .workload()
        .create(workload("w1", "default", 0.9))
        .await
        .unwrap();
    storage
        .policy()
        .create(policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]))
        .await
        .unwrap();

    let engine = engine(&storage);
    let bulk = engine
        .evaluate_many(&["w1".to_string(), "missing".to_string()])
        .await;

    assert_eq!(bulk.decisions.len(), 1);
    assert_eq!(bulk.partial.len(), 1);
    assert_eq!(bulk.partial[0].workload_id, "missing");
    assert!(bulk.partial[0].error.contains("not found"));
}

#[tokio::test]
async fn test_bulk_parallel_independent_workloads() {
    let storage = Arc::new(MemoryStorageManager::new());
    let mut ids = Vec::new();
    for i in 0..24 {
        let id = format!("w{i}");
        storage
            .workload()
            .create(workload(&id, "default", 0.9))
            .await
            .unwrap();
        ids.push(id);
    }
    storage
        .policy()
        .create(policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]))
        .await
        .unwrap();

    let engine = engine(&storage);
    let bulk = engine.evaluate_many(&ids).await;
    assert_eq!(bulk.decisions.len(), 24);
    assert!(bulk.partial.is_empty());
}

#[tokio::test]
async fn test_statistics() {
    let storage = Arc::new(MemoryStorageManager::new());
    storage
        .workload()
        .create(workload("w1", "default", 0.9))
        .await
        .unwrap();
    storage
        .policy()
        .create(policy("pol-cost", "cost-p", 100, vec![scale_down_rule()]))
        .await
        .unwrap();

    let engine = engine(&storage);
    engine.evaluate_one("w1").await.unwrap();

    let stats = engine.statistics().await.unwrap();
    assert_eq!(stats.total_evaluations, 1);
    assert_eq!(stats.total_decisions, 1);
    assert_eq!(stats.total_workloads, 1);
    assert!(stats.average_score > 0.0);
    assert_eq!(stats.decisions_by_type["scale"], 1);
}
