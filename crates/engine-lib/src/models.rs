//! Core data model for policies, workloads, evaluations and decisions

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};

/// Named priority tiers; any positive integer is accepted
pub const PRIORITY_LOW: i32 = 10;
pub const PRIORITY_NORMAL: i32 = 100;
pub const PRIORITY_HIGH: i32 = 500;
pub const PRIORITY_CRITICAL: i32 = 1000;

/// Kind of policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    CostOptimization,
    Automation,
    WorkloadPriority,
    #[serde(rename = "SLA")]
    Sla,
    Security,
    ResourceQuota,
}

/// Lifecycle status of a policy; only Active policies are evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Draft,
    Active,
    Inactive,
    Archived,
}

/// Policy metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    pub creation_timestamp: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub version: u64,
}

impl PolicyMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: None,
            labels: HashMap::new(),
            annotations: HashMap::new(),
            creation_timestamp: now,
            last_modified: now,
            version: 1,
        }
    }
}

/// Selects the workloads a policy applies to. Empty sets match everything;
/// matchLabels clauses are a conjunction of equality constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workload_kinds: Vec<WorkloadKind>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub match_labels: HashMap<String, String>,
}

impl TargetSelector {
    /// Applicability predicate: namespace ∩ kind ∩ labels, empty sets accept
    pub fn accepts(&self, workload: &Workload) -> std::result::Result<(), String> {
        if !self.namespaces.is_empty() && !self.namespaces.contains(&workload.namespace) {
            return Err(format!("namespace {} not targeted", workload.namespace));
        }
        if !self.workload_kinds.is_empty() && !self.workload_kinds.contains(&workload.kind) {
            return Err(format!("workload kind {:?} not targeted", workload.kind));
        }
        for (key, value) in &self.match_labels {
            if workload.labels.get(key) != Some(value) {
                return Err(format!("label {key}={value} does not match"));
            }
        }
        Ok(())
    }
}

/// An optimization objective with a weight in (0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    #[serde(rename = "type")]
    pub objective_type: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Hard bounds declared by a policy. `pin` forbids moving targeted
/// workloads and blocks Migrate/Reschedule decisions from other policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power_usage: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_efficiency_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_availability_ratio: Option<f64>,
    #[serde(default)]
    pub pin: bool,
}

/// A named condition → action pair inside a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub condition: String,
    pub action: String,
    #[serde(default)]
    pub priority: i32,
    /// Optional numeric scoring expression, clamped to [0, 100].
    /// A matched rule without one scores 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    /// Objective type this rule scores; defaults to the first objective.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
}

/// Policy specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub priority: i32,
    #[serde(default)]
    pub target: TargetSelector,
    pub objectives: Vec<Objective>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// A declarative bundle of objectives, constraints, rules and a selector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub kind: PolicyKind,
    pub metadata: PolicyMetadata,
    pub spec: PolicySpec,
    pub status: PolicyStatus,
}

impl Policy {
    /// Structural validation: DNS-subdomain name, positive priority,
    /// non-empty objectives with weights in (0, 1] summing to 1.0 ± 0.01.
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(EngineError::InvalidInput("policy name is empty".into()));
        }
        if !is_dns_subdomain(&self.metadata.name) {
            return Err(EngineError::InvalidInput(format!(
                "policy name {:?} is not a valid DNS subdomain",
                self.metadata.name
            )));
        }
        if self.spec.priority <= 0 {
            return Err(EngineError::InvalidInput(format!(
                "policy priority must be positive, got {}",
                self.spec.priority
            )));
        }
        if self.spec.objectives.is_empty() {
            return Err(EngineError::InvalidInput(
                "policy must declare at least one objective".into(),
            ));
        }
        let mut weight_sum = 0.0;
        for objective in &self.spec.objectives {
            if objective.weight <= 0.0 || objective.weight > 1.0 {
                return Err(EngineError::InvalidInput(format!(
                    "objective {} weight {} outside (0, 1]",
                    objective.objective_type, objective.weight
                )));
            }
            weight_sum += objective.weight;
        }
        if (weight_sum - 1.0).abs() > 0.01 {
            return Err(EngineError::InvalidInput(format!(
                "objective weights sum to {weight_sum:.3}, expected 1.0 ± 0.01"
            )));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.status == PolicyStatus::Active
    }
}

/// DNS-1123 subdomain: lowercase alphanumerics and '-', dot-separated,
/// each label starting and ending with an alphanumeric, max 253 chars.
pub fn is_dns_subdomain(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}

/// Kind of workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::CronJob => "CronJob",
        };
        f.write_str(s)
    }
}

/// Runtime status of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Running,
    Stopped,
    Pending,
    Failed,
    Unknown,
}

/// Declared resource requirements, in Kubernetes quantity notation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// CPU request, e.g. "100m" or "2"
    #[serde(default)]
    pub cpu: String,
    /// Memory request, e.g. "128Mi" or "1Gi"
    #[serde(default)]
    pub memory: String,
}

impl Requirements {
    /// Normalize the CPU quantity to millicores
    pub fn cpu_millicores(&self) -> Result<u64> {
        parse_cpu_quantity(&self.cpu)
    }

    /// Normalize the memory quantity to bytes
    pub fn memory_bytes(&self) -> Result<u64> {
        parse_memory_quantity(&self.memory)
    }
}

/// Parse a CPU quantity ("100m", "0.5", "2") into millicores
pub fn parse_cpu_quantity(quantity: &str) -> Result<u64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis
            .parse::<u64>()
            .map_err(|_| EngineError::InvalidInput(format!("invalid CPU quantity {quantity:?}")));
    }
    quantity
        .parse::<f64>()
        .map(|cores| (cores * 1000.0).round() as u64)
        .map_err(|_| EngineError::InvalidInput(format!("invalid CPU quantity {quantity:?}")))
}

/// Parse a memory quantity ("128Mi", "1Gi", "512Ki", "100M", plain bytes)
pub fn parse_memory_quantity(quantity: &str) -> Result<u64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return Ok(0);
    }
    const UNITS: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    for (suffix, multiplier) in UNITS {
        if let Some(value) = quantity.strip_suffix(suffix) {
            return value
                .parse::<f64>()
                .map(|v| (v * *multiplier as f64).round() as u64)
                .map_err(|_| {
                    EngineError::InvalidInput(format!("invalid memory quantity {quantity:?}"))
                });
        }
    }
    quantity
        .parse::<u64>()
        .map_err(|_| EngineError::InvalidInput(format!("invalid memory quantity {quantity:?}")))
}

/// Observed utilization, used by the expression sandbox as
/// `workload.cpu.usage`, `workload.memory.limit` and friends.
/// Usage values are ratios in [0, 1]; limits are absolute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMetrics {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub cpu_limit: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub memory_limit: f64,
    #[serde(default)]
    pub storage_usage: f64,
    #[serde(default)]
    pub storage_limit: f64,
}

/// A unit of compute the engine optimizes over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub kind: WorkloadKind,
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<WorkloadMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of evaluating one policy against one workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationOutcome {
    Pass,
    Fail,
    Warning,
    Error,
}

/// Result of evaluating a single rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub rule_name: String,
    pub matched: bool,
    pub score: f64,
    pub message: String,
    pub action: String,
    #[serde(default)]
    pub error: bool,
}

/// Persisted record of one (workload, policy) assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub id: String,
    pub workload_id: String,
    pub policy_id: String,
    pub score: f64,
    pub result: EvaluationOutcome,
    pub rule_outcomes: Vec<RuleOutcome>,
    pub created_at: DateTime<Utc>,
}

/// The action recommended by an evaluation, before conflict resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub action: String,
    pub decision_type: DecisionType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

/// In-pipeline result of one policy evaluation, input to the resolver.
/// Carries the policy's priority and constraints so the resolver does not
/// re-read storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub policy_id: String,
    pub policy_name: String,
    pub policy_priority: i32,
    pub workload_id: String,
    pub outcome: EvaluationOutcome,
    pub score: f64,
    pub rule_outcomes: Vec<RuleOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default)]
    pub constraints: Constraints,
    pub evaluated_at: DateTime<Utc>,
}

/// The single chosen action class for a workload at a moment in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Schedule,
    Reschedule,
    Migrate,
    Scale,
    Terminate,
    Suspend,
    Resume,
    Optimize,
    NoOp,
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionType::Schedule => "schedule",
            DecisionType::Reschedule => "reschedule",
            DecisionType::Migrate => "migrate",
            DecisionType::Scale => "scale",
            DecisionType::Terminate => "terminate",
            DecisionType::Suspend => "suspend",
            DecisionType::Resume => "resume",
            DecisionType::Optimize => "optimize",
            DecisionType::NoOp => "noop",
        };
        f.write_str(s)
    }
}

/// Enforcement progress of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Conflict-resolved outcome for one workload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub id: String,
    pub workload_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_node: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker_policy_id: Option<String>,
    pub status: DecisionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    /// A decision that takes no action, used when nothing applies or a
    /// constraint blocks the winner
    pub fn noop(workload_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workload_id: workload_id.into(),
            policy_id: None,
            decision_type: DecisionType::NoOp,
            recommended_cluster: None,
            recommended_node: None,
            details: HashMap::new(),
            reason: reason.into(),
            blocker_policy_id: None,
            status: DecisionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> Policy {
        Policy {
            id: "pol-1".into(),
            kind: PolicyKind::CostOptimization,
            metadata: PolicyMetadata::new("cost-p"),
            spec: PolicySpec {
                priority: PRIORITY_NORMAL,
                target: TargetSelector::default(),
                objectives: vec![Objective {
                    objective_type: "cost-reduction".into(),
                    weight: 1.0,
                    target: Some("20%".into()),
                }],
                constraints: Constraints::default(),
                rules: vec![],
            },
            status: PolicyStatus::Active,
        }
    }

    pub(crate) fn sample_workload() -> Workload {
        let now = Utc::now();
        Workload {
            id: "w1".into(),
            name: "test-workload".into(),
            namespace: "default".into(),
            kind: WorkloadKind::Deployment,
            status: WorkloadStatus::Running,
            labels: HashMap::from([("env".to_string(), "production".to_string())]),
            requirements: Requirements {
                cpu: "100m".into(),
                memory: "128Mi".into(),
            },
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_policy_validate_ok() {
        assert!(sample_policy().validate().is_ok());
    }

    #[test]
    fn test_policy_validate_rejects_bad_name() {
        let mut policy = sample_policy();
        policy.metadata.name = "Not_A_DNS_Name".into();
        assert!(matches!(
            policy.validate(),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_policy_validate_rejects_weight_sum() {
        let mut policy = sample_policy();
        policy.spec.objectives = vec![
            Objective {
                objective_type: "cost".into(),
                weight: 0.5,
                target: None,
            },
            Objective {
                objective_type: "priority".into(),
                weight: 0.3,
                target: None,
            },
        ];
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("weights sum"));
    }

    #[test]
    fn test_policy_validate_weight_sum_tolerance() {
        let mut policy = sample_policy();
        policy.spec.objectives = vec![
            Objective {
                objective_type: "cost".into(),
                weight: 0.33,
                target: None,
            },
            Objective {
                objective_type: "priority".into(),
                weight: 0.33,
                target: None,
            },
            Objective {
                objective_type: "efficiency".into(),
                weight: 0.34,
                target: None,
            },
        ];
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_validate_rejects_weight_above_one() {
        let mut policy = sample_policy();
        policy.spec.objectives[0].weight = 2.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_selector_empty_accepts_any_workload() {
        let selector = TargetSelector::default();
        assert!(selector.accepts(&sample_workload()).is_ok());
    }

    #[test]
    fn test_selector_namespace_mismatch() {
        let selector = TargetSelector {
            namespaces: vec!["production".into()],
            ..Default::default()
        };
        assert!(selector.accepts(&sample_workload()).is_err());
    }

    #[test]
    fn test_selector_labels_conjunction() {
        let selector = TargetSelector {
            match_labels: HashMap::from([
                ("env".to_string(), "production".to_string()),
                ("tier".to_string(), "web".to_string()),
            ]),
            ..Default::default()
        };
        // workload has env=production but no tier label
        assert!(selector.accepts(&sample_workload()).is_err());
    }

    #[test]
    fn test_parse_cpu_quantity() {
        assert_eq!(parse_cpu_quantity("100m").unwrap(), 100);
        assert_eq!(parse_cpu_quantity("2").unwrap(), 2000);
        assert_eq!(parse_cpu_quantity("0.5").unwrap(), 500);
        assert_eq!(parse_cpu_quantity("").unwrap(), 0);
        assert!(parse_cpu_quantity("lots").is_err());
    }

    #[test]
    fn test_parse_memory_quantity() {
        assert_eq!(parse_memory_quantity("128Mi").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory_quantity("1Gi").unwrap(), 1 << 30);
        assert_eq!(parse_memory_quantity("512").unwrap(), 512);
        assert_eq!(parse_memory_quantity("1M").unwrap(), 1_000_000);
        assert!(parse_memory_quantity("1Zi").is_err());
    }

    #[test]
    fn test_dns_subdomain() {
        assert!(is_dns_subdomain("cost-p"));
        assert!(is_dns_subdomain("a.b-c.d0"));
        assert!(!is_dns_subdomain("-leading"));
        assert!(!is_dns_subdomain("trailing-"));
        assert!(!is_dns_subdomain("Upper"));
        assert!(!is_dns_subdomain(""));
    }
}
