//! Action generation
//!
//! Stateless, table-driven mapping from a decision to the ordered action
//! sequence that enforces it. Notification actions are appended for audit
//! and are never on the critical path of the primary action.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::{Decision, DecisionType, Workload};

/// Kind of enforcement action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Schedule,
    Reschedule,
    Migrate,
    Scale,
    Terminate,
    Suspend,
    Resume,
    Update,
    Notify,
}

impl ActionType {
    /// Parse a free-form action type string, as used by automation action
    /// templates
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "schedule" => Some(ActionType::Schedule),
            "reschedule" => Some(ActionType::Reschedule),
            "migrate" => Some(ActionType::Migrate),
            "scale" => Some(ActionType::Scale),
            "terminate" => Some(ActionType::Terminate),
            "suspend" => Some(ActionType::Suspend),
            "resume" => Some(ActionType::Resume),
            "update" => Some(ActionType::Update),
            "notify" => Some(ActionType::Notify),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Schedule => "schedule",
            ActionType::Reschedule => "reschedule",
            ActionType::Migrate => "migrate",
            ActionType::Scale => "scale",
            ActionType::Terminate => "terminate",
            ActionType::Suspend => "suspend",
            ActionType::Resume => "resume",
            ActionType::Update => "update",
            ActionType::Notify => "notify",
        };
        f.write_str(s)
    }
}

/// How failed action executions are retried
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_millis")]
    pub interval: Duration,
    /// "exponential" doubles the interval per attempt; anything else keeps
    /// it fixed
    #[serde(default)]
    pub backoff: Option<String>,
}

impl RetryConfig {
    pub fn is_exponential(&self) -> bool {
        self.backoff.as_deref() == Some("exponential")
    }
}

/// Serialize durations as integer milliseconds
mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A single enforcement action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(with = "humantime_millis")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Stateless decision → action mapping
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionGenerator;

impl ActionGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate the ordered action sequence for a decision. A NoOp decision
    /// yields no actions and completes trivially.
    pub fn generate(&self, decision: &Decision, workload: &Workload) -> Result<Vec<Action>> {
        let actions = match decision.decision_type {
            DecisionType::Schedule => self.schedule_actions(decision, workload),
            DecisionType::Reschedule => self.reschedule_actions(decision, workload),
            DecisionType::Migrate => self.migrate_actions(decision, workload),
            DecisionType::Scale => self.scale_actions(decision, workload),
            DecisionType::Terminate => self.terminate_actions(decision, workload),
            DecisionType::Suspend => self.suspend_actions(decision, workload),
            DecisionType::Resume => self.resume_actions(decision, workload),
            DecisionType::Optimize => self.optimize_actions(decision, workload),
            DecisionType::NoOp => Vec::new(),
        };
        Ok(actions)
    }

    fn schedule_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![
            Action {
                action_type: ActionType::Schedule,
                target: workload.id.clone(),
                parameters: HashMap::from([
                    ("workload_id".into(), serde_json::json!(workload.id)),
                    (
                        "recommended_cluster".into(),
                        serde_json::json!(decision.recommended_cluster),
                    ),
                    (
                        "recommended_node".into(),
                        serde_json::json!(decision.recommended_node),
                    ),
                    (
                        "resources".into(),
                        serde_json::json!({
                            "cpu": workload.requirements.cpu,
                            "memory": workload.requirements.memory,
                        }),
                    ),
                ]),
                timeout: Duration::from_secs(5 * 60),
                retry: None,
            },
            self.notify("scheduler", decision, workload),
        ]
    }

    fn reschedule_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Reschedule,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                (
                    "recommended_cluster".into(),
                    serde_json::json!(decision.recommended_cluster),
                ),
                ("reason".into(), serde_json::json!(decision.reason)),
            ]),
            timeout: Duration::from_secs(10 * 60),
            retry: None,
        }]
    }

    fn migrate_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Migrate,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                (
                    "target_cluster".into(),
                    serde_json::json!(decision.recommended_cluster),
                ),
                (
                    "target_node".into(),
                    serde_json::json!(decision.recommended_node),
                ),
                ("migration_strategy".into(), serde_json::json!("live")),
            ]),
            timeout: Duration::from_secs(15 * 60),
            retry: None,
        }]
    }

    fn scale_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Scale,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                (
                    "scale_factor".into(),
                    decision
                        .details
                        .get("scale_factor")
                        .cloned()
                        .unwrap_or(serde_json::json!(1.0)),
                ),
                (
                    "scale_direction".into(),
                    decision
                        .details
                        .get("scale_direction")
                        .cloned()
                        .unwrap_or(serde_json::json!("down")),
                ),
            ]),
            timeout: Duration::from_secs(5 * 60),
            retry: None,
        }]
    }

    fn terminate_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Terminate,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                ("reason".into(), serde_json::json!(decision.reason)),
                ("grace_period".into(), serde_json::json!("30s")),
            ]),
            timeout: Duration::from_secs(2 * 60),
            retry: None,
        }]
    }

    fn suspend_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Suspend,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                ("reason".into(), serde_json::json!(decision.reason)),
            ]),
            timeout: Duration::from_secs(2 * 60),
            retry: None,
        }]
    }

    fn resume_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![Action {
            action_type: ActionType::Resume,
            target: workload.id.clone(),
            parameters: HashMap::from([
                ("workload_id".into(), serde_json::json!(workload.id)),
                ("reason".into(), serde_json::json!(decision.reason)),
            ]),
            timeout: Duration::from_secs(2 * 60),
            retry: None,
        }]
    }

    fn optimize_actions(&self, decision: &Decision, workload: &Workload) -> Vec<Action> {
        vec![
            Action {
                action_type: ActionType::Update,
                target: workload.id.clone(),
                parameters: HashMap::from([
                    ("workload_id".into(), serde_json::json!(workload.id)),
                    (
                        "optimizations".into(),
                        decision
                            .details
                            .get("optimizations")
                            .cloned()
                            .unwrap_or(serde_json::json!([])),
                    ),
                ]),
                timeout: Duration::from_secs(5 * 60),
                retry: None,
            },
            self.notify("optimizer", decision, workload),
        ]
    }

    fn notify(&self, consumer: &str, decision: &Decision, workload: &Workload) -> Action {
        Action {
            action_type: ActionType::Notify,
            target: consumer.to_string(),
            parameters: HashMap::from([
                ("message".into(), serde_json::json!(decision.reason)),
                ("workload_id".into(), serde_json::json!(workload.id)),
                ("decision_id".into(), serde_json::json!(decision.id)),
            ]),
            timeout: NOTIFY_TIMEOUT,
            retry: None,
        }
    }
}
