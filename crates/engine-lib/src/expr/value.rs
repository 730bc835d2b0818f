//! Runtime values and the closed evaluation environment

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::models::{Policy, Workload};

/// A runtime value produced by expression evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Cluster-level capacity snapshot exposed as `cluster.resources.*`
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterResources {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

/// The closed environment an expression evaluates against. Programs are
/// shared across threads; each evaluation gets its own context.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    root: HashMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(mut self, workload: &Workload) -> Self {
        let metrics = workload.metrics.clone().unwrap_or_default();
        let labels: HashMap<String, Value> = workload
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
            .collect();

        let mut map = HashMap::new();
        map.insert("id".into(), Value::Str(workload.id.clone()));
        map.insert("name".into(), Value::Str(workload.name.clone()));
        map.insert("type".into(), Value::Str(workload.kind.to_string()));
        map.insert(
            "status".into(),
            Value::Str(format!("{:?}", workload.status).to_lowercase()),
        );
        map.insert("namespace".into(), Value::Str(workload.namespace.clone()));
        map.insert("labels".into(), Value::Map(labels));
        map.insert(
            "cpu".into(),
            usage_limit(metrics.cpu_usage, metrics.cpu_limit),
        );
        map.insert(
            "memory".into(),
            usage_limit(metrics.memory_usage, metrics.memory_limit),
        );
        map.insert(
            "storage".into(),
            usage_limit(metrics.storage_usage, metrics.storage_limit),
        );

        self.root.insert("workload".into(), Value::Map(map));
        self
    }

    pub fn with_policy(mut self, policy: &Policy) -> Self {
        let mut map = HashMap::new();
        map.insert("id".into(), Value::Str(policy.id.clone()));
        map.insert("name".into(), Value::Str(policy.metadata.name.clone()));
        map.insert("type".into(), Value::Str(format!("{:?}", policy.kind)));
        map.insert(
            "status".into(),
            Value::Str(format!("{:?}", policy.status).to_lowercase()),
        );
        map.insert("priority".into(), Value::Num(policy.spec.priority as f64));

        self.root.insert("policy".into(), Value::Map(map));
        self
    }

    pub fn with_cluster(mut self, resources: &ClusterResources) -> Self {
        let mut inner = HashMap::new();
        inner.insert("cpu".into(), Value::Num(resources.cpu));
        inner.insert("memory".into(), Value::Num(resources.memory));
        inner.insert("storage".into(), Value::Num(resources.storage));

        let mut map = HashMap::new();
        map.insert("resources".into(), Value::Map(inner));
        self.root.insert("cluster".into(), Value::Map(map));
        self
    }

    /// Expose `time.hour` and `time.dayOfWeek` for trigger-context
    /// evaluation
    pub fn with_time(mut self, at: DateTime<Utc>) -> Self {
        let mut map = HashMap::new();
        map.insert("hour".into(), Value::Num(at.hour() as f64));
        map.insert(
            "dayOfWeek".into(),
            Value::Num(at.weekday().num_days_from_sunday() as f64),
        );
        self.root.insert("time".into(), Value::Map(map));
        self
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }
}

fn usage_limit(usage: f64, limit: f64) -> Value {
    let mut map = HashMap::new();
    map.insert("usage".into(), Value::Num(usage));
    map.insert("limit".into(), Value::Num(limit));
    Value::Map(map)
}
