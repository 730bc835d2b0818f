//! Storage abstraction
//!
//! Four keyed stores (policy, workload, decision, evaluation) behind
//! async traits so backends are replaceable. The in-memory reference
//! implementation lives in [`memory`]; anything durable plugs in behind
//! the same traits.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{EngineError, Result};
use crate::models::{Decision, DecisionStatus, Evaluation, Policy, PolicyStatus, Workload};

/// Default deadline for a single storage operation
pub const STORAGE_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry attempts for transient storage failures
const STORAGE_RETRIES: u32 = 3;

/// Filter applied to list and count operations
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub namespace: Option<String>,
    pub labels: HashMap<String, String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListFilter {
    pub fn page<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if let Some(offset) = self.offset {
            items = items.into_iter().skip(offset).collect();
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

/// Time range for history queries
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: chrono::DateTime<chrono::Utc>) -> bool {
        self.since.map_or(true, |s| at >= s) && self.until.map_or(true, |u| at <= u)
    }
}

/// Policy store; updates are versioned append-only
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn create(&self, policy: Policy) -> Result<Policy>;
    async fn get(&self, id: &str) -> Result<Policy>;
    async fn get_by_name(&self, name: &str) -> Result<Policy>;
    async fn update(&self, policy: Policy) -> Result<Policy>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Policy>>;
    async fn count(&self, filter: &ListFilter) -> Result<usize>;
    async fn search(&self, query: &str) -> Result<Vec<Policy>>;
    /// Version history for a policy name, ascending by version
    async fn get_versions(&self, name: &str) -> Result<Vec<Policy>>;
    async fn set_status(&self, id: &str, status: PolicyStatus) -> Result<Policy>;
    async fn health(&self) -> Result<()>;
}

#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn create(&self, workload: Workload) -> Result<Workload>;
    async fn get(&self, id: &str) -> Result<Workload>;
    async fn update(&self, workload: Workload) -> Result<Workload>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Workload>>;
    async fn count(&self, filter: &ListFilter) -> Result<usize>;
    async fn search(&self, query: &str) -> Result<Vec<Workload>>;
    async fn health(&self) -> Result<()>;
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn create(&self, decision: Decision) -> Result<Decision>;
    async fn get(&self, id: &str) -> Result<Decision>;
    async fn update(&self, decision: Decision) -> Result<Decision>;
    async fn update_status(&self, id: &str, status: DecisionStatus) -> Result<Decision>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Decision>>;
    async fn list_for_workload(&self, workload_id: &str, range: TimeRange)
        -> Result<Vec<Decision>>;
    async fn count(&self, filter: &ListFilter) -> Result<usize>;
    async fn health(&self) -> Result<()>;
}

#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn create(&self, evaluation: Evaluation) -> Result<Evaluation>;
    async fn get(&self, id: &str) -> Result<Evaluation>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Evaluation>>;
    async fn list_for_workload(
        &self,
        workload_id: &str,
        range: TimeRange,
    ) -> Result<Vec<Evaluation>>;
    async fn count(&self, filter: &ListFilter) -> Result<usize>;
    async fn health(&self) -> Result<()>;
}

/// Storage manager handing out the four stores
#[async_trait]
pub trait StorageManager: Send + Sync {
    fn policy(&self) -> Arc<dyn PolicyStore>;
    fn workload(&self) -> Arc<dyn WorkloadStore>;
    fn decision(&self) -> Arc<dyn DecisionStore>;
    fn evaluation(&self) -> Arc<dyn EvaluationStore>;
    async fn health(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Run a storage operation with the per-operation deadline and bounded
/// exponential backoff on transient failures. Non-retryable kinds surface
/// immediately; a deadline hit counts as `StorageUnavailable`.
pub async fn with_retries<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = Duration::from_millis(50);
    let mut attempt = 0;
    loop {
        let outcome = match tokio::time::timeout(STORAGE_OP_TIMEOUT, op()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::StorageUnavailable(format!(
                "storage operation exceeded {STORAGE_OP_TIMEOUT:?}"
            ))),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(err @ EngineError::StorageUnavailable(_)) => {
                attempt += 1;
                if attempt >= STORAGE_RETRIES {
                    return Err(err);
                }
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
