//! Enforcement engine
//!
//! Registry of action executors plus deadline-bound, retry-aware action
//! execution. Executors perform the actual side effects against downstream
//! systems; the in-process [`LogExecutor`] is the default target when no
//! external executor is registered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::actions::{Action, ActionType};
use crate::errors::{EngineError, Result};

/// Outcome reported by an executor for one attempt
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutput {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ActionOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

/// One recorded execution attempt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub attempt: u32,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Full record of executing one action, including retries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub action_type: ActionType,
    pub target: String,
    pub success: bool,
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Performs the side effect for the action types it declares
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Name used in logs and health reporting
    fn name(&self) -> &str;

    /// Whether this executor handles the given action type
    fn can_execute(&self, action_type: ActionType) -> bool;

    /// Perform the side effect. The engine applies the action's timeout
    /// around this call.
    async fn execute(&self, action: &Action) -> Result<ActionOutput>;

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Default executor: logs the action and reports success. Stands in for
/// downstream scheduler/optimizer/notifier integrations.
pub struct LogExecutor;

#[async_trait]
impl ActionExecutor for LogExecutor {
    fn name(&self) -> &str {
        "log"
    }

    fn can_execute(&self, _action_type: ActionType) -> bool {
        true
    }

    async fn execute(&self, action: &Action) -> Result<ActionOutput> {
        info!(
            action_type = %action.action_type,
            target = %action.target,
            "Executing action"
        );
        Ok(ActionOutput::ok(format!(
            "{} dispatched to {}",
            action.action_type, action.target
        )))
    }
}

/// Dispatches actions to registered executors with timeout and retry
pub struct EnforcementEngine {
    executors: Vec<Arc<dyn ActionExecutor>>,
}

impl EnforcementEngine {
    pub fn new(executors: Vec<Arc<dyn ActionExecutor>>) -> Self {
        Self { executors }
    }

    /// Engine with only the logging executor registered
    pub fn with_defaults() -> Self {
        Self::new(vec![Arc::new(LogExecutor)])
    }

    fn executor_for(&self, action_type: ActionType) -> Option<&Arc<dyn ActionExecutor>> {
        self.executors.iter().find(|e| e.can_execute(action_type))
    }

    /// Execute one action: deadline-bound, retried per the action's retry
    /// config. Every attempt is recorded.
    pub async fn execute_action(&self, action: &Action) -> Result<ExecutionRecord> {
        let executor = self.executor_for(action.action_type).ok_or_else(|| {
            EngineError::ExecutorFailure(format!(
                "no executor registered for action type {}",
                action.action_type
            ))
        })?;

        let max_attempts = 1 + action.retry.as_ref().map(|r| r.max_retries).unwrap_or(0);
        let mut interval = action
            .retry
            .as_ref()
            .map(|r| r.interval)
            .unwrap_or(Duration::ZERO);
        let exponential = action
            .retry
            .as_ref()
            .map(|r| r.is_exponential())
            .unwrap_or(false);

        let mut attempts = Vec::new();
        for attempt in 1..=max_attempts {
            let start = std::time::Instant::now();
            let outcome = match timeout(action.timeout, executor.execute(action)).await {
                Ok(Ok(output)) if output.success => Ok(output),
                Ok(Ok(output)) => Err(EngineError::ExecutorFailure(output.message)),
                Ok(Err(err)) => Err(err),
                // Deadline exceeded is treated as the originating kind
                Err(_) => Err(EngineError::ExecutorFailure(format!(
                    "action {} timed out after {:?}",
                    action.action_type, action.timeout
                ))),
            };
            let elapsed = start.elapsed();

            match outcome {
                Ok(output) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        success: true,
                        message: output.message.clone(),
                        duration_ms: elapsed.as_millis() as u64,
                    });
                    debug!(
                        action_type = %action.action_type,
                        executor = executor.name(),
                        attempt = attempt,
                        "Action executed"
                    );
                    return Ok(ExecutionRecord {
                        action_type: action.action_type,
                        target: action.target.clone(),
                        success: true,
                        message: output.message,
                        attempts,
                        timestamp: Utc::now(),
                    });
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        success: false,
                        message: err.to_string(),
                        duration_ms: elapsed.as_millis() as u64,
                    });
                    warn!(
                        action_type = %action.action_type,
                        executor = executor.name(),
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %err,
                        "Action attempt failed"
                    );
                    if attempt == max_attempts {
                        return Err(EngineError::ExecutorFailure(format!(
                            "action {} failed after {} attempts: {}",
                            action.action_type, max_attempts, err
                        )));
                    }
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                        if exponential {
                            interval *= 2;
                        }
                    }
                }
            }
        }

        unreachable!("attempt loop always returns")
    }

    /// OK iff every registered executor reports healthy
    pub async fn health(&self) -> Result<()> {
        for executor in &self.executors {
            executor.health().await.map_err(|err| {
                EngineError::ExecutorFailure(format!(
                    "executor {} unhealthy: {err}",
                    executor.name()
                ))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` attempts, then succeeds
    struct FlakyExecutor {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        fn name(&self) -> &str {
            "flaky"
        }

        fn can_execute(&self, _action_type: ActionType) -> bool {
            true
        }

        async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(EngineError::ExecutorFailure("transient".into()))
            } else {
                Ok(ActionOutput::ok("done"))
            }
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        fn can_execute(&self, _action_type: ActionType) -> bool {
            true
        }

        async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ActionOutput::ok("too late"))
        }
    }

    fn action(timeout: Duration, retry: Option<RetryConfig>) -> Action {
        Action {
            action_type: ActionType::Scale,
            target: "w1".into(),
            parameters: HashMap::new(),
            timeout,
            retry,
        }
    }

    use crate::enforcer::actions::RetryConfig;

    #[tokio::test]
    async fn test_successful_execution_recorded() {
        let engine = EnforcementEngine::with_defaults();
        let record = engine
            .execute_action(&action(Duration::from_secs(5), None))
            .await
            .unwrap();
        assert!(record.success);
        assert_eq!(record.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let engine = EnforcementEngine::new(vec![Arc::new(FlakyExecutor {
            failures: 2,
            calls: AtomicU32::new(0),
        })]);
        let retry = RetryConfig {
            max_retries: 3,
            interval: Duration::from_millis(1),
            backoff: None,
        };
        let record = engine
            .execute_action(&action(Duration::from_secs(5), Some(retry)))
            .await
            .unwrap();
        assert!(record.success);
        assert_eq!(record.attempts.len(), 3);
        assert!(!record.attempts[0].success);
        assert!(!record.attempts[1].success);
        assert!(record.attempts[2].success);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let engine = EnforcementEngine::new(vec![Arc::new(FlakyExecutor {
            failures: 10,
            calls: AtomicU32::new(0),
        })]);
        let retry = RetryConfig {
            max_retries: 2,
            interval: Duration::from_millis(1),
            backoff: Some("exponential".into()),
        };
        let err = engine
            .execute_action(&action(Duration::from_secs(5), Some(retry)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutorFailure(_)));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_executor_failure() {
        let engine = EnforcementEngine::new(vec![Arc::new(SlowExecutor)]);
        let err = engine
            .execute_action(&action(Duration::from_millis(50), None))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutorFailure(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_no_executor_for_type() {
        struct NotifyOnly;
        #[async_trait]
        impl ActionExecutor for NotifyOnly {
            fn name(&self) -> &str {
                "notify-only"
            }
            fn can_execute(&self, action_type: ActionType) -> bool {
                action_type == ActionType::Notify
            }
            async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
                Ok(ActionOutput::ok("sent"))
            }
        }

        let engine = EnforcementEngine::new(vec![Arc::new(NotifyOnly)]);
        let err = engine
            .execute_action(&action(Duration::from_secs(1), None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no executor registered"));
    }

    #[tokio::test]
    async fn test_health_aggregates_executors() {
        struct Broken;
        #[async_trait]
        impl ActionExecutor for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn can_execute(&self, _action_type: ActionType) -> bool {
                true
            }
            async fn execute(&self, _action: &Action) -> Result<ActionOutput> {
                Ok(ActionOutput::ok(""))
            }
            async fn health(&self) -> Result<()> {
                Err(EngineError::ExecutorFailure("connection refused".into()))
            }
        }

        assert!(EnforcementEngine::with_defaults().health().await.is_ok());
        let engine = EnforcementEngine::new(vec![Arc::new(LogExecutor), Arc::new(Broken)]);
        assert!(engine.health().await.is_err());
    }
}
