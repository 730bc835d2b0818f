//! Policy engine server
//!
//! Wires storage, the evaluation pipeline, enforcement and the automation
//! engine together behind the HTTP API. Automation is optional: if it
//! fails to start the engine keeps serving evaluations in degraded mode.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use engine_lib::automation::{AutomationConfig, AutomationEngine, MetricsSource};
use engine_lib::enforcer::{EnforcementEngine, PolicyEnforcer};
use engine_lib::evaluator::{
    ConflictResolver, EvaluationConfig, EvaluationEngine, PolicyEvaluator, RuleEngine,
};
use engine_lib::events::EventBus;
use engine_lib::health::{components, HealthRegistry};
use engine_lib::storage::{memory::MemoryStorageManager, ListFilter, StorageManager};
use engine_lib::validator::ValidationEngine;
use engine_lib::{EngineMetrics, WorkloadStatus};

mod api;
mod config;

/// Cluster-level metric samples derived from the workload store, fed to
/// the automation threshold monitor
struct StorageMetricsSource {
    storage: Arc<dyn StorageManager>,
}

#[async_trait]
impl MetricsSource for StorageMetricsSource {
    async fn sample(&self) -> engine_lib::Result<HashMap<String, f64>> {
        let workloads = self.storage.workload().list(&ListFilter::default()).await?;
        let total = workloads.len() as f64;
        let running = workloads
            .iter()
            .filter(|w| w.status == WorkloadStatus::Running)
            .count() as f64;
        let failed = workloads
            .iter()
            .filter(|w| w.status == WorkloadStatus::Failed)
            .count() as f64;

        let mut cpu_sum = 0.0;
        let mut memory_sum = 0.0;
        let mut with_metrics = 0.0;
        for workload in &workloads {
            if let Some(metrics) = &workload.metrics {
                cpu_sum += metrics.cpu_usage * 100.0;
                memory_sum += metrics.memory_usage * 100.0;
                with_metrics += 1.0;
            }
        }

        let mut samples = HashMap::new();
        samples.insert("workloads.total".into(), total);
        samples.insert("workloads.running".into(), running);
        samples.insert("workloads.failed".into(), failed);
        if with_metrics > 0.0 {
            samples.insert("cpu.usage.percent".into(), cpu_sum / with_metrics);
            samples.insert("memory.usage.percent".into(), memory_sum / with_metrics);
        }
        Ok(samples)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting policy engine");

    let config = config::EngineConfig::load()?;
    info!(port = config.port, "Engine configured");

    // Metrics registry is global; initialise it once up front
    let _ = EngineMetrics::new();

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STORAGE).await;
    health_registry.register(components::EVALUATOR).await;
    health_registry.register(components::ENFORCER).await;
    health_registry.register(components::AUTOMATION).await;
    health_registry.register(components::EVENT_BUS).await;

    let storage: Arc<dyn StorageManager> = Arc::new(MemoryStorageManager::new());
    info!("Storage manager initialized");

    let events = EventBus::new(config.event_bus_capacity);

    let validator = ValidationEngine::new();

    let evaluator = Arc::new(PolicyEvaluator::new(storage.clone(), RuleEngine::new()));
    let evaluation = Arc::new(EvaluationEngine::new(
        evaluator,
        ConflictResolver::new(),
        storage.clone(),
        events.clone(),
        EvaluationConfig {
            max_workers: config.max_eval_workers,
            workload_timeout: config.workload_timeout(),
            ..Default::default()
        },
    ));
    info!("Evaluation engine initialized");

    let enforcement = Arc::new(EnforcementEngine::with_defaults());
    let enforcer = Arc::new(
        PolicyEnforcer::new(enforcement.clone(), storage.clone()).with_events(events.clone()),
    );
    info!("Policy enforcer initialized");

    let metrics_source = Arc::new(StorageMetricsSource {
        storage: storage.clone(),
    });
    let automation = Arc::new(AutomationEngine::new(
        enforcement,
        events.clone(),
        metrics_source,
        AutomationConfig {
            monitor_interval: config.monitor_interval(),
            max_concurrent_executions: config.automation_pool,
            history_limit: 50,
        },
    ));

    // Automation is optional: evaluation keeps serving if it cannot start
    match automation.start().await {
        Ok(()) => info!("Automation engine started"),
        Err(err) => {
            warn!(error = %err, "Automation engine failed to start, running degraded");
            health_registry
                .set_degraded(components::AUTOMATION, format!("failed to start: {err}"))
                .await;
        }
    }

    // Periodic retention sweep over terminal enforcement statuses
    {
        let enforcer = enforcer.clone();
        let horizon = config.retention_horizon();
        let mut ticker = tokio::time::interval(config.sweep_interval());
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                let swept = enforcer.sweep(horizon).await;
                if swept > 0 {
                    info!(swept = swept, "Swept expired enforcement statuses");
                }
            }
        });
    }

    health_registry.set_ready(true).await;

    let state = Arc::new(api::AppState {
        storage: storage.clone(),
        evaluation,
        enforcer,
        automation: automation.clone(),
        health_registry,
        validator,
        started_at: chrono::Utc::now(),
    });

    if let Err(err) = api::serve(config.port, state).await {
        error!(error = %err, "API server failed");
    }

    info!("Shutting down");
    automation
        .stop(std::time::Duration::from_secs(30))
        .await
        .ok();
    storage.close().await.ok();
    info!("Policy engine exited");

    Ok(())
}
