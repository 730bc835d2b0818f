//! HTTP API
//!
//! Health and metrics endpoints in the shape Kubernetes probes expect,
//! plus the `/api/v1` JSON surface over policies, workloads, evaluations
//! and automation rules. Handlers are thin: they translate requests into
//! engine operations and engine errors into status codes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tracing::info;

use engine_lib::automation::{
    ActionTemplate, AutomationEngine, AutomationRule, Condition, Trigger,
};
use engine_lib::enforcer::PolicyEnforcer;
use engine_lib::evaluator::EvaluationEngine;
use engine_lib::storage::{ListFilter, StorageManager, TimeRange};
use engine_lib::validator::ValidationEngine;
use engine_lib::{
    ComponentStatus, EngineError, HealthRegistry, Policy, PolicyKind, PolicyMetadata, PolicySpec,
    PolicyStatus, Requirements, Workload, WorkloadKind, WorkloadMetrics, WorkloadStatus,
};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageManager>,
    pub evaluation: Arc<EvaluationEngine>,
    pub enforcer: Arc<PolicyEnforcer>,
    pub automation: Arc<AutomationEngine>,
    pub health_registry: HealthRegistry,
    pub validator: ValidationEngine,
    pub started_at: chrono::DateTime<Utc>,
}

/// Engine errors rendered as JSON problem responses
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidInput(_) | EngineError::InvalidExpression(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::UnsupportedDecision(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) | EngineError::Cancelled => StatusCode::CONFLICT,
            EngineError::PolicyInactive(_)
            | EngineError::PolicyNotApplicable { .. }
            | EngineError::ExpressionRuntime(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::ExecutorFailure(_) => StatusCode::BAD_GATEWAY,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let v1 = Router::new()
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/search", get(search_policies))
        .route(
            "/policies/:id",
            get(get_policy).put(update_policy).delete(delete_policy),
        )
        .route("/policies/:id/enable", post(enable_policy))
        .route("/policies/:id/disable", post(disable_policy))
        .route("/policies/:id/versions", get(policy_versions))
        .route("/workloads", get(list_workloads).post(create_workload))
        .route("/workloads/search", get(search_workloads))
        .route(
            "/workloads/:id",
            get(get_workload).put(update_workload).delete(delete_workload),
        )
        .route("/workloads/:id/metrics", get(workload_metrics))
        .route("/workloads/:id/history", get(workload_history))
        .route("/evaluations", get(list_evaluations).post(evaluate_workload))
        .route("/evaluations/bulk", post(bulk_evaluate))
        .route("/evaluations/history", get(evaluation_history))
        .route("/evaluations/statistics", get(evaluation_statistics))
        .route("/evaluations/health", get(evaluation_health))
        .route("/evaluations/:id", get(get_evaluation))
        .route("/decisions/:id/enforcement", get(enforcement_status))
        .route("/decisions/:id/enforcement/cancel", post(cancel_enforcement))
        .route(
            "/automation/rules",
            get(list_automation_rules).post(create_automation_rule),
        )
        .route(
            "/automation/rules/:id",
            get(get_automation_rule)
                .put(update_automation_rule)
                .delete(delete_automation_rule),
        )
        .route("/automation/rules/:id/enable", post(enable_automation_rule))
        .route("/automation/rules/:id/disable", post(disable_automation_rule))
        .route("/automation/rules/:id/execute", post(execute_automation_rule))
        .route("/automation/rules/:id/history", get(automation_rule_history))
        .route("/automation/statistics", get(automation_statistics))
        .route("/automation/health", get(automation_health));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
        .route("/metrics", get(metrics))
        .route("/status", get(system_status))
        .route("/info", get(info_handler))
        .nest("/api/v1", v1)
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

// ---------------------------------------------------------------- health

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness: the process is up and serving
async fn livez() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"alive": true})))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn system_status(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let health = state.health_registry.health().await;
    let stats = state.evaluation.statistics().await?;
    let automation = state.automation.statistics();
    let enforcement = state.enforcer.counts().await;
    Ok(Json(serde_json::json!({
        "status": health.status,
        "components": health.components,
        "evaluation": stats,
        "automation": automation,
        "enforcement": enforcement,
        "uptimeSeconds": (Utc::now() - state.started_at).num_seconds(),
    })))
}

async fn info_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "policy-engine",
        "version": ENGINE_VERSION,
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

// --------------------------------------------------------------- filters

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    namespace: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl ListParams {
    fn into_filter(self) -> ListFilter {
        ListFilter {
            namespace: self.namespace,
            labels: HashMap::new(),
            status: self.status,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
}

// -------------------------------------------------------------- policies

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyRequest {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    kind: PolicyKind,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
    spec: PolicySpec,
    #[serde(default)]
    status: Option<PolicyStatus>,
}

impl PolicyRequest {
    fn into_policy(self, id: String) -> Policy {
        let mut metadata = PolicyMetadata::new(self.name);
        metadata.namespace = self.namespace;
        metadata.labels = self.labels;
        metadata.annotations = self.annotations;
        Policy {
            id,
            kind: self.kind,
            metadata,
            spec: self.spec,
            status: self.status.unwrap_or(PolicyStatus::Active),
        }
    }
}

async fn list_policies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Policy>>> {
    Ok(Json(
        state.storage.policy().list(&params.into_filter()).await?,
    ))
}

async fn create_policy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PolicyRequest>,
) -> ApiResult<impl IntoResponse> {
    let policy = request.into_policy(uuid::Uuid::new_v4().to_string());
    state.validator.validate_policy(&policy)?;
    let created = state.storage.policy().create(policy).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Policy>> {
    Ok(Json(state.storage.policy().get(&id).await?))
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PolicyRequest>,
) -> ApiResult<Json<Policy>> {
    let policy = request.into_policy(id);
    state.validator.validate_policy(&policy)?;
    Ok(Json(state.storage.policy().update(policy).await?))
}

async fn delete_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.storage.policy().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Policy>> {
    Ok(Json(
        state
            .storage
            .policy()
            .set_status(&id, PolicyStatus::Active)
            .await?,
    ))
}

async fn disable_policy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Policy>> {
    Ok(Json(
        state
            .storage
            .policy()
            .set_status(&id, PolicyStatus::Inactive)
            .await?,
    ))
}

async fn search_policies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Policy>>> {
    Ok(Json(state.storage.policy().search(&params.q).await?))
}

async fn policy_versions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Policy>>> {
    let policy = state.storage.policy().get(&id).await?;
    Ok(Json(
        state
            .storage
            .policy()
            .get_versions(&policy.metadata.name)
            .await?,
    ))
}

// ------------------------------------------------------------- workloads

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkloadRequest {
    name: String,
    namespace: String,
    kind: WorkloadKind,
    #[serde(default)]
    status: Option<WorkloadStatus>,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    requirements: Requirements,
    #[serde(default)]
    metrics: Option<WorkloadMetrics>,
}

impl WorkloadRequest {
    fn into_workload(self, id: String) -> Workload {
        let now = Utc::now();
        Workload {
            id,
            name: self.name,
            namespace: self.namespace,
            kind: self.kind,
            status: self.status.unwrap_or(WorkloadStatus::Running),
            labels: self.labels,
            requirements: self.requirements,
            metrics: self.metrics,
            created_at: now,
            updated_at: now,
        }
    }
}

async fn list_workloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<Workload>>> {
    Ok(Json(
        state.storage.workload().list(&params.into_filter()).await?,
    ))
}

async fn create_workload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkloadRequest>,
) -> ApiResult<impl IntoResponse> {
    let workload = request.into_workload(uuid::Uuid::new_v4().to_string());
    let created = state.storage.workload().create(workload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Workload>> {
    Ok(Json(state.storage.workload().get(&id).await?))
}

async fn update_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<WorkloadRequest>,
) -> ApiResult<Json<Workload>> {
    let existing = state.storage.workload().get(&id).await?;
    let mut workload = request.into_workload(id);
    workload.created_at = existing.created_at;
    Ok(Json(state.storage.workload().update(workload).await?))
}

async fn delete_workload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.storage.workload().delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_workloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<Workload>>> {
    Ok(Json(state.storage.workload().search(&params.q).await?))
}

async fn workload_metrics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let workload = state.storage.workload().get(&id).await?;
    Ok(Json(serde_json::json!({
        "workloadId": workload.id,
        "metrics": workload.metrics.unwrap_or_default(),
        "requirements": workload.requirements,
    })))
}

async fn workload_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    // 404 for unknown workloads rather than an empty history
    state.storage.workload().get(&id).await?;
    let decisions = state
        .storage
        .decision()
        .list_for_workload(&id, TimeRange::default())
        .await?;
    let evaluations = state
        .storage
        .evaluation()
        .list_for_workload(&id, TimeRange::default())
        .await?;
    Ok(Json(serde_json::json!({
        "workloadId": id,
        "decisions": decisions,
        "evaluations": evaluations,
    })))
}

// ----------------------------------------------------------- evaluations

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest {
    workload_id: String,
    #[serde(default)]
    enforce: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkEvaluateRequest {
    workload_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryParams {
    workload_id: String,
}

async fn list_evaluations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<engine_lib::Evaluation>>> {
    Ok(Json(
        state
            .storage
            .evaluation()
            .list(&params.into_filter())
            .await?,
    ))
}

async fn evaluate_workload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluateRequest>,
) -> ApiResult<impl IntoResponse> {
    let decision = state.evaluation.evaluate_one(&request.workload_id).await?;
    if request.enforce {
        state.enforcer.enforce(decision.clone()).await?;
    }
    Ok((StatusCode::CREATED, Json(decision)))
}

async fn bulk_evaluate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkEvaluateRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.workload_ids.is_empty() {
        return Err(EngineError::InvalidInput("workloadIds is empty".into()).into());
    }
    let bulk = state.evaluation.evaluate_many(&request.workload_ids).await;
    Ok(Json(bulk))
}

async fn evaluation_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<engine_lib::Evaluation>>> {
    Ok(Json(
        state
            .evaluation
            .history(&params.workload_id, TimeRange::default())
            .await?,
    ))
}

async fn evaluation_statistics(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<engine_lib::evaluator::EvaluationStatistics>> {
    Ok(Json(state.evaluation.statistics().await?))
}

async fn evaluation_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.evaluation.health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "healthy"}))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unhealthy", "error": err.to_string()})),
        ),
    }
}

async fn get_evaluation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<engine_lib::Evaluation>> {
    Ok(Json(state.storage.evaluation().get(&id).await?))
}

// ----------------------------------------------------------- enforcement

async fn enforcement_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<engine_lib::enforcer::EnforcementStatus>> {
    Ok(Json(state.enforcer.get_status(&id).await?))
}

async fn cancel_enforcement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<engine_lib::enforcer::EnforcementStatus>> {
    state.enforcer.cancel(&id).await?;
    Ok(Json(state.enforcer.get_status(&id).await?))
}

// ------------------------------------------------------------ automation

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutomationRuleRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    priority: i32,
    triggers: Vec<Trigger>,
    #[serde(default)]
    conditions: Vec<Condition>,
    actions: Vec<ActionTemplate>,
}

fn default_enabled() -> bool {
    true
}

impl AutomationRuleRequest {
    fn into_rule(self, id: String) -> AutomationRule {
        let now = Utc::now();
        AutomationRule {
            id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            priority: self.priority,
            triggers: self.triggers,
            conditions: self.conditions,
            actions: self.actions,
            created_at: now,
            updated_at: now,
        }
    }
}

async fn list_automation_rules(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<AutomationRule>> {
    let rules: Vec<AutomationRule> = state
        .automation
        .get_rules()
        .iter()
        .map(|rule| (**rule).clone())
        .collect();
    Json(rules)
}

async fn create_automation_rule(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutomationRuleRequest>,
) -> ApiResult<impl IntoResponse> {
    let rule = request.into_rule(uuid::Uuid::new_v4().to_string());
    state.validator.validate_automation_rule(&rule)?;
    state.automation.register_rule(rule.clone())?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AutomationRule>> {
    Ok(Json((*state.automation.get_rule(&id)?).clone()))
}

async fn update_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AutomationRuleRequest>,
) -> ApiResult<Json<AutomationRule>> {
    let existing = state.automation.get_rule(&id)?;
    let mut rule = request.into_rule(id);
    rule.created_at = existing.created_at;
    state.validator.validate_automation_rule(&rule)?;
    state.automation.update_rule(rule.clone())?;
    Ok(Json(rule))
}

async fn delete_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.automation.unregister_rule(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn enable_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AutomationRule>> {
    state.automation.set_enabled(&id, true)?;
    Ok(Json((*state.automation.get_rule(&id)?).clone()))
}

async fn disable_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<AutomationRule>> {
    state.automation.set_enabled(&id, false)?;
    Ok(Json((*state.automation.get_rule(&id)?).clone()))
}

async fn execute_automation_rule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<HashMap<String, serde_json::Value>>>,
) -> ApiResult<Json<engine_lib::automation::ExecutionResult>> {
    let context = body.map(|Json(context)| context).unwrap_or_default();
    Ok(Json(state.automation.trigger_rule(&id, context).await?))
}

async fn automation_rule_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = state.automation.rule_status(&id)?;
    let history = state.automation.rule_history(&id)?;
    Ok(Json(serde_json::json!({
        "status": status,
        "executions": history,
    })))
}

async fn automation_statistics(
    State(state): State<Arc<AppState>>,
) -> Json<engine_lib::automation::AutomationStatistics> {
    Json(state.automation.statistics())
}

async fn automation_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.automation.health().await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"status": "healthy"}))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unhealthy", "error": err.to_string()})),
        ),
    }
}
