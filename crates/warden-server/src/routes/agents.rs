//! Agent catalogue, execution, metrics and health endpoints

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

use warden_core::agents::{catalogue, AgentInfo};
use warden_core::metrics::{AggregatedMetrics, HourlyBucket, PerformanceSummary, MAX_WINDOW_DAYS};
use warden_core::{AgentInput, ExecutionRequest, HealthReport, HealthSnapshot};

use super::parse_agent;
use crate::error::AppError;
use crate::types::{ExecuteQuery, ExecuteRequest, ExecuteResponse, MetricsQuery};
use crate::AppState;

const DEFAULT_METRICS_DAYS: u32 = 7;

/// Build the agents router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_agents))
        .route("/metrics", get(get_metrics))
        .route("/health", get(get_health))
        .route("/hourly-trend", get(get_hourly_trend))
        .route("/performance-summary", get(get_performance_summary))
        .route("/:agent_type/health", get(get_agent_health))
        .route("/:agent_type/execute", post(execute_agent))
        .route(
            "/:agent_type/circuit-breaker/reset",
            post(reset_circuit_breaker),
        )
}

/// The six agent kinds
async fn list_agents() -> Json<Vec<AgentInfo>> {
    Json(catalogue())
}

/// Aggregated metrics over the last `days` days
async fn get_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<AggregatedMetrics>, AppError> {
    let days = query
        .days
        .unwrap_or(DEFAULT_METRICS_DAYS)
        .clamp(1, MAX_WINDOW_DAYS);
    Ok(Json(state.metrics.summary(days)?))
}

/// Per-agent health plus the system summary
async fn get_health(State(state): State<AppState>) -> Result<Json<HealthReport>, AppError> {
    Ok(Json(state.health.report()?))
}

async fn get_agent_health(
    State(state): State<AppState>,
    Path(agent_type): Path<String>,
) -> Result<Json<HealthSnapshot>, AppError> {
    let agent = parse_agent(&agent_type)?;
    Ok(Json(state.health.snapshot(agent)?))
}

async fn get_hourly_trend(
    State(state): State<AppState>,
) -> Result<Json<Vec<HourlyBucket>>, AppError> {
    Ok(Json(state.metrics.hourly_trend()?))
}

async fn get_performance_summary(
    State(state): State<AppState>,
) -> Result<Json<PerformanceSummary>, AppError> {
    Ok(Json(state.metrics.performance_summary()?))
}

/// Run one logical call through breaker, retries and the execution log.
///
/// The cancellation token is tied to this handler's future, so a client
/// that disconnects cancels the execution instead of leaving it running.
async fn execute_agent(
    State(state): State<AppState>,
    Path(agent_type): Path<String>,
    Query(query): Query<ExecuteQuery>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let agent = parse_agent(&agent_type)?;

    let mut request =
        ExecutionRequest::new(agent, AgentInput::new(body.content).with_options(body.options));
    if let Some(session_id) = body.session_id.filter(|s| !s.trim().is_empty()) {
        request = request.with_session(session_id);
    }
    if let Some(max_attempts) = body.max_attempts {
        request = request.with_max_attempts(max_attempts);
    }
    if let Some(timeout_ms) = body.timeout_ms {
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }
    if !query.retry.unwrap_or(true) {
        request = request.without_retry();
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let success = state
        .controller
        .execute(request, &cancel)
        .await
        .map_err(|e| AppError::execution(e, state.clock.now()))?;
    Ok(Json(success.into()))
}

/// Force the breaker to CLOSED and report the resulting health
async fn reset_circuit_breaker(
    State(state): State<AppState>,
    Path(agent_type): Path<String>,
) -> Result<Json<HealthSnapshot>, AppError> {
    let agent = parse_agent(&agent_type)?;
    state.registry.reset(agent);
    Ok(Json(state.health.snapshot(agent)?))
}
