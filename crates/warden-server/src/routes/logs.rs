//! Execution log endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;

use warden_core::storage::{ExecutionLogStore, ExecutionRecord, LogFilter, LogPage, MAX_PAGE_SIZE};

use super::parse_agent;
use crate::error::AppError;
use crate::AppState;

const DEFAULT_FAILED_DAYS: u32 = 7;
const DEFAULT_VIEW_LIMIT: u32 = 50;

/// Query params for the paginated log. Empty values mean "no filter".
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    pub agent_type: Option<String>,
    pub success: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FailedQuery {
    pub days: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowQuery {
    pub threshold_ms: Option<u64>,
    pub limit: Option<u32>,
}

/// Build the logs router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_logs))
        .route("/failed", get(list_failed))
        .route("/slow", get(list_slow))
        .route("/:id", get(get_log))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD`. A bare `toDate` covers the
/// whole day.
fn parse_date(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {raw}")))?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    Ok(if end_of_day {
        start + Duration::days(1) - Duration::milliseconds(1)
    } else {
        start
    })
}

fn parse_success(raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(AppError::BadRequest(format!("invalid success filter: {other}"))),
    }
}

impl LogsQuery {
    fn into_filter(self) -> Result<LogFilter, AppError> {
        Ok(LogFilter {
            agent_type: non_empty(self.agent_type)
                .map(|raw| parse_agent(&raw))
                .transpose()?,
            success: non_empty(self.success)
                .map(|raw| parse_success(&raw))
                .transpose()?,
            from: non_empty(self.from_date)
                .map(|raw| parse_date(&raw, false))
                .transpose()?,
            to: non_empty(self.to_date)
                .map(|raw| parse_date(&raw, true))
                .transpose()?,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

/// Paginated execution log, newest first
async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogPage>, AppError> {
    let filter = query.into_filter()?;
    let db = state.db.lock();
    Ok(Json(ExecutionLogStore::new(&db).list(&filter)?))
}

/// Recent failures
async fn list_failed(
    State(state): State<AppState>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, AppError> {
    let days = query.days.unwrap_or(DEFAULT_FAILED_DAYS).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_VIEW_LIMIT).clamp(1, MAX_PAGE_SIZE);
    let since = state.clock.now() - Duration::days(i64::from(days));

    let db = state.db.lock();
    Ok(Json(ExecutionLogStore::new(&db).failed(since, limit)?))
}

/// Executions slower than `thresholdMs` (defaults to the health slow threshold)
async fn list_slow(
    State(state): State<AppState>,
    Query(query): Query<SlowQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, AppError> {
    let threshold_ms = query
        .threshold_ms
        .unwrap_or(state.config.health.slow_latency_ms);
    let limit = query.limit.unwrap_or(DEFAULT_VIEW_LIMIT).clamp(1, MAX_PAGE_SIZE);

    let db = state.db.lock();
    Ok(Json(ExecutionLogStore::new(&db).slow(threshold_ms, limit)?))
}

/// Single execution record
async fn get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, AppError> {
    let db = state.db.lock();
    ExecutionLogStore::new(&db)
        .get(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("execution {id} not found")))
}
