//! API routes

use axum::Router;

use warden_core::AgentType;

use crate::error::AppError;
use crate::AppState;

mod agents;
mod logs;

#[cfg(test)]
mod testing;

/// Build the `/agents` router with all endpoints
pub fn agents_router() -> Router<AppState> {
    Router::new()
        .nest("/logs", logs::router())
        .merge(agents::router())
}

/// Agent type from a path segment, e.g. `risk_detector` or `RISK-DETECTOR`.
fn parse_agent(raw: &str) -> Result<AgentType, AppError> {
    raw.parse::<AgentType>()
        .map_err(|e| AppError::Validation(e.to_string()))
}
