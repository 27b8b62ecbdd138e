//! Unified error handling for the API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use warden_core::ExecutionError;

/// Non-standard "client closed request".
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// API error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
}

/// Application error types
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Validation(String),
    /// Terminal outcome of an agent execution. `code` comes from
    /// [`ExecutionError::code`].
    Execution {
        status: StatusCode,
        code: &'static str,
        message: String,
        retry_after: Option<DateTime<Utc>>,
        retry_after_ms: Option<i64>,
    },
    Internal(String),
}

impl AppError {
    /// Map a terminal execution error, computing `retryAfterMs` against `now`.
    pub fn execution(err: ExecutionError, now: DateTime<Utc>) -> Self {
        let err = match err {
            ExecutionError::Validation(msg) => return AppError::Validation(msg),
            ExecutionError::Storage(e) => return AppError::from(e),
            other => other,
        };
        let (status, retry_after) = match &err {
            ExecutionError::CircuitOpen { retry_after, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, *retry_after)
            }
            ExecutionError::AgentExecution { .. } => (StatusCode::BAD_GATEWAY, None),
            ExecutionError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, None),
            ExecutionError::Cancelled => (
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT),
                None,
            ),
            ExecutionError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ExecutionError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        AppError::Execution {
            status,
            code: err.code(),
            message: err.to_string(),
            retry_after,
            retry_after_ms: retry_after.map(|at| (at - now).num_milliseconds().max(0)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Execution { status, .. } => *status,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Execution { code, .. } => *code,
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, retry_after, retry_after_ms) = match self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Validation(msg)
            | AppError::Internal(msg) => (msg, None, None),
            AppError::Execution {
                message,
                retry_after,
                retry_after_ms,
                ..
            } => (message, retry_after, retry_after_ms),
        };

        (
            status,
            Json(ApiError {
                error: message,
                code: code.to_string(),
                retry_after_ms,
                retry_after,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log full error chain for debugging, return sanitized message to client
        tracing::error!("Internal error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::Value;

    use super::*;
    use warden_core::AgentType;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn circuit_open_carries_retry_hint() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        let err = AppError::execution(
            ExecutionError::CircuitOpen {
                agent: AgentType::Expander,
                retry_after: Some(now + Duration::seconds(30)),
            },
            now,
        );

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["code"], "CIRCUIT_OPEN");
        assert_eq!(body["retryAfterMs"], 30_000);
    }

    #[tokio::test]
    async fn plain_errors_omit_retry_fields() {
        let response = AppError::NotFound("missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "missing");
        assert!(body.get("retryAfterMs").is_none());
    }

    #[test]
    fn execution_errors_map_to_statuses() {
        let now = Utc::now();
        let agent = AgentType::Classifier;
        let cases = [
            (
                ExecutionError::AgentExecution {
                    agent,
                    message: "bad output".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ExecutionError::Timeout {
                    agent,
                    timeout_ms: 100,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ExecutionError::Validation("content is required".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ExecutionError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let code = err.code();
            let mapped = AppError::execution(err, now);
            assert_eq!(mapped.status(), expected);
            if expected != StatusCode::INTERNAL_SERVER_ERROR {
                assert_eq!(mapped.code(), code);
            }
        }

        let cancelled = AppError::execution(ExecutionError::Cancelled, now);
        assert_eq!(cancelled.status().as_u16(), 499);
        assert_eq!(cancelled.code(), ExecutionError::Cancelled.code());
    }
}
