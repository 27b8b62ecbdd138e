//! Terminal errors of a logical agent call

use chrono::{DateTime, Utc};

use crate::agents::AgentType;

/// The single terminal outcome a caller receives when an execution does not
/// succeed. Breaker bookkeeping and record writing have already happened by
/// the time one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Rejected without an attempt: breaker OPEN or a half-open probe is
    /// already in flight.
    #[error("circuit breaker open for {agent}")]
    CircuitOpen {
        agent: AgentType,
        retry_after: Option<DateTime<Utc>>,
    },

    /// The gateway reported a failure.
    #[error("{agent} execution failed: {message}")]
    AgentExecution { agent: AgentType, message: String },

    /// The gateway call exceeded its deadline.
    #[error("{agent} timed out after {timeout_ms}ms")]
    Timeout { agent: AgentType, timeout_ms: u64 },

    /// Caller-initiated cancellation.
    #[error("execution cancelled")]
    Cancelled,

    /// Malformed request, rejected before touching the breaker.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The execution log could not be written.
    #[error("execution log error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl ExecutionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::AgentExecution { .. } => "AGENT_EXECUTION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether this outcome counts toward breaker failures.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::AgentExecution { .. } | Self::Timeout { .. })
    }

    /// Text stored in the execution log. The agent lives in its own column,
    /// so it is left out here to keep one upstream failure a single error
    /// signature across agents.
    pub fn log_message(&self) -> String {
        match self {
            Self::AgentExecution { message, .. } => message.clone(),
            Self::Timeout { timeout_ms, .. } => format!("timed out after {timeout_ms}ms"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_attempted_failures_count() {
        let agent = AgentType::Extractor;
        assert!(ExecutionError::AgentExecution {
            agent,
            message: "boom".to_string()
        }
        .counts_as_failure());
        assert!(ExecutionError::Timeout {
            agent,
            timeout_ms: 10
        }
        .counts_as_failure());
        assert!(!ExecutionError::CircuitOpen {
            agent,
            retry_after: None
        }
        .counts_as_failure());
        assert!(!ExecutionError::Cancelled.counts_as_failure());
        assert!(!ExecutionError::Validation("x".to_string()).counts_as_failure());
    }

    #[test]
    fn codes_are_distinct_for_open_and_failed() {
        let open = ExecutionError::CircuitOpen {
            agent: AgentType::Refiner,
            retry_after: None,
        };
        let failed = ExecutionError::AgentExecution {
            agent: AgentType::Refiner,
            message: "bad".to_string(),
        };
        assert_ne!(open.code(), failed.code());
    }

    #[test]
    fn log_message_leaves_out_the_agent() {
        let failed = ExecutionError::AgentExecution {
            agent: AgentType::Validator,
            message: "upstream 502".to_string(),
        };
        assert_eq!(failed.log_message(), "upstream 502");

        let timed_out = ExecutionError::Timeout {
            agent: AgentType::Validator,
            timeout_ms: 250,
        };
        assert_eq!(timed_out.log_message(), "timed out after 250ms");
    }
}
