//! Request and response types for the API

use serde::{Deserialize, Serialize};
use serde_json::Value;

use warden_core::{AgentType, ExecutionSuccess};

// ============================================================================
// Execution Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    /// Text handed to the agent
    #[serde(default)]
    pub content: String,
    /// Agent-specific options, passed through untouched
    #[serde(default)]
    pub options: Value,
    /// Groups related executions; generated when absent
    pub session_id: Option<String>,
    /// Overrides the configured attempt budget
    pub max_attempts: Option<u32>,
    /// Overrides the configured gateway deadline
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQuery {
    /// `false` forces a single attempt
    pub retry: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub session_id: String,
    pub agent_type: AgentType,
    pub output: Value,
    pub execution_ms: u64,
    pub token_count: u64,
    pub attempts: u32,
}

impl From<ExecutionSuccess> for ExecuteResponse {
    fn from(success: ExecutionSuccess) -> Self {
        let record = success.record;
        Self {
            execution_id: record.id,
            session_id: record.session_id,
            agent_type: record.agent_type,
            output: success.output.output,
            execution_ms: record.execution_ms,
            token_count: record.token_count,
            attempts: success.attempts,
        }
    }
}

// ============================================================================
// Metrics Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// Window in days (default 7)
    pub days: Option<u32>,
}
