//! Agent gateway boundary
//!
//! The gateway does the agent's real work (LLM call, rule engine, ...). This
//! crate only relies on its contract: `invoke(agent, input) -> output | error`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentType;

mod http;

pub use http::HttpAgentGateway;

/// Request payload handed to an agent. Opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    pub content: String,
    #[serde(default)]
    pub options: Value,
}

impl AgentInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            options: Value::Null,
        }
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Snapshot stored in the execution log.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub output: Value,
    #[serde(default)]
    pub token_count: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("agent gateway is not configured")]
    NotConfigured,
    #[error("gateway returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Agent(String),
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    async fn invoke(&self, agent: AgentType, input: &AgentInput) -> Result<AgentOutput, GatewayError>;
}

pub type SharedGateway = Arc<dyn AgentGateway>;

/// Where the gateway lives and how long a single call may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the agent service. `None` disables execution.
    pub base_url: Option<String>,
    /// Deadline for one gateway call.
    pub timeout_ms: u64,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 60_000,
            api_key: None,
        }
    }
}

/// Stand-in used when no agent service is configured. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGateway;

#[async_trait]
impl AgentGateway for UnconfiguredGateway {
    async fn invoke(&self, _agent: AgentType, _input: &AgentInput) -> Result<AgentOutput, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}

/// Build the gateway described by `config`.
pub fn build_gateway(config: &GatewayConfig) -> Result<SharedGateway> {
    match config.base_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => {
            let gateway = HttpAgentGateway::new(url, config.api_key.clone())?;
            tracing::info!(base_url = %url, "Using HTTP agent gateway");
            Ok(Arc::new(gateway))
        }
        _ => {
            tracing::warn!("No agent gateway configured; executions will fail until one is set");
            Ok(Arc::new(UnconfiguredGateway))
        }
    }
}
