//! HTTP agent gateway

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use super::{AgentGateway, AgentInput, AgentOutput, GatewayError};
use crate::agents::AgentType;

const MAX_ERROR_BODY_CHARS: usize = 500;

/// Calls `POST {base_url}/agents/{type}` on a remote agent service.
pub struct HttpAgentGateway {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InvokeRequest<'a> {
    agent_type: AgentType,
    content: &'a str,
    options: &'a serde_json::Value,
}

impl HttpAgentGateway {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build agent gateway HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn endpoint(&self, agent: AgentType) -> String {
        format!(
            "{}/agents/{}",
            self.base_url,
            agent.as_str().to_ascii_lowercase()
        )
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn invoke(&self, agent: AgentType, input: &AgentInput) -> Result<AgentOutput, GatewayError> {
        let mut request = self.client.post(self.endpoint(agent)).json(&InvokeRequest {
            agent_type: agent,
            content: &input.content,
            options: &input.options,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        response
            .json::<AgentOutput>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}
