//! Shared fixtures for handler tests

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use warden_core::clock::system_clock;
use warden_core::{
    AgentGateway, AgentInput, AgentOutput, AgentType, Database, GatewayError, WardenConfig,
};

use crate::AppState;

/// Gateway that echoes the input or fails, as toggled by the test.
#[derive(Default)]
pub struct FlakyGateway {
    failing: AtomicBool,
    calls: AtomicU32,
}

impl FlakyGateway {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentGateway for FlakyGateway {
    async fn invoke(&self, agent: AgentType, input: &AgentInput) -> Result<AgentOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Agent("model overloaded".to_string()));
        }
        Ok(AgentOutput {
            output: json!({ "agent": agent.as_str(), "items": [input.content] }),
            token_count: 42,
        })
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<FlakyGateway>,
    _temp_dir: TempDir,
}

pub fn test_app(config: WardenConfig) -> TestApp {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&temp_dir.path().join("warden.db"))
        .expect("Failed to create database")
        .into_shared();
    let gateway = Arc::new(FlakyGateway::default());
    let state = AppState::new(config, db, gateway.clone(), system_clock());
    TestApp {
        state,
        gateway,
        _temp_dir: temp_dir,
    }
}
