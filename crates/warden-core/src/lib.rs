//! Warden core
//!
//! Resilient execution and health tracking for a fixed set of AI agents:
//! append-only execution log, per-agent circuit breakers, bounded retries,
//! and metrics/health derived from the log.

pub mod agents;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod paths;
pub mod retry;
pub mod storage;

pub use agents::{AgentInfo, AgentType};
pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreakerState, CircuitState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::WardenConfig;
pub use error::ExecutionError;
pub use gateway::{AgentGateway, AgentInput, AgentOutput, GatewayError, SharedGateway};
pub use health::{HealthMonitor, HealthReport, HealthSnapshot, HealthStatus};
pub use metrics::MetricsAggregator;
pub use retry::{ExecutionRequest, ExecutionSuccess, RetryController, RetryPolicy};
pub use storage::{Database, ExecutionLogStore, ExecutionRecord, SharedDatabase};
