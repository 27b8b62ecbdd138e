//! Retry controller
//!
//! Runs one logical agent call: breaker admission, gateway call under a
//! deadline, bounded retries with backoff, and exactly one execution record
//! for every call that was attempted at least once.
//!
//! Breaker rejections before the first attempt and caller cancellation write
//! nothing. Intermediate failed attempts only feed the breaker; the record
//! reflects the final attempt.

mod backoff;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use backoff::RetryPolicy;

use crate::agents::AgentType;
use crate::breaker::BreakerRegistry;
use crate::clock::SharedClock;
use crate::error::ExecutionError;
use crate::gateway::{AgentInput, AgentOutput, GatewayError, SharedGateway};
use crate::storage::{ExecutionLogStore, ExecutionRecord, NewExecution, SharedDatabase};

/// Hard ceiling on caller-supplied attempt counts.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// One logical call as requested by a caller.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub agent: AgentType,
    pub input: AgentInput,
    /// Groups records of one user/batch operation; generated when absent.
    pub session_id: Option<String>,
    /// Overrides the policy's attempt budget.
    pub max_attempts: Option<u32>,
    /// Overrides the gateway deadline.
    pub timeout: Option<Duration>,
    /// `false` forces a single attempt.
    pub retry: bool,
}

impl ExecutionRequest {
    pub fn new(agent: AgentType, input: AgentInput) -> Self {
        Self {
            agent,
            input,
            session_id: None,
            max_attempts: None,
            timeout: None,
            retry: true,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

/// Successful terminal result.
#[derive(Debug, Clone)]
pub struct ExecutionSuccess {
    pub record: ExecutionRecord,
    pub output: AgentOutput,
    pub attempts: u32,
}

struct AttemptFailure {
    error: ExecutionError,
    execution_ms: u64,
    finished_at: DateTime<Utc>,
}

pub struct RetryController {
    registry: Arc<BreakerRegistry>,
    gateway: SharedGateway,
    db: SharedDatabase,
    clock: SharedClock,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl RetryController {
    pub fn new(
        registry: Arc<BreakerRegistry>,
        gateway: SharedGateway,
        db: SharedDatabase,
        clock: SharedClock,
        policy: RetryPolicy,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            db,
            clock,
            policy,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `request`, returning after all internal retries.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSuccess, ExecutionError> {
        let max_attempts = self.attempt_budget(&request)?;
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        if timeout.is_zero() {
            return Err(ExecutionError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let agent = request.agent;
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let input_snapshot = request.input.to_value();

        let mut attempt: u32 = 0;
        let mut last_failure: Option<AttemptFailure> = None;

        loop {
            let permit = match self.registry.acquire(agent) {
                Ok(permit) => permit,
                Err(rejection) if last_failure.is_none() => {
                    tracing::debug!(agent = %agent, state = %rejection.state, "Call rejected by circuit breaker");
                    return Err(rejection.into());
                }
                Err(_) => break,
            };

            attempt += 1;
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(timeout, self.gateway.invoke(agent, &request.input)) => Some(result),
            };
            let execution_ms = started.elapsed().as_millis() as u64;

            let Some(result) = outcome else {
                // Indeterminate: the permit is dropped unreported.
                drop(permit);
                tracing::info!(agent = %agent, attempt, "Agent execution cancelled");
                return Err(ExecutionError::Cancelled);
            };

            let error = match result {
                Ok(Ok(output)) => {
                    permit.record_success();
                    let record = self.write_record(NewExecution::succeeded(
                        session_id,
                        agent,
                        execution_ms,
                        output.token_count,
                        input_snapshot,
                        output.output.clone(),
                        self.clock.now(),
                    ))?;
                    tracing::info!(
                        agent = %agent,
                        attempts = attempt,
                        execution_ms,
                        "Agent execution succeeded"
                    );
                    return Ok(ExecutionSuccess {
                        record,
                        output,
                        attempts: attempt,
                    });
                }
                Ok(Err(gateway_error)) => gateway_failure(agent, gateway_error),
                Err(_elapsed) => ExecutionError::Timeout {
                    agent,
                    timeout_ms: timeout.as_millis() as u64,
                },
            };
            if error.counts_as_failure() {
                permit.record_failure();
            }

            tracing::warn!(
                agent = %agent,
                attempt,
                max_attempts,
                error = %error,
                "Agent attempt failed"
            );
            last_failure = Some(AttemptFailure {
                error,
                execution_ms,
                finished_at: self.clock.now(),
            });

            if attempt >= max_attempts {
                break;
            }
            if !self.registry.is_call_permitted(agent) {
                tracing::warn!(agent = %agent, attempt, "Circuit breaker opened, giving up");
                break;
            }

            let delay = self.policy.delay_for_retry(attempt - 1);
            tracing::debug!(agent = %agent, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(agent = %agent, attempt, "Agent execution cancelled during backoff");
                    return Err(ExecutionError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let Some(failure) = last_failure else {
            return Err(ExecutionError::CircuitOpen {
                agent,
                retry_after: self.registry.snapshot(agent).next_retry_time,
            });
        };

        self.write_record(NewExecution::failed(
            session_id,
            agent,
            failure.execution_ms,
            failure.error.log_message(),
            input_snapshot,
            failure.finished_at,
        ))?;
        Err(failure.error)
    }

    fn attempt_budget(&self, request: &ExecutionRequest) -> Result<u32, ExecutionError> {
        if request.input.content.trim().is_empty() {
            return Err(ExecutionError::Validation(
                "content is required".to_string(),
            ));
        }
        if !request.retry {
            return Ok(1);
        }
        match request.max_attempts {
            Some(0) => Err(ExecutionError::Validation(
                "maxAttempts must be at least 1".to_string(),
            )),
            Some(n) if n > MAX_ATTEMPTS_LIMIT => Err(ExecutionError::Validation(format!(
                "maxAttempts must not exceed {MAX_ATTEMPTS_LIMIT}"
            ))),
            Some(n) => Ok(n),
            None => Ok(self.policy.max_attempts.max(1)),
        }
    }

    fn write_record(&self, new: NewExecution) -> Result<ExecutionRecord, ExecutionError> {
        let db = self.db.lock();
        ExecutionLogStore::new(&db)
            .record(new)
            .map_err(ExecutionError::Storage)
    }
}

fn gateway_failure(agent: AgentType, error: GatewayError) -> ExecutionError {
    ExecutionError::AgentExecution {
        agent,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::breaker::{BreakerConfig, CircuitState};
    use crate::clock::{Clock, ManualClock};
    use crate::gateway::AgentGateway;
    use crate::health::{HealthConfig, HealthMonitor};
    use crate::metrics::{summarize, MetricsConfig};
    use crate::storage::{Database, LogFilter};

    /// Plays back scripted results, each after an optional delay.
    struct ScriptedGateway {
        script: Mutex<VecDeque<(u64, Result<AgentOutput, GatewayError>)>>,
        fallback: Result<AgentOutput, GatewayError>,
        calls: AtomicU32,
    }

    impl ScriptedGateway {
        fn new(script: Vec<(u64, Result<AgentOutput, GatewayError>)>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: Err(GatewayError::Agent("script exhausted".to_string())),
                calls: AtomicU32::new(0),
            }
        }

        fn always(result: Result<AgentOutput, GatewayError>) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: result,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentGateway for ScriptedGateway {
        async fn invoke(
            &self,
            _agent: AgentType,
            _input: &AgentInput,
        ) -> Result<AgentOutput, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            let (delay_ms, result) = next.unwrap_or_else(|| (0, self.fallback.clone()));
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            result
        }
    }

    fn ok(tokens: u64) -> Result<AgentOutput, GatewayError> {
        Ok(AgentOutput {
            output: json!({"requirements": ["REQ-1"]}),
            token_count: tokens,
        })
    }

    fn fail(message: &str) -> Result<AgentOutput, GatewayError> {
        Err(GatewayError::Agent(message.to_string()))
    }

    struct Harness {
        controller: RetryController,
        gateway: Arc<ScriptedGateway>,
        db: SharedDatabase,
        clock: Arc<ManualClock>,
    }

    fn harness(gateway: ScriptedGateway, breaker: BreakerConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap(),
        ));
        let registry = Arc::new(BreakerRegistry::new(breaker, clock.clone()));
        let gateway = Arc::new(gateway);
        let db = Database::in_memory()
            .expect("Failed to create database")
            .into_shared();
        let controller = RetryController::new(
            registry,
            gateway.clone(),
            db.clone(),
            clock.clone(),
            RetryPolicy::default(),
            Duration::from_secs(5),
        );
        Harness {
            controller,
            gateway,
            db,
            clock,
        }
    }

    fn records(db: &SharedDatabase) -> Vec<ExecutionRecord> {
        let db = db.lock();
        ExecutionLogStore::new(&db)
            .list(&LogFilter {
                page_size: 100,
                ..Default::default()
            })
            .expect("list records")
            .records
    }

    fn request(agent: AgentType) -> ExecutionRequest {
        ExecutionRequest::new(agent, AgentInput::new("Users must be able to reset passwords"))
            .with_session("batch-7")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_failures_with_one_record() {
        let h = harness(
            ScriptedGateway::new(vec![
                (100, fail("upstream 502")),
                (100, fail("upstream 502")),
                (30, ok(77)),
            ]),
            BreakerConfig::default(),
        );

        let success = h
            .controller
            .execute(
                request(AgentType::Extractor).with_max_attempts(3),
                &CancellationToken::new(),
            )
            .await
            .expect("execution should succeed");

        assert_eq!(success.attempts, 3);
        assert_eq!(h.gateway.calls(), 3);

        let written = records(&h.db);
        assert_eq!(written.len(), 1);
        assert!(written[0].success);
        assert_eq!(written[0].execution_ms, 30);
        assert_eq!(written[0].token_count, 77);
        assert_eq!(written[0].session_id, "batch-7");
        assert_eq!(written[0], success.record);

        let breaker = h.controller.registry().snapshot(AgentType::Extractor);
        assert_eq!(breaker.state, CircuitState::Closed);
        assert_eq!(breaker.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_write_one_failed_record() {
        let h = harness(
            ScriptedGateway::always(fail("model overloaded")),
            BreakerConfig::default(),
        );

        let err = h
            .controller
            .execute(request(AgentType::Refiner), &CancellationToken::new())
            .await
            .expect_err("execution should fail");

        assert!(matches!(err, ExecutionError::AgentExecution { .. }));
        assert_eq!(h.gateway.calls(), 3);

        let written = records(&h.db);
        assert_eq!(written.len(), 1);
        assert!(!written[0].success);
        assert!(written[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("model overloaded")));
        assert_eq!(
            h.controller
                .registry()
                .snapshot(AgentType::Refiner)
                .failure_count,
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stops_retrying_once_breaker_opens() {
        let h = harness(
            ScriptedGateway::always(fail("boom")),
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );

        let err = h
            .controller
            .execute(
                request(AgentType::Classifier).with_max_attempts(5),
                &CancellationToken::new(),
            )
            .await
            .expect_err("execution should fail");

        assert!(matches!(err, ExecutionError::AgentExecution { .. }));
        assert_eq!(h.gateway.calls(), 2);
        assert_eq!(records(&h.db).len(), 1);
        assert_eq!(
            h.controller.registry().snapshot(AgentType::Classifier).state,
            CircuitState::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opened_during_backoff_returns_last_error() {
        let h = harness(
            ScriptedGateway::always(fail("upstream 503")),
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        let agent = AgentType::Refiner;
        let cancel = CancellationToken::new();

        // The first caller fails once and backs off for at least 150ms; the
        // second caller's failure trips the breaker while it sleeps.
        let (first, second) = tokio::join!(
            h.controller
                .execute(request(agent).with_max_attempts(3), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.controller
                    .execute(request(agent).without_retry(), &cancel)
                    .await
            }
        );

        assert!(matches!(
            first,
            Err(ExecutionError::AgentExecution { ref message, .. }) if message == "upstream 503"
        ));
        assert!(matches!(second, Err(ExecutionError::AgentExecution { .. })));
        assert_eq!(h.gateway.calls(), 2);
        assert_eq!(
            h.controller.registry().snapshot(agent).state,
            CircuitState::Open
        );

        let written = records(&h.db);
        assert_eq!(written.len(), 2);
        assert!(written.iter().all(|r| !r.success));
        assert!(written
            .iter()
            .all(|r| r.error.as_deref() == Some("upstream 503")));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_outage_is_one_error_signature() {
        let h = harness(
            ScriptedGateway::always(fail("upstream 502")),
            BreakerConfig::default(),
        );
        let cancel = CancellationToken::new();

        for agent in AgentType::ALL {
            h.controller
                .execute(request(agent).without_retry(), &cancel)
                .await
                .expect_err("scripted failure");
        }

        let written = records(&h.db);
        assert_eq!(written.len(), 6);
        assert!(written
            .iter()
            .all(|r| r.error.as_deref() == Some("upstream 502")));

        let metrics = summarize(&written, 1, h.clock.now(), &MetricsConfig::default());
        assert_eq!(metrics.top_errors.len(), 1);
        assert_eq!(metrics.top_errors[0].message, "upstream 502");
        assert_eq!(metrics.top_errors[0].count, 6);
        assert_eq!(metrics.top_errors[0].agent_types.len(), 6);

        let monitor = HealthMonitor::new(
            h.controller.registry().clone(),
            h.db.clone(),
            h.clock.clone(),
            HealthConfig::default(),
        );
        let quality = monitor
            .system_summary()
            .expect("Failed to build summary")
            .quality;
        assert_eq!(quality.distinct_errors, 1);
        assert_eq!(quality.error_score, 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn extractor_trip_and_recovery_scenario() {
        let h = harness(
            ScriptedGateway::new(vec![
                (10, fail("e1")),
                (10, fail("e2")),
                (10, fail("e3")),
                (10, fail("e4")),
                (10, fail("e5")),
                (10, ok(1)),
                (10, ok(2)),
            ]),
            BreakerConfig::default(),
        );
        let cancel = CancellationToken::new();
        let agent = AgentType::Extractor;

        for _ in 0..5 {
            let err = h
                .controller
                .execute(request(agent).without_retry(), &cancel)
                .await
                .expect_err("scripted failure");
            assert!(matches!(err, ExecutionError::AgentExecution { .. }));
        }
        assert_eq!(
            h.controller.registry().snapshot(agent).state,
            CircuitState::Open
        );

        // 6th call inside the cooldown never reaches the gateway.
        let err = h
            .controller
            .execute(request(agent), &cancel)
            .await
            .expect_err("breaker open");
        assert!(matches!(err, ExecutionError::CircuitOpen { .. }));
        assert_eq!(h.gateway.calls(), 5);
        assert_eq!(records(&h.db).len(), 5);

        h.clock.advance(chrono::Duration::seconds(30));

        // 7th call is the half-open probe.
        h.controller
            .execute(request(agent), &cancel)
            .await
            .expect("probe succeeds");
        let state = h.controller.registry().snapshot(agent);
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);

        // 8th ordinary call.
        h.controller
            .execute(request(agent), &cancel)
            .await
            .expect("ordinary call succeeds");
        assert_eq!(h.gateway.calls(), 7);
        assert_eq!(records(&h.db).len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_as_failure() {
        let h = harness(
            ScriptedGateway::new(vec![(10_000, ok(1))]),
            BreakerConfig::default(),
        );

        let err = h
            .controller
            .execute(
                request(AgentType::Validator)
                    .without_retry()
                    .with_timeout(Duration::from_millis(500)),
                &CancellationToken::new(),
            )
            .await
            .expect_err("should time out");

        assert!(matches!(
            err,
            ExecutionError::Timeout {
                timeout_ms: 500,
                ..
            }
        ));
        assert_eq!(
            h.controller
                .registry()
                .snapshot(AgentType::Validator)
                .failure_count,
            1
        );
        let written = records(&h.db);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].execution_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_indeterminate() {
        let h = harness(
            ScriptedGateway::new(vec![(1_000, ok(1))]),
            BreakerConfig::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = h
            .controller
            .execute(request(AgentType::Expander), &cancel)
            .await
            .expect_err("should be cancelled");

        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(records(&h.db).is_empty());
        let state = h.controller.registry().snapshot(AgentType::Expander);
        assert_eq!(state.failure_count, 0);
        assert_eq!(state.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_frees_the_probe_slot() {
        let h = harness(
            ScriptedGateway::new(vec![(10, fail("x")), (1_000, ok(1))]),
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let agent = AgentType::RiskDetector;

        h.controller
            .execute(request(agent).without_retry(), &CancellationToken::new())
            .await
            .expect_err("trip");
        h.clock.advance(chrono::Duration::seconds(30));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = h
            .controller
            .execute(request(agent), &cancel)
            .await
            .expect_err("cancelled probe");
        assert!(matches!(err, ExecutionError::Cancelled));

        let state = h.controller.registry().snapshot(agent);
        assert_eq!(state.state, CircuitState::HalfOpen);
        assert!(!state.probe_in_flight);
        assert_eq!(records(&h.db).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_half_open_calls_admit_one_probe() {
        let h = harness(
            ScriptedGateway::new(vec![(10, fail("x")), (500, ok(1))]),
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        );
        let agent = AgentType::Classifier;
        let cancel = CancellationToken::new();

        h.controller
            .execute(request(agent).without_retry(), &cancel)
            .await
            .expect_err("trip");
        h.clock.advance(chrono::Duration::seconds(30));

        let (probe, rival) = tokio::join!(
            h.controller.execute(request(agent), &cancel),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                h.controller.execute(request(agent), &cancel).await
            }
        );

        assert!(probe.is_ok());
        assert!(matches!(rival, Err(ExecutionError::CircuitOpen { .. })));
        assert_eq!(h.gateway.calls(), 2);
        assert_eq!(
            h.controller.registry().snapshot(agent).state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn rejects_invalid_requests_before_the_breaker() {
        let h = harness(ScriptedGateway::always(ok(1)), BreakerConfig::default());
        let cancel = CancellationToken::new();

        let empty = ExecutionRequest::new(AgentType::Extractor, AgentInput::new("   "));
        let err = h
            .controller
            .execute(empty, &cancel)
            .await
            .expect_err("empty content");
        assert!(matches!(err, ExecutionError::Validation(_)));

        let err = h
            .controller
            .execute(request(AgentType::Extractor).with_max_attempts(0), &cancel)
            .await
            .expect_err("zero attempts");
        assert!(matches!(err, ExecutionError::Validation(_)));

        let err = h
            .controller
            .execute(
                request(AgentType::Extractor).with_max_attempts(MAX_ATTEMPTS_LIMIT + 1),
                &cancel,
            )
            .await
            .expect_err("too many attempts");
        assert!(matches!(err, ExecutionError::Validation(_)));

        assert_eq!(h.gateway.calls(), 0);
        assert!(records(&h.db).is_empty());
    }
}
