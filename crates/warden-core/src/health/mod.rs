//! Agent health classification
//!
//! Combines each agent's breaker state with its recent execution history
//! into HEALTHY / DEGRADED / UNHEALTHY, and folds the whole fleet into a
//! quality score and letter grade.
//!
//! Agents with no executions in the lookback window are judged on breaker
//! state alone; their success rate reads as a neutral 100 with
//! `sampleCount = 0`.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentType;
use crate::breaker::{BreakerRegistry, CircuitBreakerState, CircuitState};
use crate::clock::{window_start, SharedClock};
use crate::metrics::error_signature;
use crate::storage::{ExecutionLogStore, ExecutionRecord, SharedDatabase};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub success_rate: f64,
    pub latency: f64,
    pub errors: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            success_rate: 0.5,
            latency: 0.3,
            errors: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.success_rate + self.latency + self.errors
    }
}

/// Minimum quality score for each grade; anything below `d` is F.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeThresholds {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            a: 90.0,
            b: 80.0,
            c: 70.0,
            d: 60.0,
        }
    }
}

impl GradeThresholds {
    pub fn grade(&self, score: f64) -> Grade {
        if score >= self.a {
            Grade::A
        } else if score >= self.b {
            Grade::B
        } else if score >= self.c {
            Grade::C
        } else if score >= self.d {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn is_descending(&self) -> bool {
        self.a >= self.b && self.b >= self.c && self.c >= self.d
    }
}

/// Longest accepted lookback window (one year).
pub const MAX_LOOKBACK_HOURS: u32 = 8_760;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Rolling window the rates and latencies are computed over.
    pub lookback_hours: u32,
    /// Success rate (percent) below which an agent is UNHEALTHY.
    pub unhealthy_success_rate: f64,
    /// Success rate (percent) below which an agent is DEGRADED.
    pub degraded_success_rate: f64,
    /// Average latency above which an agent is DEGRADED.
    pub slow_latency_ms: u64,
    /// Average latency that still earns a full latency score.
    pub target_latency_ms: u64,
    pub weights: ScoreWeights,
    pub grades: GradeThresholds,
    /// Points taken off the error score per distinct error signature.
    pub error_penalty: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            unhealthy_success_rate: 50.0,
            degraded_success_rate: 80.0,
            slow_latency_ms: 10_000,
            target_latency_ms: 2_000,
            weights: ScoreWeights::default(),
            grades: GradeThresholds::default(),
            error_penalty: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub agent_type: AgentType,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub sample_count: u64,
    pub circuit_breaker: CircuitBreakerState,
    pub last_execution_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
    pub score: f64,
    pub grade: Grade,
    pub success_rate_score: f64,
    pub latency_score: f64,
    pub error_score: f64,
    pub distinct_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub open_circuits: usize,
    pub total_executions: u64,
    pub quality: QualityScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub agents: Vec<HealthSnapshot>,
    pub summary: SystemHealthSummary,
}

/// Rolling window statistics for one agent (or the whole fleet).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub samples: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

impl WindowStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let (samples, successes, total_ms) =
            records
                .into_iter()
                .fold((0u64, 0u64, 0u128), |(n, ok, ms), r| {
                    (n + 1, ok + u64::from(r.success), ms + u128::from(r.execution_ms))
                });

        if samples == 0 {
            return Self {
                samples: 0,
                success_rate: 100.0,
                avg_latency_ms: 0.0,
            };
        }

        Self {
            samples,
            success_rate: round2(successes as f64 * 100.0 / samples as f64),
            avg_latency_ms: round2(total_ms as f64 / samples as f64),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Worst condition wins. Rates and latency are ignored without samples.
pub fn classify(breaker: CircuitState, stats: &WindowStats, config: &HealthConfig) -> HealthStatus {
    let sampled = stats.samples > 0;

    if breaker == CircuitState::Open
        || (sampled && stats.success_rate < config.unhealthy_success_rate)
    {
        return HealthStatus::Unhealthy;
    }

    if breaker == CircuitState::HalfOpen
        || (sampled && stats.success_rate < config.degraded_success_rate)
        || (sampled && stats.avg_latency_ms > config.slow_latency_ms as f64)
    {
        return HealthStatus::Degraded;
    }

    HealthStatus::Healthy
}

/// Full marks at or under the target latency, falling off as
/// `target / avg` above it.
pub fn latency_score(avg_latency_ms: f64, target_latency_ms: u64) -> f64 {
    if avg_latency_ms <= target_latency_ms as f64 || avg_latency_ms <= 0.0 {
        return 100.0;
    }
    round2((target_latency_ms as f64 / avg_latency_ms * 100.0).clamp(0.0, 100.0))
}

/// Weighted blend of success rate, latency and distinct error count.
pub fn quality_score(stats: &WindowStats, distinct_errors: usize, config: &HealthConfig) -> QualityScore {
    let success_rate_score = stats.success_rate.clamp(0.0, 100.0);
    let latency_score = latency_score(stats.avg_latency_ms, config.target_latency_ms);
    let error_score = (100.0 - config.error_penalty * distinct_errors as f64).clamp(0.0, 100.0);

    let weights = &config.weights;
    let score = round2(
        weights.success_rate * success_rate_score
            + weights.latency * latency_score
            + weights.errors * error_score,
    );

    QualityScore {
        score,
        grade: config.grades.grade(score),
        success_rate_score,
        latency_score,
        error_score,
        distinct_errors,
    }
}

pub struct HealthMonitor {
    registry: Arc<BreakerRegistry>,
    db: SharedDatabase,
    clock: SharedClock,
    config: HealthConfig,
    signature_len: usize,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BreakerRegistry>,
        db: SharedDatabase,
        clock: SharedClock,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            db,
            clock,
            config,
            signature_len: 100,
        }
    }

    /// Prefix length used when counting distinct errors.
    pub fn with_signature_len(mut self, len: usize) -> Self {
        self.signature_len = len;
        self
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn window(&self) -> Result<Vec<ExecutionRecord>> {
        let cutoff = window_start(
            self.clock.now(),
            Duration::hours(i64::from(self.config.lookback_hours)),
        );
        let db = self.db.lock();
        ExecutionLogStore::new(&db).since(cutoff)
    }

    fn build_snapshot(
        &self,
        agent: AgentType,
        window: &[ExecutionRecord],
    ) -> Result<HealthSnapshot> {
        let stats = WindowStats::from_records(window.iter().filter(|r| r.agent_type == agent));
        let last_execution_at = {
            let db = self.db.lock();
            ExecutionLogStore::new(&db).last_execution_at(agent)?
        };
        let circuit_breaker = self.registry.snapshot(agent);

        Ok(HealthSnapshot {
            agent_type: agent,
            status: classify(circuit_breaker.state, &stats, &self.config),
            success_rate: stats.success_rate,
            avg_latency_ms: stats.avg_latency_ms,
            sample_count: stats.samples,
            circuit_breaker,
            last_execution_at,
        })
    }

    pub fn snapshot(&self, agent: AgentType) -> Result<HealthSnapshot> {
        let window = self.window()?;
        self.build_snapshot(agent, &window)
    }

    pub fn snapshots(&self) -> Result<Vec<HealthSnapshot>> {
        let window = self.window()?;
        AgentType::ALL
            .iter()
            .map(|agent| self.build_snapshot(*agent, &window))
            .collect()
    }

    pub fn system_summary(&self) -> Result<SystemHealthSummary> {
        Ok(self.report()?.summary)
    }

    /// Per-agent snapshots and the fleet summary from one read of the log.
    pub fn report(&self) -> Result<HealthReport> {
        let window = self.window()?;
        let agents = AgentType::ALL
            .iter()
            .map(|agent| self.build_snapshot(*agent, &window))
            .collect::<Result<Vec<_>>>()?;

        let count = |status: HealthStatus| agents.iter().filter(|s| s.status == status).count();
        let distinct_errors = window
            .iter()
            .filter(|r| !r.success)
            .map(|r| error_signature(r.error.as_deref().unwrap_or_default(), self.signature_len))
            .collect::<HashSet<_>>()
            .len();
        let fleet = WindowStats::from_records(&window);

        let summary = SystemHealthSummary {
            healthy: count(HealthStatus::Healthy),
            degraded: count(HealthStatus::Degraded),
            unhealthy: count(HealthStatus::Unhealthy),
            open_circuits: self.registry.open_count(),
            total_executions: fleet.samples,
            quality: quality_score(&fleet, distinct_errors, &self.config),
        };

        Ok(HealthReport { agents, summary })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::{Database, NewExecution};

    fn stats(samples: u64, success_rate: f64, avg_latency_ms: f64) -> WindowStats {
        WindowStats {
            samples,
            success_rate,
            avg_latency_ms,
        }
    }

    #[test]
    fn classification_thresholds() {
        let config = HealthConfig::default();
        let closed = CircuitState::Closed;

        assert_eq!(classify(closed, &stats(10, 95.0, 300.0), &config), HealthStatus::Healthy);
        assert_eq!(classify(closed, &stats(10, 80.0, 300.0), &config), HealthStatus::Healthy);
        assert_eq!(classify(closed, &stats(10, 79.9, 300.0), &config), HealthStatus::Degraded);
        assert_eq!(classify(closed, &stats(10, 50.0, 300.0), &config), HealthStatus::Degraded);
        assert_eq!(classify(closed, &stats(10, 49.9, 300.0), &config), HealthStatus::Unhealthy);
        assert_eq!(
            classify(closed, &stats(10, 100.0, 12_000.0), &config),
            HealthStatus::Degraded
        );
    }

    #[test]
    fn breaker_state_dominates() {
        let config = HealthConfig::default();
        let perfect = stats(10, 100.0, 100.0);
        assert_eq!(classify(CircuitState::Open, &perfect, &config), HealthStatus::Unhealthy);
        assert_eq!(classify(CircuitState::HalfOpen, &perfect, &config), HealthStatus::Degraded);
        assert_eq!(
            classify(CircuitState::HalfOpen, &stats(10, 10.0, 100.0), &config),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn no_samples_is_neutral() {
        let config = HealthConfig::default();
        let empty = WindowStats::from_records(std::iter::empty());
        assert_eq!(empty.samples, 0);
        assert_eq!(empty.success_rate, 100.0);
        assert_eq!(classify(CircuitState::Closed, &empty, &config), HealthStatus::Healthy);
    }

    #[test]
    fn grades_follow_thresholds() {
        let grades = GradeThresholds::default();
        assert_eq!(grades.grade(90.0), Grade::A);
        assert_eq!(grades.grade(89.99), Grade::B);
        assert_eq!(grades.grade(70.0), Grade::C);
        assert_eq!(grades.grade(60.0), Grade::D);
        assert_eq!(grades.grade(59.0), Grade::F);
    }

    #[test]
    fn quality_score_blends_weights() {
        let config = HealthConfig::default();
        // 0.5 * 80 + 0.3 * 50 + 0.2 * 70
        let quality = quality_score(&stats(20, 80.0, 4_000.0), 3, &config);
        assert_eq!(quality.latency_score, 50.0);
        assert_eq!(quality.error_score, 70.0);
        assert_eq!(quality.score, 69.0);
        assert_eq!(quality.grade, Grade::D);

        let custom = HealthConfig {
            weights: ScoreWeights {
                success_rate: 1.0,
                latency: 0.0,
                errors: 0.0,
            },
            ..Default::default()
        };
        let quality = quality_score(&stats(20, 80.0, 4_000.0), 3, &custom);
        assert_eq!(quality.score, 80.0);
        assert_eq!(quality.grade, Grade::B);
    }

    struct Fixture {
        monitor: HealthMonitor,
        registry: Arc<BreakerRegistry>,
        db: SharedDatabase,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with(HealthConfig::default())
    }

    fn fixture_with(config: HealthConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap(),
        ));
        let registry = Arc::new(BreakerRegistry::new(
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
            clock.clone(),
        ));
        let db = Database::in_memory()
            .expect("Failed to create database")
            .into_shared();
        let monitor = HealthMonitor::new(
            registry.clone(),
            db.clone(),
            clock.clone(),
            config,
        );
        Fixture {
            monitor,
            registry,
            db,
            clock,
        }
    }

    fn insert(f: &Fixture, agent: AgentType, success: bool, ms: u64, hours_ago: i64) {
        let at = f.clock.now() - Duration::hours(hours_ago);
        let new = if success {
            NewExecution::succeeded("s", agent, ms, 5, json!({}), json!({}), at)
        } else {
            NewExecution::failed("s", agent, ms, "model refused", json!({}), at)
        };
        let db = f.db.lock();
        ExecutionLogStore::new(&db)
            .record(new)
            .expect("Failed to record execution");
    }

    #[test]
    fn fresh_system_is_healthy() {
        let f = fixture();
        let report = f.monitor.report().expect("Failed to build report");
        assert_eq!(report.agents.len(), 6);
        assert!(report
            .agents
            .iter()
            .all(|s| s.status == HealthStatus::Healthy && s.sample_count == 0));
        assert_eq!(report.summary.healthy, 6);
        assert_eq!(report.summary.open_circuits, 0);
        assert_eq!(report.summary.quality.score, 100.0);
        assert_eq!(report.summary.quality.grade, Grade::A);
    }

    #[test]
    fn snapshot_uses_lookback_window() {
        let f = fixture();
        insert(&f, AgentType::Classifier, false, 100, 30);
        insert(&f, AgentType::Classifier, true, 100, 2);
        insert(&f, AgentType::Classifier, true, 300, 1);

        let snapshot = f
            .monitor
            .snapshot(AgentType::Classifier)
            .expect("Failed to build snapshot");
        assert_eq!(snapshot.sample_count, 2);
        assert_eq!(snapshot.success_rate, 100.0);
        assert_eq!(snapshot.avg_latency_ms, 200.0);
        assert_eq!(snapshot.status, HealthStatus::Healthy);
        assert_eq!(
            snapshot.last_execution_at,
            Some(f.clock.now() - Duration::hours(1))
        );
    }

    #[test]
    fn open_breaker_makes_agent_unhealthy() {
        let f = fixture();
        for _ in 0..2 {
            f.registry
                .acquire(AgentType::Validator)
                .expect("closed breaker admits")
                .record_failure();
        }

        let report = f.monitor.report().expect("Failed to build report");
        let validator = &report.agents[AgentType::Validator.index()];
        assert_eq!(validator.status, HealthStatus::Unhealthy);
        assert_eq!(validator.circuit_breaker.state, CircuitState::Open);
        assert_eq!(report.summary.unhealthy, 1);
        assert_eq!(report.summary.healthy, 5);
        assert_eq!(report.summary.open_circuits, 1);

        f.registry.reset(AgentType::Validator);
        let validator = f
            .monitor
            .snapshot(AgentType::Validator)
            .expect("Failed to build snapshot");
        assert_eq!(validator.status, HealthStatus::Healthy);
        assert_eq!(validator.circuit_breaker.failure_count, 0);
    }

    #[test]
    fn oversized_lookback_reads_the_whole_log() {
        let f = fixture_with(HealthConfig {
            lookback_hours: u32::MAX,
            ..Default::default()
        });
        insert(&f, AgentType::Expander, true, 100, 24 * 400);

        let report = f.monitor.report().expect("Failed to build report");
        assert_eq!(report.summary.total_executions, 1);
        assert_eq!(report.agents[AgentType::Expander.index()].sample_count, 1);
    }

    #[test]
    fn summary_counts_distinct_errors() {
        let f = fixture();
        insert(&f, AgentType::Extractor, true, 1_000, 1);
        insert(&f, AgentType::Extractor, false, 1_000, 1);
        insert(&f, AgentType::Refiner, false, 1_000, 1);
        insert(&f, AgentType::Refiner, true, 1_000, 1);

        let summary = f.monitor.system_summary().expect("Failed to build summary");
        assert_eq!(summary.total_executions, 4);
        assert_eq!(summary.degraded, 2);
        assert_eq!(summary.quality.distinct_errors, 1);
        assert_eq!(summary.quality.success_rate_score, 50.0);
        assert_eq!(summary.quality.latency_score, 100.0);
        assert_eq!(summary.quality.error_score, 90.0);
        // 0.5 * 50 + 0.3 * 100 + 0.2 * 90
        assert_eq!(summary.quality.score, 73.0);
        assert_eq!(summary.quality.grade, Grade::C);
    }
}
