//! Execution metrics
//!
//! Everything here is a pure function of a slice of execution records and an
//! explicit `now`. [`MetricsAggregator`] only loads the records.
//!
//! Empty inputs never error: rates and latencies fall back to zero, except
//! hourly buckets, which report a 100% success rate when nothing ran.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Duration, DurationRound, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentType;
use crate::clock::{window_start, SharedClock};
use crate::storage::{ExecutionLogStore, ExecutionRecord, SharedDatabase};

mod signature;

pub use signature::error_signature;

/// Longest summary window in days.
pub const MAX_WINDOW_DAYS: u32 = 365;
/// Most buckets an hourly trend will hold (one week).
pub const MAX_TREND_HOURS: u32 = 168;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// How many error signatures the summary keeps.
    pub top_errors: usize,
    /// Characters of the normalised message used for grouping.
    pub error_signature_len: usize,
    /// Buckets in the hourly trend.
    pub trend_hours: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            top_errors: 5,
            error_signature_len: 100,
            trend_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetrics {
    pub window_days: u32,
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percent, 0 when nothing ran.
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub p50_execution_ms: u64,
    pub p95_execution_ms: u64,
    pub p99_execution_ms: u64,
    pub total_tokens: u64,
    pub by_agent: Vec<AgentBreakdown>,
    pub top_errors: Vec<ErrorSignature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBreakdown {
    pub agent_type: AgentType,
    pub count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSignature {
    pub message: String,
    pub count: u64,
    pub last_seen: DateTime<Utc>,
    pub agent_types: Vec<AgentType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub count: u64,
    pub success_count: u64,
    /// Percent; 100 for an empty bucket.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub executions: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceDeltas {
    /// Today's success rate minus the 7-day rate, in points.
    pub success_rate: f64,
    /// Today's average latency minus the 7-day average.
    pub avg_execution_ms: f64,
    /// Today's volume minus the 7-day daily average.
    pub daily_executions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub today: PeriodStats,
    pub week: PeriodStats,
    pub deltas: PerformanceDeltas,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(successes as f64 * 100.0 / total as f64)
    }
}

fn mean_ms<'a>(records: impl Iterator<Item = &'a ExecutionRecord>) -> f64 {
    let (sum, n) = records.fold((0u128, 0u64), |(sum, n), r| {
        (sum + u128::from(r.execution_ms), n + 1)
    });
    if n == 0 {
        0.0
    } else {
        round2(sum as f64 / n as f64)
    }
}

/// `sorted[floor(n * p)]`, clamped to the last element; 0 when empty.
pub fn percentile(sorted_ms: &[u64], p: f64) -> u64 {
    if sorted_ms.is_empty() {
        return 0;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let index = ((sorted_ms.len() as f64) * p).floor() as usize;
    sorted_ms[index.min(sorted_ms.len() - 1)]
}

fn sorted_latencies(records: &[&ExecutionRecord]) -> Vec<u64> {
    let mut values: Vec<u64> = records.iter().map(|r| r.execution_ms).collect();
    values.sort_unstable();
    values
}

/// Latency percentiles over `records` for each requested `p` in `[0, 1]`.
pub fn percentiles(records: &[ExecutionRecord], ps: &[f64]) -> Vec<u64> {
    let refs: Vec<&ExecutionRecord> = records.iter().collect();
    let sorted = sorted_latencies(&refs);
    ps.iter().map(|p| percentile(&sorted, *p)).collect()
}

fn period_stats(records: &[&ExecutionRecord]) -> PeriodStats {
    let executions = records.len() as u64;
    let successes = records.iter().filter(|r| r.success).count() as u64;
    PeriodStats {
        executions,
        failures: executions - successes,
        success_rate: rate(successes, executions),
        avg_execution_ms: mean_ms(records.iter().copied()),
        total_tokens: records.iter().map(|r| r.token_count).sum(),
    }
}

fn top_errors(records: &[&ExecutionRecord], config: &MetricsConfig) -> Vec<ErrorSignature> {
    let mut groups: HashMap<String, ErrorSignature> = HashMap::new();

    for record in records.iter().filter(|r| !r.success) {
        let message = record.error.as_deref().unwrap_or_default();
        let key = error_signature(message, config.error_signature_len);
        let entry = groups.entry(key.clone()).or_insert_with(|| ErrorSignature {
            message: key,
            count: 0,
            last_seen: record.created_at,
            agent_types: Vec::new(),
        });
        entry.count += 1;
        entry.last_seen = entry.last_seen.max(record.created_at);
        if !entry.agent_types.contains(&record.agent_type) {
            entry.agent_types.push(record.agent_type);
        }
    }

    let mut signatures: Vec<ErrorSignature> = groups.into_values().collect();
    for signature in &mut signatures {
        signature.agent_types.sort();
    }
    signatures.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.message.cmp(&b.message))
    });
    signatures.truncate(config.top_errors);
    signatures
}

/// Statistics over the records created in the last `window_days` days.
pub fn summarize(
    records: &[ExecutionRecord],
    window_days: u32,
    now: DateTime<Utc>,
    config: &MetricsConfig,
) -> AggregatedMetrics {
    let cutoff = window_start(now, Duration::days(i64::from(window_days)));
    let in_window: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.created_at >= cutoff && r.created_at <= now)
        .collect();

    let overall = period_stats(&in_window);
    let sorted = sorted_latencies(&in_window);

    let by_agent = AgentType::ALL
        .iter()
        .map(|agent| {
            let subset: Vec<&ExecutionRecord> = in_window
                .iter()
                .copied()
                .filter(|r| r.agent_type == *agent)
                .collect();
            let stats = period_stats(&subset);
            AgentBreakdown {
                agent_type: *agent,
                count: stats.executions,
                success_count: stats.executions - stats.failures,
                success_rate: stats.success_rate,
                avg_execution_ms: stats.avg_execution_ms,
                total_tokens: stats.total_tokens,
            }
        })
        .collect();

    AggregatedMetrics {
        window_days,
        total_executions: overall.executions,
        success_count: overall.executions - overall.failures,
        failure_count: overall.failures,
        success_rate: overall.success_rate,
        avg_execution_ms: overall.avg_execution_ms,
        p50_execution_ms: percentile(&sorted, 0.5),
        p95_execution_ms: percentile(&sorted, 0.95),
        p99_execution_ms: percentile(&sorted, 0.99),
        total_tokens: overall.total_tokens,
        by_agent,
        top_errors: top_errors(&in_window, config),
    }
}

fn hour_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}

/// `hours` consecutive hourly buckets ending with the hour containing `now`,
/// at most [`MAX_TREND_HOURS`].
pub fn hourly_trend(records: &[ExecutionRecord], now: DateTime<Utc>, hours: u32) -> Vec<HourlyBucket> {
    let hours = hours.clamp(1, MAX_TREND_HOURS);
    let first = hour_start(now) - Duration::hours(i64::from(hours) - 1);
    let mut counts = vec![(0u64, 0u64); hours as usize];

    for record in records {
        if record.created_at < first {
            continue;
        }
        let index = (record.created_at - first).num_hours();
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| counts.get_mut(i)) {
            slot.0 += 1;
            if record.success {
                slot.1 += 1;
            }
        }
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, (count, success_count))| HourlyBucket {
            hour: first + Duration::hours(i as i64),
            count,
            success_count,
            success_rate: if count == 0 {
                100.0
            } else {
                rate(success_count, count)
            },
        })
        .collect()
}

/// Today (since UTC midnight) against the trailing seven days.
pub fn performance_summary(records: &[ExecutionRecord], now: DateTime<Utc>) -> PerformanceSummary {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    let week_start = now - Duration::days(7);

    let today: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.created_at >= midnight && r.created_at <= now)
        .collect();
    let week: Vec<&ExecutionRecord> = records
        .iter()
        .filter(|r| r.created_at >= week_start && r.created_at <= now)
        .collect();

    let today = period_stats(&today);
    let week = period_stats(&week);
    let deltas = PerformanceDeltas {
        success_rate: round2(today.success_rate - week.success_rate),
        avg_execution_ms: round2(today.avg_execution_ms - week.avg_execution_ms),
        daily_executions: round2(today.executions as f64 - week.executions as f64 / 7.0),
    };

    PerformanceSummary {
        today,
        week,
        deltas,
    }
}

/// Loads records from the execution log and applies the functions above.
pub struct MetricsAggregator {
    db: SharedDatabase,
    clock: SharedClock,
    config: MetricsConfig,
}

impl MetricsAggregator {
    pub fn new(db: SharedDatabase, clock: SharedClock, config: MetricsConfig) -> Self {
        Self { db, clock, config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn load_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock();
        ExecutionLogStore::new(&db).since(cutoff)
    }

    /// Summary over the last `window_days` days, clamped to
    /// `1..=MAX_WINDOW_DAYS`.
    pub fn summary(&self, window_days: u32) -> Result<AggregatedMetrics> {
        let window_days = window_days.clamp(1, MAX_WINDOW_DAYS);
        let now = self.clock.now();
        let records = self.load_since(now - Duration::days(i64::from(window_days)))?;
        Ok(summarize(&records, window_days, now, &self.config))
    }

    pub fn hourly_trend(&self) -> Result<Vec<HourlyBucket>> {
        let now = self.clock.now();
        let hours = self.config.trend_hours.clamp(1, MAX_TREND_HOURS);
        let records = self.load_since(hour_start(now) - Duration::hours(i64::from(hours)))?;
        Ok(hourly_trend(&records, now, hours))
    }

    /// Latency percentiles over the last `window_days` days.
    pub fn percentiles(&self, window_days: u32, ps: &[f64]) -> Result<Vec<u64>> {
        let window_days = window_days.clamp(1, MAX_WINDOW_DAYS);
        let now = self.clock.now();
        let records = self.load_since(now - Duration::days(i64::from(window_days)))?;
        Ok(percentiles(&records, ps))
    }

    pub fn performance_summary(&self) -> Result<PerformanceSummary> {
        let now = self.clock.now();
        let records = self.load_since(now - Duration::days(7))?;
        Ok(performance_summary(&records, now))
    }
}
