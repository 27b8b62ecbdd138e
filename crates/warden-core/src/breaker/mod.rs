//! Per-agent circuit breakers
//!
//! One breaker per [`AgentType`], each behind its own lock. Every transition
//! happens inside a single lock acquisition, and no lock is held while the
//! caller talks to the gateway: admission hands out a [`BreakerPermit`] and
//! the outcome is reported back through it.
//!
//! ```text
//! CLOSED --threshold failures--> OPEN --cooldown elapsed, next check--> HALF_OPEN
//!   ^                                                                     |
//!   +-------------------------- probe success ----------------------------+
//!                               probe failure -> OPEN (longer cooldown)
//! ```

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agents::AgentType;
use crate::clock::SharedClock;
use crate::error::ExecutionError;

/// Upper bound accepted for breaker cooldowns (one day).
pub const MAX_COOLDOWN_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Trip threshold and cooldown schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker.
    pub failure_threshold: u32,
    /// Cooldown after the first trip.
    pub base_cooldown_ms: u64,
    /// Growth factor applied on every consecutive re-trip.
    pub cooldown_multiplier: f64,
    /// Upper bound for the cooldown.
    pub max_cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            base_cooldown_ms: 30_000,
            cooldown_multiplier: 2.0,
            max_cooldown_ms: 600_000,
        }
    }
}

impl BreakerConfig {
    /// Cooldown for the `trip`-th consecutive trip (1-based).
    pub fn cooldown_for_trip(&self, trip: u32) -> u64 {
        let exponent = trip.saturating_sub(1).min(32) as i32;
        let raw = self.base_cooldown_ms as f64 * self.cooldown_multiplier.powi(exponent);
        if raw.is_finite() {
            (raw as u64).min(self.max_cooldown_ms)
        } else {
            self.max_cooldown_ms
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub agent_type: AgentType,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub consecutive_trips: u32,
    pub current_cooldown_ms: u64,
    pub probe_in_flight: bool,
}

/// Why admission was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerRejection {
    pub agent: AgentType,
    pub state: CircuitState,
    pub retry_after: Option<DateTime<Utc>>,
}

impl From<BreakerRejection> for ExecutionError {
    fn from(rejection: BreakerRejection) -> Self {
        ExecutionError::CircuitOpen {
            agent: rejection.agent,
            retry_after: rejection.retry_after,
        }
    }
}

#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_retry_time: Option<DateTime<Utc>>,
    consecutive_trips: u32,
    cooldown_ms: u64,
    probe_in_flight: bool,
    /// Bumped on every trip and reset. Probe permits from an earlier
    /// generation no longer speak for the breaker.
    generation: u64,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            next_retry_time: None,
            consecutive_trips: 0,
            cooldown_ms: 0,
            probe_in_flight: false,
            generation: 0,
        }
    }
}

impl Breaker {
    fn view(&self, agent: AgentType) -> CircuitBreakerState {
        CircuitBreakerState {
            agent_type: agent,
            state: self.state,
            failure_count: self.failure_count,
            last_failure_time: self.last_failure_time,
            next_retry_time: self.next_retry_time,
            consecutive_trips: self.consecutive_trips,
            current_cooldown_ms: self.cooldown_ms,
            probe_in_flight: self.probe_in_flight,
        }
    }

    fn trip(&mut self, config: &BreakerConfig, now: DateTime<Utc>) {
        self.consecutive_trips = self.consecutive_trips.saturating_add(1);
        // Never shorter than the cooldown that just expired.
        self.cooldown_ms = config
            .cooldown_for_trip(self.consecutive_trips)
            .max(self.cooldown_ms);
        self.state = CircuitState::Open;
        self.probe_in_flight = false;
        self.generation = self.generation.wrapping_add(1);
        let cooldown = Duration::milliseconds(i64::try_from(self.cooldown_ms).unwrap_or(i64::MAX));
        self.next_retry_time = Some(
            now.checked_add_signed(cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }

    fn is_current_probe(&self, probe: bool, generation: u64) -> bool {
        probe && self.generation == generation
    }
}

/// All six breakers. Construct one per process and share it by reference.
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: SharedClock,
    breakers: [Mutex<Breaker>; 6],
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: Default::default(),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn breaker(&self, agent: AgentType) -> &Mutex<Breaker> {
        &self.breakers[agent.index()]
    }

    /// Ask to run one call. An OPEN breaker whose cooldown has elapsed moves
    /// to HALF_OPEN here and the caller becomes its single probe.
    pub fn acquire(&self, agent: AgentType) -> Result<BreakerPermit<'_>, BreakerRejection> {
        let now = self.clock.now();
        let mut breaker = self.breaker(agent).lock();
        let state = breaker.state;

        match state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, agent, false, breaker.generation)),
            CircuitState::Open => {
                let cooled_down = breaker.next_retry_time.map_or(true, |at| now >= at);
                if !cooled_down {
                    return Err(BreakerRejection {
                        agent,
                        state: CircuitState::Open,
                        retry_after: breaker.next_retry_time,
                    });
                }
                breaker.state = CircuitState::HalfOpen;
                breaker.probe_in_flight = true;
                tracing::info!(agent = %agent, "Circuit breaker half-open, admitting probe");
                Ok(BreakerPermit::new(self, agent, true, breaker.generation))
            }
            CircuitState::HalfOpen => {
                if breaker.probe_in_flight {
                    return Err(BreakerRejection {
                        agent,
                        state: CircuitState::HalfOpen,
                        retry_after: None,
                    });
                }
                breaker.probe_in_flight = true;
                Ok(BreakerPermit::new(self, agent, true, breaker.generation))
            }
        }
    }

    /// Whether [`acquire`](Self::acquire) would currently admit a call.
    /// Does not change state.
    pub fn is_call_permitted(&self, agent: AgentType) -> bool {
        let now = self.clock.now();
        let breaker = self.breaker(agent).lock();
        match breaker.state {
            CircuitState::Closed => true,
            CircuitState::Open => breaker.next_retry_time.map_or(true, |at| now >= at),
            CircuitState::HalfOpen => !breaker.probe_in_flight,
        }
    }

    /// Operator override: straight to CLOSED, bypassing any cooldown.
    pub fn reset(&self, agent: AgentType) -> CircuitBreakerState {
        let mut breaker = self.breaker(agent).lock();
        let previous = breaker.state;
        let generation = breaker.generation.wrapping_add(1);
        *breaker = Breaker {
            generation,
            ..Breaker::default()
        };
        tracing::info!(agent = %agent, previous = %previous, "Circuit breaker manually reset");
        breaker.view(agent)
    }

    pub fn snapshot(&self, agent: AgentType) -> CircuitBreakerState {
        self.breaker(agent).lock().view(agent)
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerState> {
        AgentType::ALL
            .iter()
            .map(|agent| self.snapshot(*agent))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        AgentType::ALL
            .iter()
            .filter(|agent| self.breaker(**agent).lock().state == CircuitState::Open)
            .count()
    }

    fn on_success(&self, agent: AgentType, probe: bool, generation: u64) {
        let mut breaker = self.breaker(agent).lock();
        let state = breaker.state;
        let probe = breaker.is_current_probe(probe, generation);
        match state {
            CircuitState::HalfOpen if probe => {
                let last_failure_time = breaker.last_failure_time;
                *breaker = Breaker {
                    last_failure_time,
                    generation,
                    ..Breaker::default()
                };
                tracing::info!(agent = %agent, "Probe succeeded, circuit breaker closed");
            }
            CircuitState::Closed => breaker.failure_count = 0,
            // Late result from a call admitted before the breaker tripped.
            _ => {}
        }
    }

    fn on_failure(&self, agent: AgentType, probe: bool, generation: u64) {
        let now = self.clock.now();
        let mut breaker = self.breaker(agent).lock();
        let probe = breaker.is_current_probe(probe, generation);
        breaker.last_failure_time = Some(now);
        breaker.failure_count = breaker.failure_count.saturating_add(1);
        let state = breaker.state;
        let threshold_reached = breaker.failure_count >= self.config.failure_threshold;

        match state {
            CircuitState::HalfOpen if probe => {
                breaker.trip(&self.config, now);
                tracing::warn!(
                    agent = %agent,
                    cooldown_ms = breaker.cooldown_ms,
                    trips = breaker.consecutive_trips,
                    "Probe failed, circuit breaker re-opened"
                );
            }
            CircuitState::Closed if threshold_reached => {
                breaker.trip(&self.config, now);
                tracing::warn!(
                    agent = %agent,
                    failures = breaker.failure_count,
                    cooldown_ms = breaker.cooldown_ms,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    fn release_probe(&self, agent: AgentType, generation: u64) {
        let mut breaker = self.breaker(agent).lock();
        if breaker.state == CircuitState::HalfOpen && breaker.generation == generation {
            breaker.probe_in_flight = false;
        }
    }
}

/// Admission ticket for a single attempt. Report the outcome with
/// [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping it unreported counts as
/// an indeterminate outcome: state is untouched and a held probe slot is freed.
#[must_use = "report the attempt outcome through the permit"]
pub struct BreakerPermit<'a> {
    registry: &'a BreakerRegistry,
    agent: AgentType,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(registry: &'a BreakerRegistry, agent: AgentType, probe: bool, generation: u64) -> Self {
        Self {
            registry,
            agent,
            probe,
            generation,
            settled: false,
        }
    }

    /// True when this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.registry
            .on_success(self.agent, self.probe, self.generation);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.registry
            .on_failure(self.agent, self.probe, self.generation);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.registry.release_probe(self.agent, self.generation);
        }
    }
}
