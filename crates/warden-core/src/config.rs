//! Configuration loading
//!
//! `~/.warden/config.toml` (or the file named by `WARDEN_CONFIG`), then a
//! handful of environment overrides, then validation. A missing file means
//! defaults. Every section is optional.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, MAX_COOLDOWN_MS};
use crate::gateway::GatewayConfig;
use crate::health::{HealthConfig, MAX_LOOKBACK_HOURS};
use crate::metrics::{MetricsConfig, MAX_TREND_HOURS};
use crate::paths;
use crate::retry::{RetryPolicy, MAX_ATTEMPTS_LIMIT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub port: u16,
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3000,
            bind: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Execution log location; `~/.warden/warden.db` when unset.
    pub db_path: Option<PathBuf>,
}

impl StorageSettings {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(paths::default_db_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub gateway: GatewayConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
}

impl WardenConfig {
    /// Load from the default location, apply environment overrides and
    /// validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("WARDEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(paths::config_path);
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse `path`, or return defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid config TOML")
    }

    /// Apply `PORT`/`WARDEN_PORT`, `WARDEN_DB_PATH`, `WARDEN_GATEWAY_URL` and
    /// `WARDEN_GATEWAY_API_KEY` as resolved by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = non_empty("WARDEN_PORT").or_else(|| non_empty("PORT")) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid port: {port}"))?;
        }
        if let Some(db_path) = non_empty("WARDEN_DB_PATH") {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
        if let Some(url) = non_empty("WARDEN_GATEWAY_URL") {
            self.gateway.base_url = Some(url);
        }
        if let Some(key) = non_empty("WARDEN_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            bail!("breaker.failure_threshold must be at least 1");
        }
        if self.breaker.cooldown_multiplier < 1.0 {
            bail!("breaker.cooldown_multiplier must be >= 1.0");
        }
        if self.breaker.max_cooldown_ms < self.breaker.base_cooldown_ms {
            bail!("breaker.max_cooldown_ms must be >= breaker.base_cooldown_ms");
        }
        if self.breaker.max_cooldown_ms > MAX_COOLDOWN_MS {
            bail!("breaker.max_cooldown_ms must not exceed {MAX_COOLDOWN_MS}");
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            bail!("retry.max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be between 0.0 and 1.0");
        }

        if self.gateway.timeout_ms == 0 {
            bail!("gateway.timeout_ms must be positive");
        }

        let health = &self.health;
        if health.lookback_hours == 0 || health.lookback_hours > MAX_LOOKBACK_HOURS {
            bail!("health.lookback_hours must be between 1 and {MAX_LOOKBACK_HOURS}");
        }
        if health.degraded_success_rate < health.unhealthy_success_rate {
            bail!("health.degraded_success_rate must not be below health.unhealthy_success_rate");
        }
        let weight_total = health.weights.total();
        if (weight_total - 1.0).abs() > 0.01 {
            bail!("health.weights must sum to 1.0 (got {weight_total:.3})");
        }
        if !health.grades.is_descending() {
            bail!("health.grades must be descending (a >= b >= c >= d)");
        }

        if self.metrics.trend_hours == 0 || self.metrics.trend_hours > MAX_TREND_HOURS {
            bail!("metrics.trend_hours must be between 1 and {MAX_TREND_HOURS}");
        }
        if self.metrics.error_signature_len == 0 {
            bail!("metrics.error_signature_len must be positive");
        }

        Ok(())
    }
}
