// =============================================================================
// Suite configuration — recognized options, atomic persistence, env overlay.
// Credentials are never serialized back out: they live in a separate,
// non-`Serialize` struct loaded straight from the environment.
// =============================================================================
//
// Persistence uses the same atomic tmp + rename pattern the engine this crate
// was lifted from uses for its runtime settings: write to a `.tmp` sibling,
// then rename, so a crash mid-write never corrupts the config file on disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::SessionConfig;
use crate::stats::HealthWeights;

fn default_features() -> Vec<String> {
    vec!["orderbook".to_string(), "risk_manager".to_string()]
}

fn default_timeframes_secs() -> Vec<u64> {
    vec![1, 15, 60, 300, 900, 3600]
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_initial_days() -> u32 {
    5
}

fn default_validation_price_cap() -> String {
    "1000000".to_string()
}

fn default_buffer_soft_cap() -> usize {
    5_000
}

fn default_buffer_hard_cap() -> usize {
    10_000
}

fn default_order_retention_hours() -> u64 {
    24
}

fn default_order_retention_count() -> usize {
    10_000
}

fn default_circuit_threshold() -> u32 {
    10
}

fn default_circuit_window_secs() -> u64 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

fn default_symbol() -> String {
    "ES".to_string()
}

fn default_tick_size() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_tick_value() -> Decimal {
    Decimal::new(1250, 2) // 12.50
}

fn default_health_weights() -> HealthWeightsConfig {
    HealthWeightsConfig::default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthWeightsConfig {
    #[serde(default = "one_third")]
    pub connection: f64,
    #[serde(default)]
    pub validation: f64,
    #[serde(default)]
    pub reconciliation: f64,
    #[serde(default)]
    pub buffer: f64,
    #[serde(default)]
    pub error_rate: f64,
}

fn one_third() -> f64 {
    0.30
}

impl Default for HealthWeightsConfig {
    fn default() -> Self {
        Self { connection: 0.30, validation: 0.20, reconciliation: 0.20, buffer: 0.15, error_rate: 0.15 }
    }
}

impl From<&HealthWeightsConfig> for HealthWeights {
    fn from(config: &HealthWeightsConfig) -> Self {
        Self {
            connection: config.connection,
            validation: config.validation,
            reconciliation: config.reconciliation,
            buffer: config.buffer,
            error_rate: config.error_rate,
        }
    }
}

/// Threshold knobs that apply across components (validation, backpressure,
/// retries, circuit breakers, health scoring) so operators tune them from one
/// place rather than hunting through component constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_validation_price_cap")]
    pub validation_price_cap: String,
    #[serde(default = "default_buffer_soft_cap")]
    pub buffer_soft_cap: usize,
    #[serde(default = "default_buffer_hard_cap")]
    pub buffer_hard_cap: usize,
    #[serde(default = "default_order_retention_hours")]
    pub order_retention_hours: u64,
    #[serde(default = "default_order_retention_count")]
    pub order_retention_count: usize,
    #[serde(default = "default_circuit_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_window_secs")]
    pub circuit_window_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub transport_max_attempts: u32,
    #[serde(default = "default_health_weights")]
    pub health_weights: HealthWeightsConfig,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            validation_price_cap: default_validation_price_cap(),
            buffer_soft_cap: default_buffer_soft_cap(),
            buffer_hard_cap: default_buffer_hard_cap(),
            order_retention_hours: default_order_retention_hours(),
            order_retention_count: default_order_retention_count(),
            circuit_failure_threshold: default_circuit_threshold(),
            circuit_window_secs: default_circuit_window_secs(),
            transport_max_attempts: default_max_attempts(),
            health_weights: default_health_weights(),
        }
    }
}

/// Non-secret connection settings. Host/port/feature selections only —
/// credentials live in [`Credentials`], which this struct never embeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub contract_id: String,

    /// Uppercased root symbol used to construct the traded [`Instrument`]
    /// (e.g. `"ES"`); together with `tick_size`/`tick_value` this is the
    /// only instrument geometry the suite needs to align wire prices.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_tick_size")]
    pub tick_size: Decimal,

    #[serde(default = "default_tick_value")]
    pub tick_value: Decimal,

    #[serde(default = "default_timeframes_secs")]
    pub timeframes_secs: Vec<u64>,

    /// Recognized values: `"orderbook"`, `"risk_manager"`. Unknown values are
    /// accepted and ignored so a newer config can be loaded by an older
    /// binary without failing to parse.
    #[serde(default = "default_features")]
    pub features: Vec<String>,

    #[serde(default = "default_initial_days")]
    pub initial_days: u32,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub session_config: SessionConfig,

    #[serde(default)]
    pub thresholds: Thresholds,
}

impl SuiteConfig {
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read suite config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content).with_context(|| format!("failed to parse suite config from {}", path.display()))?;
        info!(path = %path.display(), contract_id = %config.contract_id, "suite config loaded");
        Ok(config)
    }

    /// Atomic write: serialize to a `.tmp` sibling, then rename over the
    /// target path, so a crash mid-write never leaves a half-written config.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize suite config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "suite config saved (atomic)");
        Ok(())
    }
}

/// Broker credentials, sourced from environment variables (via `.env` in
/// development) and never part of [`SuiteConfig`]'s serialized form.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Load `.env` if present, then read `GATEWAY_API_KEY` /
    /// `GATEWAY_API_SECRET` from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let api_key = std::env::var("GATEWAY_API_KEY").context("GATEWAY_API_KEY not set")?;
        let api_secret = std::env::var("GATEWAY_API_SECRET").context("GATEWAY_API_SECRET not set")?;
        Ok(Self { api_key, api_secret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SuiteConfig {
        SuiteConfig {
            contract_id: "CON.F.US.EP.Z24".into(),
            symbol: default_symbol(),
            tick_size: default_tick_size(),
            tick_value: default_tick_value(),
            timeframes_secs: default_timeframes_secs(),
            features: default_features(),
            initial_days: default_initial_days(),
            timezone: default_timezone(),
            session_config: SessionConfig::default(),
            thresholds: Thresholds::default(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suite.json");
        let config = sample();
        config.save(&path).unwrap();
        let loaded = SuiteConfig::load(&path).unwrap();
        assert_eq!(loaded.contract_id, config.contract_id);
        assert_eq!(loaded.timeframes_secs, config.timeframes_secs);
    }

    #[test]
    fn unknown_feature_names_are_tolerated() {
        let json = r#"{"contract_id":"ES","features":["orderbook","made_up_feature"]}"#;
        let config: SuiteConfig = serde_json::from_str(json).unwrap();
        assert!(config.has_feature("orderbook"));
        assert!(config.has_feature("made_up_feature"));
    }

    #[test]
    fn credentials_are_not_part_of_suite_config_serialization() {
        let config = sample();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("api_secret"));
        assert!(!json.contains("api_key"));
    }
}
