//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::errors::{LedgerError, Result};
use crate::ledger::registry::validate_percentage_set;

/// Main ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Pots created at setup, in creation order
    #[serde(default = "default_pots")]
    pub pots: Vec<PotSeed>,
    /// Database configuration (in-memory store when absent)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// General ledger settings
    #[serde(default)]
    pub settings: LedgerSettings,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pots: default_pots(),
            database: None,
            settings: LedgerSettings::default(),
        }
    }
}

impl LedgerConfig {
    /// Check the pot seed with the same rules the registry enforces
    pub fn validate(&self) -> Result<()> {
        let entries: Vec<(&str, Decimal)> = self
            .pots
            .iter()
            .map(|seed| (seed.name.as_str(), seed.percentage))
            .collect();
        validate_percentage_set(&entries, self.settings.percentage_epsilon)
            .map_err(|e| LedgerError::Configuration(e.to_string()))
    }
}

/// Setup-time pot definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotSeed {
    pub name: String,
    pub percentage: Decimal,
}

impl PotSeed {
    pub fn new(name: impl Into<String>, percentage: Decimal) -> Self {
        Self {
            name: name.into(),
            percentage,
        }
    }
}

fn default_pots() -> Vec<PotSeed> {
    vec![
        PotSeed::new("Premios", dec!(70)),
        PotSeed::new("Reserva", dec!(20)),
        PotSeed::new("Ganancias", dec!(10)),
    ]
}

/// PostgreSQL configuration for the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    /// Create tables on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_run_migrations() -> bool {
    true
}

/// General ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
    /// Tolerance when checking that percentages sum to 100
    #[serde(default = "default_percentage_epsilon")]
    pub percentage_epsilon: Decimal,
    /// Backoff for retrying storage failures
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            percentage_epsilon: default_percentage_epsilon(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_percentage_epsilon() -> Decimal {
    dec!(0.01)
}

/// Retry settings for `StorageUnavailable`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter_pct: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_pct: default_jitter(),
        }
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    2_000
}

fn default_jitter() -> f64 {
    0.2
}
