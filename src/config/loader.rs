//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::LedgerConfig;
use crate::common::errors::{LedgerError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with LEDGER__, nested with `__`)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<LedgerConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("LEDGER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: LedgerConfig = builder
        .build()
        .map_err(|e| LedgerError::Configuration(e.to_string()))?
        .try_deserialize()
        .map_err(|e| LedgerError::Configuration(e.to_string()))?;

    config.validate()?;
    Ok(config)
}
