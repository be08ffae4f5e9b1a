//! Configuration module for Tungate
//!
//! This module provides configuration types and parsing for the engine.
//! Configuration is loaded once at startup and handed to the engine by
//! ownership; there is no process-wide mutable state.

mod engine;

pub use engine::{Config, DnsConfig, EngineConfig, TimeoutConfig, TunConfig};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;
    config.engine.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}
