//! Configuration management for tcrule.
//!
//! This module provides:
//! - CLI argument parsing
//! - Environment variable configuration
//! - Configuration validation
//! - Builder pattern for configuration construction

pub mod app_config;
pub mod cli;

pub use app_config::{AppConfig, AppConfigBuilder, LogLevel};
pub use cli::{CliCommand, CliConfig, ShowTarget};

use anyhow::Result;

/// Parsed command plus the settings it runs with.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub cli: CliConfig,
    pub app: AppConfig,
}

impl ConfigManager {
    /// Creates a new configuration manager from CLI arguments and environment
    pub fn from_cli_and_env() -> Result<Self> {
        let cli = CliConfig::from_args()?;
        let app = AppConfig::from_cli(&cli)?;
        Ok(Self { cli, app })
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> Result<()> {
        self.app.init_logging()
    }
}
