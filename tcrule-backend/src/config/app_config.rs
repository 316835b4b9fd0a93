//! Application configuration for tcrule.
//!
//! Combines the parsed command line with the environment (`TCRULE_TC_BIN`,
//! `TCRULE_NETNS`, `RUST_LOG`) and turns the result into the
//! [`TcContext`] every engine operation runs with.

use anyhow::{Result, anyhow};
use std::env;
use tracing_subscriber::EnvFilter;

use super::cli::CliConfig;
use crate::context::{DEFAULT_TC_BINARY, TcContext};

pub const ENV_TC_BIN: &str = "TCRULE_TC_BIN";
pub const ENV_NETNS: &str = "TCRULE_NETNS";
pub const ENV_RUST_LOG: &str = "RUST_LOG";

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing level filter string
    pub fn to_filter_string(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub tc_binary: String,
    pub namespace: Option<String>,
    pub verbose: bool,
    pub log_level: LogLevel,
    /// `RUST_LOG` as given, directives included. Ignored when verbose.
    pub log_directives: Option<String>,
}

impl AppConfig {
    /// Create application configuration from CLI config and the process environment
    pub fn from_cli(cli_config: &CliConfig) -> Result<Self> {
        Self::from_cli_with_env(cli_config, |key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_cli`] with an explicit environment lookup.
    pub fn from_cli_with_env<F>(cli_config: &CliConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_directives = lookup(ENV_RUST_LOG).filter(|s| !s.trim().is_empty());
        let log_level = if cli_config.verbose {
            LogLevel::Debug
        } else {
            log_directives
                .as_deref()
                .map(Self::parse_log_level)
                .unwrap_or(LogLevel::Info)
        };

        let tc_binary = cli_config
            .tc_bin
            .clone()
            .or_else(|| lookup(ENV_TC_BIN))
            .unwrap_or_else(|| DEFAULT_TC_BINARY.to_string());
        let namespace = cli_config
            .netns
            .clone()
            .or_else(|| lookup(ENV_NETNS))
            .filter(|ns| !ns.is_empty());

        let config = Self {
            tc_binary,
            namespace,
            verbose: cli_config.verbose,
            log_level,
            log_directives,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse log level from string
    fn parse_log_level(level_str: &str) -> LogLevel {
        // Extract the main log level from complex RUST_LOG format
        let main_level = level_str
            .split(',')
            .next()
            .unwrap_or(level_str)
            .split('=')
            .next()
            .unwrap_or(level_str)
            .trim()
            .to_lowercase();

        match main_level.as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    /// The filter string handed to the subscriber.
    pub fn log_filter(&self) -> String {
        match (&self.log_directives, self.verbose) {
            (Some(directives), false) => directives.clone(),
            _ => self.log_level.to_filter_string().to_string(),
        }
    }

    /// Initialize logging based on configuration. Logs go to stderr so JSON
    /// listings on stdout stay clean.
    pub fn init_logging(&self) -> Result<()> {
        let filter = EnvFilter::try_new(self.log_filter())
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.to_filter_string()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_target(false)
                    .compact(),
            )
            .try_init()
            .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

        tracing::debug!("Logging initialized with level: {:?}", self.log_level);
        Ok(())
    }

    /// Validate application configuration
    pub fn validate(&self) -> Result<()> {
        if self.tc_binary.trim().is_empty() {
            return Err(anyhow!("tc binary path cannot be empty"));
        }

        if let Some(ns) = &self.namespace
            && (ns.contains('/') || ns == "." || ns == "..")
        {
            return Err(anyhow!(
                "Invalid namespace name '{}': must not contain '/'",
                ns
            ));
        }

        Ok(())
    }

    /// The execution context for engine operations.
    pub fn to_context(&self) -> TcContext {
        TcContext::system()
            .in_namespace(self.namespace.clone())
            .with_system_lister()
            .with_tc_binary(self.tc_binary.clone())
            .with_verbose(self.verbose)
    }
}

/// Builder pattern for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    tc_binary: Option<String>,
    namespace: Option<String>,
    verbose: Option<bool>,
    log_level: Option<LogLevel>,
}

impl AppConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tc_binary<S: Into<String>>(mut self, path: S) -> Self {
        self.tc_binary = Some(path.into());
        self
    }

    pub fn namespace<S: Into<String>>(mut self, name: S) -> Self {
        self.namespace = Some(name.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig> {
        let verbose = self.verbose.unwrap_or(false);
        let default_level = if verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };
        let config = AppConfig {
            tc_binary: self
                .tc_binary
                .unwrap_or_else(|| DEFAULT_TC_BINARY.to_string()),
            namespace: self.namespace,
            verbose,
            log_level: self.log_level.unwrap_or(default_level),
            log_directives: None,
        };

        config.validate()?;
        Ok(config)
    }
}
