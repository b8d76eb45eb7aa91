//! Structured logging with JSON/pretty formats.
//!
//! This module provides the logging infrastructure for the scheduler:
//!
//! - JSON format for production environments
//! - Pretty format for development
//! - Per-module log level configuration

use serde::Deserialize;
use std::collections::HashMap;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty, or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include thread names
    #[serde(default = "default_include_thread")]
    pub include_thread: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_thread: default_include_thread(),
            include_target: default_include_target(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    Json,
    /// Pretty format for development
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

// Default value functions
fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_thread() -> bool {
    // Scheduler and worker threads carry meaningful names
    true
}

fn default_include_target() -> bool {
    true
}

/// Initialize the logging subsystem.
///
/// Sets up the global tracing subscriber with the configured format and
/// filters. Safe to call once per process; subsequent calls return an error
/// from the subscriber registry.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    // Build the environment filter
    let mut filter = EnvFilter::try_new(&config.level)?;

    // Add per-module filters
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }

    match config.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init json logging: {}", e))?;
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init pretty logging: {}", e))?;
        }
        LogFormat::Compact => {
            fmt()
                .compact()
                .with_env_filter(filter)
                .with_thread_names(config.include_thread)
                .with_target(config.include_target)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to init compact logging: {}", e))?;
        }
    }

    Ok(())
}
