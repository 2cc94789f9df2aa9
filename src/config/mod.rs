//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the escrow
//! engine service. Configuration covers the ledger access node endpoint,
//! transaction finality bounds, and the automation scheduler cadence.

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ledger access node connection details
    pub ledger: LedgerConfig,
    /// Transaction protocol settings (finality bounds, polling cadence)
    pub engine: EngineConfig,
    /// Automation scheduler settings
    pub scheduler: SchedulerConfig,
}

/// Configuration for the ledger access node connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base URL of the access node REST API (e.g., "http://127.0.0.1:8888")
    pub base_url: String,
    /// Per-request HTTP timeout in seconds
    pub request_timeout_secs: u64,
}

/// Transaction protocol settings.
///
/// `finality_timeout_secs` bounds how long a submitted operation is awaited
/// before the engine reports `TimedOut`. The timeout never cancels the
/// operation ledger-side; it only bounds the wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum time to await finality of a submitted operation, in seconds
    pub finality_timeout_secs: u64,
    /// Interval between finality polls, in milliseconds
    pub finality_poll_ms: u64,
}

/// Automation scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between scheduler ticks, in seconds
    pub tick_interval_secs: u64,
    /// Expiry duration applied to escrows created by recurring payments,
    /// in seconds
    pub recurring_escrow_duration_secs: u64,
    /// Address the scheduler acts as when dispatching tasks
    pub operator: String,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Loads configuration from the TOML file.
    ///
    /// The path defaults to `config/escrowd.toml` and can be overridden via
    /// the `ESCROWD_CONFIG_PATH` environment variable (used by tests).
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(anyhow::Error)` - Failed to load configuration or file doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("ESCROWD_CONFIG_PATH")
            .unwrap_or_else(|_| "config/escrowd.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/escrowd.template.toml config/escrowd.toml\n\
                Then edit config/escrowd.toml with your actual values.",
                config_path
            ))
        }
    }
}

impl Default for Config {
    /// Default configuration suitable for local development and testing.
    fn default() -> Self {
        Self {
            ledger: LedgerConfig {
                base_url: "http://127.0.0.1:8888".to_string(),
                request_timeout_secs: 30,
            },
            engine: EngineConfig {
                finality_timeout_secs: 60,
                finality_poll_ms: 1000,
            },
            scheduler: SchedulerConfig {
                tick_interval_secs: 30,
                recurring_escrow_duration_secs: 7 * 24 * 60 * 60,
                operator: "0xf8d6e0586b0a20c7".to_string(),
            },
        }
    }
}
