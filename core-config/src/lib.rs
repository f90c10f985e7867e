// =====================================================================================
// File: core-config/src/lib.rs
// Description: Centralized configuration management for the Sentinel platform
// =====================================================================================

//! # Core Config Module
//!
//! Layered configuration for the Sentinel transaction compliance platform.
//! Defaults are overridden by `config/{RUN_MODE}.toml`, then `config/local.toml`,
//! then `SENTINEL_`-prefixed environment variables. All sections are validated
//! at startup; a process never runs with an invalid configuration.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::{info, warn};

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Errors raised while loading or validating configuration. Fatal at process
/// start; never raised per-evaluation.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ConfigurationError {
    pub fn invalid<S: Into<String>>(field: S, message: S) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub rulestore: RuleStoreConfig,
    pub llm: LlmConfig,
    pub pipeline: PipelineConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue broker URL; the in-process broker ignores it but deployments
    /// carry it for parity with managed brokers.
    pub broker_url: String,
    /// Name of the evaluation work queue
    pub queue_name: String,
    /// Number of evaluation workers consuming from the queue
    pub worker_count: usize,
    /// Seconds before an unacknowledged job is redelivered
    pub visibility_timeout_secs: u64,
    /// Maximum delivery attempts before a job is dead-lettered
    pub max_deliveries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStoreConfig {
    /// Endpoint of the internal rule corpus
    pub internal_endpoint: String,
    /// Endpoint of the external regulatory corpus
    pub external_endpoint: String,
    /// Per-query results from each retriever before fusion
    pub per_query_top_k: usize,
    /// Retry attempts for remote corpus calls
    pub retry_attempts: u32,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub default_temperature: f64,
    pub max_output_tokens: u32,
    pub timeout_seconds: u64,
    /// Process-wide cap on concurrent upstream calls
    pub global_concurrency: usize,
    /// Per-evaluation cap on concurrent fan-out calls
    pub per_evaluation_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall deadline for one evaluation in seconds
    pub evaluation_deadline_secs: u64,
    /// Cap on rules carried into the LLM stages, by fused score
    pub applicability_rule_cap: usize,
    /// Retrieval truncation after dedup
    pub retrieval_cap: usize,
    /// Days of customer history snapshotted for velocity features
    pub history_window_days: i64,
    /// Optional override of the built-in high-risk country list
    pub high_risk_country_override: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Hours of history scanned by the integrity monitor
    pub lookback_hours: i64,
    /// Seconds between integrity scans
    pub scan_interval_secs: u64,
    /// Demote COMPLETED transactions without an analysis to FAILED
    pub demote_violations: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                workers: None,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/sentinel".to_string(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout: 30,
                idle_timeout: 600,
                max_lifetime: 1800,
            },
            queue: QueueConfig {
                broker_url: "memory://local".to_string(),
                queue_name: "transaction-evaluations".to_string(),
                worker_count: 4,
                visibility_timeout_secs: 180,
                max_deliveries: 3,
            },
            rulestore: RuleStoreConfig {
                internal_endpoint: "http://localhost:6333/internal".to_string(),
                external_endpoint: "http://localhost:6333/external".to_string(),
                per_query_top_k: 10,
                retry_attempts: 2,
                timeout_seconds: 15,
            },
            llm: LlmConfig {
                endpoint: "https://api.openai.com/v1".to_string(),
                api_key: "".to_string(),
                model: "gpt-4o-mini".to_string(),
                default_temperature: 0.0,
                max_output_tokens: 1024,
                timeout_seconds: 60,
                global_concurrency: 64,
                per_evaluation_concurrency: 10,
            },
            pipeline: PipelineConfig {
                evaluation_deadline_secs: 120,
                applicability_rule_cap: 10,
                retrieval_cap: 30,
                history_window_days: 30,
                high_risk_country_override: None,
            },
            monitoring: MonitoringConfig {
                lookback_hours: 24,
                scan_interval_secs: 300,
                demote_violations: false,
            },
        }
    }
}

/// Configuration loader with environment override support
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from files and environment variables
    pub fn load() -> ConfigResult<AppConfig> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        info!("Loading configuration for environment: {}", run_mode);

        let config = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load local config file (for development overrides)
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (with SENTINEL_ prefix)
            .add_source(Environment::with_prefix("SENTINEL").separator("__"))
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;

        Self::validate_config(&app_config)?;

        info!("Configuration loaded successfully");
        Ok(app_config)
    }

    /// Validate critical configuration values
    fn validate_config(config: &AppConfig) -> ConfigResult<()> {
        if config.queue.worker_count == 0 {
            return Err(ConfigurationError::invalid(
                "queue.worker_count",
                "at least one evaluation worker is required",
            ));
        }

        if config.queue.visibility_timeout_secs <= config.pipeline.evaluation_deadline_secs {
            warn!(
                visibility = config.queue.visibility_timeout_secs,
                deadline = config.pipeline.evaluation_deadline_secs,
                "Queue visibility timeout does not exceed the evaluation deadline; \
                 in-flight jobs may be redelivered while still running"
            );
        }

        if config.llm.per_evaluation_concurrency == 0
            || config.llm.per_evaluation_concurrency > config.llm.global_concurrency
        {
            return Err(ConfigurationError::invalid(
                "llm.per_evaluation_concurrency",
                "must be between 1 and llm.global_concurrency",
            ));
        }

        if !(0.0..=1.0).contains(&config.llm.default_temperature) {
            return Err(ConfigurationError::invalid(
                "llm.default_temperature",
                "temperature must be within [0, 1]",
            ));
        }

        if config.pipeline.retrieval_cap == 0 || config.pipeline.applicability_rule_cap == 0 {
            return Err(ConfigurationError::invalid(
                "pipeline",
                "retrieval_cap and applicability_rule_cap must be positive",
            ));
        }

        if let Some(ref countries) = config.pipeline.high_risk_country_override {
            if countries.iter().any(|c| c.len() != 2) {
                return Err(ConfigurationError::invalid(
                    "pipeline.high_risk_country_override",
                    "country codes must be ISO-3166 alpha-2",
                ));
            }
        }

        if config.api_key_missing() {
            warn!("LLM API key is empty - gateway calls will fail authentication");
        }

        Ok(())
    }
}

impl AppConfig {
    fn api_key_missing(&self) -> bool {
        self.llm.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.worker_count, 4);
        assert_eq!(config.pipeline.evaluation_deadline_secs, 120);
        assert_eq!(config.llm.per_evaluation_concurrency, 10);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.queue.queue_name, deserialized.queue.queue_name);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.queue.worker_count = 0;
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_fanout_above_global() {
        let mut config = AppConfig::default();
        config.llm.per_evaluation_concurrency = 128;
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = AppConfig::default();
        config.llm.default_temperature = 1.5;
        assert!(ConfigLoader::validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_country_override() {
        let mut config = AppConfig::default();
        config.pipeline.high_risk_country_override = Some(vec!["IRN".to_string()]);
        assert!(ConfigLoader::validate_config(&config).is_err());

        config.pipeline.high_risk_country_override = Some(vec!["IR".to_string()]);
        assert!(ConfigLoader::validate_config(&config).is_ok());
    }
}
