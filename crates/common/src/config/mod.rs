//! Configuration management for KycFlow services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Document extraction service configuration
    pub extraction: ExtractionConfig,

    /// Watchlist screening configuration
    pub screening: ScreeningConfig,

    /// Case SLA configuration
    pub sla: SlaConfig,

    /// Pipeline worker configuration
    pub worker: WorkerConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Dashboard page size
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Extraction provider: azure, mock
    #[serde(default = "default_extraction_provider")]
    pub provider: String,

    /// Document intelligence endpoint
    pub endpoint: Option<String>,

    /// API key for the document intelligence service
    pub api_key: Option<String>,

    /// Analysis model to request
    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Overall deadline for one extraction call in seconds
    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Interval between result polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum retries before routing to recapture
    #[serde(default = "default_extraction_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScreeningConfig {
    /// Scores at or above this value classify as HIT
    #[serde(default = "default_hit_threshold")]
    pub hit_threshold: f64,

    /// Scores at or above this value (but below hit) classify as REVIEW
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,

    /// Maximum retries when the watchlist is unavailable
    #[serde(default = "default_screening_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlaConfig {
    /// Review window added to the case creation date
    #[serde(default = "default_sla_window_days")]
    pub window_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of concurrent pipeline workers
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Sleep between empty claim polls, in milliseconds
    #[serde(default = "default_worker_poll_interval")]
    pub poll_interval_ms: u64,

    /// Claims older than this belong to a dead worker and are
    /// re-claimable, in seconds
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_page_size() -> u64 { 25 }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_extraction_provider() -> String { "azure".to_string() }
fn default_extraction_model() -> String { "prebuilt-read".to_string() }
fn default_extraction_timeout() -> u64 { 60 }
fn default_poll_interval() -> u64 { 1000 }
fn default_extraction_retries() -> u32 { 3 }
fn default_hit_threshold() -> f64 { 0.90 }
fn default_review_threshold() -> f64 { 0.70 }
fn default_screening_retries() -> u32 { 3 }
fn default_sla_window_days() -> i64 { 90 }
fn default_worker_count() -> usize { 4 }
fn default_worker_poll_interval() -> u64 { 2000 }
fn default_claim_lease() -> u64 { 600 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "kycflow".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the extraction deadline as Duration
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                page_size: default_page_size(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/kycflow".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            extraction: ExtractionConfig {
                provider: default_extraction_provider(),
                endpoint: None,
                api_key: None,
                model: default_extraction_model(),
                timeout_secs: default_extraction_timeout(),
                poll_interval_ms: default_poll_interval(),
                max_retries: default_extraction_retries(),
            },
            screening: ScreeningConfig {
                hit_threshold: default_hit_threshold(),
                review_threshold: default_review_threshold(),
                max_retries: default_screening_retries(),
            },
            sla: SlaConfig {
                window_days: default_sla_window_days(),
            },
            worker: WorkerConfig {
                count: default_worker_count(),
                poll_interval_ms: default_worker_poll_interval(),
                claim_lease_secs: default_claim_lease(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sla.window_days, 90);
        assert_eq!(config.screening.hit_threshold, 0.90);
        assert_eq!(config.screening.review_threshold, 0.70);
        assert_eq!(config.worker.claim_lease_secs, 600);
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/kycflow");
    }
}
