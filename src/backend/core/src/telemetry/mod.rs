//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: JSON/pretty/compact output and credential redaction
//! - **Metrics**: authorization decision, membership failure and cleanup counters
//!
//! # Example
//!
//! ```rust,no_run
//! use appguard_core::telemetry::{TelemetryConfig, init_telemetry};
//!
//! let config = TelemetryConfig::default();
//! let _handle = init_telemetry(&config).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redact_secrets, LogFormat, LoggingConfig};
pub use metrics::{
    init_metrics, AuthzMetrics, LifecycleMetrics, MetricsConfig, MetricsRegistry,
};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name for identification in logs and metrics
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "appguard-lifecycle".to_string()
}

fn default_environment() -> String {
    std::env::var("APPGUARD_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize logging and metrics.
///
/// Call once at application startup.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    // Metrics first; the logging layer doesn't depend on it.
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    init_logging(&config.logging, &config.environment)?;

    Ok(TelemetryHandle { metrics })
}

/// Handle for the lifetime of the telemetry stack.
pub struct TelemetryHandle {
    /// Metrics handle for rendering the registry
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}
