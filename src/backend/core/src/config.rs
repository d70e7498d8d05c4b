//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppguardError, ErrorCode, Result};
use crate::telemetry::TelemetryConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Authorization evaluator configuration
    #[serde(default)]
    pub authz: AuthzConfig,

    /// Resource lifecycle configuration
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthzConfig {
    /// Upper bound for each membership lookup made during one evaluation
    #[serde(default = "default_membership_timeout", with = "humantime_serde")]
    pub membership_timeout: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            membership_timeout: default_membership_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Whether the cleanup scheduler runs at all
    #[serde(default = "default_lifecycle_enabled")]
    pub enabled: bool,

    /// Time between two cleanup cycles
    #[serde(default = "default_cleanup_interval", with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Run a cycle as soon as the scheduler starts
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,

    /// How often the scheduler checks for due jobs
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            enabled: default_lifecycle_enabled(),
            cleanup_interval: default_cleanup_interval(),
            run_on_start: default_run_on_start(),
            tick_interval: default_tick_interval(),
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_membership_timeout() -> Duration { Duration::from_secs(2) }
fn default_lifecycle_enabled() -> bool { true }
fn default_cleanup_interval() -> Duration { Duration::from_secs(60 * 60) }
fn default_run_on_start() -> bool { true }
fn default_tick_interval() -> Duration { Duration::from_secs(10) }

impl Config {
    /// Load configuration from the environment (`APPGUARD__SECTION__KEY`).
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("APPGUARD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path; environment variables still take precedence.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APPGUARD").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would stall or crash the runtime.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("database.acquire_timeout", self.database.acquire_timeout),
            ("authz.membership_timeout", self.authz.membership_timeout),
            ("lifecycle.cleanup_interval", self.lifecycle.cleanup_interval),
            ("lifecycle.tick_interval", self.lifecycle.tick_interval),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(AppguardError::new(
                    ErrorCode::InvalidConfiguration,
                    format!("{} must be greater than zero", key),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_minimal_document() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/appguard" }
        }))
        .unwrap();

        assert_eq!(cfg.database.max_connections, 20);
        assert_eq!(cfg.database.acquire_timeout, Duration::from_secs(5));
        assert_eq!(cfg.authz.membership_timeout, Duration::from_secs(2));
        assert!(cfg.lifecycle.enabled);
        assert!(cfg.lifecycle.run_on_start);
        assert_eq!(cfg.lifecycle.cleanup_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_database_url_is_required() {
        let result: std::result::Result<Config, _> =
            serde_json::from_value(serde_json::json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://appguard@localhost/appguard"
max_connections = 4

[authz]
membership_timeout = "750ms"

[lifecycle]
cleanup_interval = "15m"
run_on_start = false
"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.database.max_connections, 4);
        assert_eq!(cfg.authz.membership_timeout, Duration::from_millis(750));
        assert_eq!(cfg.lifecycle.cleanup_interval, Duration::from_secs(15 * 60));
        assert!(!cfg.lifecycle.run_on_start);
    }

    #[test]
    fn test_zero_intervals_are_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[database]
url = "postgres://appguard@localhost/appguard"

[lifecycle]
tick_interval = "0s"
"#
        )
        .unwrap();

        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        assert_eq!(err.user_message(), "lifecycle.tick_interval must be greater than zero");

        let mut cfg: Config = serde_json::from_value(serde_json::json!({
            "database": { "url": "postgres://localhost/appguard" }
        }))
        .unwrap();
        assert!(cfg.validate().is_ok());
        cfg.authz.membership_timeout = Duration::ZERO;
        assert_eq!(cfg.validate().unwrap_err().code(), ErrorCode::InvalidConfiguration);
    }
}
