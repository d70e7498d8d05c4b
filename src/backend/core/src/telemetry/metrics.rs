//! Prometheus metrics for authorization decisions and lifecycle cycles.
//!
//! - Decision counters labelled by outcome and action
//! - Membership lookup failure counters by lookup
//! - Row counters for each cleanup operation and per-tenant failure counts
//!
//! # Example
//!
//! ```rust,no_run
//! use appguard_core::telemetry::metrics::{AuthzMetrics, LifecycleMetrics};
//!
//! AuthzMetrics::record_decision("allow_if", "query");
//! LifecycleMetrics::record_rows("ephemeral_deleted", 12);
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for cycle durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
}

/// Holds the Prometheus handle when a recorder was installed.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry {
            prometheus_handle: None,
        });
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = builder.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "appguard_authz_decisions_total",
        "Authorization decisions by outcome and action"
    );
    describe_counter!(
        "appguard_membership_lookup_failures_total",
        "Membership lookups that failed or timed out"
    );
    describe_counter!(
        "appguard_cleanup_rows_total",
        "Rows deleted or recreated by the lifecycle cleanup cycle"
    );
    describe_counter!(
        "appguard_cleanup_tenant_failures_total",
        "Tenants skipped by a cleanup cycle because of an error"
    );
    describe_histogram!(
        "appguard_cleanup_cycle_duration_seconds",
        "Wall time of one cleanup cycle"
    );
    describe_counter!("appguard_errors_total", "Errors by code and category");
}

/// Counters emitted by the policy evaluator.
pub struct AuthzMetrics;

impl AuthzMetrics {
    /// `outcome` is one of `allow`, `allow_if`, `deny`.
    pub fn record_decision(outcome: &'static str, action: &str) {
        counter!(
            "appguard_authz_decisions_total",
            "outcome" => outcome,
            "action" => action.to_string(),
        )
        .increment(1);
    }

    pub fn record_lookup_failure(lookup: &'static str) {
        counter!("appguard_membership_lookup_failures_total", "lookup" => lookup).increment(1);
    }
}

/// Counters emitted by the cleanup cycle.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    pub fn record_rows(operation: &'static str, rows: u64) {
        counter!("appguard_cleanup_rows_total", "operation" => operation).increment(rows);
    }

    pub fn record_tenant_failure() {
        counter!("appguard_cleanup_tenant_failures_total").increment(1);
    }

    pub fn record_cycle_duration(seconds: f64) {
        histogram!("appguard_cleanup_cycle_duration_seconds").record(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let registry = init_metrics(&config, "test").unwrap();
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_helpers_without_recorder() {
        // No recorder installed: every call is a no-op.
        AuthzMetrics::record_decision("deny", "get");
        AuthzMetrics::record_lookup_failure("get_member");
        LifecycleMetrics::record_rows("reseeded", 3);
        LifecycleMetrics::record_tenant_failure();
        LifecycleMetrics::record_cycle_duration(0.2);
    }
}
