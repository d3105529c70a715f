use serde::{Deserialize, Serialize};

/// Telemetry configuration for observability.
///
/// Metrics are exported over OTLP to a collector (Prometheus, Grafana
/// Agent, an OpenTelemetry collector, ...).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint (e.g., "http://localhost:4317").
    pub otlp_endpoint: String,

    /// Service name attached to every exported metric.
    pub service_name: String,

    /// Enable metrics export (default: true).
    ///
    /// When disabled, `record_metric` is a no-op.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics export interval in seconds (default: 60).
    #[serde(default = "default_export_interval")]
    pub export_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_export_interval() -> u64 {
    60
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "quicd".to_string(),
            enable_metrics: true,
            export_interval_secs: default_export_interval(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.enable_metrics {
            if !(self.otlp_endpoint.starts_with("http://")
                || self.otlp_endpoint.starts_with("https://"))
            {
                errors.push(format!(
                    "telemetry.otlp_endpoint must be an http(s) URL, got '{}'",
                    self.otlp_endpoint
                ));
            }
            if self.export_interval_secs == 0 {
                errors.push("telemetry.export_interval_secs must be > 0".to_string());
            }
        }

        if self.service_name.is_empty() {
            errors.push("telemetry.service_name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
