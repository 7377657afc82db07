//! Metrics configuration

use serde::Deserialize;

/// Configuration for metrics collection and export
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable or disable metrics collection
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint of the OpenTelemetry Collector
    ///
    /// Common values:
    /// - `http://localhost:4318/v1/metrics` (local development)
    /// - `http://otel-collector:4318/v1/metrics` (Docker Compose service name)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_from_ron() {
        let config: MetricsConfig = ron::from_str("(enabled: true)").unwrap();
        assert!(config.enabled);
        assert_eq!(config.endpoint, "http://localhost:4318/v1/metrics");
    }
}
