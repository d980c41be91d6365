//! Configuration loading and validation for the storefront service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::telemetry::{TelemetrySettings, TransportConfig};

/// Validated storefront configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logical service name reported as `service.name` on every signal.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP/gRPC collector address, e.g. `otel-collector:4317`. **Required.**
    pub otel_exporter_otlp_endpoint: String,

    /// When `false`, the collector is reached over TLS.
    #[serde(default = "default_insecure_mode")]
    pub insecure_mode: bool,

    /// PEM bundle used to verify the collector when TLS is on. System roots
    /// are used when unset.
    #[serde(default)]
    pub otel_ca_cert_path: Option<String>,

    /// Upper bound (seconds) on a single export call to the collector.
    #[serde(default = "default_export_timeout")]
    pub otel_export_timeout_secs: u64,

    /// How often (seconds) the metric pipeline collects and exports.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// `host:port` of the Redis instance holding the last-order cache.
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,

    /// SQLite connection URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_service_name() -> String {
    "storefront".into()
}
fn default_insecure_mode() -> bool {
    true
}
fn default_export_timeout() -> u64 {
    10
}
fn default_metrics_interval() -> u64 {
    10
}
fn default_redis_addr() -> String {
    "127.0.0.1:6379".into()
}
fn default_database_url() -> String {
    "sqlite://ecommerce.db".into()
}
fn default_http_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Resolve the collector transport once, from `INSECURE_MODE` and
    /// `OTEL_CA_CERT_PATH`.
    pub fn transport(&self) -> TransportConfig {
        if self.insecure_mode {
            TransportConfig::Insecure
        } else {
            TransportConfig::Tls {
                ca_cert: self.otel_ca_cert_path.as_ref().map(PathBuf::from),
            }
        }
    }

    /// The subset of configuration the telemetry pipelines need.
    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            service_name: self.service_name.clone(),
            endpoint: self.otel_exporter_otlp_endpoint.clone(),
            transport: self.transport(),
            export_timeout: Duration::from_secs(self.otel_export_timeout_secs),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            log_level: self.log_level.clone(),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.service_name, "SERVICE_NAME")?;
        ensure_non_empty(&self.otel_exporter_otlp_endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        ensure_non_empty(&self.redis_addr, "REDIS_ADDR")?;
        ensure_non_empty(&self.database_url, "DATABASE_URL")?;

        if self.metrics_interval_secs == 0 {
            anyhow::bail!("METRICS_INTERVAL_SECS must be > 0");
        }
        if self.otel_export_timeout_secs == 0 {
            anyhow::bail!("OTEL_EXPORT_TIMEOUT_SECS must be > 0");
        }
        if let Some(path) = &self.otel_ca_cert_path {
            ensure_non_empty(path, "OTEL_CA_CERT_PATH")?;
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            service_name: default_service_name(),
            otel_exporter_otlp_endpoint: "otel-collector:4317".into(),
            insecure_mode: default_insecure_mode(),
            otel_ca_cert_path: None,
            otel_export_timeout_secs: default_export_timeout(),
            metrics_interval_secs: default_metrics_interval(),
            redis_addr: default_redis_addr(),
            database_url: default_database_url(),
            http_port: default_http_port(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_service_name(), "storefront");
        assert!(default_insecure_mode());
        assert_eq!(default_export_timeout(), 10);
        assert_eq!(default_metrics_interval(), 10);
        assert_eq!(default_redis_addr(), "127.0.0.1:6379");
        assert_eq!(default_database_url(), "sqlite://ecommerce.db");
        assert_eq!(default_http_port(), 8080);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn validate_accepts_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_endpoint() {
        let cfg = Config {
            otel_exporter_otlp_endpoint: " ".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_metrics_interval() {
        let cfg = Config {
            metrics_interval_secs: 0,
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn insecure_mode_selects_plaintext_transport() {
        assert_eq!(valid().transport(), TransportConfig::Insecure);
    }

    #[test]
    fn secure_mode_carries_ca_path() {
        let cfg = Config {
            insecure_mode: false,
            otel_ca_cert_path: Some("/etc/otel/ca.pem".into()),
            ..valid()
        };
        assert_eq!(
            cfg.transport(),
            TransportConfig::Tls {
                ca_cert: Some(PathBuf::from("/etc/otel/ca.pem"))
            }
        );
    }

    #[test]
    fn telemetry_settings_copy_intervals() {
        let settings = valid().telemetry_settings();
        assert_eq!(settings.metrics_interval, Duration::from_secs(10));
        assert_eq!(settings.export_timeout, Duration::from_secs(10));
        assert_eq!(settings.service_name, "storefront");
    }
}
