//! How the exporters reach the collector: plaintext gRPC or TLS.
//!
//! The transport is resolved once from configuration and shared by all three
//! pipelines, so traces, logs and metrics always agree on scheme and trust.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use opentelemetry_otlp::{TonicExporterBuilder, WithExportConfig};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

/// Collector transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    /// Plain HTTP/2. Local collectors and demos.
    Insecure,
    /// TLS, verified against `ca_cert` when given, otherwise the system roots.
    Tls { ca_cert: Option<PathBuf> },
}

impl TransportConfig {
    /// Full endpoint URL for `endpoint`, which may be a bare `host:port` or
    /// already carry a scheme. The scheme always follows the transport.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        let authority = endpoint
            .trim()
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        match self {
            TransportConfig::Insecure => format!("http://{authority}"),
            TransportConfig::Tls { .. } => format!("https://{authority}"),
        }
    }

    /// A tonic exporter builder pointed at `endpoint`, with every export call
    /// bounded by `timeout`.
    ///
    /// The exporter gets a ready-made channel. Left to itself the OTLP crate
    /// reads `OTEL_EXPORTER_OTLP_ENDPOINT` verbatim and ignores the normalised
    /// URL, which breaks the bare `host:port` form.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is not a valid URI or a configured CA bundle
    /// cannot be read.
    pub fn exporter(&self, endpoint: &str, timeout: Duration) -> Result<TonicExporterBuilder> {
        Ok(opentelemetry_otlp::new_exporter()
            .tonic()
            .with_timeout(timeout)
            .with_channel(self.channel(endpoint, timeout)?))
    }

    /// Lazily connecting channel to `endpoint`.
    fn channel(&self, endpoint: &str, timeout: Duration) -> Result<Channel> {
        let url = self.endpoint_url(endpoint);
        let mut target = Endpoint::from_shared(url.clone())
            .with_context(|| format!("invalid collector endpoint {url}"))?
            .timeout(timeout);
        if let Some(tls) = self.tls_config()? {
            target = target
                .tls_config(tls)
                .context("invalid TLS configuration for the collector")?;
        }
        Ok(target.connect_lazy())
    }

    fn tls_config(&self) -> Result<Option<ClientTlsConfig>> {
        let TransportConfig::Tls { ca_cert } = self else {
            return Ok(None);
        };
        let mut tls = ClientTlsConfig::new();
        if let Some(path) = ca_cert {
            let pem = std::fs::read(path)
                .with_context(|| format!("failed to read CA bundle {}", path.display()))?;
            tls = tls.ca_certificate(Certificate::from_pem(pem));
        }
        Ok(Some(tls))
    }
}
