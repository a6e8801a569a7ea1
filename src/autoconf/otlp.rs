//! The OTLP exporter configuration surface.
//!
//! Assembly resolves the `otlp` exporter name into handles carrying the
//! negotiated transport settings (protocol, endpoint, headers, compression,
//! timeout). Encoding and transport are supplied by companion crates that
//! replace these registry entries; the built-in handles accept batches so a
//! default-configured SDK runs, and report what they would have sent at
//! debug level.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::OTelSdkResult;
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::InstrumentKind;
use crate::trace::{ExportResult, SpanData, SpanExporter};

use super::props::ConfigProperties;
use super::ConfigError;

const DEFAULT_GRPC_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_HTTP_ENDPOINT: &str = "http://localhost:4318";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// The transport protocol of an OTLP exporter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OtlpProtocol {
    /// OTLP over gRPC; the default.
    #[default]
    Grpc,
    /// OTLP over HTTP with binary protobuf payloads.
    HttpProtobuf,
}

impl FromStr for OtlpProtocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "grpc" => Ok(OtlpProtocol::Grpc),
            "http/protobuf" => Ok(OtlpProtocol::HttpProtobuf),
            other => Err(format!(
                "unrecognized OTLP protocol {other:?}, expected grpc or http/protobuf"
            )),
        }
    }
}

/// The signal an OTLP exporter carries, selecting per-signal property
/// overrides and endpoint paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Span data.
    Traces,
    /// Metric data.
    Metrics,
}

impl Signal {
    fn key(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        }
    }

    fn http_path(&self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
        }
    }
}

/// The resolved transport settings of one OTLP exporter.
#[derive(Clone, Debug, PartialEq)]
pub struct OtlpExporterConfig {
    /// The transport protocol.
    pub protocol: OtlpProtocol,
    /// The endpoint URL batches are sent to.
    pub endpoint: String,
    /// Headers added to every request.
    pub headers: Vec<(String, String)>,
    /// The compression codec, when configured (`gzip`, `zstd`).
    pub compression: Option<String>,
    /// The per-request deadline.
    pub timeout: Duration,
}

impl OtlpExporterConfig {
    /// Resolves the configuration for `signal` from `props`, applying the
    /// per-signal overrides over the `otel.exporter.otlp.*` base keys.
    pub fn from_properties(
        props: &ConfigProperties,
        signal: Signal,
    ) -> Result<Self, ConfigError> {
        let signal_key = |suffix: &str| format!("otel.exporter.otlp.{}.{suffix}", signal.key());
        let base_key = |suffix: &str| format!("otel.exporter.otlp.{suffix}");

        let get = |suffix: &str| {
            props
                .get_string(&signal_key(suffix))
                .or_else(|| props.get_string(&base_key(suffix)))
                .map(str::to_string)
        };

        let protocol = match get("protocol") {
            Some(raw) => {
                raw.parse::<OtlpProtocol>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        key: base_key("protocol"),
                        value: raw,
                        reason,
                    })?
            }
            None => OtlpProtocol::default(),
        };

        let endpoint = match get("endpoint") {
            Some(endpoint) => endpoint,
            None => match protocol {
                OtlpProtocol::Grpc => DEFAULT_GRPC_ENDPOINT.to_string(),
                OtlpProtocol::HttpProtobuf => {
                    format!("{DEFAULT_HTTP_ENDPOINT}{}", signal.http_path())
                }
            },
        };

        let headers = match props.get_string(&signal_key("headers")) {
            Some(_) => props.get_dict(&signal_key("headers"))?,
            None => props.get_dict(&base_key("headers"))?,
        };

        let compression = get("compression");

        let timeout = if props.get_string(&signal_key("timeout")).is_some() {
            props.get_duration(&signal_key("timeout"), DEFAULT_TIMEOUT)?
        } else {
            props.get_duration(&base_key("timeout"), DEFAULT_TIMEOUT)?
        };

        Ok(OtlpExporterConfig {
            protocol,
            endpoint,
            headers,
            compression,
            timeout,
        })
    }
}

/// A span exporter targeting an OTLP endpoint.
///
/// Carries the resolved transport configuration; the wire encoder is
/// supplied by the transport crate replacing this registry entry.
pub struct OtlpSpanExporter {
    config: OtlpExporterConfig,
}

impl OtlpSpanExporter {
    /// An exporter with the given configuration.
    pub fn new(config: OtlpExporterConfig) -> Self {
        OtlpSpanExporter { config }
    }

    /// The resolved transport configuration.
    pub fn config(&self) -> &OtlpExporterConfig {
        &self.config
    }
}

impl fmt::Debug for OtlpSpanExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpSpanExporter")
            .field("endpoint", &self.config.endpoint)
            .field("protocol", &self.config.protocol)
            .finish()
    }
}

impl SpanExporter for OtlpSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        otel_debug!(
            name: "OtlpSpanExporter.Export",
            endpoint = self.config.endpoint.as_str(),
            batch_size = batch.len()
        );
        Box::pin(futures_util::future::ready(Ok(())))
    }
}

/// A metric exporter targeting an OTLP endpoint.
///
/// Carries the resolved transport configuration and the configured
/// temporality preference (cumulative unless overridden).
pub struct OtlpMetricExporter {
    config: OtlpExporterConfig,
    temporality: Temporality,
}

impl OtlpMetricExporter {
    /// An exporter with the given configuration and temporality preference.
    pub fn new(config: OtlpExporterConfig, temporality: Temporality) -> Self {
        OtlpMetricExporter {
            config,
            temporality,
        }
    }

    /// The resolved transport configuration.
    pub fn config(&self) -> &OtlpExporterConfig {
        &self.config
    }
}

impl fmt::Debug for OtlpMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtlpMetricExporter")
            .field("endpoint", &self.config.endpoint)
            .field("protocol", &self.config.protocol)
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl PushMetricExporter for OtlpMetricExporter {
    fn export(&self, metrics: ResourceMetrics) -> BoxFuture<'static, OTelSdkResult> {
        otel_debug!(
            name: "OtlpMetricExporter.Export",
            endpoint = self.config.endpoint.as_str(),
            scope_count = metrics.scope_metrics.len()
        );
        Box::pin(futures_util::future::ready(Ok(())))
    }

    fn shutdown(&self) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.temporality
    }
}

/// Reads the configured temporality preference
/// (`otel.exporter.otlp.metrics.temporality.preference`).
pub(crate) fn metrics_temporality(props: &ConfigProperties) -> Result<Temporality, ConfigError> {
    match props.get_string("otel.exporter.otlp.metrics.temporality.preference") {
        None => Ok(Temporality::Cumulative),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "cumulative" => Ok(Temporality::Cumulative),
            "delta" => Ok(Temporality::Delta),
            _ => Err(ConfigError::InvalidValue {
                key: "otel.exporter.otlp.metrics.temporality.preference".to_string(),
                value: raw.to_string(),
                reason: "expected cumulative or delta".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn props(entries: &[(&str, &str)]) -> ConfigProperties {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigProperties::compute(&[map], std::iter::empty(), &HashMap::new())
    }

    #[test]
    fn defaults_to_grpc_localhost() {
        let config = OtlpExporterConfig::from_properties(&props(&[]), Signal::Traces).unwrap();
        assert_eq!(config.protocol, OtlpProtocol::Grpc);
        assert_eq!(config.endpoint, "http://localhost:4317");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.headers.is_empty());
    }

    #[test]
    fn http_protocol_gets_signal_path() {
        let config = OtlpExporterConfig::from_properties(
            &props(&[("otel.exporter.otlp.protocol", "http/protobuf")]),
            Signal::Metrics,
        )
        .unwrap();
        assert_eq!(config.protocol, OtlpProtocol::HttpProtobuf);
        assert_eq!(config.endpoint, "http://localhost:4318/v1/metrics");
    }

    #[test]
    fn per_signal_overrides_win() {
        let config = OtlpExporterConfig::from_properties(
            &props(&[
                ("otel.exporter.otlp.endpoint", "http://collector:4317"),
                (
                    "otel.exporter.otlp.traces.endpoint",
                    "http://traces-collector:4317",
                ),
                ("otel.exporter.otlp.timeout", "5s"),
                ("otel.exporter.otlp.headers", "tenant=a"),
            ]),
            Signal::Traces,
        )
        .unwrap();
        assert_eq!(config.endpoint, "http://traces-collector:4317");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(
            config.headers,
            vec![("tenant".to_string(), "a".to_string())]
        );
    }

    #[test]
    fn invalid_protocol_is_a_config_error() {
        let result = OtlpExporterConfig::from_properties(
            &props(&[("otel.exporter.otlp.protocol", "carrier-pigeon")]),
            Signal::Traces,
        );
        assert!(result.is_err());
    }
}
