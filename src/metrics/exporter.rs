//! Interfaces for exporting aggregated metrics out of the process.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::error::OTelSdkResult;
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::instrument::InstrumentKind;

/// A sink that serializes collected metrics to a wire format or storage
/// backend.
///
/// Exporters choose the temporality of the streams handed to them; OTLP
/// backends typically prefer cumulative.
pub trait PushMetricExporter: fmt::Debug + Send + Sync + 'static {
    /// Export the given metrics.
    ///
    /// Ownership of the collected data moves to the exporter; the reader
    /// bounds the call with its export timeout.
    fn export(&self, metrics: ResourceMetrics) -> BoxFuture<'static, OTelSdkResult>;

    /// Flushes any buffered but unexported data.
    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    /// Releases the exporter's resources. No exports follow.
    fn shutdown(&self) -> OTelSdkResult;

    /// The temporality this exporter wants for the given instrument kind.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;
}

impl PushMetricExporter for Box<dyn PushMetricExporter> {
    fn export(&self, metrics: ResourceMetrics) -> BoxFuture<'static, OTelSdkResult> {
        (**self).export(metrics)
    }

    fn force_flush(&self) -> OTelSdkResult {
        (**self).force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        (**self).shutdown()
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        (**self).temporality(kind)
    }
}
