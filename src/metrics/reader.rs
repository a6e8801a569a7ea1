//! Interfaces for reading aggregated metrics out of the SDK.

use std::fmt;
use std::sync::Weak;

use crate::error::OTelSdkResult;
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::instrument::InstrumentKind;
use crate::metrics::pipeline::Pipeline;

/// The interface between the SDK and an exporter.
///
/// Control flow is bi-directional: the SDK initiates `force_flush` and
/// `shutdown` while the reader initiates collection. `register_pipeline`
/// informs the reader it can begin collecting.
///
/// Push-based exporters are typically wrapped in a
/// [`PeriodicReader`](crate::metrics::PeriodicReader); pull-based exporters
/// implement `MetricReader` themselves and collect on demand.
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Registers the reader with the pipeline supplying its metrics.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>);

    /// Gathers all metric data currently held by the SDK into `rm`.
    ///
    /// Returns an error after shutdown.
    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult;

    /// Flushes any pending collected-but-unexported data.
    fn force_flush(&self) -> OTelSdkResult;

    /// Flushes once, then releases the reader's resources.
    fn shutdown(&self) -> OTelSdkResult;

    /// The output temporality for the given instrument kind.
    ///
    /// For readers paired with exporters this is obtained from the exporter.
    fn temporality(&self, kind: InstrumentKind) -> Temporality;
}

impl MetricReader for Box<dyn MetricReader> {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        (**self).register_pipeline(pipeline)
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        (**self).collect(rm)
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

// Shared handles to a reader act as the reader itself; this lets callers
// keep a handle for on-demand collection after installing the reader on a
// provider.
impl<T: MetricReader> MetricReader for std::sync::Arc<T> {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        (**self).register_pipeline(pipeline)
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        (**self).collect(rm)
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

/// Produces metrics for a [`MetricReader`].
pub(crate) trait SdkProducer: fmt::Debug + Send + Sync {
    /// Returns aggregated metrics from a single collection.
    fn produce(&self, rm: &mut ResourceMetrics) -> OTelSdkResult;
}
