//! A metric exporter that stores collections in memory, for tests and
//! assertions by embedders.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::instrument::InstrumentKind;

/// Stores every exported [`ResourceMetrics`] for later inspection.
///
/// Clones share storage, so a clone handed to a reader can be observed from
/// the test body.
#[derive(Clone, Default)]
pub struct InMemoryMetricExporter {
    metrics: Arc<Mutex<Vec<ResourceMetrics>>>,
    temporality: Temporality,
    shutdown_calls: Arc<AtomicUsize>,
}

impl fmt::Debug for InMemoryMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricExporter")
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl InMemoryMetricExporter {
    /// An exporter preferring the given temporality.
    pub fn with_temporality(temporality: Temporality) -> Self {
        InMemoryMetricExporter {
            temporality,
            ..Default::default()
        }
    }

    /// Takes the collections exported so far, leaving the store empty.
    pub fn take_finished_metrics(&self) -> Vec<ResourceMetrics> {
        self.metrics
            .lock()
            .map(|mut metrics| metrics.drain(..).collect())
            .unwrap_or_default()
    }

    /// The number of collections exported so far.
    pub fn export_count(&self) -> usize {
        self.metrics.lock().map(|m| m.len()).unwrap_or_default()
    }

    /// The number of times `shutdown` has been invoked.
    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::Relaxed)
    }
}

impl PushMetricExporter for InMemoryMetricExporter {
    fn export(&self, metrics: ResourceMetrics) -> BoxFuture<'static, OTelSdkResult> {
        let result = self
            .metrics
            .lock()
            .map(|mut stored| stored.push(metrics))
            .map_err(|err| OTelSdkError::InternalFailure(format!("poisoned: {err}")));
        Box::pin(futures_util::future::ready(result))
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.shutdown_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.temporality
    }
}
