//! A span exporter that stores finished spans in memory, for tests and
//! assertions by embedders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::resource::Resource;
use crate::trace::{ExportResult, SpanData, SpanExporter};

/// Stores every exported batch for later inspection.
///
/// Clones share storage, so a clone handed to a processor can be observed
/// from the test body.
///
/// ```ignore
/// let exporter = InMemorySpanExporter::default();
/// let provider = SdkTracerProvider::builder()
///     .with_simple_exporter(exporter.clone())
///     .build();
/// // ... create spans ...
/// let finished = exporter.get_finished_spans();
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    batches: Arc<Mutex<Vec<Vec<SpanData>>>>,
    resource: Arc<Mutex<Resource>>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl InMemorySpanExporter {
    /// All spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> Vec<SpanData> {
        self.batches
            .lock()
            .map(|batches| batches.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// The size of each batch handed to `export`, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .map(|batches| batches.iter().map(Vec::len).collect())
            .unwrap_or_default()
    }

    /// The number of times `shutdown` has been invoked.
    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::Relaxed)
    }

    /// The resource most recently installed with `set_resource`.
    pub fn resource(&self) -> Resource {
        self.resource
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|_| Resource::empty())
    }

    /// Clears stored spans.
    pub fn reset(&self) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result: OTelSdkResult = self
            .batches
            .lock()
            .map(|mut batches| batches.push(batch))
            .map_err(|err| OTelSdkError::InternalFailure(format!("poisoned: {err}")));
        Box::pin(futures_util::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.shutdown_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut stored) = self.resource.lock() {
            *stored = resource.clone();
        }
    }
}
