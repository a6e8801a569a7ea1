//! Interfaces for exporting finished spans out of the process.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::error::OTelSdkResult;
use crate::resource::Resource;

/// The result of an export attempt.
pub type ExportResult = OTelSdkResult;

/// A sink for batches of finished spans.
///
/// Implementations serialize batches to a wire format or storage backend.
/// The SDK core only depends on this interface; it bounds each call with a
/// deadline and treats failures as losses, leaving retries to the exporter.
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Export the given batch.
    ///
    /// Batched and concurrent calls are not expected; callers serialize
    /// exports per exporter.
    fn export(&mut self, batch: Vec<crate::trace::SpanData>) -> BoxFuture<'static, ExportResult>;

    /// Shuts down the exporter. No further exports will be delivered after
    /// this returns.
    fn shutdown(&mut self) {}

    /// Informs the exporter of the resource its spans were produced under.
    ///
    /// Called at provider build time, before the first export.
    fn set_resource(&mut self, _resource: &Resource) {}
}

impl SpanExporter for Box<dyn SpanExporter> {
    fn export(&mut self, batch: Vec<crate::trace::SpanData>) -> BoxFuture<'static, ExportResult> {
        (**self).export(batch)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn set_resource(&mut self, resource: &Resource) {
        (**self).set_resource(resource)
    }
}
