//! The tracer provider: creation point and shared state for all tracers.
//!
//! The provider owns the span processors. Cloning it creates a new handle to
//! the same provider. `shutdown` is idempotent: the first call flushes and
//! shuts processors down, later calls return the first call's result.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::instrumentation::InstrumentationScope;
use crate::resource::Resource;
use crate::trace::{
    BatchSpanProcessor, Config, IdGenerator, SdkTracer, ShouldSample, SimpleSpanProcessor, Span,
    SpanData, SpanExporter, SpanLimits, SpanProcessor,
};

/// Creator and registry of named [`SdkTracer`] instances.
#[derive(Clone, Debug)]
pub struct SdkTracerProvider {
    inner: Arc<TracerProviderInner>,
}

#[derive(Debug)]
pub(crate) struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
    is_shutdown: AtomicBool,
    shutdown_result: Mutex<Option<OTelSdkResult>>,
}

impl SdkTracerProvider {
    /// Start building a provider.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Create a tracer for the named instrumentation scope.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> SdkTracer {
        self.tracer_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Create a tracer with a fully specified scope.
    pub fn tracer_with_scope(&self, scope: InstrumentationScope) -> SdkTracer {
        SdkTracer::new(scope, self.clone())
    }

    /// The provider configuration.
    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The resource spans are produced under.
    pub fn resource(&self) -> &Resource {
        &self.inner.config.resource
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.inner.processors
    }

    pub(crate) fn on_span_start(&self, span: &mut Span, cx: &Context) {
        for processor in &self.inner.processors {
            processor.on_start(span, cx);
        }
    }

    pub(crate) fn on_span_end(&self, span_data: SpanData) {
        if self.is_shutdown() {
            return;
        }
        match self.inner.processors.split_last() {
            Some((last, rest)) => {
                for processor in rest {
                    processor.on_end(span_data.clone());
                }
                last.on_end(span_data);
            }
            None => {}
        }
    }

    /// Flushes all processors, blocking until each reports completion.
    pub fn force_flush(&self) -> OTelSdkResult {
        let mut errs = vec![];
        for processor in &self.inner.processors {
            if let Err(err) = processor.force_flush() {
                errs.push(err);
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("{errs:?}")))
        }
    }

    /// Shuts down every processor, flushing pending spans first.
    ///
    /// The first call performs the shutdown and caches its result; later
    /// calls return the cached result without touching the processors again.
    pub fn shutdown(&self) -> OTelSdkResult {
        let mut cached = self
            .inner
            .shutdown_result
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if let Some(result) = cached.as_ref() {
            return result.clone();
        }

        self.inner.is_shutdown.store(true, Ordering::Relaxed);
        let mut errs = vec![];
        for processor in &self.inner.processors {
            if let Err(err) = processor.shutdown() {
                otel_debug!(
                    name: "TracerProvider.Shutdown.ProcessorError",
                    error = format!("{err}")
                );
                errs.push(err);
            }
        }

        let result = if errs.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("{errs:?}")))
        };
        *cached = Some(result.clone());
        result
    }
}

impl Default for SdkTracerProvider {
    fn default() -> Self {
        SdkTracerProvider::builder().build()
    }
}

/// Configuration options for a [`SdkTracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Option<Config>,
    sampler: Option<Box<dyn ShouldSample>>,
    id_generator: Option<Box<dyn IdGenerator>>,
    span_limits: Option<SpanLimits>,
    resource: Option<Resource>,
}

impl TracerProviderBuilder {
    /// Add a span processor. Processors run in registration order.
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Add a [`BatchSpanProcessor`] wrapping the exporter.
    pub fn with_batch_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(BatchSpanProcessor::builder(exporter).build())
    }

    /// Add a [`SimpleSpanProcessor`] wrapping the exporter.
    pub fn with_simple_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        self.with_span_processor(SimpleSpanProcessor::new(Box::new(exporter)))
    }

    /// Replace the full configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the sampler.
    pub fn with_sampler<T: ShouldSample + 'static>(mut self, sampler: T) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Set the sampler from an already boxed trait object.
    pub fn with_boxed_sampler(mut self, sampler: Box<dyn ShouldSample>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Set the id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Set the span limits.
    pub fn with_span_limits(mut self, span_limits: SpanLimits) -> Self {
        self.span_limits = Some(span_limits);
        self
    }

    /// Set the resource.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Create the provider, installing the resource into every processor.
    pub fn build(self) -> SdkTracerProvider {
        let mut config = self.config.unwrap_or_default();
        if let Some(sampler) = self.sampler {
            config.sampler = sampler;
        }
        if let Some(id_generator) = self.id_generator {
            config.id_generator = id_generator;
        }
        if let Some(span_limits) = self.span_limits {
            config.span_limits = span_limits;
        }
        if let Some(resource) = self.resource {
            config.resource = resource;
        }

        let mut processors = self.processors;
        for processor in &mut processors {
            processor.set_resource(&config.resource);
        }

        SdkTracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors,
                config,
                is_shutdown: AtomicBool::new(false),
                shutdown_result: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;
    use crate::trace::{InMemorySpanExporter, Sampler};

    #[test]
    fn spans_flow_to_simple_exporter() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        let tracer = provider.tracer("component");
        let mut span = tracer
            .span_builder("operation")
            .with_attributes([KeyValue::new("k", "v")])
            .start(&tracer);
        span.add_event("something happened", vec![]);
        span.end();

        let finished = exporter.get_finished_spans();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "operation");
        assert_eq!(finished[0].events.events.len(), 1);
        assert_eq!(
            finished[0].instrumentation_scope.name(),
            "component"
        );
        provider.shutdown().unwrap();
    }

    #[test]
    fn always_off_sampler_drops_spans() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_sampler(Sampler::AlwaysOff)
            .build();

        let tracer = provider.tracer("component");
        let mut span = tracer.start("operation");
        assert!(!span.is_recording());
        assert!(!span.span_context().is_sampled());
        span.end();

        assert!(exporter.get_finished_spans().is_empty());
        provider.shutdown().unwrap();
    }

    #[test]
    fn child_span_inherits_trace_id() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        let tracer = provider.tracer("component");
        let parent = tracer.start("parent");
        let parent_context = parent.span_context().clone();

        let _guard = Context::new()
            .with_span_context(parent_context.clone())
            .attach();
        let mut child = tracer.start("child");
        assert_eq!(
            child.span_context().trace_id(),
            parent_context.trace_id()
        );
        child.end();
        drop(parent);

        let finished = exporter.get_finished_spans();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].name, "child");
        assert_eq!(finished[0].parent_span_id, parent_context.span_id());
        provider.shutdown().unwrap();
    }

    #[test]
    fn span_attribute_limits_apply() {
        let exporter = InMemorySpanExporter::default();
        let limits = SpanLimits {
            max_attributes_per_span: 2,
            max_attribute_value_length: Some(5),
            ..Default::default()
        };
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .with_span_limits(limits)
            .build();

        let tracer = provider.tracer("component");
        let mut span = tracer.start("operation");
        span.set_attribute(KeyValue::new("a", "truncate-me"));
        span.set_attribute(KeyValue::new("b", 1_i64));
        span.set_attribute(KeyValue::new("c", 2_i64));
        span.end();

        let finished = exporter.get_finished_spans();
        assert_eq!(finished[0].attributes.len(), 2);
        assert_eq!(finished[0].dropped_attributes_count, 1);
        assert_eq!(finished[0].attributes[0], KeyValue::new("a", "trunc"));
        provider.shutdown().unwrap();
    }

    #[test]
    fn shutdown_after_shutdown_returns_cached_result() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        assert!(provider.shutdown().is_ok());
        assert!(provider.shutdown().is_ok());
        assert_eq!(exporter.shutdown_count(), 1);
    }
}
