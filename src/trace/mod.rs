//! The tracing half of the SDK: span identity, live spans, sampling, and the
//! processor/exporter pipeline.
//!
//! Spans are created by an [`SdkTracer`] obtained from an
//! [`SdkTracerProvider`]. When a recording span ends, its frozen
//! [`SpanData`] snapshot is handed to the provider's [`SpanProcessor`]s; the
//! [`BatchSpanProcessor`] queues and exports them in the background.

mod config;
mod events;
mod export;
mod id_generator;
mod in_memory_exporter;
mod links;
mod provider;
mod sampler;
mod span;
mod span_context;
mod span_limits;
mod span_processor;
mod tracer;

pub use config::Config;
pub use events::{Event, SpanEvents};
pub use export::{ExportResult, SpanExporter};
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use in_memory_exporter::InMemorySpanExporter;
pub use links::{Link, SpanLinks};
pub use provider::{SdkTracerProvider, TracerProviderBuilder};
pub use sampler::{Sampler, SamplingDecision, SamplingResult, ShouldSample};
pub use span::{Span, SpanData, SpanKind, Status};
pub use span_context::{SpanContext, SpanId, TraceFlags, TraceId, TraceState, TraceStateError};
pub use span_limits::SpanLimits;
pub use span_processor::{
    BatchConfig, BatchSpanProcessor, BatchSpanProcessorBuilder, SimpleSpanProcessor, SpanProcessor,
};
pub use tracer::{SdkTracer, SpanBuilder};
