//! The tracer: the factory for spans within one instrumentation scope.

use std::borrow::Cow;
use std::time::SystemTime;

use crate::common::KeyValue;
use crate::context::Context;
use crate::instrumentation::InstrumentationScope;
use crate::trace::span::{truncate_attribute, SpanRecording};
use crate::trace::{
    Link, SamplingDecision, SdkTracerProvider, Span, SpanContext, SpanData, SpanId, SpanKind,
    Status,
};

/// Creates spans that share one [`InstrumentationScope`] and the provider's
/// configuration.
#[derive(Clone, Debug)]
pub struct SdkTracer {
    scope: InstrumentationScope,
    provider: SdkTracerProvider,
}

impl SdkTracer {
    pub(crate) fn new(scope: InstrumentationScope, provider: SdkTracerProvider) -> Self {
        SdkTracer { scope, provider }
    }

    /// The scope this tracer was created with.
    pub fn instrumentation_scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    /// Start configuring a new span with the given name.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder::from_name(name)
    }

    /// Start a span with the given name, defaults, and the current context as
    /// parent.
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.span_builder(name).start(self)
    }

    pub(crate) fn build_span(&self, builder: SpanBuilder) -> Span {
        let provider = &self.provider;
        let config = provider.config();
        let span_limits = config.span_limits;

        let parent_context = builder
            .parent_context
            .clone()
            .unwrap_or_else(Context::current);
        let parent_span_context = parent_context
            .span_context()
            .filter(|cx| cx.is_valid())
            .cloned();

        let trace_id = parent_span_context
            .as_ref()
            .map(|cx| cx.trace_id())
            .unwrap_or_else(|| config.id_generator.new_trace_id());
        let span_id = config.id_generator.new_span_id();

        if provider.is_shutdown() {
            let span_context = SpanContext::new(
                trace_id,
                span_id,
                Default::default(),
                false,
                Default::default(),
            );
            return Span::new(span_context, None, self.clone(), span_limits);
        }

        let mut attributes = builder.attributes.unwrap_or_default();
        let links = builder.links.unwrap_or_default();

        let sampling_result = config.sampler.should_sample(
            parent_span_context.as_ref(),
            trace_id,
            &builder.name,
            &builder.span_kind,
            &attributes,
            &links,
        );

        let sampled = sampling_result.decision == SamplingDecision::RecordAndSample;
        let trace_flags = parent_span_context
            .as_ref()
            .map(|cx| cx.trace_flags())
            .unwrap_or_default()
            .with_sampled(sampled);
        let span_context = SpanContext::new(
            trace_id,
            span_id,
            trace_flags,
            false,
            sampling_result.trace_state,
        );

        if sampling_result.decision == SamplingDecision::Drop {
            return Span::new(span_context, None, self.clone(), span_limits);
        }

        attributes.extend(sampling_result.attributes);
        let span_attributes_limit = span_limits.max_attributes_per_span as usize;
        let dropped_attributes_count = attributes.len().saturating_sub(span_attributes_limit);
        attributes.truncate(span_attributes_limit);
        let attributes: Vec<KeyValue> = attributes
            .into_iter()
            .map(|kv| truncate_attribute(kv, &span_limits))
            .collect();

        let links_limit = span_limits.max_links_per_span as usize;
        let dropped_links_count = links.len().saturating_sub(links_limit);
        let mut links = links;
        links.truncate(links_limit);

        let start_time = builder.start_time.unwrap_or_else(SystemTime::now);
        let recording = SpanRecording {
            parent_span_id: parent_span_context
                .as_ref()
                .map(|cx| cx.span_id())
                .unwrap_or(SpanId::INVALID),
            span_kind: builder.span_kind,
            name: builder.name,
            start_time,
            end_time: start_time,
            attributes,
            dropped_attributes_count: dropped_attributes_count as u32,
            events: Default::default(),
            links: crate::trace::SpanLinks {
                links,
                dropped_count: dropped_links_count as u32,
            },
            status: Status::Unset,
        };

        let mut span = Span::new(span_context, Some(recording), self.clone(), span_limits);
        provider.on_span_start(&mut span, &parent_context);
        span
    }

    pub(crate) fn finish_span(&self, span_context: SpanContext, data: SpanRecording) {
        let span_data = SpanData {
            span_context,
            parent_span_id: data.parent_span_id,
            span_kind: data.span_kind,
            name: data.name,
            start_time: data.start_time,
            end_time: data.end_time,
            attributes: data.attributes,
            dropped_attributes_count: data.dropped_attributes_count,
            events: data.events,
            links: data.links,
            status: data.status,
            instrumentation_scope: self.scope.clone(),
        };
        self.provider.on_span_end(span_data);
    }
}

/// Everything needed to start a [`Span`].
#[derive(Clone, Debug, Default)]
pub struct SpanBuilder {
    /// The operation name.
    pub name: Cow<'static, str>,
    /// The operation type; `Internal` when unset.
    pub span_kind: SpanKind,
    /// Explicit parent context; the current context is used when `None`.
    pub parent_context: Option<Context>,
    /// Attributes to record at start.
    pub attributes: Option<Vec<KeyValue>>,
    /// Links to record at start.
    pub links: Option<Vec<Link>>,
    /// Explicit start time; `now` when unset.
    pub start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// A builder for a span with the given name.
    pub fn from_name(name: impl Into<Cow<'static, str>>) -> Self {
        SpanBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the span kind.
    pub fn with_kind(mut self, span_kind: SpanKind) -> Self {
        self.span_kind = span_kind;
        self
    }

    /// Set an explicit parent context.
    pub fn with_parent_context(mut self, cx: Context) -> Self {
        self.parent_context = Some(cx);
        self
    }

    /// Set start attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes = Some(attributes.into_iter().collect());
        self
    }

    /// Set links.
    pub fn with_links(mut self, links: Vec<Link>) -> Self {
        self.links = Some(links);
        self
    }

    /// Set an explicit start time.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Start the span through `tracer`.
    pub fn start(self, tracer: &SdkTracer) -> Span {
        tracer.build_span(self)
    }
}
