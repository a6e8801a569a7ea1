//! Provider-wide tracing configuration: sampler, id generation, limits and
//! resource.

use std::env;
use std::str::FromStr;

use crate::resource::Resource;
use crate::trace::{IdGenerator, RandomIdGenerator, Sampler, ShouldSample, SpanLimits};

/// Tracer configuration shared by all tracers of one provider.
#[derive(Debug)]
pub struct Config {
    /// The sampler consulted when spans start.
    pub sampler: Box<dyn ShouldSample>,

    /// The generator for span and trace ids.
    pub id_generator: Box<dyn IdGenerator>,

    /// Limits on per-span data.
    pub span_limits: SpanLimits,

    /// The entity producing the telemetry.
    pub resource: Resource,
}

impl Default for Config {
    /// The default configuration: parent-based always-on sampling, random
    /// ids, standard limits, default resource. Span limits honor the
    /// standard environment variables when set.
    fn default() -> Self {
        let mut config = Config {
            sampler: Box::new(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
            id_generator: Box::<RandomIdGenerator>::default(),
            span_limits: SpanLimits::default(),
            resource: Resource::default(),
        };

        if let Some(max_attributes_per_span) = env::var("OTEL_SPAN_ATTRIBUTE_COUNT_LIMIT")
            .ok()
            .and_then(|count_limit| u32::from_str(&count_limit).ok())
        {
            config.span_limits.max_attributes_per_span = max_attributes_per_span;
        }

        if let Some(max_events_per_span) = env::var("OTEL_SPAN_EVENT_COUNT_LIMIT")
            .ok()
            .and_then(|max_events| u32::from_str(&max_events).ok())
        {
            config.span_limits.max_events_per_span = max_events_per_span;
        }

        if let Some(max_links_per_span) = env::var("OTEL_SPAN_LINK_COUNT_LIMIT")
            .ok()
            .and_then(|max_links| u32::from_str(&max_links).ok())
        {
            config.span_limits.max_links_per_span = max_links_per_span;
        }

        if let Some(max_attribute_value_length) = env::var("OTEL_ATTRIBUTE_VALUE_LENGTH_LIMIT")
            .ok()
            .and_then(|max_len| u32::from_str(&max_len).ok())
        {
            config.span_limits.max_attribute_value_length = Some(max_attribute_value_length);
        }

        config
    }
}
