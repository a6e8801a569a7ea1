//! The live, mutable span owned by a tracer and the immutable snapshot that
//! leaves it when the span ends.
//!
//! A span is exclusively owned by the code that started it. Mutation is only
//! possible until [`Span::end`], which freezes the recorded data into a
//! [`SpanData`] snapshot and hands it to the provider's span processors.

use std::borrow::Cow;
use std::time::SystemTime;

use crate::common::{KeyValue, Value};
use crate::instrumentation::InstrumentationScope;
use crate::trace::{
    Event, Link, SdkTracer, SpanContext, SpanEvents, SpanId, SpanLimits, SpanLinks,
};

/// The operation type of a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Outgoing synchronous remote call.
    Client,
    /// Incoming synchronous remote call.
    Server,
    /// Message sent to a broker.
    Producer,
    /// Message received from a broker.
    Consumer,
    /// In-process operation; the default.
    Internal,
}

impl Default for SpanKind {
    fn default() -> Self {
        SpanKind::Internal
    }
}

/// The status of a finished span.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// No status; the default.
    #[default]
    Unset,
    /// The operation failed.
    Error {
        /// A developer-facing description of the failure.
        description: Cow<'static, str>,
    },
    /// The operation completed successfully, as judged by the application.
    Ok,
}

impl Status {
    /// An error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// The immutable snapshot of a finished span delivered to processors.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// The propagatable identity of the span.
    pub span_context: SpanContext,
    /// The span id of the parent, or [`SpanId::INVALID`] for roots.
    pub parent_span_id: SpanId,
    /// The operation type.
    pub span_kind: SpanKind,
    /// The operation name.
    pub name: Cow<'static, str>,
    /// Wall clock start time.
    pub start_time: SystemTime,
    /// Wall clock end time.
    pub end_time: SystemTime,
    /// Recorded attributes, in recording order.
    pub attributes: Vec<KeyValue>,
    /// Attributes dropped due to the span attribute limit.
    pub dropped_attributes_count: u32,
    /// Recorded events.
    pub events: SpanEvents,
    /// Recorded links.
    pub links: SpanLinks,
    /// Final status.
    pub status: Status,
    /// The scope that produced this span.
    pub instrumentation_scope: InstrumentationScope,
}

/// Recorded state of a live span, absent for non-recording spans.
#[derive(Clone, Debug)]
pub(crate) struct SpanRecording {
    pub(crate) parent_span_id: SpanId,
    pub(crate) span_kind: SpanKind,
    pub(crate) name: Cow<'static, str>,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: SystemTime,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) dropped_attributes_count: u32,
    pub(crate) events: SpanEvents,
    pub(crate) links: SpanLinks,
    pub(crate) status: Status,
}

/// A single operation within a trace.
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    data: Option<SpanRecording>,
    tracer: SdkTracer,
    span_limits: SpanLimits,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        data: Option<SpanRecording>,
        tracer: SdkTracer,
        span_limits: SpanLimits,
    ) -> Self {
        Span {
            span_context,
            data,
            tracer,
            span_limits,
        }
    }

    /// The identity of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Whether this span records events and attributes.
    ///
    /// Always `false` after `end`.
    pub fn is_recording(&self) -> bool {
        self.data.is_some()
    }

    /// Set an attribute of this span, if it is recording.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        let limits = self.span_limits;
        self.with_data(|data| {
            if data.attributes.len() < limits.max_attributes_per_span as usize {
                data.attributes
                    .push(truncate_attribute(attribute, &limits));
            } else {
                data.dropped_attributes_count += 1;
            }
        });
    }

    /// Record an event at the current time.
    pub fn add_event<T>(&mut self, name: T, attributes: Vec<KeyValue>)
    where
        T: Into<Cow<'static, str>>,
    {
        self.add_event_with_timestamp(name, SystemTime::now(), attributes)
    }

    /// Record an event at the given time.
    pub fn add_event_with_timestamp<T>(
        &mut self,
        name: T,
        timestamp: SystemTime,
        mut attributes: Vec<KeyValue>,
    ) where
        T: Into<Cow<'static, str>>,
    {
        let limits = self.span_limits;
        self.with_data(|data| {
            if data.events.events.len() >= limits.max_events_per_span as usize {
                data.events.dropped_count += 1;
                return;
            }

            let event_attributes_limit = limits.max_attributes_per_event as usize;
            let dropped_attributes_count =
                attributes.len().saturating_sub(event_attributes_limit) as u32;
            attributes.truncate(event_attributes_limit);
            let attributes = attributes
                .into_iter()
                .map(|kv| truncate_attribute(kv, &limits))
                .collect();

            data.events.add_event(Event::new(
                name,
                timestamp,
                attributes,
                dropped_attributes_count,
            ));
        });
    }

    /// Record a link to another span.
    pub fn add_link(&mut self, span_context: SpanContext, mut attributes: Vec<KeyValue>) {
        let limits = self.span_limits;
        self.with_data(|data| {
            if data.links.links.len() >= limits.max_links_per_span as usize {
                data.links.dropped_count += 1;
                return;
            }

            let link_attributes_limit = limits.max_attributes_per_link as usize;
            let dropped_attributes_count =
                attributes.len().saturating_sub(link_attributes_limit) as u32;
            attributes.truncate(link_attributes_limit);

            data.links.add_link(Link {
                span_context,
                attributes,
                dropped_attributes_count,
            });
        });
    }

    /// Set the status. `Ok` is final: later status changes are ignored.
    pub fn set_status(&mut self, status: Status) {
        self.with_data(|data| {
            if data.status != Status::Ok {
                data.status = status;
            }
        });
    }

    /// Update the operation name.
    pub fn update_name<T>(&mut self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_data(|data| data.name = new_name.into());
    }

    /// Finish the span at the current time.
    pub fn end(&mut self) {
        self.end_with_timestamp(SystemTime::now());
    }

    /// Finish the span with the given end time.
    ///
    /// The first call freezes the span and delivers its snapshot to the
    /// processors; later calls are no-ops.
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) {
        if let Some(mut data) = self.data.take() {
            data.end_time = timestamp;
            self.tracer.finish_span(self.span_context.clone(), data);
        }
    }

    fn with_data<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut SpanRecording) -> T,
    {
        self.data.as_mut().map(f)
    }
}

impl Drop for Span {
    // An unfinished span still owes its data to the processors.
    fn drop(&mut self) {
        self.end();
    }
}

/// Applies the configured string length limit to an attribute value.
pub(crate) fn truncate_attribute(mut attribute: KeyValue, limits: &SpanLimits) -> KeyValue {
    let Some(max_len) = limits.max_attribute_value_length else {
        return attribute;
    };
    let max_len = max_len as usize;

    attribute.value = match attribute.value {
        Value::String(s) if s.as_str().len() > max_len => {
            let truncated: String = s.as_str().chars().take(max_len).collect();
            Value::String(truncated.into())
        }
        Value::Array(crate::common::Array::String(values)) => {
            Value::Array(crate::common::Array::String(
                values
                    .into_iter()
                    .map(|s| {
                        if s.as_str().len() > max_len {
                            s.as_str().chars().take(max_len).collect::<String>().into()
                        } else {
                            s
                        }
                    })
                    .collect(),
            ))
        }
        other => other,
    };
    attribute
}
