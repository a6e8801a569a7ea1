//! Timestamped annotations recorded on a span.

use std::borrow::Cow;
use std::time::SystemTime;

use crate::common::KeyValue;

/// An event describing a point-in-time occurrence during a span's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// The name of this event.
    pub name: Cow<'static, str>,
    /// The wall clock time at which the event occurred.
    pub timestamp: SystemTime,
    /// The attributes describing the event.
    pub attributes: Vec<KeyValue>,
    /// The number of attributes dropped from the event due to limits.
    pub dropped_attributes_count: u32,
}

impl Event {
    /// Create a new event.
    pub fn new<T: Into<Cow<'static, str>>>(
        name: T,
        timestamp: SystemTime,
        attributes: Vec<KeyValue>,
        dropped_attributes_count: u32,
    ) -> Self {
        Event {
            name: name.into(),
            timestamp,
            attributes,
            dropped_attributes_count,
        }
    }
}

/// The bounded event list of a span, tracking how many events were dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanEvents {
    /// The events recorded, in recording order.
    pub events: Vec<Event>,
    /// The number of events dropped due to the span's event limit.
    pub dropped_count: u32,
}

impl SpanEvents {
    pub(crate) fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

impl IntoIterator for SpanEvents {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}
