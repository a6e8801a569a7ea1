//! Causal references from one span to others, possibly in different traces.

use crate::common::KeyValue;
use crate::trace::SpanContext;

/// A causal link to another span.
#[derive(Clone, Debug, PartialEq)]
pub struct Link {
    /// The context of the linked span.
    pub span_context: SpanContext,
    /// The attributes describing the link.
    pub attributes: Vec<KeyValue>,
    /// The number of attributes dropped from the link due to limits.
    pub dropped_attributes_count: u32,
}

impl Link {
    /// Create a new link to `span_context` with the given attributes.
    pub fn new(span_context: SpanContext, attributes: Vec<KeyValue>) -> Self {
        Link {
            span_context,
            attributes,
            dropped_attributes_count: 0,
        }
    }
}

/// The bounded link list of a span, tracking how many links were dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanLinks {
    /// The links recorded, in recording order.
    pub links: Vec<Link>,
    /// The number of links dropped due to the span's link limit.
    pub dropped_count: u32,
}

impl SpanLinks {
    pub(crate) fn add_link(&mut self, link: Link) {
        self.links.push(link);
    }
}

impl IntoIterator for SpanLinks {
    type Item = Link;
    type IntoIter = std::vec::IntoIter<Link>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.into_iter()
    }
}
