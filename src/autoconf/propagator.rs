//! Context propagator identities used during assembly.
//!
//! The SDK core composes propagators and reports which fields they claim;
//! the encode/decode logic for each wire format lives with the transport
//! integrations consuming this interface.

use std::fmt;

/// A named carrier-field propagator.
pub trait TextMapPropagator: Send + Sync + fmt::Debug {
    /// The registry name of this propagator (`tracecontext`, `baggage`, …).
    fn name(&self) -> &'static str;

    /// The carrier fields this propagator reads and writes.
    fn fields(&self) -> &'static [&'static str];
}

/// The W3C TraceContext propagator identity.
#[derive(Clone, Debug, Default)]
pub struct W3CTraceContextPropagator;

impl TextMapPropagator for W3CTraceContextPropagator {
    fn name(&self) -> &'static str {
        "tracecontext"
    }

    fn fields(&self) -> &'static [&'static str] {
        &["traceparent", "tracestate"]
    }
}

/// The W3C Baggage propagator identity.
#[derive(Clone, Debug, Default)]
pub struct W3CBaggagePropagator;

impl TextMapPropagator for W3CBaggagePropagator {
    fn name(&self) -> &'static str {
        "baggage"
    }

    fn fields(&self) -> &'static [&'static str] {
        &["baggage"]
    }
}

/// The ordered composition of the configured propagators.
#[derive(Debug, Default)]
pub struct CompositePropagator {
    propagators: Vec<Box<dyn TextMapPropagator>>,
}

impl CompositePropagator {
    /// Compose `propagators`, preserving order.
    pub fn new(propagators: Vec<Box<dyn TextMapPropagator>>) -> Self {
        CompositePropagator { propagators }
    }

    /// The names of the composed propagators, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.propagators.iter().map(|p| p.name()).collect()
    }

    /// The union of all carrier fields, in first-seen order.
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        for propagator in &self.propagators {
            for field in propagator.fields() {
                if !fields.contains(field) {
                    fields.push(*field);
                }
            }
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_preserves_order_and_dedups_fields() {
        let composite = CompositePropagator::new(vec![
            Box::new(W3CTraceContextPropagator),
            Box::new(W3CBaggagePropagator),
            Box::new(W3CTraceContextPropagator),
        ]);

        assert_eq!(
            composite.names(),
            vec!["tracecontext", "baggage", "tracecontext"]
        );
        assert_eq!(
            composite.fields(),
            vec!["traceparent", "tracestate", "baggage"]
        );
    }
}
