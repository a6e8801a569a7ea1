//! Generators of span and trace identifiers.

use std::fmt;

use rand::{rngs, Rng, SeedableRng};

use crate::trace::{SpanId, TraceId};

/// Interface for generating the ids carried by [`SpanContext`]s.
///
/// [`SpanContext`]: crate::trace::SpanContext
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;
}

/// Generates ids from a fast thread-local random number generator.
///
/// Zero values are re-drawn; the generator never returns invalid ids.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| loop {
            let candidate = rng.borrow_mut().gen::<u128>();
            if candidate != 0 {
                return TraceId::from(candidate);
            }
        })
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| loop {
            let candidate = rng.borrow_mut().gen::<u64>();
            if candidate != 0 {
                return SpanId::from(candidate);
            }
        })
    }
}

thread_local! {
    static CURRENT_RNG: std::cell::RefCell<rngs::SmallRng> =
        std::cell::RefCell::new(rngs::SmallRng::from_entropy());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let generator = RandomIdGenerator::default();
        let trace_ids: Vec<_> = (0..32).map(|_| generator.new_trace_id()).collect();
        let span_ids: Vec<_> = (0..32).map(|_| generator.new_span_id()).collect();

        assert!(trace_ids.iter().all(|id| *id != TraceId::INVALID));
        assert!(span_ids.iter().all(|id| *id != SpanId::INVALID));

        let mut deduped = trace_ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), trace_ids.len());
    }
}
