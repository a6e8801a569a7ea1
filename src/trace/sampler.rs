//! Sampling logic deciding which spans are recorded and exported.

use std::fmt;

use crate::common::KeyValue;
use crate::trace::{Link, SpanContext, SpanKind, TraceId, TraceState};

/// The decision half of a [`SamplingResult`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingDecision {
    /// The span is neither recorded nor exported.
    Drop,
    /// The span is recorded in process but its sampled flag stays clear.
    RecordOnly,
    /// The span is recorded and its sampled flag is set.
    RecordAndSample,
}

/// The output of a [`ShouldSample`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingResult {
    /// The sampling decision for the span being started.
    pub decision: SamplingDecision,
    /// Extra attributes the sampler wants added to the span.
    pub attributes: Vec<KeyValue>,
    /// The trace state to use for the new span's context.
    pub trace_state: TraceState,
}

/// The interface for deciding whether a span is sampled at start time.
pub trait ShouldSample: CloneShouldSample + Send + Sync + fmt::Debug {
    /// Returns the sampling decision for a span about to be created.
    ///
    /// `parent_context` is the context of the parent span if one exists.
    fn should_sample(
        &self,
        parent_context: Option<&SpanContext>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult;
}

/// Allows cloning boxed `ShouldSample` trait objects.
pub trait CloneShouldSample {
    /// Box-clone this sampler.
    fn box_clone(&self) -> Box<dyn ShouldSample>;
}

impl<T> CloneShouldSample for T
where
    T: ShouldSample + Clone + 'static,
{
    fn box_clone(&self) -> Box<dyn ShouldSample> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn ShouldSample> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// The built-in sampling strategies.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Always sample the span.
    AlwaysOn,
    /// Never sample the span.
    AlwaysOff,
    /// Respect the parent span's sampling decision, falling back to the inner
    /// sampler for root spans.
    ParentBased(Box<dyn ShouldSample>),
    /// Sample a given fraction of traces, determined deterministically from
    /// the trace id so all spans of one trace share the decision.
    TraceIdRatioBased(f64),
}

impl ShouldSample for Sampler {
    fn should_sample(
        &self,
        parent_context: Option<&SpanContext>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let decision = match self {
            Sampler::AlwaysOn => SamplingDecision::RecordAndSample,
            Sampler::AlwaysOff => SamplingDecision::Drop,
            Sampler::ParentBased(delegate) => {
                return match parent_context.filter(|cx| cx.is_valid()) {
                    Some(parent) => SamplingResult {
                        decision: if parent.is_sampled() {
                            SamplingDecision::RecordAndSample
                        } else {
                            SamplingDecision::Drop
                        },
                        attributes: Vec::new(),
                        trace_state: parent.trace_state().clone(),
                    },
                    None => delegate.should_sample(
                        parent_context,
                        trace_id,
                        name,
                        span_kind,
                        attributes,
                        links,
                    ),
                }
            }
            Sampler::TraceIdRatioBased(prob) => {
                if *prob >= 1.0 {
                    SamplingDecision::RecordAndSample
                } else if *prob <= 0.0 {
                    SamplingDecision::Drop
                } else {
                    // The trailing 8 bytes of the trace id are already random;
                    // compare them against the scaled probability threshold.
                    let bytes = trace_id.to_bytes();
                    let trailing = u64::from_be_bytes(bytes[8..16].try_into().unwrap_or_default());
                    if trailing < (prob * u64::MAX as f64) as u64 {
                        SamplingDecision::RecordAndSample
                    } else {
                        SamplingDecision::Drop
                    }
                }
            }
        };

        SamplingResult {
            decision,
            attributes: Vec::new(),
            trace_state: parent_context
                .map(|cx| cx.trace_state().clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanId, TraceFlags};

    fn sample(sampler: &Sampler, parent: Option<&SpanContext>, trace_id: u128) -> SamplingDecision {
        sampler
            .should_sample(
                parent,
                TraceId::from(trace_id),
                "op",
                &SpanKind::Internal,
                &[],
                &[],
            )
            .decision
    }

    fn parent(sampled: bool) -> SpanContext {
        SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(1u64),
            TraceFlags::default().with_sampled(sampled),
            true,
            TraceState::NONE,
        )
    }

    #[test]
    fn constant_samplers() {
        assert_eq!(
            sample(&Sampler::AlwaysOn, None, 1),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(sample(&Sampler::AlwaysOff, None, 1), SamplingDecision::Drop);
    }

    #[test]
    fn parent_based_respects_parent() {
        let sampler = Sampler::ParentBased(Box::new(Sampler::AlwaysOff));
        assert_eq!(
            sample(&sampler, Some(&parent(true)), 1),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            sample(&sampler, Some(&parent(false)), 1),
            SamplingDecision::Drop
        );
        // Root spans fall through to the delegate.
        assert_eq!(sample(&sampler, None, 1), SamplingDecision::Drop);
    }

    #[test]
    fn ratio_edges() {
        assert_eq!(
            sample(&Sampler::TraceIdRatioBased(1.0), None, u128::MAX),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            sample(&Sampler::TraceIdRatioBased(0.0), None, 1),
            SamplingDecision::Drop
        );
    }

    #[test]
    fn ratio_is_deterministic_per_trace() {
        let sampler = Sampler::TraceIdRatioBased(0.5);
        for seed in [3u128, 999, 1 << 90, u128::MAX / 7] {
            assert_eq!(sample(&sampler, None, seed), sample(&sampler, None, seed));
        }
    }
}
