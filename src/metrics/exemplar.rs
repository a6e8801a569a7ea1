//! Exemplar sampling: raw measurements attached to aggregated points.
//!
//! Each aggregator handle owns a [`FilteredReservoir`]: a pre-filter deciding
//! whether a measurement is offered at all, wrapping a reservoir that decides
//! which offered measurements are kept. Reservoirs consult
//! [`Context::current`] for the active span identity so exemplars can link
//! back to the trace they were recorded in.

use std::sync::Mutex;
use std::time::SystemTime;

use rand::Rng;

use crate::context::Context;
use crate::metrics::data::Exemplar;
use crate::metrics::internal::Number;
use crate::trace::{SpanId, TraceId};

/// Determines which measurements are eligible to become exemplars.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExemplarFilter {
    /// Offer every measurement.
    AlwaysOn,
    /// Offer no measurements.
    AlwaysOff,
    /// Offer only measurements recorded inside a sampled span. The default.
    #[default]
    TraceBased,
}

impl ExemplarFilter {
    fn should_sample(&self) -> bool {
        match self {
            ExemplarFilter::AlwaysOn => true,
            ExemplarFilter::AlwaysOff => false,
            ExemplarFilter::TraceBased => Context::current().has_sampled_span(),
        }
    }
}

/// Describes the reservoir an aggregator handle should create.
#[derive(Clone, Debug)]
pub(crate) enum ReservoirShape {
    /// A random fixed-size reservoir with the given capacity.
    FixedSize(usize),
    /// A latest-seen-per-bucket reservoir aligned with histogram boundaries.
    HistogramAligned(Vec<f64>),
}

impl ReservoirShape {
    /// The fixed-size shape with the default capacity, one slot per
    /// available CPU.
    pub(crate) fn fixed_size() -> Self {
        let size = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        ReservoirShape::FixedSize(size)
    }
}

#[derive(Debug)]
struct Sample<T> {
    value: T,
    time: SystemTime,
    span_id: SpanId,
    trace_id: TraceId,
}

impl<T: Copy> Sample<T> {
    fn record(value: T) -> Self {
        let (span_id, trace_id) = Context::current()
            .span_context()
            .map(|cx| (cx.span_id(), cx.trace_id()))
            .unwrap_or((SpanId::INVALID, TraceId::INVALID));
        Sample {
            value,
            time: SystemTime::now(),
            span_id,
            trace_id,
        }
    }

    fn into_exemplar(self) -> Exemplar<T> {
        Exemplar {
            filtered_attributes: Vec::new(),
            time: self.time,
            value: self.value,
            span_id: self.span_id,
            trace_id: self.trace_id,
        }
    }
}

#[derive(Debug)]
enum ReservoirState<T> {
    /// Naive reservoir sampling over a fixed number of slots.
    FixedSize {
        samples: Vec<Option<Sample<T>>>,
        measurements_seen: usize,
    },
    /// The most recent sample per histogram bucket.
    HistogramAligned {
        bounds: Vec<f64>,
        samples: Vec<Option<Sample<T>>>,
    },
}

/// A filter-wrapped reservoir owned by one aggregator handle.
///
/// `offer` is called on the measurement path and must stay cheap; `collect`
/// drains the reservoir for the point being emitted.
#[derive(Debug)]
pub(crate) struct FilteredReservoir<T> {
    filter: ExemplarFilter,
    state: Mutex<ReservoirState<T>>,
}

impl<T: Number> FilteredReservoir<T> {
    pub(crate) fn new(filter: ExemplarFilter, shape: &ReservoirShape) -> Self {
        let state = match shape {
            ReservoirShape::FixedSize(size) => ReservoirState::FixedSize {
                samples: (0..*size.max(&1)).map(|_| None).collect(),
                measurements_seen: 0,
            },
            ReservoirShape::HistogramAligned(bounds) => ReservoirState::HistogramAligned {
                samples: (0..bounds.len() + 1).map(|_| None).collect(),
                bounds: bounds.clone(),
            },
        };
        FilteredReservoir {
            filter,
            state: Mutex::new(state),
        }
    }

    /// Offer a measurement to the reservoir.
    pub(crate) fn offer(&self, value: T) {
        if !self.filter.should_sample() {
            return;
        }

        let Ok(mut state) = self.state.lock() else {
            return;
        };
        match &mut *state {
            ReservoirState::FixedSize {
                samples,
                measurements_seen,
            } => {
                *measurements_seen += 1;
                let index = if *measurements_seen <= samples.len() {
                    *measurements_seen - 1
                } else {
                    rand::thread_rng().gen_range(0..*measurements_seen)
                };
                if let Some(slot) = samples.get_mut(index) {
                    *slot = Some(Sample::record(value));
                }
            }
            ReservoirState::HistogramAligned { bounds, samples } => {
                let measured = value.into_float();
                let index = bounds.partition_point(|&x| x < measured);
                samples[index] = Some(Sample::record(value));
            }
        }
    }

    /// Drain the collected exemplars for the point being emitted and reset
    /// the reservoir for the next interval.
    pub(crate) fn collect(&self) -> Vec<Exemplar<T>> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        match &mut *state {
            ReservoirState::FixedSize {
                samples,
                measurements_seen,
            } => {
                *measurements_seen = 0;
                samples
                    .iter_mut()
                    .filter_map(|slot| slot.take().map(Sample::into_exemplar))
                    .collect()
            }
            ReservoirState::HistogramAligned { samples, .. } => samples
                .iter_mut()
                .filter_map(|slot| slot.take().map(Sample::into_exemplar))
                .collect(),
        }
    }

    /// Create a reservoir of the same shape holding this reservoir's drained
    /// samples, leaving this one empty.
    ///
    /// Used when a handle is cloned-and-reset at collection time, so the
    /// samples travel with the snapshot.
    pub(crate) fn drain_into_new(&self) -> Self {
        let Ok(mut state) = self.state.lock() else {
            return FilteredReservoir {
                filter: self.filter,
                state: Mutex::new(ReservoirState::FixedSize {
                    samples: Vec::new(),
                    measurements_seen: 0,
                }),
            };
        };
        let drained = match &mut *state {
            ReservoirState::FixedSize {
                samples,
                measurements_seen,
            } => {
                let fresh: Vec<Option<Sample<T>>> = (0..samples.len()).map(|_| None).collect();
                *measurements_seen = 0;
                ReservoirState::FixedSize {
                    samples: std::mem::replace(samples, fresh),
                    measurements_seen: 0,
                }
            }
            ReservoirState::HistogramAligned { bounds, samples } => {
                let fresh: Vec<Option<Sample<T>>> = (0..samples.len()).map(|_| None).collect();
                ReservoirState::HistogramAligned {
                    bounds: bounds.clone(),
                    samples: std::mem::replace(samples, fresh),
                }
            }
        };
        FilteredReservoir {
            filter: self.filter,
            state: Mutex::new(drained),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanContext, TraceFlags, TraceState};

    fn sampled_guard() -> crate::context::ContextGuard {
        Context::new()
            .with_span_context(SpanContext::new(
                TraceId::from(7u128),
                SpanId::from(7u64),
                TraceFlags::SAMPLED,
                false,
                TraceState::NONE,
            ))
            .attach()
    }

    #[test]
    fn trace_based_filter_requires_sampled_span() {
        let reservoir: FilteredReservoir<f64> =
            FilteredReservoir::new(ExemplarFilter::TraceBased, &ReservoirShape::FixedSize(4));

        reservoir.offer(1.0);
        assert!(reservoir.collect().is_empty());

        {
            let _guard = sampled_guard();
            reservoir.offer(2.0);
        }
        let exemplars = reservoir.collect();
        assert_eq!(exemplars.len(), 1);
        assert_eq!(exemplars[0].value, 2.0);
        assert_eq!(exemplars[0].trace_id, TraceId::from(7u128));
    }

    #[test]
    fn always_off_filter_admits_nothing() {
        let reservoir: FilteredReservoir<f64> =
            FilteredReservoir::new(ExemplarFilter::AlwaysOff, &ReservoirShape::FixedSize(4));
        reservoir.offer(1.0);
        assert!(reservoir.collect().is_empty());
    }

    #[test]
    fn fixed_size_reservoir_is_bounded() {
        let reservoir: FilteredReservoir<f64> =
            FilteredReservoir::new(ExemplarFilter::AlwaysOn, &ReservoirShape::FixedSize(2));
        for i in 0..100 {
            reservoir.offer(i as f64);
        }
        assert!(reservoir.collect().len() <= 2);
    }

    #[test]
    fn histogram_reservoir_keeps_latest_per_bucket() {
        let reservoir: FilteredReservoir<f64> = FilteredReservoir::new(
            ExemplarFilter::AlwaysOn,
            &ReservoirShape::HistogramAligned(vec![5.0, 10.0]),
        );
        reservoir.offer(1.0);
        reservoir.offer(3.0);
        reservoir.offer(7.0);
        reservoir.offer(100.0);

        let mut values: Vec<f64> = reservoir.collect().into_iter().map(|e| e.value).collect();
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![3.0, 7.0, 100.0]);
    }

    #[test]
    fn collect_resets_the_reservoir() {
        let reservoir: FilteredReservoir<f64> =
            FilteredReservoir::new(ExemplarFilter::AlwaysOn, &ReservoirShape::FixedSize(4));
        reservoir.offer(1.0);
        assert_eq!(reservoir.collect().len(), 1);
        assert!(reservoir.collect().is_empty());
    }
}
