//! The aggregate functions connecting instruments to collected data.
//!
//! Each instrument stream resolves to a pair of functions: a [`Measure`]
//! invoked on the recording hot path and a [`ComputeAggregation`] invoked at
//! collection time. Both are two faces of one shared aggregator value.

use std::mem::replace;
use std::ops::DerefMut;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::common::KeyValue;
use crate::metrics::data::{Aggregation, Temporality};
use crate::metrics::exemplar::ExemplarFilter;

use super::histogram::Histogram;
use super::last_value::LastValue;
use super::precomputed_sum::PrecomputedSum;
use super::sum::Sum;
use super::Number;

/// Receives measurements to be aggregated.
pub(crate) trait Measure<T>: Send + Sync + 'static {
    fn call(&self, measurement: T, attrs: &[KeyValue]);
}

/// Stores the aggregate of measurements into `dest` and returns the number
/// of aggregate data points produced.
pub(crate) trait ComputeAggregation: Send + Sync + 'static {
    /// Compute the new aggregation and store it in `dest`.
    ///
    /// When `dest` is `None` or holds an aggregation of a different type,
    /// the returned option carries a newly allocated aggregation instead.
    fn call(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>);
}

/// The matched pair of functions for one resolved instrument stream.
pub(crate) struct AggregateFns<T> {
    pub(crate) measure: Arc<dyn Measure<T>>,
    pub(crate) collect: Arc<dyn ComputeAggregation>,
}

impl<T, A> From<Arc<A>> for AggregateFns<T>
where
    A: Measure<T> + ComputeAggregation,
{
    fn from(value: Arc<A>) -> Self {
        Self {
            measure: value.clone(),
            collect: value,
        }
    }
}

/// The start and end of one collection window.
pub(crate) struct AggregateTime {
    pub start: SystemTime,
    pub current: SystemTime,
}

/// Tracks the start time of the stream and produces [`AggregateTime`]s for
/// the configured temporality.
///
/// Delta windows chain: each collection's start equals the previous
/// collection's end. Cumulative windows share the stream start time.
pub(crate) struct AggregateTimeInitiator(Mutex<SystemTime>);

impl AggregateTimeInitiator {
    pub(crate) fn delta(&self) -> AggregateTime {
        let current_time = SystemTime::now();
        let start_time = self
            .0
            .lock()
            .map(|mut start| replace(start.deref_mut(), current_time))
            .unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }

    pub(crate) fn cumulative(&self) -> AggregateTime {
        let current_time = SystemTime::now();
        let start_time = self.0.lock().map(|start| *start).unwrap_or(current_time);
        AggregateTime {
            start: start_time,
            current: current_time,
        }
    }
}

impl Default for AggregateTimeInitiator {
    fn default() -> Self {
        Self(Mutex::new(SystemTime::now()))
    }
}

type Filter = Arc<dyn Fn(&KeyValue) -> bool + Send + Sync>;

/// An optional allow-list filter applied to measurement attributes before
/// they key a series.
#[derive(Clone, Default)]
pub(crate) struct AttributeSetFilter {
    filter: Option<Filter>,
}

impl AttributeSetFilter {
    pub(crate) fn new(filter: Option<Filter>) -> Self {
        Self { filter }
    }

    pub(crate) fn apply(&self, attrs: &[KeyValue], run: impl FnOnce(&[KeyValue])) {
        if let Some(filter) = &self.filter {
            let filtered_attrs: Vec<KeyValue> =
                attrs.iter().filter(|kv| filter(kv)).cloned().collect();
            run(&filtered_attrs);
        } else {
            run(attrs);
        };
    }
}

/// Creates or resets the typed aggregation payload a collection writes into.
pub(crate) trait InitAggregationData {
    /// The concrete aggregation this aggregator produces.
    type Aggr: Aggregation;

    /// Create a fresh aggregation for the given window.
    fn create_new(&self, time: AggregateTime) -> Self::Aggr;

    /// Reset an existing aggregation in place for the given window.
    fn reset_existing(&self, existing: &mut Self::Aggr, time: AggregateTime);
}

/// Either a borrowed, reusable aggregation from the reader or a freshly
/// allocated one when the reader had none (or one of another type).
pub(crate) enum AggregationData<'a, A> {
    Borrowed(&'a mut A),
    Owned(A),
}

impl<A: Aggregation> AggregationData<'_, A> {
    pub(crate) fn init<'a>(
        init: &impl InitAggregationData<Aggr = A>,
        dest: Option<&'a mut dyn Aggregation>,
        time: AggregateTime,
    ) -> AggregationData<'a, A> {
        match dest.and_then(|d| d.as_mut().downcast_mut::<A>()) {
            Some(existing) => {
                init.reset_existing(existing, time);
                AggregationData::Borrowed(existing)
            }
            None => AggregationData::Owned(init.create_new(time)),
        }
    }

    pub(crate) fn into_new_boxed(self) -> Option<Box<dyn Aggregation>> {
        match self {
            AggregationData::Borrowed(_) => None,
            AggregationData::Owned(aggr) => Some(Box::new(aggr) as Box<dyn Aggregation>),
        }
    }
}

impl<A> std::ops::Deref for AggregationData<'_, A> {
    type Target = A;

    fn deref(&self) -> &Self::Target {
        match self {
            AggregationData::Borrowed(aggr) => aggr,
            AggregationData::Owned(aggr) => aggr,
        }
    }
}

impl<A> std::ops::DerefMut for AggregationData<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            AggregationData::Borrowed(aggr) => aggr,
            AggregationData::Owned(aggr) => aggr,
        }
    }
}

/// Builds the aggregate functions for one resolved stream.
pub(crate) struct AggregateBuilder<T> {
    /// The temporality used for the returned aggregate functions.
    temporality: Temporality,

    /// The attribute filter the aggregate functions apply to measurements.
    filter: AttributeSetFilter,

    /// The maximum number of series the stream may emit, overflow included.
    cardinality_limit: usize,

    /// Which measurements are offered to exemplar reservoirs.
    exemplar_filter: ExemplarFilter,

    _marker: std::marker::PhantomData<T>,
}

impl<T: Number> AggregateBuilder<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: Option<Filter>,
        cardinality_limit: usize,
        exemplar_filter: ExemplarFilter,
    ) -> Self {
        AggregateBuilder {
            temporality,
            filter: AttributeSetFilter::new(filter),
            cardinality_limit,
            exemplar_filter,
            _marker: std::marker::PhantomData,
        }
    }

    /// A last-value aggregate function.
    pub(crate) fn last_value(&self) -> AggregateFns<T> {
        Arc::new(LastValue::new(
            self.temporality,
            self.filter.clone(),
            self.cardinality_limit,
            self.exemplar_filter,
        ))
        .into()
    }

    /// A precomputed-sum aggregate function for observable counters.
    pub(crate) fn precomputed_sum(&self, monotonic: bool) -> AggregateFns<T> {
        Arc::new(PrecomputedSum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.cardinality_limit,
            self.exemplar_filter,
        ))
        .into()
    }

    /// A sum aggregate function.
    pub(crate) fn sum(&self, monotonic: bool) -> AggregateFns<T> {
        Arc::new(Sum::new(
            self.temporality,
            self.filter.clone(),
            monotonic,
            self.cardinality_limit,
            self.exemplar_filter,
        ))
        .into()
    }

    /// An explicit-bucket histogram aggregate function.
    pub(crate) fn explicit_bucket_histogram(
        &self,
        boundaries: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
    ) -> AggregateFns<T> {
        Arc::new(Histogram::new(
            self.temporality,
            self.filter.clone(),
            boundaries,
            record_min_max,
            record_sum,
            self.cardinality_limit,
            self.exemplar_filter,
        ))
        .into()
    }
}
