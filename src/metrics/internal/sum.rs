//! The running-total aggregation backing counters and up-down counters.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::KeyValue;
use crate::metrics::data::{self, Aggregation, SumDataPoint, Temporality};
use crate::metrics::exemplar::{ExemplarFilter, FilteredReservoir, ReservoirShape};

use super::aggregate::{
    AggregateTime, AggregateTimeInitiator, AggregationData, AttributeSetFilter,
    ComputeAggregation, InitAggregationData, Measure,
};
use super::{Aggregator, AtomicTracker, AtomicallyUpdate, Number, ValueMap};

pub(crate) struct SumTrackerConfig {
    pub(crate) exemplar_filter: ExemplarFilter,
    pub(crate) reservoir_shape: ReservoirShape,
}

/// Per-attribute-set state: an atomic accumulator plus an exemplar reservoir.
pub(crate) struct Increment<T>
where
    T: AtomicallyUpdate<T> + Number,
{
    value: T::AtomicTracker,
    reservoir: FilteredReservoir<T>,
}

impl<T> Aggregator for Increment<T>
where
    T: Number,
{
    type InitConfig = SumTrackerConfig;
    type PreComputedValue = T;

    fn create(init: &SumTrackerConfig) -> Self {
        Increment {
            value: T::new_atomic_tracker(T::default()),
            reservoir: FilteredReservoir::new(init.exemplar_filter, &init.reservoir_shape),
        }
    }

    fn update(&self, value: T) {
        self.value.add(value);
        self.reservoir.offer(value);
    }

    fn clone_and_reset(&self, _init: &SumTrackerConfig) -> Self {
        Increment {
            value: T::new_atomic_tracker(self.value.get_and_reset_value()),
            reservoir: self.reservoir.drain_into_new(),
        }
    }
}

/// Summarizes a set of measurements as their arithmetic sum.
pub(crate) struct Sum<T: Number> {
    value_map: ValueMap<Increment<T>>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    monotonic: bool,
    nan_warned: AtomicBool,
    negative_warned: AtomicBool,
}

impl<T: Number> Sum<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        monotonic: bool,
        cardinality_limit: usize,
        exemplar_filter: ExemplarFilter,
    ) -> Self {
        Sum {
            value_map: ValueMap::new(
                SumTrackerConfig {
                    exemplar_filter,
                    reservoir_shape: ReservoirShape::fixed_size(),
                },
                cardinality_limit,
            ),
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
            monotonic,
            nan_warned: AtomicBool::new(false),
            negative_warned: AtomicBool::new(false),
        }
    }

    fn delta(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.delta());

        self.value_map
            .collect_and_reset(&mut s_data.data_points, |attributes, aggr| SumDataPoint {
                attributes,
                value: aggr.value.get_value(),
                exemplars: aggr.reservoir.collect(),
            });

        (s_data.data_points.len(), s_data.into_new_boxed())
    }

    fn cumulative(
        &self,
        dest: Option<&mut dyn Aggregation>,
    ) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.cumulative());

        self.value_map
            .collect_readonly(&mut s_data.data_points, |attributes, aggr| SumDataPoint {
                attributes,
                value: aggr.value.get_value(),
                exemplars: aggr.reservoir.collect(),
            });

        (s_data.data_points.len(), s_data.into_new_boxed())
    }
}

impl<T: Number> Measure<T> for Sum<T> {
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        if !measurement.is_valid_sample() {
            if !self.nan_warned.swap(true, Ordering::Relaxed) {
                otel_warn!(
                    name: "Sum.NaNMeasurementDropped",
                    message = "A NaN measurement was recorded and dropped. Only this first occurrence is logged."
                );
            }
            return;
        }
        if self.monotonic && measurement < T::default() {
            if !self.negative_warned.swap(true, Ordering::Relaxed) {
                otel_warn!(
                    name: "Sum.NegativeMeasurementDropped",
                    message = "A negative measurement was recorded on a monotonic sum and dropped. Only this first occurrence is logged."
                );
            }
            return;
        }

        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T: Number> ComputeAggregation for Sum<T> {
    fn call(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        match self.temporality {
            Temporality::Delta => self.delta(dest),
            _ => self.cumulative(dest),
        }
    }
}

impl<T: Number> InitAggregationData for Sum<T> {
    type Aggr = data::Sum<T>;

    fn create_new(&self, time: AggregateTime) -> Self::Aggr {
        data::Sum {
            data_points: vec![],
            start_time: time.start,
            time: time.current,
            temporality: self.temporality,
            is_monotonic: self.monotonic,
        }
    }

    fn reset_existing(&self, existing: &mut Self::Aggr, time: AggregateTime) {
        existing.data_points.clear();
        existing.start_time = time.start;
        existing.time = time.current;
        existing.temporality = self.temporality;
        existing.is_monotonic = self.monotonic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sum: &Sum<u64>, value: u64, attrs: &[KeyValue]) {
        Measure::call(sum, value, attrs);
    }

    fn collect(sum: &Sum<u64>) -> data::Sum<u64> {
        let (count, boxed) = ComputeAggregation::call(sum, None);
        let boxed = boxed.expect("fresh aggregation expected");
        let data = boxed
            .as_any()
            .downcast_ref::<data::Sum<u64>>()
            .expect("sum aggregation");
        assert_eq!(count, data.data_points.len());
        data::Sum {
            data_points: data.data_points.clone(),
            start_time: data.start_time,
            time: data.time,
            temporality: data.temporality,
            is_monotonic: data.is_monotonic,
        }
    }

    fn point_value(data: &data::Sum<u64>, attrs: &[KeyValue]) -> Option<u64> {
        data.data_points
            .iter()
            .find(|dp| dp.attributes == attrs)
            .map(|dp| dp.value)
    }

    #[test]
    fn delta_resets_between_collections() {
        let sum: Sum<u64> = Sum::new(
            Temporality::Delta,
            AttributeSetFilter::new(None),
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        record(&sum, 10, &attrs);
        let first = collect(&sum);
        assert_eq!(point_value(&first, &attrs), Some(10));

        record(&sum, 5, &attrs);
        let second = collect(&sum);
        assert_eq!(point_value(&second, &attrs), Some(5));

        // Delta windows chain: second start == first end.
        assert_eq!(second.start_time, first.time);
    }

    #[test]
    fn cumulative_accumulates_across_collections() {
        let sum: Sum<u64> = Sum::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        record(&sum, 10, &attrs);
        let first = collect(&sum);
        assert_eq!(point_value(&first, &attrs), Some(10));

        record(&sum, 5, &attrs);
        let second = collect(&sum);
        assert_eq!(point_value(&second, &attrs), Some(15));
        assert_eq!(second.start_time, first.start_time);
    }

    #[test]
    fn attribute_order_maps_to_one_series() {
        let sum: Sum<u64> = Sum::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        record(&sum, 1, &[KeyValue::new("a", 1_i64), KeyValue::new("b", 2_i64)]);
        record(&sum, 1, &[KeyValue::new("b", 2_i64), KeyValue::new("a", 1_i64)]);

        let data = collect(&sum);
        assert_eq!(data.data_points.len(), 1);
        assert_eq!(data.data_points[0].value, 2);
    }

    #[test]
    fn nan_measurement_is_dropped() {
        let sum: Sum<f64> = Sum::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            false,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];
        Measure::call(&sum, 2.5, &attrs);
        Measure::call(&sum, f64::NAN, &attrs);

        let (count, boxed) = ComputeAggregation::call(&sum, None);
        assert_eq!(count, 1);
        let data = boxed.unwrap();
        let data = data.as_any().downcast_ref::<data::Sum<f64>>().unwrap();
        assert_eq!(data.data_points[0].value, 2.5);
    }

    #[test]
    fn cardinality_overflow_series() {
        let limit = 10;
        let sum: Sum<u64> = Sum::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            true,
            limit,
            ExemplarFilter::AlwaysOff,
        );

        for i in 0..15_i64 {
            record(&sum, 1, &[KeyValue::new("id", i)]);
        }

        let data = collect(&sum);
        assert_eq!(data.data_points.len(), limit);

        let overflow = data
            .data_points
            .iter()
            .find(|dp| dp.attributes == super::super::STREAM_OVERFLOW_ATTRIBUTES.as_slice())
            .expect("overflow series expected");
        // 9 novel series admitted, the remaining 6 measurements overflowed.
        assert_eq!(overflow.value, 6);
    }
}
