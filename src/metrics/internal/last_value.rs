//! The most-recent-measurement aggregation backing observable gauges.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::KeyValue;
use crate::metrics::data::{self, Aggregation, GaugeDataPoint, Temporality};
use crate::metrics::exemplar::{ExemplarFilter, FilteredReservoir, ReservoirShape};

use super::aggregate::{
    AggregateTime, AggregateTimeInitiator, AggregationData, AttributeSetFilter,
    ComputeAggregation, InitAggregationData, Measure,
};
use super::sum::SumTrackerConfig;
use super::{Aggregator, AtomicTracker, AtomicallyUpdate, Number, ValueMap};

/// Per-attribute-set state that stores the latest value. Reused by
/// [`PrecomputedSum`](super::precomputed_sum::PrecomputedSum).
pub(crate) struct Assign<T>
where
    T: AtomicallyUpdate<T> + Number,
{
    pub(crate) value: T::AtomicTracker,
    pub(crate) reservoir: FilteredReservoir<T>,
}

impl<T> Aggregator for Assign<T>
where
    T: Number,
{
    type InitConfig = SumTrackerConfig;
    type PreComputedValue = T;

    fn create(init: &SumTrackerConfig) -> Self {
        Assign {
            value: T::new_atomic_tracker(T::default()),
            reservoir: FilteredReservoir::new(init.exemplar_filter, &init.reservoir_shape),
        }
    }

    fn update(&self, value: T) {
        self.value.store(value);
        self.reservoir.offer(value);
    }

    fn clone_and_reset(&self, _init: &SumTrackerConfig) -> Self {
        Assign {
            value: T::new_atomic_tracker(self.value.get_and_reset_value()),
            reservoir: self.reservoir.drain_into_new(),
        }
    }
}

/// Summarizes a set of measurements as the last one made.
pub(crate) struct LastValue<T: Number> {
    value_map: ValueMap<Assign<T>>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    nan_warned: AtomicBool,
}

impl<T: Number> LastValue<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        cardinality_limit: usize,
        exemplar_filter: ExemplarFilter,
    ) -> Self {
        LastValue {
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
            nan_warned: AtomicBool::new(false),
        }
    }

    fn delta(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.delta());

        self.value_map
            .collect_and_reset(&mut s_data.data_points, |attributes, aggr| GaugeDataPoint {
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
            .collect_readonly(&mut s_data.data_points, |attributes, aggr| GaugeDataPoint {
                attributes,
                value: aggr.value.get_value(),
                exemplars: aggr.reservoir.collect(),
            });

        (s_data.data_points.len(), s_data.into_new_boxed())
    }
}

impl<T: Number> Measure<T> for LastValue<T> {
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        if !measurement.is_valid_sample() {
            if !self.nan_warned.swap(true, Ordering::Relaxed) {
                otel_warn!(
                    name: "LastValue.NaNMeasurementDropped",
                    message = "A NaN measurement was recorded and dropped. Only this first occurrence is logged."
                );
            }
            return;
        }

        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T: Number> ComputeAggregation for LastValue<T> {
    fn call(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        match self.temporality {
            Temporality::Delta => self.delta(dest),
            _ => self.cumulative(dest),
        }
    }
}

impl<T: Number> InitAggregationData for LastValue<T> {
    type Aggr = data::Gauge<T>;

    fn create_new(&self, time: AggregateTime) -> Self::Aggr {
        data::Gauge {
            data_points: vec![],
            start_time: Some(time.start),
            time: time.current,
        }
    }

    fn reset_existing(&self, existing: &mut Self::Aggr, time: AggregateTime) {
        existing.data_points.clear();
        existing.start_time = Some(time.start);
        existing.time = time.current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_measurement() {
        let last_value: LastValue<i64> = LastValue::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        Measure::call(&last_value, 12, &attrs);
        Measure::call(&last_value, -3, &attrs);

        let (count, boxed) = ComputeAggregation::call(&last_value, None);
        assert_eq!(count, 1);
        let data = boxed.unwrap();
        let gauge = data.as_any().downcast_ref::<data::Gauge<i64>>().unwrap();
        assert_eq!(gauge.data_points[0].value, -3);
    }
}
