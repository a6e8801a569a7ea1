//! The pre-computed sum aggregation backing observable counters, whose
//! callbacks report totals rather than increments.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::common::KeyValue;
use crate::metrics::data::{self, Aggregation, SumDataPoint, Temporality};
use crate::metrics::exemplar::{ExemplarFilter, ReservoirShape};

use super::aggregate::{
    AggregateTime, AggregateTimeInitiator, AggregationData, AttributeSetFilter,
    ComputeAggregation, InitAggregationData, Measure,
};
use super::last_value::Assign;
use super::sum::SumTrackerConfig;
use super::{AtomicTracker, Number, ValueMap};

/// Summarizes observed totals as a sum; in delta mode, points report the
/// difference against the totals reported at the previous collection.
pub(crate) struct PrecomputedSum<T: Number> {
    value_map: ValueMap<Assign<T>>,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    monotonic: bool,
    reported: Mutex<HashMap<Vec<KeyValue>, T>>,
}

impl<T: Number> PrecomputedSum<T> {
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        monotonic: bool,
        cardinality_limit: usize,
        exemplar_filter: ExemplarFilter,
    ) -> Self {
        PrecomputedSum {
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
            reported: Mutex::new(Default::default()),
        }
    }

    fn delta(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.delta());

        let mut reported = match self.reported.lock() {
            Ok(r) => r,
            Err(_) => return (0, None),
        };
        let mut new_reported = HashMap::with_capacity(reported.len());

        self.value_map
            .collect_and_reset(&mut s_data.data_points, |attributes, aggr| {
                let value = aggr.value.get_value();
                new_reported.insert(attributes.clone(), value);
                let delta = value - *reported.get(&attributes).unwrap_or(&T::default());
                SumDataPoint {
                    attributes,
                    value: delta,
                    exemplars: aggr.reservoir.collect(),
                }
            });

        *reported = new_reported;
        drop(reported);

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

impl<T: Number> Measure<T> for PrecomputedSum<T> {
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        if !measurement.is_valid_sample() {
            return;
        }

        self.filter.apply(attrs, |filtered| {
            self.value_map.measure(measurement, filtered);
        })
    }
}

impl<T: Number> ComputeAggregation for PrecomputedSum<T> {
    fn call(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        match self.temporality {
            Temporality::Delta => self.delta(dest),
            _ => self.cumulative(dest),
        }
    }
}

impl<T: Number> InitAggregationData for PrecomputedSum<T> {
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

    #[test]
    fn delta_reports_difference_against_previous_total() {
        let sum: PrecomputedSum<u64> = PrecomputedSum::new(
            Temporality::Delta,
            AttributeSetFilter::new(None),
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        Measure::call(&sum, 10, &attrs);
        let (_, first) = ComputeAggregation::call(&sum, None);
        let first = first.unwrap();
        let first = first.as_any().downcast_ref::<data::Sum<u64>>().unwrap();
        assert_eq!(first.data_points[0].value, 10);

        Measure::call(&sum, 14, &attrs);
        let (_, second) = ComputeAggregation::call(&sum, None);
        let second = second.unwrap();
        let second = second.as_any().downcast_ref::<data::Sum<u64>>().unwrap();
        assert_eq!(second.data_points[0].value, 4);
    }

    #[test]
    fn cumulative_reports_observed_total() {
        let sum: PrecomputedSum<u64> = PrecomputedSum::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        Measure::call(&sum, 10, &attrs);
        Measure::call(&sum, 14, &attrs);
        let (_, data) = ComputeAggregation::call(&sum, None);
        let data = data.unwrap();
        let data = data.as_any().downcast_ref::<data::Sum<u64>>().unwrap();
        assert_eq!(data.data_points[0].value, 14);
    }
}
