//! The explicit-bucket histogram aggregation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::common::KeyValue;
use crate::metrics::data::{self, Aggregation, HistogramDataPoint, Temporality};
use crate::metrics::exemplar::{ExemplarFilter, FilteredReservoir, ReservoirShape};

use super::aggregate::{
    AggregateTime, AggregateTimeInitiator, AggregationData, AttributeSetFilter,
    ComputeAggregation, InitAggregationData, Measure,
};
use super::{Aggregator, Number, ValueMap};

pub(crate) struct BucketsConfig {
    /// Number of buckets: one more than the number of bounds.
    bucket_count: usize,
    exemplar_filter: ExemplarFilter,
    reservoir_shape: ReservoirShape,
}

#[derive(Default)]
struct BucketsInner<T> {
    counts: Vec<u64>,
    count: u64,
    total: T,
    min: T,
    max: T,
}

/// Per-attribute-set bucketed state, guarded by a short mutex.
///
/// Unlike the scalar aggregators a histogram update touches several fields,
/// so a consistent snapshot needs mutual exclusion rather than per-field
/// atomics.
pub(crate) struct Buckets<T> {
    inner: Mutex<BucketsInner<T>>,
    reservoir: FilteredReservoir<T>,
}

impl<T: Number> Aggregator for Buckets<T> {
    type InitConfig = BucketsConfig;
    /// The measurement value paired with its pre-computed bucket index.
    type PreComputedValue = (T, usize);

    fn create(init: &BucketsConfig) -> Self {
        Buckets {
            inner: Mutex::new(BucketsInner {
                counts: vec![0; init.bucket_count],
                count: 0,
                total: T::default(),
                min: T::max(),
                max: T::min(),
            }),
            reservoir: FilteredReservoir::new(init.exemplar_filter, &init.reservoir_shape),
        }
    }

    fn update(&self, (value, index): (T, usize)) {
        if let Ok(mut this) = self.inner.lock() {
            this.counts[index] += 1;
            this.count += 1;
            this.total += value;
            if value < this.min {
                this.min = value;
            }
            if value > this.max {
                this.max = value;
            }
        }
        self.reservoir.offer(value);
    }

    fn clone_and_reset(&self, init: &BucketsConfig) -> Self {
        let cloned_inner = match self.inner.lock() {
            Ok(mut this) => {
                let snapshot = BucketsInner {
                    counts: std::mem::replace(&mut this.counts, vec![0; init.bucket_count]),
                    count: this.count,
                    total: this.total,
                    min: this.min,
                    max: this.max,
                };
                this.count = 0;
                this.total = T::default();
                this.min = T::max();
                this.max = T::min();
                snapshot
            }
            Err(_) => BucketsInner {
                counts: vec![0; init.bucket_count],
                count: 0,
                total: T::default(),
                min: T::max(),
                max: T::min(),
            },
        };
        Buckets {
            inner: Mutex::new(cloned_inner),
            reservoir: self.reservoir.drain_into_new(),
        }
    }
}

/// Summarizes a set of measurements as a histogram with explicitly defined
/// buckets.
pub(crate) struct Histogram<T: Number> {
    value_map: ValueMap<Buckets<T>>,
    bounds: Vec<f64>,
    record_min_max: bool,
    record_sum: bool,
    init_time: AggregateTimeInitiator,
    temporality: Temporality,
    filter: AttributeSetFilter,
    nan_warned: AtomicBool,
}

impl<T: Number> Histogram<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        temporality: Temporality,
        filter: AttributeSetFilter,
        mut bounds: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
        cardinality_limit: usize,
        exemplar_filter: ExemplarFilter,
    ) -> Self {
        bounds.retain(|v| !v.is_nan());
        bounds.sort_by(|a, b| a.partial_cmp(b).expect("NaNs filtered out"));

        let buckets_config = BucketsConfig {
            bucket_count: bounds.len() + 1,
            exemplar_filter,
            reservoir_shape: ReservoirShape::HistogramAligned(bounds.clone()),
        };

        Histogram {
            value_map: ValueMap::new(buckets_config, cardinality_limit),
            bounds,
            record_min_max,
            record_sum,
            init_time: AggregateTimeInitiator::default(),
            temporality,
            filter,
            nan_warned: AtomicBool::new(false),
        }
    }

    fn point_from(
        &self,
        attributes: Vec<KeyValue>,
        inner: BucketsInner<T>,
        exemplars: Vec<data::Exemplar<T>>,
    ) -> HistogramDataPoint<T> {
        HistogramDataPoint {
            attributes,
            count: inner.count,
            bounds: self.bounds.clone(),
            bucket_counts: inner.counts,
            min: (self.record_min_max && inner.count > 0).then_some(inner.min),
            max: (self.record_min_max && inner.count > 0).then_some(inner.max),
            sum: if self.record_sum {
                inner.total
            } else {
                T::default()
            },
            exemplars,
        }
    }

    fn delta(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.delta());

        self.value_map
            .collect_and_reset(&mut s_data.data_points, |attributes, aggr| {
                let exemplars = aggr.reservoir.collect();
                let inner = aggr.inner.into_inner().unwrap_or_default();
                self.point_from(attributes, inner, exemplars)
            });

        (s_data.data_points.len(), s_data.into_new_boxed())
    }

    fn cumulative(
        &self,
        dest: Option<&mut dyn Aggregation>,
    ) -> (usize, Option<Box<dyn Aggregation>>) {
        let mut s_data = AggregationData::init(self, dest, self.init_time.cumulative());

        self.value_map
            .collect_readonly(&mut s_data.data_points, |attributes, aggr| {
                let exemplars = aggr.reservoir.collect();
                let inner = match aggr.inner.lock() {
                    Ok(this) => BucketsInner {
                        counts: this.counts.clone(),
                        count: this.count,
                        total: this.total,
                        min: this.min,
                        max: this.max,
                    },
                    Err(_) => Default::default(),
                };
                self.point_from(attributes, inner, exemplars)
            });

        (s_data.data_points.len(), s_data.into_new_boxed())
    }
}

impl<T: Number> Measure<T> for Histogram<T> {
    fn call(&self, measurement: T, attrs: &[KeyValue]) {
        if !measurement.is_valid_sample() {
            if !self.nan_warned.swap(true, Ordering::Relaxed) {
                otel_warn!(
                    name: "Histogram.NaNMeasurementDropped",
                    message = "A NaN measurement was recorded and dropped. Only this first occurrence is logged."
                );
            }
            return;
        }

        let f_value = measurement.into_float();
        // partition_point returns an index in [0, bounds.len()], matching
        // bucket `i` covering `(bounds[i-1], bounds[i]]` with the implied
        // overflow bucket at the end.
        let index = self.bounds.partition_point(|&x| x < f_value);

        self.filter.apply(attrs, |filtered| {
            self.value_map.measure((measurement, index), filtered);
        })
    }
}

impl<T: Number> ComputeAggregation for Histogram<T> {
    fn call(&self, dest: Option<&mut dyn Aggregation>) -> (usize, Option<Box<dyn Aggregation>>) {
        match self.temporality {
            Temporality::Delta => self.delta(dest),
            _ => self.cumulative(dest),
        }
    }
}

impl<T: Number> InitAggregationData for Histogram<T> {
    type Aggr = data::Histogram<T>;

    fn create_new(&self, time: AggregateTime) -> Self::Aggr {
        data::Histogram {
            data_points: vec![],
            start_time: time.start,
            time: time.current,
            temporality: self.temporality,
        }
    }

    fn reset_existing(&self, existing: &mut Self::Aggr, time: AggregateTime) {
        existing.data_points.clear();
        existing.start_time = time.start;
        existing.time = time.current;
        existing.temporality = self.temporality;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(hist: &Histogram<u64>) -> Vec<HistogramDataPoint<u64>> {
        let (_, boxed) = ComputeAggregation::call(hist, None);
        let boxed = boxed.unwrap();
        let data = boxed
            .as_any()
            .downcast_ref::<data::Histogram<u64>>()
            .unwrap();
        data.data_points.clone()
    }

    #[test]
    fn bucket_assignment_upper_inclusive() {
        let hist: Histogram<u64> = Histogram::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            vec![5.0, 10.0],
            true,
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );

        for value in [3, 7, 12] {
            Measure::call(&hist, value, &[]);
        }

        let points = collect(&hist);
        assert_eq!(points.len(), 1);
        let point = &points[0];
        assert_eq!(point.bucket_counts, vec![1, 1, 1]);
        assert_eq!(point.count, 3);
        assert_eq!(point.sum, 22);
        assert_eq!(point.min, Some(3));
        assert_eq!(point.max, Some(12));

        // Values equal to a bound fall in the lower bucket.
        let hist: Histogram<u64> = Histogram::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            vec![5.0, 10.0],
            true,
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        Measure::call(&hist, 5, &[]);
        Measure::call(&hist, 10, &[]);
        let points = collect(&hist);
        assert_eq!(points[0].bucket_counts, vec![1, 1, 0]);
    }

    #[test]
    fn delta_resets_buckets() {
        let hist: Histogram<u64> = Histogram::new(
            Temporality::Delta,
            AttributeSetFilter::new(None),
            vec![5.0],
            true,
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        let attrs = [KeyValue::new("k", "v")];

        Measure::call(&hist, 1, &attrs);
        let first = collect(&hist);
        assert_eq!(first[0].count, 1);

        let second = collect(&hist);
        assert!(second.is_empty());
    }

    #[test]
    fn unsorted_bounds_are_normalized() {
        let hist: Histogram<u64> = Histogram::new(
            Temporality::Cumulative,
            AttributeSetFilter::new(None),
            vec![10.0, 5.0],
            true,
            true,
            2000,
            ExemplarFilter::AlwaysOff,
        );
        Measure::call(&hist, 7, &[]);
        let points = collect(&hist);
        assert_eq!(points[0].bounds, vec![5.0, 10.0]);
        assert_eq!(points[0].bucket_counts, vec![0, 1, 0]);
    }
}
