//! The metrics half of the SDK: instruments, aggregation, views, readers
//! and exporters.
//!
//! Measurements recorded through instruments are aggregated per attribute
//! set by the aggregation the matching views select, within the cardinality
//! limit of the stream. Readers pull the aggregated data on demand
//! ([`ManualReader`]) or on a schedule ([`PeriodicReader`]) and hand it to
//! their exporter, which chooses the temporality.
//!
//! ```ignore
//! let exporter = InMemoryMetricExporter::default();
//! let provider = SdkMeterProvider::builder()
//!     .with_reader(PeriodicReader::builder(exporter.clone()).build())
//!     .build();
//!
//! let meter = provider.meter("my_app");
//! let counter = meter.u64_counter("power_consumption").with_unit("kWh").build();
//! counter.add(10, &[KeyValue::new("rate", "standard")]);
//! ```

pub(crate) mod aggregation;
pub mod data;
pub mod exemplar;
pub mod exporter;
pub(crate) mod in_memory_exporter;
pub(crate) mod instrument;
pub(crate) mod internal;
pub(crate) mod manual_reader;
pub(crate) mod meter;
pub(crate) mod meter_provider;
pub(crate) mod periodic_reader;
pub(crate) mod pipeline;
pub mod reader;
pub(crate) mod view;

pub use aggregation::Aggregation;
pub use exemplar::ExemplarFilter;
pub use in_memory_exporter::InMemoryMetricExporter;
pub use instrument::{
    Counter, Histogram, Instrument, InstrumentKind, ObservableCounter, ObservableGauge,
    ObservableInstrument, ObservableUpDownCounter, Stream, StreamBuilder, UpDownCounter,
};
pub use manual_reader::{ManualReader, ManualReaderBuilder};
pub use meter::{
    AsyncInstrumentBuilder, Callback, HistogramBuilder, InstrumentBuilder, Meter,
};
pub use exporter::PushMetricExporter;
pub use meter_provider::{MeterProviderBuilder, SdkMeterProvider};
pub use periodic_reader::{PeriodicReader, PeriodicReaderBuilder};
pub use pipeline::{CallbackRegistration, Pipeline};
pub use reader::MetricReader;
pub use view::{new_view, View};

pub use data::Temporality;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::data::{self, ResourceMetrics};
    use super::*;
    use crate::common::KeyValue;
    use crate::resource::Resource;

    fn provider_with_manual_reader(
        temporality: Temporality,
    ) -> (SdkMeterProvider, Arc<ManualReader>) {
        let reader = Arc::new(
            ManualReader::builder()
                .with_temporality(temporality)
                .build(),
        );
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();
        (provider, reader)
    }

    fn collected_sum(reader: &ManualReader) -> data::Sum<u64> {
        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).expect("collect succeeds");
        let metric = &rm.scope_metrics[0].metrics[0];
        let sum = metric
            .data
            .as_any()
            .downcast_ref::<data::Sum<u64>>()
            .expect("sum expected");
        data::Sum {
            data_points: sum.data_points.clone(),
            start_time: sum.start_time,
            time: sum.time,
            temporality: sum.temporality,
            is_monotonic: sum.is_monotonic,
        }
    }

    #[test]
    fn delta_and_cumulative_readers_see_different_series() {
        // Two providers fed identical measurements through readers of
        // different temporalities.
        let (delta_provider, delta_reader) = provider_with_manual_reader(Temporality::Delta);
        let (cumulative_provider, cumulative_reader) =
            provider_with_manual_reader(Temporality::Cumulative);

        let attrs = [KeyValue::new("k", "v")];
        let delta_counter = delta_provider.meter("test").u64_counter("calls").build();
        let cumulative_counter = cumulative_provider
            .meter("test")
            .u64_counter("calls")
            .build();

        delta_counter.add(10, &attrs);
        cumulative_counter.add(10, &attrs);

        let delta_first = collected_sum(&delta_reader);
        let cumulative_first = collected_sum(&cumulative_reader);
        assert_eq!(delta_first.data_points[0].value, 10);
        assert_eq!(cumulative_first.data_points[0].value, 10);

        delta_counter.add(5, &attrs);
        cumulative_counter.add(5, &attrs);

        let delta_second = collected_sum(&delta_reader);
        let cumulative_second = collected_sum(&cumulative_reader);
        assert_eq!(delta_second.data_points[0].value, 5);
        assert_eq!(cumulative_second.data_points[0].value, 15);

        // Delta point N's start is point N-1's end; starts never regress.
        assert_eq!(delta_second.start_time, delta_first.time);
        assert!(delta_second.start_time >= delta_first.start_time);
        // Cumulative keeps the stream start.
        assert_eq!(cumulative_second.start_time, cumulative_first.start_time);

        assert_eq!(delta_first.temporality, Temporality::Delta);
        assert_eq!(cumulative_first.temporality, Temporality::Cumulative);
    }

    #[test]
    fn histogram_boundaries_from_advice() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let histogram = provider
            .meter("test")
            .u64_histogram("latency")
            .with_boundaries(vec![5.0, 10.0])
            .build();

        histogram.record(3, &[]);
        histogram.record(7, &[]);
        histogram.record(12, &[]);

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        let metric = &rm.scope_metrics[0].metrics[0];
        let hist = metric
            .data
            .as_any()
            .downcast_ref::<data::Histogram<u64>>()
            .expect("histogram expected");

        let point = &hist.data_points[0];
        assert_eq!(point.bounds, vec![5.0, 10.0]);
        assert_eq!(point.bucket_counts, vec![1, 1, 1]);
        assert_eq!(point.sum, 22);
        assert_eq!(point.min, Some(3));
        assert_eq!(point.max, Some(12));
        assert_eq!(point.count, 3);
    }

    #[test]
    fn view_aggregation_overrides_advice() {
        let reader = Arc::new(
            ManualReader::builder()
                .with_temporality(Temporality::Cumulative)
                .build(),
        );
        let view = new_view(
            Instrument::new().name("latency"),
            Stream::builder()
                .with_aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![1.0],
                    record_min_max: false,
                })
                .build()
                .unwrap(),
        )
        .unwrap();
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .with_view(view)
            .build();

        let histogram = provider
            .meter("test")
            .u64_histogram("latency")
            .with_boundaries(vec![5.0, 10.0])
            .build();
        histogram.record(3, &[]);

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        let hist = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Histogram<u64>>()
            .expect("histogram expected");
        assert_eq!(hist.data_points[0].bounds, vec![1.0]);
        assert_eq!(hist.data_points[0].min, None);
    }

    #[test]
    fn nan_recording_changes_no_point() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let counter = provider.meter("test").f64_counter("score").build();

        counter.add(2.5, &[]);
        counter.add(f64::NAN, &[]);

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        let sum = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Sum<f64>>()
            .unwrap();
        assert_eq!(sum.data_points.len(), 1);
        assert_eq!(sum.data_points[0].value, 2.5);
    }

    #[test]
    fn cardinality_cap_emits_overflow_series() {
        let reader = Arc::new(ManualReader::builder().build());
        let limit = 10;
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .with_cardinality_limit(limit)
            .build();
        let counter = provider.meter("test").u64_counter("calls").build();

        for i in 0..25_i64 {
            counter.add(1, &[KeyValue::new("series", i)]);
        }

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        let sum = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Sum<u64>>()
            .unwrap();

        assert_eq!(sum.data_points.len(), limit);
        let overflow = sum
            .data_points
            .iter()
            .find(|dp| {
                dp.attributes
                    .iter()
                    .any(|kv| kv.key.as_str() == "otel.metric.overflow")
            })
            .expect("overflow series expected");
        // All measurements beyond the 9 admitted series aggregate here.
        assert_eq!(overflow.value, 25 - 9);
    }

    #[test]
    fn observable_counter_callback_drives_collection() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let meter = provider.meter("test");

        let _observable = meter
            .u64_observable_counter("fd_count")
            .with_callback(|observer| observer.observe(42, &[]))
            .build();

        let sum = collected_sum(&reader);
        assert_eq!(sum.data_points[0].value, 42);
        assert!(sum.is_monotonic);
    }

    #[test]
    fn observable_gauge_uses_last_value() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let meter = provider.meter("test");

        let _gauge = meter
            .i64_observable_gauge("queue_depth")
            .with_callback(|observer| observer.observe(7, &[]))
            .build();

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        let gauge = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Gauge<i64>>()
            .expect("gauge expected");
        assert_eq!(gauge.data_points[0].value, 7);
    }

    #[test]
    fn unregistered_callback_stops_observing() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let meter = provider.meter("test");

        let observable = meter.u64_observable_counter("jobs").build();
        let handle = observable.clone();
        let mut registration = meter
            .register_callback(move || handle.observe(5, &[]))
            .unwrap();

        let sum = collected_sum(&reader);
        assert_eq!(sum.data_points[0].value, 5);

        registration.unregister().unwrap();
        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        // The precomputed value persists from the prior observation but no
        // callback ran; a second unobserved collection reports the same
        // cumulative total.
        let sum = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Sum<u64>>()
            .unwrap();
        assert_eq!(sum.data_points[0].value, 5);
    }

    #[test]
    fn duplicate_instruments_share_a_stream() {
        let (provider, reader) = provider_with_manual_reader(Temporality::Cumulative);
        let meter = provider.meter("test");

        let first = meter.u64_counter("requests").build();
        // Same identity modulo case: shares the stream, first wins.
        let second = meter.u64_counter("Requests").build();

        first.add(1, &[]);
        second.add(2, &[]);

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        assert_eq!(rm.scope_metrics[0].metrics.len(), 1);
        let sum = rm.scope_metrics[0].metrics[0]
            .data
            .as_any()
            .downcast_ref::<data::Sum<u64>>()
            .unwrap();
        assert_eq!(sum.data_points[0].value, 3);
    }

    #[test]
    fn resource_flows_to_collected_metrics() {
        let reader = Arc::new(ManualReader::builder().build());
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .with_resource(Resource::new([KeyValue::new("service.name", "checkout")]))
            .build();
        let counter = provider.meter("test").u64_counter("calls").build();
        counter.add(1, &[]);

        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).unwrap();
        assert_eq!(
            rm.resource.get(&crate::common::Key::new("service.name")),
            Some(crate::common::Value::from("checkout"))
        );
    }

    #[test]
    fn shutdown_is_idempotent() {
        let reader = Arc::new(ManualReader::builder().build());
        let provider = SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();

        assert!(provider.shutdown().is_ok());
        // The cached result is returned; the reader is not shut down twice.
        assert!(provider.shutdown().is_ok());
    }
}
