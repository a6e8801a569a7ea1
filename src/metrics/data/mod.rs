//! Types for delivery of pre-aggregated metric time series data.

use std::{any, borrow::Cow, fmt, time::SystemTime};

use crate::common::KeyValue;
use crate::instrumentation::InstrumentationScope;
use crate::resource::Resource;
use crate::trace::{SpanId, TraceId};

/// Defines the window that an aggregation was calculated over.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Temporality {
    /// A measurement interval that continues to expand forward in time from a
    /// fixed starting point; each point reports everything since process
    /// start.
    #[default]
    Cumulative,

    /// A measurement interval that resets each cycle; each point covers only
    /// the window since the previous collection.
    Delta,
}

/// A collection of [`ScopeMetrics`] and the associated [`Resource`] that
/// produced them.
#[derive(Debug)]
pub struct ResourceMetrics {
    /// The entity that collected the metrics.
    pub resource: Resource,
    /// The collection of metrics with unique scopes.
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl Default for ResourceMetrics {
    fn default() -> Self {
        ResourceMetrics {
            resource: Resource::empty(),
            scope_metrics: Vec::new(),
        }
    }
}

/// A collection of metrics produced by one meter.
#[derive(Debug, Default)]
pub struct ScopeMetrics {
    /// The scope the meter was created with.
    pub scope: InstrumentationScope,
    /// The list of aggregations created by the meter.
    pub metrics: Vec<Metric>,
}

/// One or more aggregated time series from an instrument.
#[derive(Debug)]
pub struct Metric {
    /// The name of the instrument that created this data.
    pub name: Cow<'static, str>,
    /// The description of the instrument, which can be used in documentation.
    pub description: Cow<'static, str>,
    /// The unit in which the instrument reports.
    pub unit: Cow<'static, str>,
    /// The aggregated data from an instrument.
    pub data: Box<dyn Aggregation>,
}

/// The store of data reported by an instrument: one of [`Gauge`], [`Sum`] or
/// [`Histogram`].
pub trait Aggregation: fmt::Debug + any::Any + Send + Sync {
    /// Support downcasting.
    fn as_any(&self) -> &dyn any::Any;
    /// Support downcasting during collection reuse.
    fn as_mut(&mut self) -> &mut dyn any::Any;
}

/// A measurement sampled from a time series providing a raw example of the
/// aggregated values.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar<T> {
    /// Attributes recorded with the measurement but dropped from the point's
    /// attribute set.
    pub filtered_attributes: Vec<KeyValue>,
    /// The time when the measurement was recorded.
    pub time: SystemTime,
    /// The measured value.
    pub value: T,
    /// The span id of the active span when the measurement was recorded, if
    /// one was active and sampled.
    pub span_id: SpanId,
    /// The trace id of the active trace when the measurement was recorded.
    pub trace_id: TraceId,
}

/// The current value of each time series of a gauge-style instrument.
#[derive(Debug)]
pub struct Gauge<T> {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<GaugeDataPoint<T>>,
    /// The time when the time series began.
    pub start_time: Option<SystemTime>,
    /// The time when the time series was recorded.
    pub time: SystemTime,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for Gauge<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
    fn as_mut(&mut self) -> &mut dyn any::Any {
        self
    }
}

/// A single data point of a [`Gauge`].
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeDataPoint<T> {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The value of this data point.
    pub value: T,
    /// The sampled exemplars collected during the time series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// The arithmetic sum of each time series of a counter-style instrument.
#[derive(Debug)]
pub struct Sum<T> {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<SumDataPoint<T>>,
    /// The time when the time series began.
    pub start_time: SystemTime,
    /// The time when the time series was recorded.
    pub time: SystemTime,
    /// The aggregation window of the points.
    pub temporality: Temporality,
    /// Whether the sum only increases.
    pub is_monotonic: bool,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for Sum<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
    fn as_mut(&mut self) -> &mut dyn any::Any {
        self
    }
}

/// A single data point of a [`Sum`].
#[derive(Debug, Clone, PartialEq)]
pub struct SumDataPoint<T> {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The value of this data point.
    pub value: T,
    /// The sampled exemplars collected during the time series.
    pub exemplars: Vec<Exemplar<T>>,
}

/// The bucketed distribution of each time series of a histogram instrument.
#[derive(Debug)]
pub struct Histogram<T> {
    /// Individual aggregated measurements with unique attributes.
    pub data_points: Vec<HistogramDataPoint<T>>,
    /// The time when the time series began.
    pub start_time: SystemTime,
    /// The time when the time series was recorded.
    pub time: SystemTime,
    /// The aggregation window of the points.
    pub temporality: Temporality,
}

impl<T: fmt::Debug + Send + Sync + 'static> Aggregation for Histogram<T> {
    fn as_any(&self) -> &dyn any::Any {
        self
    }
    fn as_mut(&mut self) -> &mut dyn any::Any {
        self
    }
}

/// A single data point of a [`Histogram`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDataPoint<T> {
    /// The set of key value pairs that uniquely identify the time series.
    pub attributes: Vec<KeyValue>,
    /// The number of measurements aggregated into this point.
    pub count: u64,
    /// The strictly increasing upper bounds of the buckets; the overflow
    /// bucket above the last bound is implied.
    pub bounds: Vec<f64>,
    /// The count of measurements that fell in each bucket.
    pub bucket_counts: Vec<u64>,
    /// The smallest measured value, when recorded.
    pub min: Option<T>,
    /// The largest measured value, when recorded.
    pub max: Option<T>,
    /// The sum of measured values.
    pub sum: T,
    /// The sampled exemplars collected during the time series.
    pub exemplars: Vec<Exemplar<T>>,
}
