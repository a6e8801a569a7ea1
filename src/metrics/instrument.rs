//! Instrument descriptors, view selection inputs, and the measurement
//! handles handed to application code.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use crate::common::{Key, KeyValue};
use crate::instrumentation::InstrumentationScope;
use crate::metrics::aggregation::Aggregation;
use crate::metrics::internal::Measure;

/// The identifier of a group of instruments that all perform the same
/// function.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[non_exhaustive]
pub enum InstrumentKind {
    /// Instruments that record increasing values synchronously.
    Counter,
    /// Instruments that record increasing and decreasing values
    /// synchronously.
    UpDownCounter,
    /// Instruments that record a distribution of values synchronously.
    Histogram,
    /// Instruments that record increasing values in a collection callback.
    ObservableCounter,
    /// Instruments that record increasing and decreasing values in a
    /// collection callback.
    ObservableUpDownCounter,
    /// Instruments that record the current value in a collection callback.
    ObservableGauge,
}

/// Describes the properties an instrument was created with; also the
/// criteria half of a view.
///
/// Empty fields of a criteria instrument match anything.
#[derive(Clone, Default, Debug, PartialEq)]
#[non_exhaustive]
pub struct Instrument {
    /// The human-readable identifier of the instrument.
    pub name: Cow<'static, str>,
    /// Describes the purpose of the instrument.
    pub description: Cow<'static, str>,
    /// The functional group of the instrument.
    pub kind: Option<InstrumentKind>,
    /// The unit of measurement recorded by the instrument.
    pub unit: Cow<'static, str>,
    /// The instrumentation that created the instrument.
    pub scope: InstrumentationScope,
    /// Advisory histogram bucket boundaries supplied at instrument creation.
    ///
    /// Used only when no matching view specifies an aggregation.
    pub advisory_boundaries: Option<Vec<f64>>,
}

impl Instrument {
    /// Create a new criteria instrument with all fields empty.
    pub fn new() -> Self {
        Instrument::default()
    }

    /// Set the instrument name criterion.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the instrument description criterion.
    pub fn description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the instrument kind criterion.
    pub fn kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the instrument unit criterion.
    pub fn unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the instrument scope criterion.
    pub fn scope(mut self, scope: InstrumentationScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether all criteria fields are empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.description.is_empty()
            && self.kind.is_none()
            && self.unit.is_empty()
            && self.scope == InstrumentationScope::default()
    }

    pub(crate) fn matches(&self, other: &Instrument) -> bool {
        self.matches_name(other)
            && self.matches_description(other)
            && self.matches_kind(other)
            && self.matches_unit(other)
            && self.matches_scope(other)
    }

    pub(crate) fn matches_name(&self, other: &Instrument) -> bool {
        self.name.is_empty() || self.name.eq_ignore_ascii_case(other.name.as_ref())
    }

    pub(crate) fn matches_description(&self, other: &Instrument) -> bool {
        self.description.is_empty() || self.description == other.description
    }

    pub(crate) fn matches_kind(&self, other: &Instrument) -> bool {
        self.kind.is_none() || self.kind == other.kind
    }

    pub(crate) fn matches_unit(&self, other: &Instrument) -> bool {
        self.unit.is_empty() || self.unit == other.unit
    }

    pub(crate) fn matches_scope(&self, other: &Instrument) -> bool {
        (self.scope.name().is_empty() || self.scope.name() == other.scope.name())
            && (self.scope.version().is_none() || self.scope.version() == other.scope.version())
            && (self.scope.schema_url().is_none()
                || self.scope.schema_url() == other.scope.schema_url())
    }
}

/// Describes the stream of data an instrument produces after a view applied;
/// the mask half of a view.
#[derive(Default, Debug)]
#[non_exhaustive]
pub struct Stream {
    /// The stream name; the instrument name when unset.
    pub(crate) name: Option<Cow<'static, str>>,
    /// The stream description; the instrument description when unset.
    pub(crate) description: Option<Cow<'static, str>>,
    /// The stream unit; the instrument unit when unset.
    pub(crate) unit: Option<Cow<'static, str>>,
    /// The aggregation to use; the kind default when unset.
    pub(crate) aggregation: Option<Aggregation>,
    /// An allow-list of attribute keys preserved in the stream. `None`
    /// keeps all attributes; an empty set drops all of them.
    pub(crate) allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    /// The maximum number of series, overflow included.
    pub(crate) cardinality_limit: Option<usize>,
}

impl Stream {
    /// Create a builder for a stream mask.
    pub fn builder() -> StreamBuilder {
        StreamBuilder::default()
    }
}

/// A builder for [`Stream`] masks.
#[derive(Default, Debug)]
pub struct StreamBuilder {
    name: Option<Cow<'static, str>>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    aggregation: Option<Aggregation>,
    allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    cardinality_limit: Option<usize>,
}

impl StreamBuilder {
    /// Set the stream name.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the stream description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the stream unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the stream aggregation, overriding the kind default.
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Restrict the attribute keys preserved by the stream.
    pub fn with_allowed_attribute_keys(
        mut self,
        attribute_keys: impl IntoIterator<Item = Key>,
    ) -> Self {
        self.allowed_attribute_keys = Some(Arc::new(attribute_keys.into_iter().collect()));
        self
    }

    /// Set the stream cardinality limit, overflow series included.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = Some(limit);
        self
    }

    /// Build the stream, validating the configuration.
    pub fn build(self) -> Result<Stream, String> {
        if let Some(name) = &self.name {
            if name.is_empty() {
                return Err("stream name must not be empty".to_string());
            }
        }

        if let Some(limit) = self.cardinality_limit {
            if limit == 0 {
                return Err("cardinality limit must be at least 1".to_string());
            }
        }

        if let Some(aggregation) = &self.aggregation {
            aggregation.validate()?;
        }

        Ok(Stream {
            name: self.name,
            description: self.description,
            unit: self.unit,
            aggregation: self.aggregation,
            allowed_attribute_keys: self.allowed_attribute_keys,
            cardinality_limit: self.cardinality_limit,
        })
    }
}

/// The identifying properties of an instrument stream, for duplicate
/// detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct InstrumentId {
    pub(crate) name: Cow<'static, str>,
    pub(crate) description: Cow<'static, str>,
    pub(crate) kind: InstrumentKind,
    pub(crate) unit: Cow<'static, str>,
    /// The underlying numeric type of the instrument.
    pub(crate) number: Cow<'static, str>,
}

impl InstrumentId {
    /// Instrument names are case-insensitive ASCII; normalize to lowercase
    /// for hashing and comparison.
    pub(crate) fn normalize(&mut self) {
        if self.name.chars().any(|c| c.is_ascii_uppercase()) {
            self.name = self.name.to_ascii_lowercase().into();
        }
    }
}

/// The resolved measurement fan-out of a synchronous instrument: one measure
/// function per reader pipeline whose views matched.
pub(crate) struct ResolvedMeasures<T> {
    pub(crate) measures: Vec<Arc<dyn Measure<T>>>,
}

impl<T: Copy + 'static> ResolvedMeasures<T> {
    fn measure(&self, val: T, attrs: &[KeyValue]) {
        for measure in &self.measures {
            measure.call(val, attrs)
        }
    }
}

/// An instrument recording increasing values.
#[derive(Clone)]
pub struct Counter<T>(Arc<ResolvedMeasures<T>>);

impl<T: Copy + 'static> Counter<T> {
    pub(crate) fn new(measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        Counter(Arc::new(ResolvedMeasures { measures }))
    }

    /// Record an increment to the counter.
    pub fn add(&self, value: T, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl<T> std::fmt::Debug for Counter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter").finish()
    }
}

/// An instrument recording increasing and decreasing values.
#[derive(Clone)]
pub struct UpDownCounter<T>(Arc<ResolvedMeasures<T>>);

impl<T: Copy + 'static> UpDownCounter<T> {
    pub(crate) fn new(measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        UpDownCounter(Arc::new(ResolvedMeasures { measures }))
    }

    /// Record a delta, positive or negative.
    pub fn add(&self, value: T, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl<T> std::fmt::Debug for UpDownCounter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpDownCounter").finish()
    }
}

/// An instrument recording a distribution of values.
#[derive(Clone)]
pub struct Histogram<T>(Arc<ResolvedMeasures<T>>);

impl<T: Copy + 'static> Histogram<T> {
    pub(crate) fn new(measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        Histogram(Arc::new(ResolvedMeasures { measures }))
    }

    /// Record a value in the distribution.
    pub fn record(&self, value: T, attributes: &[KeyValue]) {
        self.0.measure(value, attributes)
    }
}

impl<T> std::fmt::Debug for Histogram<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram").finish()
    }
}

/// The write side of an asynchronous instrument, passed to collection
/// callbacks.
pub struct ObservableInstrument<T> {
    measures: Vec<Arc<dyn Measure<T>>>,
}

impl<T: Copy + Send + Sync + 'static> ObservableInstrument<T> {
    pub(crate) fn new(measures: Vec<Arc<dyn Measure<T>>>) -> Self {
        ObservableInstrument { measures }
    }

    /// Record a currently observed value.
    pub fn observe(&self, value: T, attributes: &[KeyValue]) {
        for measure in &self.measures {
            measure.call(value, attributes)
        }
    }
}

impl<T> std::fmt::Debug for ObservableInstrument<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableInstrument").finish()
    }
}

/// A handle to an observable counter; observations happen in its callbacks.
#[derive(Clone, Debug)]
pub struct ObservableCounter<T>(pub(crate) Arc<ObservableInstrument<T>>);

/// A handle to an observable up-down counter.
#[derive(Clone, Debug)]
pub struct ObservableUpDownCounter<T>(pub(crate) Arc<ObservableInstrument<T>>);

/// A handle to an observable gauge.
#[derive(Clone, Debug)]
pub struct ObservableGauge<T>(pub(crate) Arc<ObservableInstrument<T>>);

impl<T: Copy + Send + Sync + 'static> ObservableCounter<T> {
    /// Record an observation outside of a registered callback.
    pub fn observe(&self, value: T, attributes: &[KeyValue]) {
        self.0.observe(value, attributes)
    }
}

impl<T: Copy + Send + Sync + 'static> ObservableUpDownCounter<T> {
    /// Record an observation outside of a registered callback.
    pub fn observe(&self, value: T, attributes: &[KeyValue]) {
        self.0.observe(value, attributes)
    }
}

impl<T: Copy + Send + Sync + 'static> ObservableGauge<T> {
    /// Record an observation outside of a registered callback.
    pub fn observe(&self, value: T, attributes: &[KeyValue]) {
        self.0.observe(value, attributes)
    }
}
