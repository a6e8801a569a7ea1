//! The meter: creation and coordination of all metric instruments of one
//! instrumentation scope.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::instrumentation::InstrumentationScope;
use crate::metrics::instrument::{
    Counter, Histogram, Instrument, InstrumentKind, ObservableCounter, ObservableGauge,
    ObservableInstrument, ObservableUpDownCounter, UpDownCounter,
};
use crate::metrics::internal::Number;
use crate::metrics::pipeline::{CallbackRegistration, Pipelines, Resolver};

use super::instrument::InstrumentId;

const INSTRUMENT_NAME_MAX_LENGTH: usize = 255;
const INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS: [char; 4] = ['_', '.', '-', '/'];

/// Handles the creation and coordination of all metric instruments.
///
/// A meter represents a single instrumentation scope; all telemetry produced
/// by the scope is collected through instruments from one meter. Meters are
/// obtained from [`SdkMeterProvider::meter`].
///
/// [`SdkMeterProvider::meter`]: crate::metrics::SdkMeterProvider::meter
#[derive(Clone)]
pub struct Meter {
    inner: Arc<SdkMeter>,
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter")
            .field("scope", &self.inner.scope)
            .finish()
    }
}

pub(crate) struct SdkMeter {
    scope: InstrumentationScope,
    pipes: Arc<Pipelines>,
    u64_resolver: Resolver<u64>,
    i64_resolver: Resolver<i64>,
    f64_resolver: Resolver<f64>,
}

impl Meter {
    pub(crate) fn new(scope: InstrumentationScope, pipes: Arc<Pipelines>) -> Self {
        let view_cache: Arc<Mutex<HashMap<Cow<'static, str>, InstrumentId>>> = Default::default();

        Meter {
            inner: Arc::new(SdkMeter {
                scope,
                pipes: Arc::clone(&pipes),
                u64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&view_cache)),
                i64_resolver: Resolver::new(Arc::clone(&pipes), Arc::clone(&view_cache)),
                f64_resolver: Resolver::new(pipes, view_cache),
            }),
        }
    }

    /// A builder for a `u64` counter.
    pub fn u64_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, Counter<u64>> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::Counter)
    }

    /// A builder for an `f64` counter.
    pub fn f64_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, Counter<f64>> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::Counter)
    }

    /// A builder for an `i64` up-down counter.
    pub fn i64_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, UpDownCounter<i64>> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::UpDownCounter)
    }

    /// A builder for an `f64` up-down counter.
    pub fn f64_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> InstrumentBuilder<'_, UpDownCounter<f64>> {
        InstrumentBuilder::new(self, name.into(), InstrumentKind::UpDownCounter)
    }

    /// A builder for a `u64` histogram.
    pub fn u64_histogram(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> HistogramBuilder<'_, Histogram<u64>> {
        HistogramBuilder::new(self, name.into())
    }

    /// A builder for an `f64` histogram.
    pub fn f64_histogram(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> HistogramBuilder<'_, Histogram<f64>> {
        HistogramBuilder::new(self, name.into())
    }

    /// A builder for a `u64` observable counter.
    pub fn u64_observable_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, u64, ObservableCounter<u64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableCounter)
    }

    /// A builder for an `f64` observable counter.
    pub fn f64_observable_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, f64, ObservableCounter<f64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableCounter)
    }

    /// A builder for an `i64` observable up-down counter.
    pub fn i64_observable_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, i64, ObservableUpDownCounter<i64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableUpDownCounter)
    }

    /// A builder for an `f64` observable up-down counter.
    pub fn f64_observable_up_down_counter(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, f64, ObservableUpDownCounter<f64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableUpDownCounter)
    }

    /// A builder for an `i64` observable gauge.
    pub fn i64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, i64, ObservableGauge<i64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableGauge)
    }

    /// A builder for a `u64` observable gauge.
    pub fn u64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, u64, ObservableGauge<u64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableGauge)
    }

    /// A builder for an `f64` observable gauge.
    pub fn f64_observable_gauge(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> AsyncInstrumentBuilder<'_, f64, ObservableGauge<f64>> {
        AsyncInstrumentBuilder::new(self, name.into(), InstrumentKind::ObservableGauge)
    }

    /// Registers a callback running on every collection, observing into the
    /// async instruments it captured. The returned registration removes it.
    pub fn register_callback<F>(
        &self,
        callback: F,
    ) -> Result<Box<dyn CallbackRegistration>, crate::error::OTelSdkError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.pipes.register_multi_callback(callback)
    }

    fn resolve_measures<T: Number>(
        &self,
        resolver: impl FnOnce(&SdkMeter) -> &Resolver<T>,
        builder_name: Cow<'static, str>,
        description: Option<Cow<'static, str>>,
        unit: Option<Cow<'static, str>>,
        kind: InstrumentKind,
        advisory_boundaries: Option<Vec<f64>>,
    ) -> Vec<Arc<dyn crate::metrics::internal::Measure<T>>> {
        if let Err(err) = validate_instrument_name(&builder_name) {
            otel_warn!(
                name: "Meter.InvalidInstrumentName",
                instrument = builder_name.as_ref(),
                error = err,
                message = "the instrument is a no-op; measurements will be dropped"
            );
            return Vec::new();
        }

        let inst = Instrument {
            name: builder_name,
            description: description.unwrap_or_default(),
            kind: Some(kind),
            unit: unit.unwrap_or_default(),
            scope: self.inner.scope.clone(),
            advisory_boundaries,
        };

        match resolver(&self.inner).measures(inst) {
            Ok(measures) => measures,
            Err(err) => {
                otel_warn!(
                    name: "Meter.InstrumentResolutionFailed",
                    error = err,
                    message = "the instrument is a no-op; measurements will be dropped"
                );
                Vec::new()
            }
        }
    }
}

fn validate_instrument_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > INSTRUMENT_NAME_MAX_LENGTH {
        return Err(format!(
            "name must not exceed {INSTRUMENT_NAME_MAX_LENGTH} characters"
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("name must start with an ASCII letter".to_string());
    }
    if !name.chars().all(|c| {
        c.is_ascii_alphanumeric() || INSTRUMENT_NAME_ALLOWED_NON_ALPHANUMERIC_CHARS.contains(&c)
    }) {
        return Err(
            "name must only contain ASCII alphanumerics or one of '_', '.', '-', '/'".to_string(),
        );
    }
    Ok(())
}

/// Configuration for building a synchronous instrument.
pub struct InstrumentBuilder<'a, I> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    kind: InstrumentKind,
    _marker: std::marker::PhantomData<I>,
}

impl<'a, I> InstrumentBuilder<'a, I> {
    fn new(meter: &'a Meter, name: Cow<'static, str>, kind: InstrumentKind) -> Self {
        InstrumentBuilder {
            meter,
            name,
            description: None,
            unit: None,
            kind,
            _marker: std::marker::PhantomData,
        }
    }

    /// Set the instrument description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the instrument unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

macro_rules! build_sync_instrument {
    ($t:ty, $handle:ident, $resolver:ident) => {
        impl InstrumentBuilder<'_, $handle<$t>> {
            /// Create the instrument.
            pub fn build(self) -> $handle<$t> {
                let measures = self.meter.resolve_measures(
                    |m| &m.$resolver,
                    self.name,
                    self.description,
                    self.unit,
                    self.kind,
                    None,
                );
                $handle::new(measures)
            }
        }
    };
}

build_sync_instrument!(u64, Counter, u64_resolver);
build_sync_instrument!(f64, Counter, f64_resolver);
build_sync_instrument!(i64, UpDownCounter, i64_resolver);
build_sync_instrument!(f64, UpDownCounter, f64_resolver);

/// Configuration for building a histogram, including advisory bucket
/// boundaries.
pub struct HistogramBuilder<'a, I> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    boundaries: Option<Vec<f64>>,
    _marker: std::marker::PhantomData<I>,
}

impl<'a, I> HistogramBuilder<'a, I> {
    fn new(meter: &'a Meter, name: Cow<'static, str>) -> Self {
        HistogramBuilder {
            meter,
            name,
            description: None,
            unit: None,
            boundaries: None,
            _marker: std::marker::PhantomData,
        }
    }

    /// Set the instrument description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the instrument unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Advise the bucket boundaries to use when no view overrides them.
    pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.boundaries = Some(boundaries);
        self
    }
}

macro_rules! build_histogram_instrument {
    ($t:ty, $resolver:ident) => {
        impl HistogramBuilder<'_, Histogram<$t>> {
            /// Create the instrument.
            pub fn build(self) -> Histogram<$t> {
                let measures = self.meter.resolve_measures(
                    |m| &m.$resolver,
                    self.name,
                    self.description,
                    self.unit,
                    InstrumentKind::Histogram,
                    self.boundaries,
                );
                Histogram::new(measures)
            }
        }
    };
}

build_histogram_instrument!(u64, u64_resolver);
build_histogram_instrument!(f64, f64_resolver);

/// A callback observing values for one asynchronous instrument.
pub type Callback<T> = Box<dyn Fn(&ObservableInstrument<T>) + Send + Sync>;

/// Configuration for building an asynchronous instrument and registering its
/// callbacks.
pub struct AsyncInstrumentBuilder<'a, T, I> {
    meter: &'a Meter,
    name: Cow<'static, str>,
    description: Option<Cow<'static, str>>,
    unit: Option<Cow<'static, str>>,
    kind: InstrumentKind,
    callbacks: Vec<Callback<T>>,
    _marker: std::marker::PhantomData<I>,
}

impl<'a, T, I> AsyncInstrumentBuilder<'a, T, I> {
    fn new(meter: &'a Meter, name: Cow<'static, str>, kind: InstrumentKind) -> Self {
        AsyncInstrumentBuilder {
            meter,
            name,
            description: None,
            unit: None,
            kind,
            callbacks: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Set the instrument description.
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the instrument unit.
    pub fn with_unit(mut self, unit: impl Into<Cow<'static, str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add a callback invoked during every collection.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ObservableInstrument<T>) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

macro_rules! build_async_instrument {
    ($t:ty, $handle:ident, $resolver:ident) => {
        impl AsyncInstrumentBuilder<'_, $t, $handle<$t>> {
            /// Create the instrument and register its callbacks.
            pub fn build(self) -> $handle<$t> {
                let measures = self.meter.resolve_measures(
                    |m| &m.$resolver,
                    self.name,
                    self.description,
                    self.unit,
                    self.kind,
                    None,
                );
                let observable = Arc::new(ObservableInstrument::new(measures));

                for callback in self.callbacks {
                    let cb_observable = observable.clone();
                    self.meter
                        .inner
                        .pipes
                        .register_callback(move || callback(&cb_observable));
                }

                $handle(observable)
            }
        }
    };
}

build_async_instrument!(u64, ObservableCounter, u64_resolver);
build_async_instrument!(f64, ObservableCounter, f64_resolver);
build_async_instrument!(i64, ObservableUpDownCounter, i64_resolver);
build_async_instrument!(f64, ObservableUpDownCounter, f64_resolver);
build_async_instrument!(i64, ObservableGauge, i64_resolver);
build_async_instrument!(u64, ObservableGauge, u64_resolver);
build_async_instrument!(f64, ObservableGauge, f64_resolver);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_validation() {
        assert!(validate_instrument_name("requests").is_ok());
        assert!(validate_instrument_name("http.server.duration").is_ok());
        assert!(validate_instrument_name("jvm/memory_used-bytes").is_ok());

        assert!(validate_instrument_name("").is_err());
        assert!(validate_instrument_name("1requests").is_err());
        assert!(validate_instrument_name("_requests").is_err());
        assert!(validate_instrument_name("requests with spaces").is_err());
        assert!(validate_instrument_name(&"x".repeat(256)).is_err());
    }
}
