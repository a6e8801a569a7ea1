//! The meter provider: creation point and shared state for all meters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::instrumentation::InstrumentationScope;
use crate::metrics::exemplar::ExemplarFilter;
use crate::metrics::meter::Meter;
use crate::metrics::pipeline::Pipelines;
use crate::metrics::reader::MetricReader;
use crate::metrics::view::View;
use crate::resource::Resource;

/// The default maximum number of series per metric stream, overflow series
/// included.
pub(crate) const DEFAULT_CARDINALITY_LIMIT: usize = 2000;

/// Handles the creation and coordination of [`Meter`]s.
///
/// All meters created by this provider share its [`Resource`], views,
/// exemplar filter and cardinality limit, and feed the registered
/// [`MetricReader`]s. Cloning produces another handle to the same provider.
#[derive(Clone, Debug)]
pub struct SdkMeterProvider {
    inner: Arc<MeterProviderInner>,
}

#[derive(Debug)]
struct MeterProviderInner {
    pipes: Arc<Pipelines>,
    meters: Mutex<HashMap<InstrumentationScope, Meter>>,
    shutdown_result: Mutex<Option<OTelSdkResult>>,
    resource: Resource,
}

impl SdkMeterProvider {
    /// Start building a provider.
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// Create or look up the meter for the named instrumentation scope.
    pub fn meter(&self, name: impl Into<std::borrow::Cow<'static, str>>) -> Meter {
        self.meter_with_scope(InstrumentationScope::builder(name).build())
    }

    /// Create or look up the meter with a fully specified scope.
    ///
    /// Meters are cached per scope identity, so instruments created for the
    /// same scope share duplicate detection.
    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        if let Ok(mut meters) = self.inner.meters.lock() {
            meters
                .entry(scope.clone())
                .or_insert_with(|| Meter::new(scope, self.inner.pipes.clone()))
                .clone()
        } else {
            Meter::new(scope, self.inner.pipes.clone())
        }
    }

    /// The resource metrics are produced under.
    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    /// Flushes all pending telemetry through every reader.
    pub fn force_flush(&self) -> OTelSdkResult {
        self.inner.pipes.force_flush()
    }

    /// Shuts down the provider, flushing pending telemetry and releasing the
    /// readers' resources.
    ///
    /// The first call performs the shutdown and caches its result; later
    /// calls return the cached result without touching the readers again.
    pub fn shutdown(&self) -> OTelSdkResult {
        let mut cached = self
            .inner
            .shutdown_result
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if let Some(result) = cached.as_ref() {
            return result.clone();
        }

        let result = self.inner.pipes.shutdown();
        *cached = Some(result.clone());
        result
    }
}

impl Default for SdkMeterProvider {
    fn default() -> Self {
        SdkMeterProvider::builder().build()
    }
}

/// Configuration options for a [`SdkMeterProvider`].
#[derive(Default)]
pub struct MeterProviderBuilder {
    resource: Option<Resource>,
    readers: Vec<Box<dyn MetricReader>>,
    views: Vec<Arc<dyn View>>,
    exemplar_filter: Option<ExemplarFilter>,
    cardinality_limit: Option<usize>,
}

impl std::fmt::Debug for MeterProviderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterProviderBuilder")
            .field("readers", &self.readers.len())
            .field("views", &self.views.len())
            .field("exemplar_filter", &self.exemplar_filter)
            .field("cardinality_limit", &self.cardinality_limit)
            .finish()
    }
}

impl MeterProviderBuilder {
    /// Associate a [`Resource`] with the provider.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Register a [`MetricReader`]. Without at least one reader the
    /// provider aggregates nothing.
    pub fn with_reader<T: MetricReader>(mut self, reader: T) -> Self {
        self.readers.push(Box::new(reader));
        self
    }

    /// Register a [`View`]. Views are evaluated in registration order.
    pub fn with_view<T: View>(mut self, view: T) -> Self {
        self.views.push(Arc::new(view));
        self
    }

    /// Set the exemplar filter applied to every instrument.
    pub fn with_exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.exemplar_filter = Some(filter);
        self
    }

    /// Set the default per-stream cardinality limit, overflow series
    /// included. Streams may override it through views.
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = Some(limit);
        self
    }

    /// Construct the provider.
    pub fn build(self) -> SdkMeterProvider {
        let resource = self.resource.unwrap_or_default();
        SdkMeterProvider {
            inner: Arc::new(MeterProviderInner {
                pipes: Arc::new(Pipelines::new(
                    resource.clone(),
                    self.readers,
                    self.views,
                    self.exemplar_filter.unwrap_or_default(),
                    self.cardinality_limit.unwrap_or(DEFAULT_CARDINALITY_LIMIT),
                )),
                meters: Mutex::new(HashMap::new()),
                shutdown_result: Mutex::new(None),
                resource,
            }),
        }
    }
}
