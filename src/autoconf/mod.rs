//! Autoconfiguration: assembling a working SDK from layered properties,
//! registered component factories and customizer chains.
//!
//! [`SdkBuilder::build`] performs a deterministic sequence: compute the
//! effective [`ConfigProperties`](props::ConfigProperties), run registered
//! customizer providers, compose the resource, then construct the meter
//! provider, tracer provider and propagators from the names the properties
//! select, resolving each name through the [`ComponentRegistry`]. Every
//! component created along the way is tracked; if any step fails, the
//! components created so far are shut down in reverse order and a single
//! [`ConfigError`] is returned.

pub mod otlp;
mod propagator;
mod props;
mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::OTelSdkResult;
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::reader::MetricReader;
use crate::metrics::{ExemplarFilter, MeterProviderBuilder, PeriodicReader, SdkMeterProvider};
use crate::resource::Resource;
use crate::trace::{
    BatchSpanProcessor, SdkTracerProvider, ShouldSample, SpanExporter, SpanProcessor,
    TracerProviderBuilder,
};

pub use propagator::{
    CompositePropagator, TextMapPropagator, W3CBaggagePropagator, W3CTraceContextPropagator,
};
pub use props::ConfigProperties;
pub use registry::{ComponentRegistry, CustomizerProvider, ResourceProvider};

const DEFAULT_EXPORTER: &str = "otlp";
const DEFAULT_SAMPLER: &str = "parentbased_always_on";
const DEFAULT_PROPAGATORS: [&str; 2] = ["tracecontext", "baggage"];

/// An error raised while assembling the SDK. Assembly is all-or-nothing:
/// when an error is returned every partially constructed component has been
/// shut down.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A property value could not be parsed or is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// The offending property key.
        key: String,
        /// The raw value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A component name did not resolve to any registered factory.
    #[error("unrecognized value for {property}: no {kind} named {name:?} is registered; register a factory for it on the ComponentRegistry")]
    UnknownComponent {
        /// The component category.
        kind: &'static str,
        /// The unresolved name.
        name: String,
        /// The property the name came from.
        property: &'static str,
    },

    /// `none` was combined with other exporter names.
    #[error("{property} contains \"none\" along with other exporters")]
    NoneWithOtherExporters {
        /// The property holding the conflicting list.
        property: &'static str,
    },

    /// Any other configuration failure.
    #[error("configuration error: {0}")]
    Other(String),
}

type PropertiesCustomizer =
    Box<dyn Fn(&ConfigProperties) -> HashMap<String, String> + Send + Sync>;
type ResourceCustomizer = Box<dyn Fn(Resource, &ConfigProperties) -> Resource + Send + Sync>;
type SamplerCustomizer =
    Box<dyn Fn(Box<dyn ShouldSample>, &ConfigProperties) -> Box<dyn ShouldSample> + Send + Sync>;
type SpanExporterCustomizer =
    Box<dyn Fn(Box<dyn SpanExporter>, &ConfigProperties) -> Box<dyn SpanExporter> + Send + Sync>;
type MetricExporterCustomizer = Box<
    dyn Fn(Box<dyn PushMetricExporter>, &ConfigProperties) -> Box<dyn PushMetricExporter>
        + Send
        + Sync,
>;
type PropagatorCustomizer = Box<
    dyn Fn(Box<dyn TextMapPropagator>, &ConfigProperties) -> Box<dyn TextMapPropagator>
        + Send
        + Sync,
>;
type TracerProviderCustomizer =
    Box<dyn Fn(TracerProviderBuilder, &ConfigProperties) -> TracerProviderBuilder + Send + Sync>;
type MeterProviderCustomizer =
    Box<dyn Fn(MeterProviderBuilder, &ConfigProperties) -> MeterProviderBuilder + Send + Sync>;

/// The accumulated customizer chains applied during assembly.
///
/// Each `add_*` appends to its chain; chains are applied in registration
/// order, each customizer receiving the previous one's output.
#[derive(Default)]
pub struct AutoConfigureCustomizers {
    properties: Vec<PropertiesCustomizer>,
    resource: Vec<ResourceCustomizer>,
    sampler: Vec<SamplerCustomizer>,
    span_exporter: Vec<SpanExporterCustomizer>,
    metric_exporter: Vec<MetricExporterCustomizer>,
    propagator: Vec<PropagatorCustomizer>,
    tracer_provider: Vec<TracerProviderCustomizer>,
    meter_provider: Vec<MeterProviderCustomizer>,
}

impl fmt::Debug for AutoConfigureCustomizers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoConfigureCustomizers")
            .field("properties", &self.properties.len())
            .field("resource", &self.resource.len())
            .field("sampler", &self.sampler.len())
            .field("span_exporter", &self.span_exporter.len())
            .field("metric_exporter", &self.metric_exporter.len())
            .field("propagator", &self.propagator.len())
            .field("tracer_provider", &self.tracer_provider.len())
            .field("meter_provider", &self.meter_provider.len())
            .finish()
    }
}

impl AutoConfigureCustomizers {
    /// Add a properties customizer; its returned map overlays the effective
    /// properties.
    pub fn add_properties_customizer(
        &mut self,
        f: impl Fn(&ConfigProperties) -> HashMap<String, String> + Send + Sync + 'static,
    ) -> &mut Self {
        self.properties.push(Box::new(f));
        self
    }

    /// Add a resource customizer.
    pub fn add_resource_customizer(
        &mut self,
        f: impl Fn(Resource, &ConfigProperties) -> Resource + Send + Sync + 'static,
    ) -> &mut Self {
        self.resource.push(Box::new(f));
        self
    }

    /// Add a sampler customizer.
    pub fn add_sampler_customizer(
        &mut self,
        f: impl Fn(Box<dyn ShouldSample>, &ConfigProperties) -> Box<dyn ShouldSample>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.sampler.push(Box::new(f));
        self
    }

    /// Add a span exporter customizer.
    pub fn add_span_exporter_customizer(
        &mut self,
        f: impl Fn(Box<dyn SpanExporter>, &ConfigProperties) -> Box<dyn SpanExporter>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.span_exporter.push(Box::new(f));
        self
    }

    /// Add a metric exporter customizer.
    ///
    /// Not applied to names resolving to metric readers rather than
    /// exporters.
    pub fn add_metric_exporter_customizer(
        &mut self,
        f: impl Fn(Box<dyn PushMetricExporter>, &ConfigProperties) -> Box<dyn PushMetricExporter>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.metric_exporter.push(Box::new(f));
        self
    }

    /// Add a propagator customizer.
    pub fn add_propagator_customizer(
        &mut self,
        f: impl Fn(Box<dyn TextMapPropagator>, &ConfigProperties) -> Box<dyn TextMapPropagator>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.propagator.push(Box::new(f));
        self
    }

    /// Add a tracer provider builder customizer, applied after processors
    /// and sampler are installed.
    pub fn add_tracer_provider_customizer(
        &mut self,
        f: impl Fn(TracerProviderBuilder, &ConfigProperties) -> TracerProviderBuilder
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.tracer_provider.push(Box::new(f));
        self
    }

    /// Add a meter provider builder customizer, applied after readers are
    /// installed.
    pub fn add_meter_provider_customizer(
        &mut self,
        f: impl Fn(MeterProviderBuilder, &ConfigProperties) -> MeterProviderBuilder
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.meter_provider.push(Box::new(f));
        self
    }

    fn apply_chain<T>(chain: &[Box<dyn Fn(T, &ConfigProperties) -> T + Send + Sync>], initial: T, props: &ConfigProperties) -> T {
        chain.iter().fold(initial, |value, f| f(value, props))
    }
}

/// An assembled SDK: providers plus the composed propagator.
///
/// Cloning produces additional handles to the same providers.
#[derive(Clone, Debug)]
pub struct Sdk {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    propagator: Arc<CompositePropagator>,
    disabled: bool,
}

impl Sdk {
    /// The assembled tracer provider.
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// The assembled meter provider.
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// The composed propagator.
    pub fn propagator(&self) -> &CompositePropagator {
        &self.propagator
    }

    /// Whether `otel.sdk.disabled` produced an inert SDK.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Shuts both providers down, flushing pending telemetry.
    pub fn shutdown(&self) -> OTelSdkResult {
        let tracer_result = self.tracer_provider.shutdown();
        let meter_result = self.meter_provider.shutdown();
        tracer_result.and(meter_result)
    }
}

/// Builds an [`Sdk`] from properties, the component registry and customizer
/// chains.
pub struct SdkBuilder {
    registry: ComponentRegistry,
    suppliers: Vec<HashMap<String, String>>,
    overrides: HashMap<String, String>,
    customizers: AutoConfigureCustomizers,
    set_as_global: bool,
    env_source: Option<Vec<(String, String)>>,
}

impl Default for SdkBuilder {
    fn default() -> Self {
        SdkBuilder {
            registry: ComponentRegistry::default(),
            suppliers: Vec::new(),
            overrides: HashMap::new(),
            customizers: AutoConfigureCustomizers::default(),
            set_as_global: false,
            env_source: None,
        }
    }
}

impl fmt::Debug for SdkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkBuilder")
            .field("registry", &self.registry)
            .field("suppliers", &self.suppliers.len())
            .field("overrides", &self.overrides.len())
            .field("set_as_global", &self.set_as_global)
            .finish()
    }
}

impl SdkBuilder {
    /// Replace the component registry.
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Mutable access to the component registry, for registering factories.
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    /// Add a property supplier map. Later suppliers override earlier ones;
    /// the environment overrides them all.
    pub fn add_properties_supplier(
        mut self,
        supplier: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.suppliers.push(supplier.into_iter().collect());
        self
    }

    /// Set a single property with the highest precedence.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Add a properties customizer.
    pub fn add_properties_customizer(
        mut self,
        f: impl Fn(&ConfigProperties) -> HashMap<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.customizers.add_properties_customizer(f);
        self
    }

    /// Add a resource customizer.
    pub fn add_resource_customizer(
        mut self,
        f: impl Fn(Resource, &ConfigProperties) -> Resource + Send + Sync + 'static,
    ) -> Self {
        self.customizers.add_resource_customizer(f);
        self
    }

    /// Add a sampler customizer.
    pub fn add_sampler_customizer(
        mut self,
        f: impl Fn(Box<dyn ShouldSample>, &ConfigProperties) -> Box<dyn ShouldSample>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_sampler_customizer(f);
        self
    }

    /// Add a span exporter customizer.
    pub fn add_span_exporter_customizer(
        mut self,
        f: impl Fn(Box<dyn SpanExporter>, &ConfigProperties) -> Box<dyn SpanExporter>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_span_exporter_customizer(f);
        self
    }

    /// Add a metric exporter customizer.
    pub fn add_metric_exporter_customizer(
        mut self,
        f: impl Fn(Box<dyn PushMetricExporter>, &ConfigProperties) -> Box<dyn PushMetricExporter>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_metric_exporter_customizer(f);
        self
    }

    /// Add a propagator customizer.
    pub fn add_propagator_customizer(
        mut self,
        f: impl Fn(Box<dyn TextMapPropagator>, &ConfigProperties) -> Box<dyn TextMapPropagator>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_propagator_customizer(f);
        self
    }

    /// Add a tracer provider builder customizer.
    pub fn add_tracer_provider_customizer(
        mut self,
        f: impl Fn(TracerProviderBuilder, &ConfigProperties) -> TracerProviderBuilder
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_tracer_provider_customizer(f);
        self
    }

    /// Add a meter provider builder customizer.
    pub fn add_meter_provider_customizer(
        mut self,
        f: impl Fn(MeterProviderBuilder, &ConfigProperties) -> MeterProviderBuilder
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customizers.add_meter_provider_customizer(f);
        self
    }

    /// Register the built SDK as the process-wide default on success.
    pub fn set_as_global(mut self) -> Self {
        self.set_as_global = true;
        self
    }

    /// Replace the process environment read during `build`, for tests.
    pub(crate) fn with_env_source(
        mut self,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.env_source = Some(env.into_iter().collect());
        self
    }

    /// Assemble the SDK.
    ///
    /// On error, every component created before the failure has been shut
    /// down, in reverse creation order.
    pub fn build(mut self) -> Result<Sdk, ConfigError> {
        // Run registry customizer providers in order; they append to the
        // builder's customizer chains.
        let providers = std::mem::take(self.registry.customizer_providers_mut());
        for provider in &providers {
            provider(&mut self.customizers);
        }

        let mut props = match self.env_source.take() {
            Some(env) => ConfigProperties::compute(&self.suppliers, env.into_iter(), &self.overrides),
            None => ConfigProperties::compute(&self.suppliers, std::env::vars(), &self.overrides),
        };

        for customizer in &self.customizers.properties {
            props = props.overlay(&customizer(&props));
        }

        let resource = self.configure_resource(&props);

        if props.get_bool("otel.sdk.disabled", false)? {
            let sdk = Sdk {
                tracer_provider: SdkTracerProvider::builder().build(),
                meter_provider: SdkMeterProvider::builder().build(),
                propagator: Arc::new(CompositePropagator::default()),
                disabled: true,
            };
            self.finish(sdk.clone());
            return Ok(sdk);
        }

        let mut closeables: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        match self.try_build(&props, resource, &mut closeables) {
            Ok(sdk) => {
                self.finish(sdk.clone());
                Ok(sdk)
            }
            Err(err) => {
                // Unwind: shut down everything created so far, newest first.
                for closeable in closeables.drain(..).rev() {
                    closeable();
                }
                Err(err)
            }
        }
    }

    fn finish(&self, sdk: Sdk) {
        if self.set_as_global && crate::global::set_sdk(sdk).is_err() {
            otel_warn!(
                name: "SdkBuilder.GlobalAlreadySet",
                message = "a process-wide SDK was already registered; the newly built SDK was not installed"
            );
        }
    }

    fn try_build(
        &self,
        props: &ConfigProperties,
        resource: Resource,
        closeables: &mut Vec<Box<dyn FnOnce() + Send>>,
    ) -> Result<Sdk, ConfigError> {
        let meter_provider = self.configure_meter_provider(props, &resource, closeables)?;
        let tracer_provider =
            self.configure_tracer_provider(props, &resource, &meter_provider, closeables)?;
        let propagator = self.configure_propagators(props)?;

        Ok(Sdk {
            tracer_provider,
            meter_provider,
            propagator: Arc::new(propagator),
            disabled: false,
        })
    }

    fn configure_resource(&self, props: &ConfigProperties) -> Resource {
        let enabled = props.get_list("otel.resource.providers.enabled");
        let disabled = props.get_list("otel.resource.providers.disabled");

        let mut resource = Resource::empty();
        for provider in self.registry.resource_providers() {
            if !enabled.is_empty() && !enabled.contains(&provider.name) {
                continue;
            }
            if disabled.contains(&provider.name) {
                continue;
            }
            resource = resource.merge(&(provider.provide)(props));
        }

        for customizer in &self.customizers.resource {
            resource = customizer(resource, props);
        }
        resource
    }

    fn configure_meter_provider(
        &self,
        props: &ConfigProperties,
        resource: &Resource,
        closeables: &mut Vec<Box<dyn FnOnce() + Send>>,
    ) -> Result<SdkMeterProvider, ConfigError> {
        let exemplar_filter = read_exemplar_filter(props);
        let cardinality_limit = read_cardinality_limit(props)?;

        let mut builder = SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_exemplar_filter(exemplar_filter)
            .with_cardinality_limit(cardinality_limit);

        for reader in self.configure_metric_readers(props, closeables)? {
            builder = match reader {
                ConfiguredReader::Periodic(reader) => builder.with_reader(reader),
                ConfiguredReader::Custom(reader) => builder.with_reader(reader),
            };
        }

        builder = AutoConfigureCustomizers::apply_chain(
            &self.customizers.meter_provider,
            builder,
            props,
        );

        let meter_provider = builder.build();
        let closeable_provider = meter_provider.clone();
        closeables.push(Box::new(move || {
            let _ = closeable_provider.shutdown();
        }));

        Ok(meter_provider)
    }

    fn configure_metric_readers(
        &self,
        props: &ConfigProperties,
        closeables: &mut Vec<Box<dyn FnOnce() + Send>>,
    ) -> Result<Vec<ConfiguredReader>, ConfigError> {
        let exporter_names = exporter_names(props, "otel.metrics.exporter")?;
        let interval =
            props.get_duration("otel.metric.export.interval", DEFAULT_METRIC_INTERVAL)?;

        let mut readers = Vec::with_capacity(exporter_names.len());
        for name in exporter_names {
            match self.registry.build_metric_exporter(&name, props) {
                Some(exporter) => {
                    let exporter = AutoConfigureCustomizers::apply_chain(
                        &self.customizers.metric_exporter,
                        exporter?,
                        props,
                    );
                    let reader = PeriodicReader::builder(exporter)
                        .with_interval(interval)
                        .build();
                    let closeable_reader = reader.clone();
                    closeables.push(Box::new(move || {
                        let _ = closeable_reader.shutdown();
                    }));
                    readers.push(ConfiguredReader::Periodic(reader));
                }
                // A name resolving to a reader (a pull exporter such as a
                // Prometheus bridge) is installed as-is: no periodic
                // wrapping, no exporter customizers.
                None => match self.registry.build_metric_reader(&name, props) {
                    Some(reader) => {
                        let reader = Arc::new(reader?);
                        let closeable_reader = reader.clone();
                        closeables.push(Box::new(move || {
                            let _ = closeable_reader.shutdown();
                        }));
                        readers.push(ConfiguredReader::Custom(reader));
                    }
                    None => {
                        return Err(ConfigError::UnknownComponent {
                            kind: "metric exporter or reader",
                            name,
                            property: "otel.metrics.exporter",
                        })
                    }
                },
            }
        }

        Ok(readers)
    }

    fn configure_tracer_provider(
        &self,
        props: &ConfigProperties,
        resource: &Resource,
        meter_provider: &SdkMeterProvider,
        closeables: &mut Vec<Box<dyn FnOnce() + Send>>,
    ) -> Result<SdkTracerProvider, ConfigError> {
        let sampler_name = props.get_string_or("otel.traces.sampler", DEFAULT_SAMPLER);
        let sampler = self.registry.build_sampler(&sampler_name, props)?;
        let sampler =
            AutoConfigureCustomizers::apply_chain(&self.customizers.sampler, sampler, props);

        let mut processors: Vec<BatchSpanProcessor> = Vec::new();
        for name in exporter_names(props, "otel.traces.exporter")? {
            let exporter = match self.registry.build_span_exporter(&name, props) {
                Ok(exporter) => exporter,
                Err(err) => {
                    // Unwind the processors created for earlier names; the
                    // caller unwinds everything older.
                    for processor in &processors {
                        let _ = processor.shutdown();
                    }
                    return Err(err);
                }
            };
            let exporter = AutoConfigureCustomizers::apply_chain(
                &self.customizers.span_exporter,
                exporter,
                props,
            );
            processors.push(
                BatchSpanProcessor::builder(exporter)
                    .with_meter_provider(meter_provider.clone())
                    .build(),
            );
        }

        let mut builder = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_boxed_sampler(sampler);
        for processor in processors {
            builder = builder.with_span_processor(processor);
        }

        builder = AutoConfigureCustomizers::apply_chain(
            &self.customizers.tracer_provider,
            builder,
            props,
        );

        let tracer_provider = builder.build();
        let closeable_provider = tracer_provider.clone();
        closeables.push(Box::new(move || {
            let _ = closeable_provider.shutdown();
        }));

        Ok(tracer_provider)
    }

    fn configure_propagators(
        &self,
        props: &ConfigProperties,
    ) -> Result<CompositePropagator, ConfigError> {
        let mut names = props.get_list("otel.propagators");
        if names.is_empty() {
            names = DEFAULT_PROPAGATORS.iter().map(|s| s.to_string()).collect();
        }
        if names.iter().any(|name| name == "none") {
            return Ok(CompositePropagator::default());
        }

        let mut propagators = Vec::with_capacity(names.len());
        for name in names {
            let propagator = self.registry.build_propagator(&name, props)?;
            let propagator = AutoConfigureCustomizers::apply_chain(
                &self.customizers.propagator,
                propagator,
                props,
            );
            propagators.push(propagator);
        }

        Ok(CompositePropagator::new(propagators))
    }
}

const DEFAULT_METRIC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// A reader resolved during metric configuration.
enum ConfiguredReader {
    /// An exporter name wrapped in a periodic reader.
    Periodic(PeriodicReader),
    /// A name that resolved directly to a reader.
    Custom(Arc<Box<dyn MetricReader>>),
}

/// The exporter names a signal's exporter property selects, with `none`
/// handling: `none` alone means no exporters, `none` with others is an
/// error, an unset property means the default `otlp`.
fn exporter_names(
    props: &ConfigProperties,
    property: &'static str,
) -> Result<Vec<String>, ConfigError> {
    let names = props.get_list(property);
    if names.iter().any(|name| name == "none") {
        if names.len() > 1 {
            return Err(ConfigError::NoneWithOtherExporters { property });
        }
        return Ok(Vec::new());
    }
    if names.is_empty() {
        return Ok(vec![DEFAULT_EXPORTER.to_string()]);
    }
    Ok(names)
}

/// The exemplar filter `otel.metrics.exemplar.filter` selects; unrecognized
/// values fall back to the trace-based default.
fn read_exemplar_filter(props: &ConfigProperties) -> ExemplarFilter {
    match props
        .get_string_or("otel.metrics.exemplar.filter", "trace_based")
        .to_lowercase()
        .as_str()
    {
        "always_on" => ExemplarFilter::AlwaysOn,
        "always_off" => ExemplarFilter::AlwaysOff,
        _ => ExemplarFilter::TraceBased,
    }
}

/// The cardinality limit `otel.experimental.metrics.cardinality.limit`
/// selects; must be at least 1.
fn read_cardinality_limit(props: &ConfigProperties) -> Result<usize, ConfigError> {
    let limit = props.get_int("otel.experimental.metrics.cardinality.limit", 2000)?;
    if limit < 1 {
        return Err(ConfigError::InvalidValue {
            key: "otel.experimental.metrics.cardinality.limit".to_string(),
            value: limit.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(limit as usize)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::metrics::{InMemoryMetricExporter, ManualReader};
    use crate::trace::InMemorySpanExporter;

    fn empty_env() -> Vec<(String, String)> {
        Vec::new()
    }

    fn empty_props() -> ConfigProperties {
        ConfigProperties::compute(&[], std::iter::empty(), &Default::default())
    }

    #[test]
    fn default_assembly() {
        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .build()
            .expect("default assembly succeeds");

        assert!(!sdk.is_disabled());
        assert_eq!(sdk.propagator().names(), vec!["tracecontext", "baggage"]);

        let processors = sdk.tracer_provider().span_processors();
        assert_eq!(processors.len(), 1);
        assert!(format!("{:?}", processors[0]).contains("BatchSpanProcessor"));

        sdk.shutdown().unwrap();
    }

    #[test]
    fn default_metric_reader_is_periodic_at_60s() {
        let builder = SdkBuilder::default();
        let props = empty_props();
        let mut closeables = Vec::new();

        let readers = builder
            .configure_metric_readers(&props, &mut closeables)
            .unwrap();
        assert_eq!(readers.len(), 1);
        match &readers[0] {
            ConfiguredReader::Periodic(reader) => {
                assert_eq!(reader.interval(), Duration::from_secs(60));
            }
            ConfiguredReader::Custom(_) => panic!("expected a periodic reader"),
        }

        for closeable in closeables.drain(..).rev() {
            closeable();
        }
    }

    #[test]
    fn default_exporters_are_otlp_grpc() {
        let registry = ComponentRegistry::default();
        let props = empty_props();

        let span_exporter = registry.build_span_exporter("otlp", &props).unwrap();
        let description = format!("{span_exporter:?}");
        assert!(description.contains("OtlpSpanExporter"), "{description}");
        assert!(description.contains("Grpc"), "{description}");
        assert!(description.contains("http://localhost:4317"), "{description}");
    }

    #[test]
    fn default_exemplar_filter_and_cardinality() {
        let props = empty_props();
        assert_eq!(read_exemplar_filter(&props), ExemplarFilter::TraceBased);
        assert_eq!(read_cardinality_limit(&props).unwrap(), 2000);
    }

    #[test]
    fn exemplar_filter_and_cardinality_from_properties() {
        let props = ConfigProperties::compute(
            &[[
                (
                    "otel.metrics.exemplar.filter".to_string(),
                    "always_off".to_string(),
                ),
                (
                    "otel.experimental.metrics.cardinality.limit".to_string(),
                    "50".to_string(),
                ),
            ]
            .into_iter()
            .collect()],
            std::iter::empty(),
            &Default::default(),
        );

        assert_eq!(read_exemplar_filter(&props), ExemplarFilter::AlwaysOff);
        assert_eq!(read_cardinality_limit(&props).unwrap(), 50);

        let invalid = ConfigProperties::compute(
            &[[(
                "otel.experimental.metrics.cardinality.limit".to_string(),
                "0".to_string(),
            )]
            .into_iter()
            .collect()],
            std::iter::empty(),
            &Default::default(),
        );
        assert!(read_cardinality_limit(&invalid).is_err());
    }

    #[test]
    fn none_exporter_disables_the_signal_pipeline() {
        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.exporter", "none")
            .with_property("otel.metrics.exporter", "none")
            .build()
            .unwrap();

        assert!(sdk.tracer_provider().span_processors().is_empty());
        sdk.shutdown().unwrap();
    }

    #[test]
    fn none_with_other_exporters_is_rejected() {
        let err = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.metrics.exporter", "none,otlp")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoneWithOtherExporters { .. }));
    }

    #[test]
    fn unknown_exporter_names_the_missing_component() {
        let err = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.metrics.exporter", "nonexistent")
            .build()
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("nonexistent"), "{message}");
        assert!(message.contains("otel.metrics.exporter"), "{message}");
    }

    #[test]
    fn disabled_sdk_is_inert_but_still_builds() {
        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.sdk.disabled", "true")
            .build()
            .unwrap();

        assert!(sdk.is_disabled());
        assert!(sdk.tracer_provider().span_processors().is_empty());

        // Spans from a disabled SDK are valid but unexported.
        let tracer = sdk.tracer_provider().tracer("component");
        let mut span = tracer.start("operation");
        span.end();
        sdk.shutdown().unwrap();
    }

    #[test]
    fn customizers_compose_in_registration_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let push = |log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str| {
            let log = log.clone();
            move || log.lock().unwrap().push(label)
        };

        let p_f = push(&log, "properties:f");
        let p_g = push(&log, "properties:g");
        let r_f = push(&log, "resource:f");
        let r_g = push(&log, "resource:g");
        let s_f = push(&log, "sampler:f");
        let s_g = push(&log, "sampler:g");
        let se_f = push(&log, "span_exporter:f");
        let se_g = push(&log, "span_exporter:g");
        let me_f = push(&log, "metric_exporter:f");
        let me_g = push(&log, "metric_exporter:g");
        let tp_f = push(&log, "tracer_provider:f");
        let tp_g = push(&log, "tracer_provider:g");
        let mp_f = push(&log, "meter_provider:f");
        let mp_g = push(&log, "meter_provider:g");

        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.propagators", "none")
            .add_properties_customizer(move |_| {
                p_f();
                Default::default()
            })
            .add_properties_customizer(move |_| {
                p_g();
                Default::default()
            })
            .add_resource_customizer(move |resource, _| {
                r_f();
                resource
            })
            .add_resource_customizer(move |resource, _| {
                r_g();
                resource
            })
            .add_sampler_customizer(move |sampler, _| {
                s_f();
                sampler
            })
            .add_sampler_customizer(move |sampler, _| {
                s_g();
                sampler
            })
            .add_span_exporter_customizer(move |exporter, _| {
                se_f();
                exporter
            })
            .add_span_exporter_customizer(move |exporter, _| {
                se_g();
                exporter
            })
            .add_metric_exporter_customizer(move |exporter, _| {
                me_f();
                exporter
            })
            .add_metric_exporter_customizer(move |exporter, _| {
                me_g();
                exporter
            })
            .add_tracer_provider_customizer(move |builder, _| {
                tp_f();
                builder
            })
            .add_tracer_provider_customizer(move |builder, _| {
                tp_g();
                builder
            })
            .add_meter_provider_customizer(move |builder, _| {
                mp_f();
                builder
            })
            .add_meter_provider_customizer(move |builder, _| {
                mp_g();
                builder
            })
            .build()
            .unwrap();

        let entries = log.lock().unwrap().clone();
        for category in [
            "properties",
            "resource",
            "sampler",
            "span_exporter",
            "metric_exporter",
            "tracer_provider",
            "meter_provider",
        ] {
            let f = entries
                .iter()
                .position(|e| *e == format!("{category}:f").as_str());
            let g = entries
                .iter()
                .position(|e| *e == format!("{category}:g").as_str());
            let (f, g) = (
                f.unwrap_or_else(|| panic!("{category}:f did not run")),
                g.unwrap_or_else(|| panic!("{category}:g did not run")),
            );
            assert!(f < g, "{category}: f must run before g");
        }

        sdk.shutdown().unwrap();
    }

    #[test]
    fn propagator_customizers_compose_in_registration_order() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let log_f = log.clone();
        let log_g = log.clone();

        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.exporter", "none")
            .with_property("otel.metrics.exporter", "none")
            .with_property("otel.propagators", "tracecontext")
            .add_propagator_customizer(move |propagator, _| {
                log_f.lock().unwrap().push("f");
                propagator
            })
            .add_propagator_customizer(move |propagator, _| {
                log_g.lock().unwrap().push("g");
                propagator
            })
            .build()
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["f", "g"]);
        assert_eq!(sdk.propagator().names(), vec!["tracecontext"]);
        sdk.shutdown().unwrap();
    }

    #[test]
    fn registry_customizer_providers_are_applied() {
        let ran = Arc::new(Mutex::new(false));
        let ran_clone = ran.clone();

        let mut builder = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.exporter", "none")
            .with_property("otel.metrics.exporter", "none");
        builder
            .registry_mut()
            .register_customizer_provider(move |customizers| {
                let ran = ran_clone.clone();
                customizers.add_properties_customizer(move |_| {
                    *ran.lock().unwrap() = true;
                    Default::default()
                });
            });

        let sdk = builder.build().unwrap();
        assert!(*ran.lock().unwrap());
        sdk.shutdown().unwrap();
    }

    #[test]
    fn properties_customizer_output_feeds_the_next() {
        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.exporter", "none")
            .add_properties_customizer(|_| {
                [("custom.key".to_string(), "f".to_string())]
                    .into_iter()
                    .collect()
            })
            .add_properties_customizer(|props| {
                let prior = props.get_string_or("custom.key", "missing");
                [("custom.key".to_string(), format!("{prior}+g"))]
                    .into_iter()
                    .collect()
            })
            // g saw f's overlay, so metrics stay disabled only if chaining
            // worked; assert through the final property below instead.
            .add_properties_customizer(|props| {
                assert_eq!(props.get_string("custom.key"), Some("f+g"));
                [("otel.metrics.exporter".to_string(), "none".to_string())]
                    .into_iter()
                    .collect()
            })
            .build()
            .unwrap();
        sdk.shutdown().unwrap();
    }

    #[test]
    fn failed_sampler_factory_unwinds_created_components_once() {
        let metric_exporter = InMemoryMetricExporter::default();
        let exporter_for_registry = metric_exporter.clone();

        let mut builder = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.sampler", "explode");
        builder
            .registry_mut()
            .register_metric_exporter("otlp", move |_| {
                Ok(Box::new(exporter_for_registry.clone()))
            });
        builder.registry_mut().register_sampler("explode", |_| {
            Err(ConfigError::Other("sampler factory failed".to_string()))
        });

        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("sampler factory failed"));

        // The metric exporter created before the failure was shut down
        // exactly once, through its reader.
        assert_eq!(metric_exporter.shutdown_count(), 1);
    }

    #[test]
    fn reader_names_bypass_periodic_wrapping_and_exporter_customizers() {
        let customizer_ran = Arc::new(Mutex::new(false));
        let customizer_flag = customizer_ran.clone();

        let mut builder = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.metrics.exporter", "pullreader")
            .with_property("otel.traces.exporter", "none")
            .add_metric_exporter_customizer(move |exporter, _| {
                *customizer_flag.lock().unwrap() = true;
                exporter
            });
        builder
            .registry_mut()
            .register_metric_reader("pullreader", |_| {
                Ok(Box::new(ManualReader::builder().build()))
            });

        let props = empty_props();
        let mut closeables = Vec::new();
        let readers = builder
            .configure_metric_readers(
                &props.overlay(
                    &[(
                        "otel.metrics.exporter".to_string(),
                        "pullreader".to_string(),
                    )]
                    .into_iter()
                    .collect(),
                ),
                &mut closeables,
            )
            .unwrap();
        assert!(matches!(readers[0], ConfiguredReader::Custom(_)));

        let sdk = builder.build().unwrap();
        assert!(!*customizer_ran.lock().unwrap());
        sdk.shutdown().unwrap();
    }

    #[test]
    fn span_exporter_customizer_can_replace_the_exporter() {
        let replacement = InMemorySpanExporter::default();
        let replacement_clone = replacement.clone();

        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.metrics.exporter", "none")
            .add_span_exporter_customizer(move |_original, _| {
                Box::new(replacement_clone.clone())
            })
            .build()
            .unwrap();

        let tracer = sdk.tracer_provider().tracer("component");
        let mut span = tracer.start("operation");
        span.end();
        sdk.tracer_provider().force_flush().unwrap();

        assert_eq!(replacement.get_finished_spans().len(), 1);
        sdk.shutdown().unwrap();
    }

    #[test]
    fn built_sdk_can_register_as_global() {
        let sdk = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.traces.exporter", "none")
            .with_property("otel.metrics.exporter", "none")
            .set_as_global()
            .build()
            .unwrap();

        let global = crate::global::sdk().expect("global SDK registered");
        assert_eq!(
            global.propagator().names(),
            sdk.propagator().names()
        );
        sdk.shutdown().unwrap();
    }

    #[test]
    fn resource_providers_compose_and_filter() {
        let mut builder = SdkBuilder::default()
            .with_env_source(empty_env())
            .with_property("otel.service.name", "checkout")
            .with_property("otel.resource.providers.disabled", "extras");
        builder
            .registry_mut()
            .register_resource_provider("extras", |_| {
                Resource::new([crate::KeyValue::new("extra", "yes")])
            });

        let props = ConfigProperties::compute(
            &[],
            [
                ("OTEL_SERVICE_NAME".to_string(), "checkout".to_string()),
                (
                    "OTEL_RESOURCE_PROVIDERS_DISABLED".to_string(),
                    "extras".to_string(),
                ),
            ]
            .into_iter(),
            &Default::default(),
        );
        let resource = builder.configure_resource(&props);

        assert_eq!(
            resource.get(&crate::Key::new("service.name")),
            Some(crate::Value::from("checkout"))
        );
        assert_eq!(resource.get(&crate::Key::new("extra")), None);
        // The SDK identity provider contributed its attributes.
        assert_eq!(
            resource.get(&crate::Key::new("telemetry.sdk.language")),
            Some(crate::Value::from("rust"))
        );
    }
}
