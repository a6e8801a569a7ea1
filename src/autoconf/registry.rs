//! The explicit component registry standing in for classpath-style service
//! discovery: named factories the assembly resolves exporter, sampler,
//! propagator and reader names against, plus ordered resource and customizer
//! providers.
//!
//! The default registry carries the built-in components; embedders register
//! additional factories (or replace built-ins by name) before `build()`.

use std::collections::HashMap;
use std::fmt;

use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::reader::MetricReader;
use crate::resource::Resource;
use crate::trace::{Sampler, ShouldSample, SpanExporter};
use crate::KeyValue;

use super::otlp::{self, OtlpExporterConfig, OtlpMetricExporter, OtlpSpanExporter, Signal};
use super::propagator::{
    TextMapPropagator, W3CBaggagePropagator, W3CTraceContextPropagator,
};
use super::props::ConfigProperties;
use super::{AutoConfigureCustomizers, ConfigError};

type Factory<T> = Box<dyn Fn(&ConfigProperties) -> Result<T, ConfigError> + Send + Sync>;

/// A provider contributing resource attributes during assembly.
pub struct ResourceProvider {
    /// The name enable/disable lists refer to.
    pub name: String,
    /// Produces the contributed resource.
    pub provide: Box<dyn Fn(&ConfigProperties) -> Resource + Send + Sync>,
}

/// A provider adding customizers to the assembly, applied in registration
/// order.
pub type CustomizerProvider = Box<dyn Fn(&mut AutoConfigureCustomizers) + Send + Sync>;

/// Named component factories consulted during assembly.
pub struct ComponentRegistry {
    span_exporters: HashMap<String, Factory<Box<dyn SpanExporter>>>,
    metric_exporters: HashMap<String, Factory<Box<dyn PushMetricExporter>>>,
    metric_readers: HashMap<String, Factory<Box<dyn MetricReader>>>,
    samplers: HashMap<String, Factory<Box<dyn ShouldSample>>>,
    propagators: HashMap<String, Factory<Box<dyn TextMapPropagator>>>,
    resource_providers: Vec<ResourceProvider>,
    customizer_providers: Vec<CustomizerProvider>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("span_exporters", &self.span_exporters.len())
            .field("metric_exporters", &self.metric_exporters.len())
            .field("metric_readers", &self.metric_readers.len())
            .field("samplers", &self.samplers.len())
            .field("propagators", &self.propagators.len())
            .field("resource_providers", &self.resource_providers.len())
            .field("customizer_providers", &self.customizer_providers.len())
            .finish()
    }
}

impl Default for ComponentRegistry {
    /// The registry with the built-in components: the `otlp` exporters, the
    /// standard samplers and propagators, and the environment and SDK
    /// resource providers.
    fn default() -> Self {
        let mut registry = ComponentRegistry {
            span_exporters: HashMap::new(),
            metric_exporters: HashMap::new(),
            metric_readers: HashMap::new(),
            samplers: HashMap::new(),
            propagators: HashMap::new(),
            resource_providers: Vec::new(),
            customizer_providers: Vec::new(),
        };

        registry.register_span_exporter("otlp", |props| {
            let config = OtlpExporterConfig::from_properties(props, Signal::Traces)?;
            Ok(Box::new(OtlpSpanExporter::new(config)) as Box<dyn SpanExporter>)
        });
        registry.register_metric_exporter("otlp", |props| {
            let config = OtlpExporterConfig::from_properties(props, Signal::Metrics)?;
            let temporality = otlp::metrics_temporality(props)?;
            Ok(Box::new(OtlpMetricExporter::new(config, temporality))
                as Box<dyn PushMetricExporter>)
        });

        registry.register_sampler("always_on", |_| Ok(Box::new(Sampler::AlwaysOn)));
        registry.register_sampler("always_off", |_| Ok(Box::new(Sampler::AlwaysOff)));
        registry.register_sampler("traceidratio", |props| {
            Ok(Box::new(Sampler::TraceIdRatioBased(sampler_arg(props)?)))
        });
        registry.register_sampler("parentbased_always_on", |_| {
            Ok(Box::new(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))))
        });
        registry.register_sampler("parentbased_always_off", |_| {
            Ok(Box::new(Sampler::ParentBased(Box::new(Sampler::AlwaysOff))))
        });
        registry.register_sampler("parentbased_traceidratio", |props| {
            Ok(Box::new(Sampler::ParentBased(Box::new(
                Sampler::TraceIdRatioBased(sampler_arg(props)?),
            ))))
        });

        registry.register_propagator("tracecontext", |_| {
            Ok(Box::new(W3CTraceContextPropagator))
        });
        registry.register_propagator("baggage", |_| Ok(Box::new(W3CBaggagePropagator)));

        registry.register_resource_provider("environment", environment_resource);
        registry.register_resource_provider("telemetry_sdk", |_| Resource::builder().build());

        registry
    }
}

fn sampler_arg(props: &ConfigProperties) -> Result<f64, ConfigError> {
    match props.get_string("otel.traces.sampler.arg") {
        None => Ok(1.0),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|ratio| (0.0..=1.0).contains(ratio))
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "otel.traces.sampler.arg".to_string(),
                value: raw.to_string(),
                reason: "expected a ratio in [0.0, 1.0]".to_string(),
            }),
    }
}

/// Resource attributes from `OTEL_RESOURCE_ATTRIBUTES` and
/// `OTEL_SERVICE_NAME`.
fn environment_resource(props: &ConfigProperties) -> Resource {
    let mut attributes: Vec<KeyValue> = props
        .get_dict("otel.resource.attributes")
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect();

    if let Some(service_name) = props.get_string("otel.service.name") {
        attributes.push(KeyValue::new("service.name", service_name.to_string()));
    }

    Resource::new(attributes)
}

impl ComponentRegistry {
    /// Register (or replace) a span exporter factory under `name`.
    pub fn register_span_exporter(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ConfigProperties) -> Result<Box<dyn SpanExporter>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.span_exporters.insert(name.into(), Box::new(factory));
    }

    /// Register (or replace) a metric exporter factory under `name`.
    pub fn register_metric_exporter(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ConfigProperties) -> Result<Box<dyn PushMetricExporter>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.metric_exporters.insert(name.into(), Box::new(factory));
    }

    /// Register (or replace) a metric reader factory under `name`.
    ///
    /// Reader names resolve when no metric exporter claims the name; the
    /// produced reader is installed as-is, with no periodic wrapping.
    pub fn register_metric_reader(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ConfigProperties) -> Result<Box<dyn MetricReader>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.metric_readers.insert(name.into(), Box::new(factory));
    }

    /// Register (or replace) a sampler factory under `name`.
    pub fn register_sampler(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ConfigProperties) -> Result<Box<dyn ShouldSample>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.samplers.insert(name.into(), Box::new(factory));
    }

    /// Register (or replace) a propagator factory under `name`.
    pub fn register_propagator(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&ConfigProperties) -> Result<Box<dyn TextMapPropagator>, ConfigError>
            + Send
            + Sync
            + 'static,
    ) {
        self.propagators.insert(name.into(), Box::new(factory));
    }

    /// Register a resource provider; providers contribute in registration
    /// order, later providers overriding matching keys.
    pub fn register_resource_provider(
        &mut self,
        name: impl Into<String>,
        provide: impl Fn(&ConfigProperties) -> Resource + Send + Sync + 'static,
    ) {
        self.resource_providers.push(ResourceProvider {
            name: name.into(),
            provide: Box::new(provide),
        });
    }

    /// Register a customizer provider, applied in registration order during
    /// assembly.
    pub fn register_customizer_provider(
        &mut self,
        provider: impl Fn(&mut AutoConfigureCustomizers) + Send + Sync + 'static,
    ) {
        self.customizer_providers.push(Box::new(provider));
    }

    pub(crate) fn build_span_exporter(
        &self,
        name: &str,
        props: &ConfigProperties,
    ) -> Result<Box<dyn SpanExporter>, ConfigError> {
        match self.span_exporters.get(name) {
            Some(factory) => factory(props),
            None => Err(ConfigError::UnknownComponent {
                kind: "span exporter",
                name: name.to_string(),
                property: "otel.traces.exporter",
            }),
        }
    }

    pub(crate) fn build_metric_exporter(
        &self,
        name: &str,
        props: &ConfigProperties,
    ) -> Option<Result<Box<dyn PushMetricExporter>, ConfigError>> {
        self.metric_exporters.get(name).map(|factory| factory(props))
    }

    pub(crate) fn build_metric_reader(
        &self,
        name: &str,
        props: &ConfigProperties,
    ) -> Option<Result<Box<dyn MetricReader>, ConfigError>> {
        self.metric_readers.get(name).map(|factory| factory(props))
    }

    pub(crate) fn build_sampler(
        &self,
        name: &str,
        props: &ConfigProperties,
    ) -> Result<Box<dyn ShouldSample>, ConfigError> {
        match self.samplers.get(name) {
            Some(factory) => factory(props),
            None => Err(ConfigError::UnknownComponent {
                kind: "sampler",
                name: name.to_string(),
                property: "otel.traces.sampler",
            }),
        }
    }

    pub(crate) fn build_propagator(
        &self,
        name: &str,
        props: &ConfigProperties,
    ) -> Result<Box<dyn TextMapPropagator>, ConfigError> {
        match self.propagators.get(name) {
            Some(factory) => factory(props),
            None => Err(ConfigError::UnknownComponent {
                kind: "propagator",
                name: name.to_string(),
                property: "otel.propagators",
            }),
        }
    }

    pub(crate) fn resource_providers(&self) -> &[ResourceProvider] {
        &self.resource_providers
    }

    pub(crate) fn customizer_providers_mut(&mut self) -> &mut Vec<CustomizerProvider> {
        &mut self.customizer_providers
    }
}
