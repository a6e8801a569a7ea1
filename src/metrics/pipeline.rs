//! The pipelines connecting instruments to readers.
//!
//! One [`Pipeline`] exists per registered reader. As instruments are
//! created they are matched against the pipeline's views and an aggregate
//! function pair is inserted for each matching stream; collection walks
//! those pairs. Collections of all pipelines of one provider serialize on a
//! shared collect lock so observable callbacks are never run concurrently.

use core::fmt;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::common::KeyValue;
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::instrumentation::InstrumentationScope;
use crate::metrics::aggregation::{self, Aggregation};
use crate::metrics::data::{Metric, ResourceMetrics, ScopeMetrics};
use crate::metrics::exemplar::ExemplarFilter;
use crate::metrics::instrument::{Instrument, InstrumentId, InstrumentKind, Stream};
use crate::metrics::internal::{self, AggregateBuilder, Number};
use crate::metrics::reader::{MetricReader, SdkProducer};
use crate::metrics::view::View;
use crate::resource::Resource;

/// A callback registered on a meter, invoked during every collection.
type GenericCallback = Arc<dyn Fn() + Send + Sync>;

/// Removes a registered callback from every pipeline it was added to.
pub trait CallbackRegistration: Send + Sync {
    /// Unregister the callback; it will not run in later collections.
    fn unregister(&mut self) -> OTelSdkResult;
}

/// Connects all instruments created by a meter provider to one
/// [`MetricReader`].
pub struct Pipeline {
    pub(crate) resource: Resource,
    reader: Box<dyn MetricReader>,
    views: Vec<Arc<dyn View>>,
    exemplar_filter: ExemplarFilter,
    default_cardinality_limit: usize,
    // serializes collections across every reader of the provider
    collect_lock: Arc<Mutex<()>>,
    inner: Mutex<PipelineInner>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pipeline")
    }
}

#[derive(Default)]
struct PipelineInner {
    aggregations: HashMap<InstrumentationScope, Vec<InstrumentSync>>,
    callbacks: Vec<GenericCallback>,
    multi_callbacks: Vec<Option<GenericCallback>>,
}

impl Pipeline {
    /// Adds the [`InstrumentSync`] to the pipeline with the given scope.
    fn add_sync(&self, scope: InstrumentationScope, i_sync: InstrumentSync) {
        let _ = self.inner.lock().map(|mut inner| {
            inner.aggregations.entry(scope).or_default().push(i_sync);
        });
    }

    /// Registers a single-instrument callback to run on `produce`.
    fn add_callback(&self, callback: GenericCallback) {
        let _ = self
            .inner
            .lock()
            .map(|mut inner| inner.callbacks.push(callback));
    }

    /// Registers a multi-instrument callback, returning its removal closure.
    fn add_multi_callback(
        &self,
        callback: GenericCallback,
    ) -> Result<impl FnOnce(&Pipeline) -> OTelSdkResult, OTelSdkError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        inner.multi_callbacks.push(Some(callback));
        let idx = inner.multi_callbacks.len() - 1;

        Ok(move |this: &Pipeline| {
            let mut inner = this
                .inner
                .lock()
                .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
            // Trait objects are not comparable; the index with a tombstone
            // stands in for identity.
            inner.multi_callbacks[idx] = None;
            Ok(())
        })
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.reader.force_flush()
    }

    fn shutdown(&self) -> OTelSdkResult {
        self.reader.shutdown()
    }
}

impl SdkProducer for Pipeline {
    /// Returns aggregated metrics from a single collection.
    fn produce(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        let _collect_guard = self
            .collect_lock
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;

        let inner = self
            .inner
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        for cb in &inner.callbacks {
            cb();
        }

        for mcb in inner.multi_callbacks.iter().flatten() {
            mcb();
        }

        rm.resource = self.resource.clone();
        if inner.aggregations.len() > rm.scope_metrics.len() {
            rm.scope_metrics
                .reserve(inner.aggregations.len() - rm.scope_metrics.len());
        }

        let mut i = 0;
        for (scope, instruments) in inner.aggregations.iter() {
            let sm = match rm.scope_metrics.get_mut(i) {
                Some(sm) => sm,
                None => {
                    rm.scope_metrics.push(ScopeMetrics::default());
                    rm.scope_metrics.last_mut().expect("just pushed")
                }
            };
            if instruments.len() > sm.metrics.len() {
                sm.metrics.reserve(instruments.len() - sm.metrics.len());
            }

            let mut j = 0;
            for inst in instruments {
                let mut m = sm.metrics.get_mut(j);
                match (inst.comp_agg.call(m.as_mut().map(|m| m.data.as_mut())), m) {
                    // No reusable metric; the aggregate allocated fresh data.
                    ((len, Some(initial_agg)), None) if len > 0 => sm.metrics.push(Metric {
                        name: inst.name.clone(),
                        description: inst.description.clone(),
                        unit: inst.unit.clone(),
                        data: initial_agg,
                    }),
                    // Existing metric reused; refresh its identity fields.
                    ((len, data), Some(prev_agg)) if len > 0 => {
                        if let Some(data) = data {
                            // the previous aggregation was of a different type
                            prev_agg.data = data;
                        }
                        prev_agg.name = inst.name.clone();
                        prev_agg.description = inst.description.clone();
                        prev_agg.unit = inst.unit.clone();
                    }
                    // Empty aggregations are dropped from the output.
                    _ => continue,
                }

                j += 1;
            }

            sm.metrics.truncate(j);
            if !sm.metrics.is_empty() {
                sm.scope = scope.clone();
                i += 1;
            }
        }

        rm.scope_metrics.truncate(i);

        Ok(())
    }
}

/// A synchronization point between a [`Pipeline`] and an instrument's
/// aggregate function.
struct InstrumentSync {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    unit: Cow<'static, str>,
    comp_agg: Arc<dyn internal::ComputeAggregation>,
}

impl fmt::Debug for InstrumentSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentSync")
            .field("name", &self.name)
            .finish()
    }
}

type Cache<T> =
    Mutex<HashMap<InstrumentId, Result<Option<Arc<dyn internal::Measure<T>>>, String>>>;

/// Inserts instruments from a single scope into a pipeline.
struct Inserter<T> {
    /// Aggregate function inputs already inserted into the pipeline, so the
    /// same stream resolves to the same measure instance and duplicates are
    /// not double-collected.
    aggregators: Cache<T>,

    /// Identifiers of every instrument seen by the owning meter, used to
    /// warn about duplicate registrations that differ in identity.
    views: Arc<Mutex<HashMap<Cow<'static, str>, InstrumentId>>>,

    pipeline: Arc<Pipeline>,
}

impl<T> Inserter<T>
where
    T: Number,
{
    fn new(p: Arc<Pipeline>, vc: Arc<Mutex<HashMap<Cow<'static, str>, InstrumentId>>>) -> Self {
        Inserter {
            aggregators: Default::default(),
            views: vc,
            pipeline: p,
        }
    }

    /// Inserts the provided instrument into the pipeline.
    ///
    /// Every matching view contributes one stream; with no matching view the
    /// implicit default stream applies. The returned measure functions are
    /// deduplicated.
    fn instrument(&self, inst: Instrument) -> Result<Vec<Arc<dyn internal::Measure<T>>>, String> {
        let kind = match inst.kind {
            Some(kind) => kind,
            None => return Err("instrument must have a kind".to_string()),
        };

        let mut matched = false;
        let mut measures = vec![];
        let mut errs = vec![];
        let mut seen = HashSet::new();

        for v in &self.pipeline.views {
            let stream = match v.match_inst(&inst) {
                Some(stream) => stream,
                None => continue,
            };
            matched = true;

            let id = self.inst_id(kind, &inst, &stream);
            if seen.contains(&id) {
                continue; // This aggregate function has already been added.
            }

            match self.cached_aggregator(&inst.scope, kind, stream, inst.advisory_boundaries.clone())
            {
                Ok(Some(agg)) => {
                    seen.insert(id);
                    measures.push(agg);
                }
                Ok(None) => continue, // Drop aggregation.
                Err(err) => errs.push(err),
            }
        }

        if matched {
            if errs.is_empty() {
                return Ok(measures);
            }
            return Err(format!("{errs:?}"));
        }

        // Apply the implicit default stream since no view matched.
        let stream = Stream {
            name: Some(inst.name.clone()),
            description: Some(inst.description.clone()),
            unit: Some(inst.unit.clone()),
            aggregation: None,
            allowed_attribute_keys: None,
            cardinality_limit: None,
        };

        match self.cached_aggregator(&inst.scope, kind, stream, inst.advisory_boundaries.clone()) {
            Ok(Some(agg)) => {
                measures.push(agg);
                Ok(measures)
            }
            Ok(None) => Ok(measures),
            Err(err) => {
                errs.push(err);
                Err(format!("{errs:?}"))
            }
        }
    }

    /// Returns the aggregate functions for one resolved stream, creating and
    /// caching them on first use.
    ///
    /// A conflict with an already-created instrument stream logs a warning
    /// but still yields a working aggregate function, per the duplicate
    /// registration rule: the first registration wins the identity, later
    /// ones are reported.
    fn cached_aggregator(
        &self,
        scope: &InstrumentationScope,
        kind: InstrumentKind,
        mut stream: Stream,
        advisory_boundaries: Option<Vec<f64>>,
    ) -> Result<Option<Arc<dyn internal::Measure<T>>>, String> {
        let mut agg = stream
            .aggregation
            .take()
            .unwrap_or(aggregation::Aggregation::Default);

        if matches!(agg, aggregation::Aggregation::Default) {
            agg = aggregation::default_aggregation_for(kind);
            // Advisory boundaries apply only when no view chose the
            // aggregation.
            if let (
                Aggregation::ExplicitBucketHistogram { boundaries, .. },
                Some(advised),
            ) = (&mut agg, advisory_boundaries)
            {
                *boundaries = advised;
            }
        }

        is_aggregator_compatible(&kind, &agg)?;

        let mut id = self.inst_id(kind, &Instrument::default(), &stream);
        // If there is a conflict the stream is still emitted, but the
        // duplicate registration is logged.
        self.log_conflict(&id);

        // Instrument names are case-insensitive; normalize before caching so
        // differently-cased requests share one stream.
        id.normalize();

        let mut cache = self
            .aggregators
            .lock()
            .map_err(|err| format!("aggregator cache poisoned: {err}"))?;

        let cached = cache.entry(id.clone()).or_insert_with(|| {
            let filter = stream.allowed_attribute_keys.as_ref().map(Arc::clone).map(
                |allowed| {
                    Arc::new(move |kv: &KeyValue| allowed.contains(&kv.key))
                        as Arc<dyn Fn(&KeyValue) -> bool + Send + Sync>
                },
            );

            let cardinality_limit = stream
                .cardinality_limit
                .unwrap_or(self.pipeline.default_cardinality_limit);

            let b = AggregateBuilder::new(
                self.pipeline.reader.temporality(kind),
                filter,
                cardinality_limit,
                self.pipeline.exemplar_filter,
            );
            let fns = match aggregate_fns(&b, &agg, kind) {
                Ok(Some(fns)) => fns,
                Ok(None) => return Ok(None), // Drop aggregation.
                Err(err) => return Err(err),
            };

            self.pipeline.add_sync(
                scope.clone(),
                InstrumentSync {
                    name: stream.name.unwrap_or_default(),
                    description: stream.description.unwrap_or_default(),
                    unit: stream.unit.unwrap_or_default(),
                    comp_agg: fns.collect,
                },
            );

            Ok(Some(fns.measure))
        });

        cached.clone()
    }

    /// Warns when an instrument with the same name but a different identity
    /// was already created.
    fn log_conflict(&self, id: &InstrumentId) {
        let Ok(mut views) = self.views.lock() else {
            return;
        };
        let lower: Cow<'static, str> = id.name.to_lowercase().into();
        match views.get(&lower) {
            Some(existing) if existing == id => {}
            Some(existing) => {
                otel_warn!(
                    name: "Inserter.DuplicateInstrument",
                    message = "duplicate metric stream definitions; the first registration wins",
                    existing = format!(
                        "name={}, description={}, kind={:?}, unit={}, number={}",
                        existing.name,
                        existing.description,
                        existing.kind,
                        existing.unit,
                        existing.number
                    ),
                    duplicate = format!(
                        "name={}, description={}, kind={:?}, unit={}, number={}",
                        id.name, id.description, id.kind, id.unit, id.number
                    )
                );
            }
            None => {
                views.insert(lower, id.clone());
            }
        }
    }

    fn inst_id(&self, kind: InstrumentKind, inst: &Instrument, stream: &Stream) -> InstrumentId {
        InstrumentId {
            name: stream.name.clone().unwrap_or_else(|| inst.name.clone()),
            description: stream
                .description
                .clone()
                .unwrap_or_else(|| inst.description.clone()),
            kind,
            unit: stream.unit.clone().unwrap_or_else(|| inst.unit.clone()),
            number: Cow::Borrowed(std::any::type_name::<T>()),
        }
    }
}

/// Creates the aggregate functions for the given aggregation and kind.
///
/// Returns `None` for the drop aggregation.
fn aggregate_fns<T: Number>(
    b: &AggregateBuilder<T>,
    agg: &aggregation::Aggregation,
    kind: InstrumentKind,
) -> Result<Option<internal::AggregateFns<T>>, String> {
    use aggregation::Aggregation;

    match agg {
        Aggregation::Default => aggregate_fns(b, &aggregation::default_aggregation_for(kind), kind),
        Aggregation::Drop => Ok(None),
        Aggregation::LastValue => Ok(Some(b.last_value())),
        Aggregation::Sum => {
            let fns = match kind {
                InstrumentKind::ObservableCounter => b.precomputed_sum(true),
                InstrumentKind::ObservableUpDownCounter => b.precomputed_sum(false),
                InstrumentKind::Counter | InstrumentKind::Histogram => b.sum(true),
                _ => b.sum(false),
            };
            Ok(Some(fns))
        }
        Aggregation::ExplicitBucketHistogram {
            boundaries,
            record_min_max,
        } => {
            let record_sum = !matches!(
                kind,
                InstrumentKind::UpDownCounter
                    | InstrumentKind::ObservableUpDownCounter
                    | InstrumentKind::ObservableGauge
            );
            Ok(Some(b.explicit_bucket_histogram(
                boundaries.to_vec(),
                *record_min_max,
                record_sum,
            )))
        }
    }
}

/// Checks if the aggregation can be used by the instrument kind.
fn is_aggregator_compatible(
    kind: &InstrumentKind,
    agg: &aggregation::Aggregation,
) -> Result<(), String> {
    use aggregation::Aggregation;
    match agg {
        Aggregation::Default | Aggregation::Drop => Ok(()),
        Aggregation::ExplicitBucketHistogram { .. } => {
            if matches!(kind, InstrumentKind::Counter | InstrumentKind::Histogram) {
                return Ok(());
            }
            Err(format!(
                "incompatible aggregation: explicit bucket histogram cannot be used with {kind:?}"
            ))
        }
        Aggregation::Sum => match kind {
            InstrumentKind::Counter
            | InstrumentKind::UpDownCounter
            | InstrumentKind::Histogram
            | InstrumentKind::ObservableCounter
            | InstrumentKind::ObservableUpDownCounter => Ok(()),
            _ => Err(format!(
                "incompatible aggregation: sum cannot be used with {kind:?}"
            )),
        },
        Aggregation::LastValue => match kind {
            InstrumentKind::ObservableGauge => Ok(()),
            _ => Err(format!(
                "incompatible aggregation: last value cannot be used with {kind:?}"
            )),
        },
    }
}

/// The group of pipelines connecting readers with instrument measurement.
pub(crate) struct Pipelines(pub(crate) Vec<Arc<Pipeline>>);

impl fmt::Debug for Pipelines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pipelines").field(&self.0.len()).finish()
    }
}

impl Pipelines {
    pub(crate) fn new(
        res: Resource,
        readers: Vec<Box<dyn MetricReader>>,
        views: Vec<Arc<dyn View>>,
        exemplar_filter: ExemplarFilter,
        default_cardinality_limit: usize,
    ) -> Self {
        let collect_lock = Arc::new(Mutex::new(()));
        let mut pipes = Vec::with_capacity(readers.len());
        for r in readers {
            let p = Arc::new(Pipeline {
                resource: res.clone(),
                reader: r,
                views: views.clone(),
                exemplar_filter,
                default_cardinality_limit,
                collect_lock: collect_lock.clone(),
                inner: Default::default(),
            });
            p.reader.register_pipeline(Arc::downgrade(&p));
            pipes.push(p);
        }

        Pipelines(pipes)
    }

    /// Registers a callback on every pipeline; it runs on every collection
    /// for the lifetime of the provider.
    pub(crate) fn register_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cb = Arc::new(callback);
        for pipe in &self.0 {
            pipe.add_callback(cb.clone())
        }
    }

    /// Registers a multi-instrument callback removable through the returned
    /// registration.
    pub(crate) fn register_multi_callback<F>(
        &self,
        f: F,
    ) -> Result<Box<dyn CallbackRegistration>, OTelSdkError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let cb = Arc::new(f);

        let fns = self
            .0
            .iter()
            .map(|pipe| {
                let pipe = Arc::clone(pipe);
                let unreg = pipe.add_multi_callback(cb.clone())?;
                Ok(Box::new(move || unreg(pipe.as_ref()))
                    as Box<dyn FnOnce() -> OTelSdkResult + Send + Sync>)
            })
            .collect::<Result<_, OTelSdkError>>()?;

        Ok(Box::new(Unregister(fns)))
    }

    /// Flush every pipeline.
    pub(crate) fn force_flush(&self) -> OTelSdkResult {
        let mut errs = vec![];
        for pipeline in &self.0 {
            if let Err(err) = pipeline.force_flush() {
                errs.push(err);
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("{errs:?}")))
        }
    }

    /// Shut down every pipeline.
    pub(crate) fn shutdown(&self) -> OTelSdkResult {
        let mut errs = vec![];
        for pipeline in &self.0 {
            if let Err(err) = pipeline.shutdown() {
                errs.push(err);
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("{errs:?}")))
        }
    }
}

struct Unregister(Vec<Box<dyn FnOnce() -> OTelSdkResult + Send + Sync>>);

impl CallbackRegistration for Unregister {
    fn unregister(&mut self) -> OTelSdkResult {
        let mut errs = vec![];
        while let Some(unreg) = self.0.pop() {
            if let Err(err) = unreg() {
                errs.push(err);
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(format!("{errs:?}")))
        }
    }
}

/// Resolves the aggregate functions an instrument must update across every
/// pipeline of the provider.
pub(crate) struct Resolver<T> {
    inserters: Vec<Inserter<T>>,
}

impl<T> Resolver<T>
where
    T: Number,
{
    pub(crate) fn new(
        pipelines: Arc<Pipelines>,
        view_cache: Arc<Mutex<HashMap<Cow<'static, str>, InstrumentId>>>,
    ) -> Self {
        let inserters = pipelines
            .0
            .iter()
            .map(|pipe| Inserter::new(Arc::clone(pipe), Arc::clone(&view_cache)))
            .collect();

        Resolver { inserters }
    }

    /// The measure functions the instrument must update.
    pub(crate) fn measures(
        &self,
        id: Instrument,
    ) -> Result<Vec<Arc<dyn internal::Measure<T>>>, String> {
        let (mut measures, mut errs) = (vec![], vec![]);

        for inserter in &self.inserters {
            match inserter.instrument(id.clone()) {
                Ok(ms) => measures.extend(ms),
                Err(err) => errs.push(err),
            }
        }

        if errs.is_empty() {
            Ok(measures)
        } else {
            Err(format!("{errs:?}"))
        }
    }
}
