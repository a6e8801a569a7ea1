//! Span processors: hooks between span completion and exporters.
//!
//! The [`BatchSpanProcessor`] buffers finished spans in a bounded queue and
//! exports them from a dedicated worker thread, either when a batch is full
//! or when the schedule interval elapses. The [`SimpleSpanProcessor`] exports
//! every span synchronously as it ends.

use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use std::{env, thread};

use crate::common::KeyValue;
use crate::context::Context;
use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::{Counter, Meter, ObservableGauge, SdkMeterProvider};
use crate::resource::Resource;
use crate::trace::{Span, SpanData, SpanExporter};
use crate::util::block_on_timeout;

/// Delay interval between two consecutive exports.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive exports.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY_DEFAULT: Duration = Duration::from_millis(5_000);
/// Maximum queue size.
pub(crate) const OTEL_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
/// Default maximum queue size.
pub(crate) const OTEL_BSP_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum batch size, must be less than or equal to `OTEL_BSP_MAX_QUEUE_SIZE`.
pub(crate) const OTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Default maximum batch size.
pub(crate) const OTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;
/// Maximum allowed time to export data.
pub(crate) const OTEL_BSP_EXPORT_TIMEOUT: &str = "OTEL_BSP_EXPORT_TIMEOUT";
/// Default maximum allowed time to export data.
pub(crate) const OTEL_BSP_EXPORT_TIMEOUT_DEFAULT: Duration = Duration::from_millis(30_000);

const PROCESSOR_TYPE_KEY: &str = "processorType";
const PROCESSOR_TYPE_VALUE: &str = "BatchSpanProcessor";
const DROPPED_KEY: &str = "dropped";

/// An interface for hooks into span start and end.
///
/// Processors registered on a provider are invoked, in registration order,
/// for every recording span. Both hooks are called synchronously on the
/// application thread and must not block.
pub trait SpanProcessor: Send + Sync + Debug {
    /// Called when a recording span starts.
    fn on_start(&self, span: &mut Span, cx: &Context);
    /// Called when a recording span ends, with its frozen snapshot.
    fn on_end(&self, span: SpanData);
    /// Export all spans received so far; blocks until the exporter has
    /// observed them.
    fn force_flush(&self) -> OTelSdkResult;
    /// Flush, then release resources. Called once by the provider.
    fn shutdown(&self) -> OTelSdkResult;
    /// Installs the provider resource before the first span is processed.
    fn set_resource(&mut self, _resource: &Resource) {}
}

/// A [`SpanProcessor`] that exports each span when it ends.
///
/// Meant for tests and low-traffic processes; every `on_end` blocks on the
/// exporter.
pub struct SimpleSpanProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
    is_shutdown: AtomicBool,
}

impl SimpleSpanProcessor {
    /// Create a processor exporting through `exporter`.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        SimpleSpanProcessor {
            exporter: Mutex::new(exporter),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

impl Debug for SimpleSpanProcessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleSpanProcessor").finish()
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) || !span.span_context.is_sampled() {
            return;
        }

        let result = self
            .exporter
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))
            .and_then(|mut exporter| futures_executor::block_on(exporter.export(vec![span])));

        if let Err(err) = result {
            otel_warn!(
                name: "SimpleSpanProcessor.Export.Error",
                error = format!("{err}")
            );
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.shutdown();
            Ok(())
        } else {
            Err(OTelSdkError::InternalFailure(
                "SimpleSpanProcessor mutex poison at shutdown".to_string(),
            ))
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        if let Ok(mut exporter) = self.exporter.lock() {
            exporter.set_resource(resource);
        }
    }
}

/// Messages sent from the processor handle to the worker thread.
#[derive(Debug)]
enum BatchMessage {
    /// Sent when the number of queued spans reaches the batch size. Carries
    /// the flag to clear once the worker has reacted, so producers post at
    /// most one wakeup per threshold crossing.
    ExportSpans(Arc<AtomicBool>),
    /// Drain the queue and reply with the export result.
    ForceFlush(SyncSender<OTelSdkResult>),
    /// Drain, shut the exporter down, reply, and exit.
    Shutdown(SyncSender<OTelSdkResult>),
    /// Install the provider resource into the exporter.
    SetResource(Arc<Resource>),
}

/// Per-processor instruments describing its own behavior, registered on the
/// meter provider the processor was configured with.
#[derive(Clone)]
struct ProcessorMetrics {
    processed_spans: Counter<u64>,
    dropped_attrs: Vec<KeyValue>,
    exported_attrs: Vec<KeyValue>,
}

impl ProcessorMetrics {
    fn new(meter: &Meter, queue_depth: Arc<AtomicUsize>) -> (Self, ObservableGauge<u64>) {
        let queue_size_gauge = meter
            .u64_observable_gauge("queueSize")
            .with_description("The number of spans queued")
            .with_callback(move |observer| {
                observer.observe(
                    queue_depth.load(Ordering::Relaxed) as u64,
                    &[KeyValue::new(PROCESSOR_TYPE_KEY, PROCESSOR_TYPE_VALUE)],
                );
            })
            .build();

        let processed_spans = meter
            .u64_counter("processedSpans")
            .with_description(
                "The number of spans processed by the BatchSpanProcessor. \
                 [dropped=true if they were dropped due to high throughput]",
            )
            .build();

        (
            ProcessorMetrics {
                processed_spans,
                dropped_attrs: vec![
                    KeyValue::new(PROCESSOR_TYPE_KEY, PROCESSOR_TYPE_VALUE),
                    KeyValue::new(DROPPED_KEY, true),
                ],
                exported_attrs: vec![
                    KeyValue::new(PROCESSOR_TYPE_KEY, PROCESSOR_TYPE_VALUE),
                    KeyValue::new(DROPPED_KEY, false),
                ],
            },
            queue_size_gauge,
        )
    }

    fn record_dropped(&self, count: u64) {
        self.processed_spans.add(count, &self.dropped_attrs);
    }

    fn record_exported(&self, count: u64) {
        self.processed_spans.add(count, &self.exported_attrs);
    }
}

/// A [`SpanProcessor`] that batches finished spans and exports them on a
/// dedicated worker thread.
///
/// Sampled spans are enqueued without blocking; when the queue is full they
/// are dropped and counted. The worker exports whenever a full batch is
/// available or `scheduled_delay` has elapsed since the previous export,
/// whichever comes first. Exports are bounded by `max_export_timeout`; an
/// expired batch is abandoned and the worker moves on.
pub struct BatchSpanProcessor {
    span_sender: SyncSender<SpanData>,
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    forceflush_timeout: Duration,
    shutdown_timeout: Duration,
    export_span_message_sent: Arc<AtomicBool>,
    current_batch_size: Arc<AtomicUsize>,
    max_export_batch_size: usize,
    max_queue_size: usize,
    dropped_spans_count: AtomicUsize,
    shutdown_result: Mutex<Option<OTelSdkResult>>,
    metrics: Option<ProcessorMetrics>,
    // Keeps the queue gauge callback registered for the processor lifetime.
    _queue_size_gauge: Option<ObservableGauge<u64>>,
}

impl Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("max_queue_size", &self.max_queue_size)
            .field("max_export_batch_size", &self.max_export_batch_size)
            .finish()
    }
}

impl BatchSpanProcessor {
    /// Create a builder for a processor wrapping `exporter`.
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
            meter_provider: None,
        }
    }

    pub(crate) fn new(
        mut exporter: Box<dyn SpanExporter>,
        config: BatchConfig,
        meter_provider: Option<&SdkMeterProvider>,
    ) -> Self {
        let (span_sender, span_receiver) = mpsc::sync_channel::<SpanData>(config.max_queue_size);
        let (message_sender, message_receiver) = mpsc::sync_channel::<BatchMessage>(64);
        let max_queue_size = config.max_queue_size;
        let max_export_batch_size = config.max_export_batch_size;
        let current_batch_size = Arc::new(AtomicUsize::new(0));
        let current_batch_size_for_thread = current_batch_size.clone();

        let (metrics, queue_size_gauge) = match meter_provider {
            Some(provider) => {
                let meter = provider.meter(env!("CARGO_PKG_NAME"));
                let (metrics, gauge) = ProcessorMetrics::new(&meter, current_batch_size.clone());
                (Some(metrics), Some(gauge))
            }
            None => (None, None),
        };
        let metrics_for_thread = metrics.clone();
        let max_export_timeout = config.max_export_timeout;

        let handle = thread::Builder::new()
            .name("OpenTelemetry.Traces.BatchProcessor".to_string())
            .spawn(move || {
                otel_debug!(
                    name: "BatchSpanProcessor.ThreadStarted",
                    interval_in_millisecs = config.scheduled_delay.as_millis(),
                    max_export_batch_size = config.max_export_batch_size,
                    max_queue_size = max_queue_size
                );
                let mut last_export_time = Instant::now();
                let mut spans = Vec::with_capacity(config.max_export_batch_size);
                let current_batch_size = current_batch_size_for_thread;
                let metrics = metrics_for_thread;

                loop {
                    let remaining_time = config
                        .scheduled_delay
                        .checked_sub(last_export_time.elapsed())
                        .unwrap_or(Duration::ZERO);

                    match message_receiver.recv_timeout(remaining_time) {
                        Ok(BatchMessage::ExportSpans(export_span_message_sent)) => {
                            // The flag is cleared once the wakeup is handled so
                            // producers can post the next one.
                            export_span_message_sent.store(false, Ordering::Relaxed);
                            otel_debug!(name: "BatchSpanProcessor.ExportingDueToBatchSize");
                            let _ = Self::get_spans_and_export(
                                &span_receiver,
                                &mut exporter,
                                &mut spans,
                                &mut last_export_time,
                                &current_batch_size,
                                &config,
                                metrics.as_ref(),
                            );
                        }
                        Ok(BatchMessage::ForceFlush(sender)) => {
                            otel_debug!(name: "BatchSpanProcessor.ExportingDueToForceFlush");
                            let result = Self::get_spans_and_export(
                                &span_receiver,
                                &mut exporter,
                                &mut spans,
                                &mut last_export_time,
                                &current_batch_size,
                                &config,
                                metrics.as_ref(),
                            );
                            let _ = sender.send(result);
                        }
                        Ok(BatchMessage::Shutdown(sender)) => {
                            otel_debug!(name: "BatchSpanProcessor.ExportingDueToShutdown");
                            let result = Self::get_spans_and_export(
                                &span_receiver,
                                &mut exporter,
                                &mut spans,
                                &mut last_export_time,
                                &current_batch_size,
                                &config,
                                metrics.as_ref(),
                            );
                            exporter.shutdown();
                            let _ = sender.send(result);
                            otel_debug!(
                                name: "BatchSpanProcessor.ThreadExiting",
                                reason = "ShutdownRequested"
                            );
                            break;
                        }
                        Ok(BatchMessage::SetResource(resource)) => {
                            exporter.set_resource(&resource);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            otel_debug!(name: "BatchSpanProcessor.ExportingDueToTimer");
                            let _ = Self::get_spans_and_export(
                                &span_receiver,
                                &mut exporter,
                                &mut spans,
                                &mut last_export_time,
                                &current_batch_size,
                                &config,
                                metrics.as_ref(),
                            );
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            otel_debug!(
                                name: "BatchSpanProcessor.ThreadExiting",
                                reason = "MessageSenderDisconnected"
                            );
                            break;
                        }
                    }
                }
                otel_debug!(name: "BatchSpanProcessor.ThreadStopped");
            })
            .expect("failed to spawn thread");

        BatchSpanProcessor {
            span_sender,
            message_sender,
            handle: Mutex::new(Some(handle)),
            forceflush_timeout: max_export_timeout + Duration::from_secs(5),
            shutdown_timeout: max_export_timeout + Duration::from_secs(5),
            export_span_message_sent: Arc::new(AtomicBool::new(false)),
            current_batch_size,
            max_export_batch_size,
            max_queue_size,
            dropped_spans_count: AtomicUsize::new(0),
            shutdown_result: Mutex::new(None),
            metrics,
            _queue_size_gauge: queue_size_gauge,
        }
    }

    /// Drains up to the number of spans counted at entry, exporting in
    /// batches of at most `max_export_batch_size`.
    #[allow(clippy::too_many_arguments)]
    fn get_spans_and_export(
        span_receiver: &mpsc::Receiver<SpanData>,
        exporter: &mut Box<dyn SpanExporter>,
        spans: &mut Vec<SpanData>,
        last_export_time: &mut Instant,
        current_batch_size: &AtomicUsize,
        config: &BatchConfig,
        metrics: Option<&ProcessorMetrics>,
    ) -> OTelSdkResult {
        let target = current_batch_size.load(Ordering::Relaxed);
        let mut result = OTelSdkResult::Ok(());
        let mut total_exported_spans: usize = 0;

        while target > 0 && total_exported_spans < target {
            while let Ok(span) = span_receiver.try_recv() {
                spans.push(span);
                if spans.len() == config.max_export_batch_size {
                    break;
                }
            }
            if spans.is_empty() {
                break;
            }

            let count_of_spans = spans.len();
            total_exported_spans += count_of_spans;

            result = Self::export_batch_sync(exporter, spans, last_export_time, config, metrics);

            current_batch_size.fetch_sub(count_of_spans, Ordering::Relaxed);
        }
        result
    }

    fn export_batch_sync(
        exporter: &mut Box<dyn SpanExporter>,
        batch: &mut Vec<SpanData>,
        last_export_time: &mut Instant,
        config: &BatchConfig,
        metrics: Option<&ProcessorMetrics>,
    ) -> OTelSdkResult {
        *last_export_time = Instant::now();

        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        let export_future = exporter.export(batch.split_off(0));
        let result = block_on_timeout(export_future, config.max_export_timeout);

        match &result {
            Ok(()) => {
                if let Some(metrics) = metrics {
                    metrics.record_exported(count as u64);
                }
            }
            Err(err) => {
                otel_error!(
                    name: "BatchSpanProcessor.ExportError",
                    error = format!("{err}")
                );
            }
        }
        result
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {
        // Ignored
    }

    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }

        match self.span_sender.try_send(span) {
            Ok(()) => {
                if self.current_batch_size.fetch_add(1, Ordering::Relaxed) + 1
                    >= self.max_export_batch_size
                    && !self.export_span_message_sent.load(Ordering::Relaxed)
                    && !self.export_span_message_sent.swap(true, Ordering::Relaxed)
                {
                    if self
                        .message_sender
                        .try_send(BatchMessage::ExportSpans(
                            self.export_span_message_sent.clone(),
                        ))
                        .is_err()
                    {
                        self.export_span_message_sent
                            .store(false, Ordering::Relaxed);
                    }
                }
            }
            Err(mpsc::TrySendError::Full(_)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped(1);
                }
                if self.dropped_spans_count.fetch_add(1, Ordering::Relaxed) == 0 {
                    otel_warn!(
                        name: "BatchSpanProcessor.SpanDroppingStarted",
                        message = "BatchSpanProcessor dropped a span because the queue is full. Further drops will not be logged until shutdown, when the total count is reported."
                    );
                }
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                otel_warn!(
                    name: "BatchSpanProcessor.Emit.AfterShutdown",
                    message = "Span received after the processor worker exited; it will not be exported."
                );
            }
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        match self.message_sender.try_send(BatchMessage::ForceFlush(sender)) {
            Ok(()) => receiver
                .recv_timeout(self.forceflush_timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => OTelSdkError::Timeout(self.forceflush_timeout),
                    _ => OTelSdkError::InternalFailure(format!("{err}")),
                })?,
            Err(mpsc::TrySendError::Full(_)) => Err(OTelSdkError::InternalFailure(
                "force_flush could not be queued: the control channel is full".to_string(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(OTelSdkError::AlreadyShutdown),
        }
    }

    fn shutdown(&self) -> OTelSdkResult {
        let mut cached = self
            .shutdown_result
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if let Some(result) = cached.as_ref() {
            return result.clone();
        }

        let dropped_spans = self.dropped_spans_count.load(Ordering::Relaxed);
        if dropped_spans > 0 {
            otel_warn!(
                name: "BatchSpanProcessor.SpansDropped",
                dropped_spans_count = dropped_spans,
                max_queue_size = self.max_queue_size,
                message = "Spans were dropped because the queue was full. Consider increasing the queue size or decreasing the schedule delay."
            );
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        let result = match self.message_sender.try_send(BatchMessage::Shutdown(sender)) {
            Ok(()) => receiver
                .recv_timeout(self.shutdown_timeout)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => {
                        otel_error!(name: "BatchSpanProcessor.Shutdown.Timeout");
                        OTelSdkError::Timeout(self.shutdown_timeout)
                    }
                    _ => OTelSdkError::InternalFailure(format!("{err}")),
                })
                .and_then(|worker_result| {
                    if let Ok(mut handle) = self.handle.lock() {
                        if let Some(handle) = handle.take() {
                            let _ = handle.join();
                        }
                    }
                    worker_result
                }),
            Err(mpsc::TrySendError::Full(_)) => Err(OTelSdkError::InternalFailure(
                "shutdown could not be queued: the control channel is full".to_string(),
            )),
            Err(mpsc::TrySendError::Disconnected(_)) => Err(OTelSdkError::AlreadyShutdown),
        };

        *cached = Some(result.clone());
        result
    }

    fn set_resource(&mut self, resource: &Resource) {
        let _ = self
            .message_sender
            .try_send(BatchMessage::SetResource(Arc::new(resource.clone())));
    }
}

/// Batch span processor configuration.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// The maximum queue size to buffer spans for delayed processing. Spans
    /// offered past this bound are dropped. Defaults to 2048.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive exports. Defaults to 5 s.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of spans in a single export call. Defaults to 512.
    pub(crate) max_export_batch_size: usize,

    /// The maximum duration of a single export call. Defaults to 30 s.
    pub(crate) max_export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        let mut config = BatchConfig {
            max_queue_size: OTEL_BSP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: OTEL_BSP_SCHEDULE_DELAY_DEFAULT,
            max_export_batch_size: OTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            max_export_timeout: OTEL_BSP_EXPORT_TIMEOUT_DEFAULT,
        };

        if let Some(max_queue_size) = env::var(OTEL_BSP_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            config.max_queue_size = max_queue_size;
        }

        if let Some(scheduled_delay) = env::var(OTEL_BSP_SCHEDULE_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            config.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_batch_size) = env::var(OTEL_BSP_MAX_EXPORT_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            config.max_export_batch_size = max_export_batch_size;
        }

        // A batch never exceeds the queue it drains from.
        if config.max_export_batch_size > config.max_queue_size {
            config.max_export_batch_size = config.max_queue_size;
        }

        if let Some(max_export_timeout) = env::var(OTEL_BSP_EXPORT_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            config.max_export_timeout = Duration::from_millis(max_export_timeout);
        }

        config
    }
}

impl BatchConfig {
    /// Set the maximum queue size.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        if self.max_export_batch_size > max_queue_size {
            self.max_export_batch_size = max_queue_size;
        }
        self
    }

    /// Set the maximum export batch size, clamped to the queue size.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size.min(self.max_queue_size);
        self
    }

    /// Set the delay between scheduled exports.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set the maximum duration of a single export call.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }
}

/// A builder for [`BatchSpanProcessor`].
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E> {
    exporter: E,
    config: BatchConfig,
    meter_provider: Option<SdkMeterProvider>,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Set the batch configuration.
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the processor's self-describing metrics (`queueSize` gauge
    /// and `processedSpans` counter) on the given meter provider.
    pub fn with_meter_provider(mut self, meter_provider: SdkMeterProvider) -> Self {
        self.meter_provider = Some(meter_provider);
        self
    }

    /// Build the processor and start its worker thread.
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(
            Box::new(self.exporter),
            self.config,
            self.meter_provider.as_ref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::instrumentation::InstrumentationScope;
    use crate::metrics::data::{self, ResourceMetrics};
    use crate::metrics::{ManualReader, MetricReader};
    use crate::trace::{
        InMemorySpanExporter, SpanContext, SpanId, SpanKind, Status, TraceFlags, TraceId,
        TraceState,
    };

    fn span_data(sampled: bool) -> SpanData {
        let now = SystemTime::now();
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(1u128),
                SpanId::from(1u64),
                TraceFlags::default().with_sampled(sampled),
                false,
                TraceState::NONE,
            ),
            parent_span_id: SpanId::INVALID,
            span_kind: SpanKind::Internal,
            name: Cow::Borrowed("operation"),
            start_time: now,
            end_time: now,
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            events: Default::default(),
            links: Default::default(),
            status: Status::Unset,
            instrumentation_scope: InstrumentationScope::default(),
        }
    }

    fn processed_spans_value(reader: &ManualReader, dropped: bool) -> Option<u64> {
        let mut rm = ResourceMetrics::default();
        reader.collect(&mut rm).ok()?;
        for scope in &rm.scope_metrics {
            for metric in &scope.metrics {
                if metric.name != "processedSpans" {
                    continue;
                }
                let sum = metric.data.as_any().downcast_ref::<data::Sum<u64>>()?;
                return sum
                    .data_points
                    .iter()
                    .find(|dp| {
                        dp.attributes.iter().any(|kv| {
                            kv.key.as_str() == DROPPED_KEY
                                && kv.value == crate::common::Value::Bool(dropped)
                        })
                    })
                    .map(|dp| dp.value);
            }
        }
        None
    }

    #[test]
    fn unsampled_spans_are_not_enqueued() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfig::default().with_scheduled_delay(Duration::from_millis(50)),
            )
            .build();

        processor.on_end(span_data(false));
        processor.force_flush().unwrap();

        assert!(exporter.get_finished_spans().is_empty());
        processor.shutdown().unwrap();
    }

    #[test]
    fn queue_bound_drops_excess_spans() {
        let exporter = InMemorySpanExporter::default();
        let reader = Arc::new(ManualReader::builder().build());
        let meter_provider = crate::metrics::SdkMeterProvider::builder()
            .with_reader(reader.clone())
            .build();

        // The wakeup threshold (batch size) is kept above the queue bound so
        // the worker sleeps while the queue fills, making the drop count
        // deterministic.
        let config = BatchConfig {
            max_queue_size: 5,
            scheduled_delay: Duration::from_secs(60 * 60 * 24),
            max_export_batch_size: 100,
            max_export_timeout: Duration::from_secs(5),
        };
        let processor = BatchSpanProcessor::new(
            Box::new(exporter.clone()),
            config,
            Some(&meter_provider),
        );

        for _ in 0..10 {
            processor.on_end(span_data(true));
        }

        assert_eq!(processed_spans_value(&reader, true), Some(5));

        processor.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().len(), 5);
        assert_eq!(processed_spans_value(&reader, false), Some(5));

        processor.shutdown().unwrap();
    }

    #[test]
    fn flush_delivers_all_previously_ended_spans() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfig::default().with_scheduled_delay(Duration::from_secs(60 * 60 * 24)),
            )
            .build();

        for _ in 0..7 {
            processor.on_end(span_data(true));
        }
        processor.force_flush().unwrap();

        assert_eq!(exporter.get_finished_spans().len(), 7);
        processor.shutdown().unwrap();
    }

    #[test]
    fn batches_never_exceed_max_export_batch_size() {
        let exporter = InMemorySpanExporter::default();
        let config = BatchConfig {
            max_queue_size: 100,
            scheduled_delay: Duration::from_secs(60 * 60 * 24),
            max_export_batch_size: 3,
            max_export_timeout: Duration::from_secs(5),
        };
        let processor = BatchSpanProcessor::new(Box::new(exporter.clone()), config, None);

        // Below the wakeup threshold per span, so spans accumulate until the
        // explicit flush drains them in batch-sized chunks.
        for _ in 0..7 {
            processor.on_end(span_data(true));
        }
        // The 3rd span crossed the batch threshold and woke the worker, so
        // some spans may already be exported; flush delivers the rest.
        processor.force_flush().unwrap();

        let sizes = exporter.batch_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 7);
        assert!(sizes.iter().all(|size| (1..=3).contains(size)), "{sizes:?}");
        processor.shutdown().unwrap();
    }

    #[test]
    fn timer_triggers_export_without_flush() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfig::default().with_scheduled_delay(Duration::from_millis(50)),
            )
            .build();

        // No spans: the timer fires but nothing is exported.
        std::thread::sleep(Duration::from_millis(150));
        assert!(exporter.get_finished_spans().is_empty());

        processor.on_end(span_data(true));
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(exporter.get_finished_spans().len(), 1);

        processor.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent_and_shuts_exporter_once() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::builder(exporter.clone()).build();

        processor.on_end(span_data(true));
        assert!(processor.shutdown().is_ok());
        assert!(processor.shutdown().is_ok());

        assert_eq!(exporter.shutdown_count(), 1);
        assert_eq!(exporter.get_finished_spans().len(), 1);
    }

    #[test]
    fn export_timeout_abandons_batch() {
        #[derive(Debug)]
        struct StalledExporter;

        impl SpanExporter for StalledExporter {
            fn export(
                &mut self,
                _batch: Vec<SpanData>,
            ) -> futures_util::future::BoxFuture<'static, crate::trace::ExportResult> {
                Box::pin(async {
                    std::thread::sleep(Duration::from_secs(2));
                    Ok(())
                })
            }
        }

        let config = BatchConfig {
            max_queue_size: 16,
            scheduled_delay: Duration::from_secs(60 * 60 * 24),
            max_export_batch_size: 16,
            max_export_timeout: Duration::from_millis(50),
        };
        let processor = BatchSpanProcessor::new(Box::new(StalledExporter), config, None);

        processor.on_end(span_data(true));
        let result = processor.force_flush();
        assert!(matches!(result, Err(OTelSdkError::Timeout(_))));
    }
}
