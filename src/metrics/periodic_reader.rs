//! A reader that collects and exports on a fixed schedule from a dedicated
//! worker thread.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use std::{env, thread};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::exporter::PushMetricExporter;
use crate::metrics::instrument::InstrumentKind;
use crate::metrics::pipeline::Pipeline;
use crate::metrics::reader::{MetricReader, SdkProducer};
use crate::util::block_on_timeout;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const METRIC_EXPORT_INTERVAL_NAME: &str = "OTEL_METRIC_EXPORT_INTERVAL";
const METRIC_EXPORT_TIMEOUT_NAME: &str = "OTEL_METRIC_EXPORT_TIMEOUT";

/// Configuration options for a [`PeriodicReader`].
#[derive(Debug)]
pub struct PeriodicReaderBuilder<E> {
    interval: Duration,
    timeout: Duration,
    exporter: E,
}

impl<E> PeriodicReaderBuilder<E>
where
    E: PushMetricExporter,
{
    fn new(exporter: E) -> Self {
        let interval = env::var(METRIC_EXPORT_INTERVAL_NAME)
            .ok()
            .and_then(|v| u64::from_str(&v).ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);
        let timeout = env::var(METRIC_EXPORT_TIMEOUT_NAME)
            .ok()
            .and_then(|v| u64::from_str(&v).ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);

        PeriodicReaderBuilder {
            interval,
            timeout,
            exporter,
        }
    }

    /// Set the time between collect-and-export cycles.
    ///
    /// Overrides `OTEL_METRIC_EXPORT_INTERVAL`; ignored when zero.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    /// Set the deadline for a single export call.
    ///
    /// Overrides `OTEL_METRIC_EXPORT_TIMEOUT`; ignored when zero.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Build the reader and start its worker thread.
    pub fn build(self) -> PeriodicReader {
        PeriodicReader::new(Arc::new(self.exporter), self.interval, self.timeout)
    }
}

/// Messages sent from the reader handle to the worker thread.
#[derive(Debug)]
enum Message {
    Flush(SyncSender<OTelSdkResult>),
    Shutdown(SyncSender<OTelSdkResult>),
}

/// A [`MetricReader`] that collects and exports metrics every `interval`
/// (default 60 s) from a dedicated worker thread, bounding each export by
/// `timeout` (default 30 s).
///
/// `force_flush` triggers an out-of-band collect-and-export; `shutdown`
/// flushes once, shuts the exporter down and stops the worker. Temporality
/// is taken from the exporter.
#[derive(Clone)]
pub struct PeriodicReader {
    inner: Arc<PeriodicReaderInner>,
}

struct PeriodicReaderInner {
    message_sender: SyncSender<Message>,
    producer: Mutex<Option<Weak<Pipeline>>>,
    exporter: Arc<dyn PushMetricExporter>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    shutdown_result: Mutex<Option<OTelSdkResult>>,
    interval: Duration,
    timeout: Duration,
}

impl fmt::Debug for PeriodicReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("interval", &self.inner.interval)
            .finish()
    }
}

impl PeriodicReader {
    /// Configuration options for a periodic reader wrapping `exporter`.
    pub fn builder<E>(exporter: E) -> PeriodicReaderBuilder<E>
    where
        E: PushMetricExporter,
    {
        PeriodicReaderBuilder::new(exporter)
    }

    /// The configured collection interval.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn new(exporter: Arc<dyn PushMetricExporter>, interval: Duration, timeout: Duration) -> Self {
        let (message_sender, message_receiver) = mpsc::sync_channel::<Message>(8);

        let reader = PeriodicReader {
            inner: Arc::new(PeriodicReaderInner {
                message_sender,
                producer: Mutex::new(None),
                exporter,
                handle: Mutex::new(None),
                is_shutdown: AtomicBool::new(false),
                shutdown_result: Mutex::new(None),
                interval,
                timeout,
            }),
        };

        let worker_reader = reader.clone();
        let handle = thread::Builder::new()
            .name("OpenTelemetry.Metrics.PeriodicReader".to_string())
            .spawn(move || {
                otel_debug!(
                    name: "PeriodicReader.ThreadStarted",
                    interval_in_millisecs = interval.as_millis()
                );
                let mut last_collect_time = Instant::now();

                loop {
                    let remaining_time = interval
                        .checked_sub(last_collect_time.elapsed())
                        .unwrap_or(Duration::ZERO);

                    match message_receiver.recv_timeout(remaining_time) {
                        Ok(Message::Flush(sender)) => {
                            otel_debug!(name: "PeriodicReader.ExportingDueToForceFlush");
                            let result = worker_reader.collect_and_export();
                            last_collect_time = Instant::now();
                            let _ = sender.send(result);
                        }
                        Ok(Message::Shutdown(sender)) => {
                            otel_debug!(name: "PeriodicReader.ExportingDueToShutdown");
                            let result = worker_reader.collect_and_export();
                            let shutdown_result = worker_reader.inner.exporter.shutdown();
                            let _ = sender.send(result.and(shutdown_result));
                            otel_debug!(
                                name: "PeriodicReader.ThreadExiting",
                                reason = "ShutdownRequested"
                            );
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            otel_debug!(name: "PeriodicReader.ExportingDueToTimer");
                            if let Err(err) = worker_reader.collect_and_export() {
                                otel_warn!(
                                    name: "PeriodicReader.ExportFailed",
                                    error = format!("{err}")
                                );
                            }
                            last_collect_time = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            otel_debug!(
                                name: "PeriodicReader.ThreadExiting",
                                reason = "MessageSenderDisconnected"
                            );
                            break;
                        }
                    }
                }
                otel_debug!(name: "PeriodicReader.ThreadStopped");
            })
            .expect("failed to spawn thread");

        if let Ok(mut stored) = reader.inner.handle.lock() {
            *stored = Some(handle);
        }

        reader
    }

    fn collect_and_export(&self) -> OTelSdkResult {
        let mut rm = ResourceMetrics::default();
        self.collect(&mut rm)?;

        if rm.scope_metrics.is_empty() {
            otel_debug!(name: "PeriodicReader.NoMetricsToExport");
            return Ok(());
        }

        let export = self.inner.exporter.export(rm);
        block_on_timeout(export, self.inner.timeout)
    }
}

impl MetricReader for PeriodicReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let Ok(mut producer) = self.inner.producer.lock() else {
            return;
        };

        if producer.is_none() {
            *producer = Some(pipeline);
        } else {
            otel_warn!(
                name: "PeriodicReader.DuplicateRegistration",
                message = "the reader is already registered with a provider and was not registered again"
            );
        }
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        // A plain flag rather than the cached-result mutex: the worker calls
        // back into `collect` while `shutdown` holds that mutex.
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        let producer = self
            .inner
            .producer
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        match producer.as_ref().and_then(|w| w.upgrade()) {
            Some(producer) => producer.produce(rm),
            None => Err(OTelSdkError::InternalFailure(
                "reader is not registered with a provider".to_string(),
            )),
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        let (sender, receiver) = mpsc::sync_channel(1);
        self.inner
            .message_sender
            .try_send(Message::Flush(sender))
            .map_err(|err| OTelSdkError::InternalFailure(format!("{err}")))?;

        receiver
            .recv_timeout(self.inner.timeout + Duration::from_secs(5))
            .map_err(|err| match err {
                RecvTimeoutError::Timeout => {
                    OTelSdkError::Timeout(self.inner.timeout + Duration::from_secs(5))
                }
                _ => OTelSdkError::InternalFailure(format!("{err}")),
            })?
    }

    fn shutdown(&self) -> OTelSdkResult {
        let mut cached = self
            .inner
            .shutdown_result
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if let Some(result) = cached.as_ref() {
            return result.clone();
        }

        let deadline = self.inner.timeout + Duration::from_secs(5);
        let (sender, receiver) = mpsc::sync_channel(1);
        let result = match self.inner.message_sender.try_send(Message::Shutdown(sender)) {
            Ok(()) => receiver
                .recv_timeout(deadline)
                .map_err(|err| match err {
                    RecvTimeoutError::Timeout => OTelSdkError::Timeout(deadline),
                    _ => OTelSdkError::InternalFailure(format!("{err}")),
                })
                .and_then(|worker_result| {
                    if let Ok(mut handle) = self.inner.handle.lock() {
                        if let Some(handle) = handle.take() {
                            let _ = handle.join();
                        }
                    }
                    worker_result
                }),
            Err(err) => Err(OTelSdkError::InternalFailure(format!("{err}"))),
        };

        self.inner.is_shutdown.store(true, Ordering::Relaxed);
        *cached = Some(result.clone());
        result
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        self.inner.exporter.temporality(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::KeyValue;
    use crate::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    #[test]
    fn interval_collects_and_exports_without_flush() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(50))
            .build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();

        let counter = provider.meter("test").u64_counter("ticks").build();
        counter.add(1, &[KeyValue::new("k", "v")]);

        std::thread::sleep(Duration::from_millis(300));
        assert!(exporter.export_count() > 0);

        let exported = exporter.take_finished_metrics();
        let metric = &exported[0].scope_metrics[0].metrics[0];
        assert_eq!(metric.name, "ticks");

        provider.shutdown().unwrap();
    }

    #[test]
    fn force_flush_exports_out_of_band() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60 * 60))
            .build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();

        let counter = provider.meter("test").u64_counter("requests").build();
        counter.add(3, &[]);

        assert_eq!(exporter.export_count(), 0);
        provider.force_flush().unwrap();
        assert_eq!(exporter.export_count(), 1);

        provider.shutdown().unwrap();
    }

    #[test]
    fn shutdown_flushes_then_stops_the_exporter_once() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_secs(60 * 60))
            .build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();

        let counter = provider.meter("test").u64_counter("requests").build();
        counter.add(1, &[]);

        provider.shutdown().unwrap();
        assert_eq!(exporter.export_count(), 1);
        assert_eq!(exporter.shutdown_count(), 1);

        // The cached result is returned without touching the exporter again.
        provider.shutdown().unwrap();
        assert_eq!(exporter.shutdown_count(), 1);
    }

    #[test]
    fn empty_collections_are_not_exported() {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone())
            .with_interval(Duration::from_millis(50))
            .build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(exporter.export_count(), 0);

        provider.shutdown().unwrap();
    }
}
