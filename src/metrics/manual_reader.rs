//! A reader collected on demand by its owner rather than on a schedule.

use std::fmt;
use std::sync::{Mutex, Weak};

use crate::error::{OTelSdkError, OTelSdkResult};
use crate::metrics::data::{ResourceMetrics, Temporality};
use crate::metrics::instrument::InstrumentKind;
use crate::metrics::pipeline::Pipeline;
use crate::metrics::reader::{MetricReader, SdkProducer};

/// A [`MetricReader`] whose `collect` is driven by its owner; useful for
/// tests and for embedders bridging to pull-based protocols.
pub struct ManualReader {
    inner: Mutex<ManualReaderInner>,
    temporality: Temporality,
}

struct ManualReaderInner {
    sdk_producer: Option<Weak<Pipeline>>,
    is_shutdown: bool,
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReader")
            .field("temporality", &self.temporality)
            .finish()
    }
}

impl Default for ManualReader {
    fn default() -> Self {
        ManualReader::builder().build()
    }
}

impl ManualReader {
    /// Start building a manual reader.
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }
}

impl MetricReader for ManualReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        // Register once; a second registration indicates the reader was
        // installed on two providers.
        if inner.sdk_producer.is_none() {
            inner.sdk_producer = Some(pipeline);
        } else {
            otel_warn!(
                name: "ManualReader.DuplicateRegistration",
                message = "the reader is already registered with a provider and was not registered again"
            );
        }
    }

    fn collect(&self, rm: &mut ResourceMetrics) -> OTelSdkResult {
        let inner = self
            .inner
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if inner.is_shutdown {
            return Err(OTelSdkError::AlreadyShutdown);
        }

        match inner.sdk_producer.as_ref().and_then(|w| w.upgrade()) {
            Some(producer) => producer.produce(rm)?,
            None => {
                return Err(OTelSdkError::InternalFailure(
                    "reader is not registered with a provider".to_string(),
                ))
            }
        };

        Ok(())
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown(&self) -> OTelSdkResult {
        let mut inner = self
            .inner
            .lock()
            .map_err(|err| OTelSdkError::InternalFailure(format!("lock poisoned: {err}")))?;
        if inner.is_shutdown {
            return Err(OTelSdkError::AlreadyShutdown);
        }
        inner.is_shutdown = true;
        inner.sdk_producer = None;
        Ok(())
    }

    fn temporality(&self, _kind: InstrumentKind) -> Temporality {
        self.temporality
    }
}

/// Configuration for a [`ManualReader`].
#[derive(Debug, Default)]
pub struct ManualReaderBuilder {
    temporality: Temporality,
}

impl ManualReaderBuilder {
    /// Set the temporality the reader asks for.
    pub fn with_temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    /// Build the reader.
    pub fn build(self) -> ManualReader {
        ManualReader {
            inner: Mutex::new(ManualReaderInner {
                sdk_producer: None,
                is_shutdown: false,
            }),
            temporality: self.temporality,
        }
    }
}
