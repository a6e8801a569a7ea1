//! The core of an OpenTelemetry-compatible telemetry SDK: the in-process
//! data plane accepting measurements from instrumented code and delivering
//! them to backends as batched, temporally-aggregated records.
//!
//! Three subsystems make up the crate:
//!
//! * [`trace`] — span identity and lifecycle, sampling, and the batched
//!   span processor exporting finished spans from a bounded queue on a
//!   worker thread.
//! * [`metrics`] — synchronous and asynchronous instruments, view-driven
//!   aggregation with cardinality-limited attribute storage, exemplar
//!   sampling, and manual or periodic collection.
//! * [`autoconf`] — a layered, deterministic configuration merge that
//!   assembles providers from environment and property sources through a
//!   pluggable component registry and customizer chains.
//!
//! Wire-format encoding is out of scope: exporters are consumed strictly
//! through the [`trace::SpanExporter`] and
//! [`metrics::exporter::PushMetricExporter`] interfaces, and companion
//! crates supply concrete transports.
//!
//! ## Getting started
//!
//! ```ignore
//! use opentelemetry_core::autoconf::SdkBuilder;
//!
//! let sdk = SdkBuilder::default().build()?;
//! let tracer = sdk.tracer_provider().tracer("my-component");
//! let mut span = tracer.start("operation");
//! span.end();
//! sdk.shutdown()?;
//! ```
//!
//! ## Feature flags
//!
//! * `internal-logs` (default): route the SDK's own diagnostics through
//!   [`tracing`].

#![warn(missing_docs)]

#[macro_use]
mod internal_logging;

mod common;
mod context;
mod instrumentation;
mod resource;
mod util;

pub mod autoconf;
pub mod error;
pub mod global;
pub mod metrics;
pub mod trace;

pub use common::{Array, Key, KeyValue, StringValue, Value};
pub use context::{Context, ContextGuard};
pub use instrumentation::{InstrumentationScope, InstrumentationScopeBuilder};
pub use resource::{Resource, ResourceBuilder};
