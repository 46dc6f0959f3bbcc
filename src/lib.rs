//! Stream host metrics to a remote service while a task runs.
//!
//! A [`SystemMetricsCollector`] is given a set of [`MetricCollector`]s and a
//! [`SystemMetricsClient`]. When started, it creates one record for the task
//! on the metrics service, opens one stream per metric, and spawns a
//! [`StreamSupervisor`] task for each. Every supervisor collects its metric at
//! a fixed interval and writes the payload to its own stream.
//!
//! The streams are independent. If one metric fails to collect or write, its
//! supervisor records the error in the shared [`ErrorCatcher`] and stops,
//! while the others keep going. Panics are caught at the supervisor boundary
//! and recorded the same way.
//!
//! Shutdown happens in one of two ways:
//! - the host calls [`SystemMetricsCollector::close`], which stops every
//!   stream, finalizes the record, and returns the combined errors, or
//! - the [`CancellationToken`] the collector was started with is cancelled,
//!   which does the same cleanup but can only log the errors.
//!
//! Either way cleanup runs once, after every supervisor has finished.
//!
//! The crate does not know what the metrics mean or how the client talks to
//! the service. The [`sources`] module has collectors for common host
//! metrics, backed by [`sysinfo`], and [`init_tracing`] and [`init_metrics`]
//! show one way to wire up observability in a host binary.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

mod catcher;
pub use catcher::{CollectedErrors, ErrorCatcher};

mod client;
pub use client::{
    CompressionType, DataFormat, MetricDataOptions, MetricStream, RecordInfo, SchemaType,
    StreamOptions, SystemMetricsClient,
};

mod collector;
pub use collector::MetricCollector;

mod config;
pub use config::{
    CollectorOptions, Connection, DEFAULT_DIAL_RETRIES, DEFAULT_INTERVAL, DialOptions, TaskInfo,
    ValidatedOptions,
};

mod error;
pub use error::{ConfigError, Error};

pub(crate) mod metrics;
pub use metrics::init_metrics;

mod sample;
pub use sample::Sample;

pub mod sources;
pub use sources::{
    CpuCollector, DiskUsageCollector, MemoryCollector, ProcessCollector, ProcessRow,
    UptimeCollector, default_collectors,
};

mod stats;
pub use stats::StreamStats;

mod supervisor;
pub use supervisor::StreamSupervisor;

mod system_metrics;
pub use system_metrics::{CLOSE_RECORD_TIMEOUT, LifecycleState, SystemMetricsCollector};

mod trace;
pub use trace::init_tracing;
