//! Options for building a [`SystemMetricsCollector`], and their validation.
//!
//! [`CollectorOptions`] is what a host hands over. It mirrors the loose shape
//! of host configuration, so durations and sizes are signed and the two ways
//! of reaching the service are both optional. [`CollectorOptions::validate`]
//! checks it and produces [`ValidatedOptions`], which the collector consumes.
//!
//! [`SystemMetricsCollector`]: crate::SystemMetricsCollector

use crate::{
    ConfigError, MetricCollector, RecordInfo, StreamOptions,
    client::{CompressionType, SchemaType},
};
use serde::Deserialize;
use std::{fmt, time::Duration};

/// Collection interval used when none is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Connection attempts made by a client dialed from [`DialOptions`].
pub const DEFAULT_DIAL_RETRIES: u32 = 10;

/// The task being monitored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    pub id: String,
    pub display_name: String,
    pub project: String,
    pub version: String,
    pub build_variant: String,
    pub execution: u32,
    /// Patch tasks are not on the mainline.
    pub is_patch: bool,
}

impl TaskInfo {
    /// Metadata for the task's system metrics record.
    pub fn record_info(&self) -> RecordInfo {
        RecordInfo {
            project: self.project.clone(),
            version: self.version.clone(),
            variant: self.build_variant.clone(),
            task_name: self.display_name.clone(),
            task_id: self.id.clone(),
            execution: i32::try_from(self.execution).unwrap_or(i32::MAX),
            mainline: !self.is_patch,
            compression: CompressionType::None,
            schema: SchemaType::RawEvents,
        }
    }
}

fn default_retries() -> u32 {
    DEFAULT_DIAL_RETRIES
}

/// Credentials for dialing the metrics service.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DialOptions {
    pub base_address: String,
    pub rpc_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("DialOptions")
            .field("base_address", &self.base_address)
            .field("rpc_port", &self.rpc_port)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_key", &redact(&self.api_key))
            .field("retries", &self.retries)
            .finish()
    }
}

/// How the collector reaches the metrics service.
pub enum Connection<C> {
    /// Reuse a client the host already holds.
    Existing(C),
    /// Dial a new client.
    Dial(DialOptions),
}

/// Options for a new collector. Exactly one of `client` and `dial` must be
/// set.
pub struct CollectorOptions<C> {
    pub task: Option<TaskInfo>,
    /// Milliseconds between collections. Zero means [`DEFAULT_INTERVAL`].
    pub interval_ms: i64,
    pub collectors: Vec<Box<dyn MetricCollector>>,
    pub client: Option<C>,
    pub dial: Option<DialOptions>,

    // Stream buffer tuning. Zero values use the client's defaults.
    pub max_buffer_size: i64,
    pub no_buffer_timed_flush: bool,
    pub buffer_flush_interval_ms: i64,
}

impl<C> Default for CollectorOptions<C> {
    fn default() -> Self {
        Self {
            task: None,
            interval_ms: 0,
            collectors: Vec::new(),
            client: None,
            dial: None,
            max_buffer_size: 0,
            no_buffer_timed_flush: false,
            buffer_flush_interval_ms: 0,
        }
    }
}

impl<C> CollectorOptions<C> {
    /// Options for monitoring `task`, with everything else unset.
    pub fn new(task: TaskInfo) -> Self {
        Self {
            task: Some(task),
            ..Default::default()
        }
    }

    /// Set the collection interval in milliseconds.
    pub fn with_interval_ms(mut self, interval_ms: i64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Add a metric collector.
    pub fn with_collector(mut self, collector: impl MetricCollector) -> Self {
        self.collectors.push(Box::new(collector));
        self
    }

    /// Use an existing client.
    pub fn with_client(mut self, client: C) -> Self {
        self.client = Some(client);
        self
    }

    /// Dial a new client with these credentials.
    pub fn with_dial(mut self, dial: DialOptions) -> Self {
        self.dial = Some(dial);
        self
    }

    /// Check the options, normalizing defaults.
    pub fn validate(self) -> Result<ValidatedOptions<C>, ConfigError> {
        let task = self.task.ok_or(ConfigError::MissingTask)?;

        let interval = match u64::try_from(self.interval_ms) {
            Err(_) => return Err(ConfigError::NegativeInterval),
            Ok(0) => DEFAULT_INTERVAL,
            Ok(ms) => Duration::from_millis(ms),
        };

        if self.collectors.is_empty() {
            return Err(ConfigError::NoCollectors);
        }
        if let Some(pos) = self.collectors.iter().position(|c| c.name().is_empty()) {
            return Err(ConfigError::EmptyMetricName(pos));
        }

        let connection = match (self.client, self.dial) {
            (Some(client), None) => Connection::Existing(client),
            (None, Some(dial)) => Connection::Dial(dial),
            _ => return Err(ConfigError::AmbiguousConnection),
        };

        let flush_interval = u64::try_from(self.buffer_flush_interval_ms)
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::NegativeFlushInterval)?;
        let max_buffer_size =
            usize::try_from(self.max_buffer_size).map_err(|_| ConfigError::NegativeBufferSize)?;

        Ok(ValidatedOptions {
            record: task.record_info(),
            interval,
            collectors: self.collectors,
            connection,
            stream: StreamOptions {
                max_buffer_size,
                flush_interval,
                no_timed_flush: self.no_buffer_timed_flush,
            },
        })
    }
}

/// Checked options, produced by [`CollectorOptions::validate`].
pub struct ValidatedOptions<C> {
    pub record: RecordInfo,
    pub interval: Duration,
    pub collectors: Vec<Box<dyn MetricCollector>>,
    pub connection: Connection<C>,
    pub stream: StreamOptions,
}
