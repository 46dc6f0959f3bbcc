//! The remote side: what the collector needs from a system metrics service.
//!
//! The collector never talks to the network itself. It drives a
//! [`SystemMetricsClient`], which creates a record for the monitored task,
//! opens one [`MetricStream`] per metric type, and finalizes the record when
//! the task is done. Transport, authentication, buffering and retries are the
//! client's business.

use crate::{ConfigError, DialOptions};
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, str::FromStr, time::Duration};

/// How the time series data of one metric is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum DataFormat {
    Text = 0,
    Ftdc = 1,
    Bson = 2,
    Json = 3,
    Csv = 4,
}

impl DataFormat {
    /// Every valid format.
    pub const ALL: [DataFormat; 5] = [
        DataFormat::Text,
        DataFormat::Ftdc,
        DataFormat::Bson,
        DataFormat::Json,
        DataFormat::Csv,
    ];

    /// The lowercase name of this format.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Text => "text",
            DataFormat::Ftdc => "ftdc",
            DataFormat::Bson => "bson",
            DataFormat::Json => "json",
            DataFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for DataFormat {
    type Error = ConfigError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|format| *format as i32 == code)
            .ok_or_else(|| ConfigError::UnknownFormat(code.to_string()))
    }
}

impl FromStr for DataFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownFormat(s.to_owned()))
    }
}

/// Compression applied by the service to stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    #[default]
    None,
}

/// Layout of the stored time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    #[default]
    RawEvents,
}

/// Metadata for the record created for one monitored task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordInfo {
    pub project: String,
    pub version: String,
    pub variant: String,
    pub task_name: String,
    pub task_id: String,
    pub execution: i32,
    pub mainline: bool,
    pub compression: CompressionType,
    pub schema: SchemaType,
}

/// Identifies the stream for one metric type within a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDataOptions {
    /// The record id returned by [`SystemMetricsClient::create_record`].
    pub id: String,
    pub metric_type: String,
    pub format: DataFormat,
}

/// Buffering behavior requested for each stream. Zero values mean "use the
/// client's default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamOptions {
    pub max_buffer_size: usize,
    pub flush_interval: Duration,
    pub no_timed_flush: bool,
}

/// An append-only stream of one metric's data.
///
/// A stream has exactly one writer, so writes are strictly sequential.
pub trait MetricStream: Send + 'static {
    /// Append one collected payload.
    fn write(&mut self, data: Vec<u8>) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Flush anything buffered and close the stream.
    fn close(&mut self) -> impl Future<Output = eyre::Result<()>> + Send;
}

/// Client for a remote system metrics service.
pub trait SystemMetricsClient: Send + Sync + 'static {
    /// The write stream returned by [`Self::open_stream`].
    type Stream: MetricStream;

    /// Establish a new connection from credentials.
    fn connect(opts: &DialOptions) -> impl Future<Output = eyre::Result<Self>> + Send
    where
        Self: Sized;

    /// Create the record for a task, returning its id.
    fn create_record(&self, info: &RecordInfo) -> impl Future<Output = eyre::Result<String>> + Send;

    /// Open the write stream for one metric type of a record.
    fn open_stream(
        &self,
        data: &MetricDataOptions,
        opts: &StreamOptions,
    ) -> impl Future<Output = eyre::Result<Self::Stream>> + Send;

    /// Finalize a record.
    fn close_record(
        &self,
        id: &str,
        had_errors: bool,
    ) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Release the connection.
    fn close_client(&self) -> impl Future<Output = eyre::Result<()>> + Send;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_codes() {
        assert_eq!(DataFormat::try_from(0).unwrap(), DataFormat::Text);
        assert_eq!(DataFormat::try_from(1).unwrap(), DataFormat::Ftdc);
        assert_eq!(DataFormat::try_from(4).unwrap(), DataFormat::Csv);
        assert_eq!(
            DataFormat::try_from(5),
            Err(ConfigError::UnknownFormat("5".to_owned()))
        );
        assert!(DataFormat::try_from(-1).is_err());
    }

    #[test]
    fn format_names() {
        for format in DataFormat::ALL {
            assert_eq!(format.as_str().parse::<DataFormat>().unwrap(), format);
        }
        assert_eq!("JSON".parse::<DataFormat>().unwrap(), DataFormat::Json);
        assert!(matches!(
            "yaml".parse::<DataFormat>(),
            Err(ConfigError::UnknownFormat(name)) if name == "yaml"
        ));
    }
}
