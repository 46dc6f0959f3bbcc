//! Error types for the collector lifecycle.

use crate::CollectedErrors;

/// Rejections produced by [`CollectorOptions::validate`].
///
/// [`CollectorOptions::validate`]: crate::CollectorOptions::validate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("must provide a valid task")]
    MissingTask,

    #[error("interval cannot be negative")]
    NegativeInterval,

    #[error("must provide at least one metric collector")]
    NoCollectors,

    #[error("metric collector at position {0} has an empty name")]
    EmptyMetricName(usize),

    #[error("must provide either a communicator or an existing client connection")]
    AmbiguousConnection,

    #[error("flush interval must not be negative")]
    NegativeFlushInterval,

    #[error("buffer size must not be negative")]
    NegativeBufferSize,

    #[error("invalid data format {0:?}")]
    UnknownFormat(String),
}

/// Errors returned by [`SystemMetricsCollector`].
///
/// Failures from the remote client are carried as [`eyre::Report`]s, which
/// keep whatever context the client attached.
///
/// [`SystemMetricsCollector`]: crate::SystemMetricsCollector
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid options: {0}")]
    Config(#[from] ConfigError),

    #[error("problem creating new system metrics client: {0:#}")]
    Connect(eyre::Report),

    #[error("problem creating system metrics metadata object: {0:#}")]
    CreateRecord(eyre::Report),

    #[error("problem creating system metrics stream for id {id} and metric type {metric}: {err:#}")]
    OpenStream {
        id: String,
        metric: String,
        err: eyre::Report,
    },

    #[error("system metrics collector already started")]
    AlreadyStarted,

    #[error("system metrics collector already cancelled or closed")]
    AlreadyClosed,

    #[error(transparent)]
    Collection(#[from] CollectedErrors),
}
