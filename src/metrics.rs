//! Metrics about the collector itself. Check the docs for [`init_metrics`].

use eyre::WrapErr;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::LazyLock;

const SAMPLES_COLLECTED: &str = "system_metrics.samples_collected";
const SAMPLES_COLLECTED_DESC: &str = "The total number of samples collected, by metric type";

const SAMPLES_IN_FLIGHT: &str = "system_metrics.samples_in_flight";
const SAMPLES_IN_FLIGHT_DESC: &str = "The number of collected samples not yet written or dropped";

const PAYLOAD_BYTES: &str = "system_metrics.payload_bytes";
const PAYLOAD_BYTES_DESC: &str = "The size of each collected payload";

const STREAM_ERRORS: &str = "system_metrics.stream_errors";
const STREAM_ERRORS_DESC: &str = "Errors that stopped a metric stream, by metric type and kind";

const STREAMS_ACTIVE: &str = "system_metrics.streams_active";
const STREAMS_ACTIVE_DESC: &str = "The number of metric streams currently running";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    metrics::describe_counter!(SAMPLES_COLLECTED, SAMPLES_COLLECTED_DESC);
    metrics::describe_gauge!(SAMPLES_IN_FLIGHT, SAMPLES_IN_FLIGHT_DESC);
    metrics::describe_histogram!(PAYLOAD_BYTES, metrics::Unit::Bytes, PAYLOAD_BYTES_DESC);
    metrics::describe_counter!(STREAM_ERRORS, STREAM_ERRORS_DESC);
    metrics::describe_gauge!(STREAMS_ACTIVE, STREAMS_ACTIVE_DESC);
});

/// What stopped a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    Collect,
    Write,
    Close,
    Panic,
}

impl ErrorKind {
    const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Collect => "collect",
            ErrorKind::Write => "write",
            ErrorKind::Close => "close",
            ErrorKind::Panic => "panic",
        }
    }
}

pub(crate) fn record_sample(metric: &str, bytes: usize) {
    counter!(SAMPLES_COLLECTED, "metric" => metric.to_owned()).increment(1);
    gauge!(SAMPLES_IN_FLIGHT).increment(1);
    histogram!(PAYLOAD_BYTES, "metric" => metric.to_owned()).record(bytes as f64);
}

pub(crate) fn release_sample() {
    gauge!(SAMPLES_IN_FLIGHT).decrement(1);
}

pub(crate) fn record_stream_error(metric: &str, kind: ErrorKind) {
    counter!(STREAM_ERRORS, "metric" => metric.to_owned(), "kind" => kind.as_str()).increment(1);
}

pub(crate) fn stream_started() {
    gauge!(STREAMS_ACTIVE).increment(1);
}

pub(crate) fn stream_stopped() {
    gauge!(STREAMS_ACTIVE).decrement(1);
}

/// Install a prometheus metrics exporter on the given port, or 9000 if
/// `None`. Returns the port.
///
/// The collector records these metrics through the [`metrics`] facade:
/// - `system_metrics.samples_collected` (counter): samples collected, labeled
///   by metric type.
/// - `system_metrics.samples_in_flight` (gauge): samples collected but not
///   yet written or dropped.
/// - `system_metrics.payload_bytes` (histogram): payload sizes, labeled by
///   metric type.
/// - `system_metrics.stream_errors` (counter): errors that stopped a stream,
///   labeled by metric type and kind (`collect`, `write`, `close`, `panic`).
/// - `system_metrics.streams_active` (gauge): streams currently running.
///
/// Without an installed recorder all of these are no-ops. Hosts that already
/// run their own exporter should not call this.
pub fn init_metrics(port: Option<u16>) -> eyre::Result<u16> {
    LazyLock::force(&DESCRIBE);
    let port = port.unwrap_or(9000);
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .wrap_err("failed to install prometheus exporter")?;
    Ok(port)
}
