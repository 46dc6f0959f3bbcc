use crate::DataFormat;

/// Something that can collect a single system metric over a series of time
/// steps, such as uptime or per-process memory.
///
/// The collector does not care what a metric means. It calls
/// [`MetricCollector::collect`] once per interval and forwards the bytes to
/// the stream named by [`MetricCollector::name`].
pub trait MetricCollector: Send + 'static {
    /// The type of metric collected, e.g. `"uptime"`. Must not be empty.
    fn name(&self) -> &str;

    /// The encoding of the bytes returned by [`MetricCollector::collect`].
    fn format(&self) -> DataFormat;

    /// Collect the current value of the metric.
    ///
    /// Runs on tokio's blocking pool, so it may do slow synchronous work such
    /// as walking the process table.
    fn collect(&mut self) -> eyre::Result<Vec<u8>>;
}

impl<T: MetricCollector + ?Sized> MetricCollector for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn format(&self) -> DataFormat {
        (**self).format()
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        (**self).collect()
    }
}
