//! Stream supervision. This module contains the [`StreamSupervisor`], which
//! owns one metric collector and the stream its data is written to.

use crate::{
    DataFormat, ErrorCatcher, MetricCollector, MetricStream, Sample, StreamStats,
    metrics::{self, ErrorKind},
};
use eyre::eyre;
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, info_span, trace, warn};

/// Collects one metric at a fixed interval and writes each payload to its
/// stream.
///
/// The first collection happens as soon as the supervisor starts, each later
/// one waits a full interval after the previous write finished. The loop
/// stops when the cancellation token fires, or after the first collection or
/// write error. Errors, including panics, are recorded in the shared
/// [`ErrorCatcher`] and never escape the supervisor's task, so one failing
/// metric leaves every other stream running.
pub struct StreamSupervisor<S> {
    id: Arc<str>,
    metric: Arc<str>,
    format: DataFormat,
    // Lent to the blocking pool for each collection. `None` only after a
    // collection panicked.
    collector: Option<Box<dyn MetricCollector>>,
    stream: S,
    interval: Duration,
    cancel: CancellationToken,
    catcher: Arc<ErrorCatcher>,
    counter: u64,
    stats: StreamStats,
}

impl<S: MetricStream> StreamSupervisor<S> {
    /// Create a supervisor for `collector`, writing to `stream`, which belongs
    /// to the record `id`.
    pub fn new(
        id: Arc<str>,
        collector: Box<dyn MetricCollector>,
        stream: S,
        interval: Duration,
        cancel: CancellationToken,
        catcher: Arc<ErrorCatcher>,
    ) -> Self {
        Self {
            id,
            metric: collector.name().into(),
            format: collector.format(),
            collector: Some(collector),
            stream,
            interval,
            cancel,
            catcher,
            counter: 0,
            stats: StreamStats::new(),
        }
    }

    fn context(&self, what: &str) -> String {
        format!("{what} for id {} and metric type {}", self.id, self.metric)
    }

    fn fail(&self, kind: ErrorKind, err: eyre::Report) {
        let error = format!("{err:#}");
        warn!(%error, ?kind, "system metrics stream failed");
        metrics::record_stream_error(&self.metric, kind);
        self.catcher.add(err);
    }

    /// Run one collection on the blocking pool, so a slow collector never
    /// holds up the runtime worker that sibling streams share. Returns `None`
    /// after recording the failure.
    async fn collect(&mut self, span: &tracing::Span) -> Option<Vec<u8>> {
        let mut collector = self.collector.take()?;
        let span = span.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let collected = span.in_scope(|| {
                trace!("Collecting");
                collector.collect()
            });
            (collector, collected)
        })
        .await;

        match joined {
            Ok((collector, Ok(payload))) => {
                self.collector = Some(collector);
                Some(payload)
            }
            Ok((collector, Err(err))) => {
                self.collector = Some(collector);
                let msg = self.context("problem collecting system metrics data");
                self.fail(ErrorKind::Collect, err.wrap_err(msg));
                None
            }
            Err(err) if err.is_panic() => {
                let msg = self.context("panic in system metrics stream");
                let panic = err.into_panic();
                self.fail(ErrorKind::Panic, eyre!("{msg}: {}", panic_message(&*panic)));
                None
            }
            Err(err) => {
                let msg = self.context("problem collecting system metrics data");
                let err = eyre!("collection task failed: {err}").wrap_err(msg);
                self.fail(ErrorKind::Collect, err);
                None
            }
        }
    }

    /// The timed collect-and-write loop. Returns when cancelled or after the
    /// first error, which has been recorded by then.
    async fn timed_collect(&mut self) {
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Stream cancelled, exiting");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let span = info_span!("sample", sample_id = self.counter);
            self.counter = self.counter.wrapping_add(1);

            let Some(payload) = self.collect(&span).await else {
                return;
            };

            let mut sample = Sample::new(&self.metric, payload, span);
            let data = sample.take_payload();
            let size = data.len();

            let started = Instant::now();
            let written = self
                .stream
                .write(data)
                .instrument(sample.span().clone())
                .await;
            if let Err(err) = written {
                let msg = self.context("problem writing system metrics data to stream");
                self.fail(ErrorKind::Write, err.wrap_err(msg));
                return;
            }
            self.stats.record_write(size, started.elapsed());
            drop(sample);

            delay = self.interval;
        }
    }

    async fn run(mut self) -> StreamStats {
        metrics::stream_started();

        if let Err(panic) = AssertUnwindSafe(self.timed_collect()).catch_unwind().await {
            let msg = self.context("panic in system metrics stream");
            self.fail(ErrorKind::Panic, eyre!("{msg}: {}", panic_message(&*panic)));
        }

        let closed = match AssertUnwindSafe(self.stream.close()).catch_unwind().await {
            Ok(res) => res,
            Err(panic) => Err(eyre!("panic: {}", panic_message(&*panic))),
        };
        if let Err(err) = closed {
            let msg = self.context("problem closing system metrics stream");
            self.fail(ErrorKind::Close, err.wrap_err(msg));
        }

        metrics::stream_stopped();
        self.stats.report();
        self.stats
    }

    /// Spawn the supervisor on `tracker`. The returned handle resolves to the
    /// stream's stats once the stream is closed.
    pub fn spawn(self, tracker: &TaskTracker) -> JoinHandle<StreamStats> {
        let span = info_span!(
            "system metrics stream",
            id = %self.id,
            metric = %self.metric,
            format = %self.format,
        );
        tracker.spawn(self.run().instrument(span))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}
