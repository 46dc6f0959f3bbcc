//! The [`SystemMetricsCollector`], which streams every configured metric to
//! the metrics service for as long as a task runs.

use crate::{
    CollectorOptions, Connection, Error, ErrorCatcher, MetricCollector, MetricDataOptions,
    RecordInfo, StreamOptions, StreamSupervisor, SystemMetricsClient,
};
use eyre::{WrapErr, eyre};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info, info_span, instrument};

/// Upper bound on finalizing the record during cleanup.
pub const CLOSE_RECORD_TIMEOUT: Duration = Duration::from_secs(60);

/// Where a [`SystemMetricsCollector`] is in its life. A collector moves
/// forward through these states exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Connected, but nothing is streaming. A failed record creation leaves
    /// the collector here, so [`SystemMetricsCollector::start`] may be retried.
    Created,
    /// The record exists and streams have been started.
    Running,
    /// Streams have stopped and the record and client are being released.
    CleaningUp,
    /// Every resource has been released.
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: LifecycleState,
    id: Option<Arc<str>>,
    start_failed: bool,
}

/// State shared between the collector handle and its watcher task.
struct Shared<C> {
    client: C,
    catcher: Arc<ErrorCatcher>,
    streams: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
    // Held for the whole of cleanup, so concurrent triggers release
    // resources once.
    cleanup: tokio::sync::Mutex<()>,
}

impl<C: SystemMetricsClient> Shared<C> {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for every stream to finish, then finalize the record and release
    /// the client. Does nothing if cleanup already ran.
    async fn cleanup(&self) {
        self.streams.close();
        self.streams.wait().await;

        let _guard = self.cleanup.lock().await;
        let (id, start_failed) = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == LifecycleState::Closed {
                return;
            }
            lifecycle.state = LifecycleState::CleaningUp;
            (lifecycle.id.clone(), lifecycle.start_failed)
        };

        if let Some(id) = &id {
            let had_errors = start_failed || self.catcher.has_errors();
            debug!(%id, had_errors, "Closing system metrics record");
            let closed =
                match tokio::time::timeout(CLOSE_RECORD_TIMEOUT, self.client.close_record(id, had_errors))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => Err(eyre!("timed out after {CLOSE_RECORD_TIMEOUT:?}")),
                };
            self.catcher.check(
                closed.wrap_err_with(|| format!("error closing out system metrics object for id {id}")),
            );
        }

        let id = id.as_deref().unwrap_or_default();
        self.catcher.check(
            self.client
                .close_client()
                .await
                .wrap_err_with(|| format!("error closing system metrics client for id {id}")),
        );

        self.lifecycle().state = LifecycleState::Closed;
    }
}

/// Waits for either cancellation source and runs cleanup.
///
/// If the caller's token fires, nobody is waiting on [`close`], so the
/// aggregate error is logged here. If only the streaming token fires, the
/// caller of [`close`] collects it.
///
/// [`close`]: SystemMetricsCollector::close
async fn close_on_cancel<C: SystemMetricsClient>(
    shared: Arc<Shared<C>>,
    outer: CancellationToken,
    streaming: CancellationToken,
) {
    tokio::select! {
        // Cancelling `outer` cancels `streaming` too, so check it first.
        biased;
        _ = outer.cancelled() => {
            debug!("Task context cancelled, cleaning up");
            streaming.cancel();
            shared.cleanup().await;
            if let Err(err) = shared.catcher.resolve() {
                let error = err.to_string();
                error!(%error, "system metrics collection finished with errors");
            }
        }
        _ = streaming.cancelled() => {
            debug!("Streaming cancelled, cleaning up");
            shared.cleanup().await;
        }
    }
}

/// Collects an arbitrary set of system metrics at a fixed interval and
/// streams each one to the metrics service.
///
/// Usage is `new`, then [`start`], then [`close`]. Each metric gets its own
/// stream and its own task, see [`StreamSupervisor`]. A failure in one
/// metric stops that metric only; the error is kept and returned from
/// [`close`], and the record is finalized as failed.
///
/// Whether or not [`start`] succeeds, [`close`] should be called to release
/// whatever was opened. Cancelling the token passed to [`start`] has the same
/// effect, but the errors are then only logged.
///
/// ```no_run
/// # use system_metrics_streamer::*;
/// # async fn run<C: SystemMetricsClient>(client: C, task: TaskInfo) -> Result<(), Error> {
/// let cancel = tokio_util::sync::CancellationToken::new();
/// let opts = CollectorOptions::new(task)
///     .with_interval_ms(1_000)
///     .with_collector(UptimeCollector::new())
///     .with_client(client);
///
/// let mut collector = SystemMetricsCollector::new(opts).await?;
/// collector.start(&cancel).await?;
/// // ... run the task ...
/// collector.close().await
/// # }
/// ```
///
/// [`start`]: SystemMetricsCollector::start
/// [`close`]: SystemMetricsCollector::close
pub struct SystemMetricsCollector<C: SystemMetricsClient> {
    shared: Arc<Shared<C>>,
    record: RecordInfo,
    interval: Duration,
    stream_opts: StreamOptions,
    collectors: Vec<Box<dyn MetricCollector>>,
    streaming: Option<CancellationToken>,
    watcher: Option<JoinHandle<()>>,
}

impl<C: SystemMetricsClient> SystemMetricsCollector<C> {
    /// Validate `opts` and set up the client, either by adopting the one
    /// provided or by dialing a new one.
    pub async fn new(opts: CollectorOptions<C>) -> Result<Self, Error> {
        let opts = opts.validate()?;
        let client = match opts.connection {
            Connection::Existing(client) => client,
            Connection::Dial(dial) => C::connect(&dial).await.map_err(Error::Connect)?,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                client,
                catcher: Arc::new(ErrorCatcher::new()),
                streams: TaskTracker::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: LifecycleState::Created,
                    id: None,
                    start_failed: false,
                }),
                cleanup: tokio::sync::Mutex::new(()),
            }),
            record: opts.record,
            interval: opts.interval,
            stream_opts: opts.stream,
            collectors: opts.collectors,
            streaming: None,
            watcher: None,
        })
    }

    /// The current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle().state
    }

    /// The record id, once [`Self::start`] has created it.
    pub fn id(&self) -> Option<Arc<str>> {
        self.shared.lifecycle().id.clone()
    }

    /// The interval between collections.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Create the record and start streaming every metric.
    ///
    /// Streaming stops when [`Self::close`] is called or `cancel` fires.
    ///
    /// If the record cannot be created nothing is started and the collector
    /// stays [`LifecycleState::Created`], so `start` may be called again. If a
    /// stream fails to open, the streams already running are stopped and the
    /// error returned, but [`Self::close`] is still needed to close them and
    /// finalize the record.
    #[instrument(skip_all, fields(task_id = %self.record.task_id))]
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<(), Error> {
        {
            let mut lifecycle = self.shared.lifecycle();
            match lifecycle.state {
                LifecycleState::Created => {}
                LifecycleState::Running => return Err(Error::AlreadyStarted),
                LifecycleState::CleaningUp | LifecycleState::Closed => {
                    return Err(Error::AlreadyClosed);
                }
            }
        }

        let id: Arc<str> = self
            .shared
            .client
            .create_record(&self.record)
            .await
            .map_err(Error::CreateRecord)?
            .into();
        {
            let mut lifecycle = self.shared.lifecycle();
            lifecycle.state = LifecycleState::Running;
            lifecycle.id = Some(Arc::clone(&id));
        }

        let streaming = cancel.child_token();
        self.streaming = Some(streaming.clone());

        let count = self.collectors.len();
        for collector in self.collectors.drain(..) {
            let data = MetricDataOptions {
                id: id.to_string(),
                metric_type: collector.name().to_owned(),
                format: collector.format(),
            };
            let stream = match self.shared.client.open_stream(&data, &self.stream_opts).await {
                Ok(stream) => stream,
                Err(err) => {
                    streaming.cancel();
                    self.shared.lifecycle().start_failed = true;
                    return Err(Error::OpenStream {
                        id: data.id,
                        metric: data.metric_type,
                        err,
                    });
                }
            };

            StreamSupervisor::new(
                Arc::clone(&id),
                collector,
                stream,
                self.interval,
                streaming.clone(),
                Arc::clone(&self.shared.catcher),
            )
            .spawn(&self.shared.streams);
        }
        self.shared.streams.close();

        let span = info_span!("system metrics watcher", %id);
        self.watcher = Some(tokio::spawn(
            close_on_cancel(Arc::clone(&self.shared), cancel.clone(), streaming).instrument(span),
        ));

        info!(%id, streams = count, interval_ms = self.interval.as_millis() as u64, "started system metrics collection");
        Ok(())
    }

    /// Stop every stream, finalize the record and close the client.
    ///
    /// Returns every error recorded while streaming or cleaning up, combined
    /// into one. Fails with [`Error::AlreadyClosed`] if the collector was
    /// already closed, by an earlier call or by cancellation of the token
    /// given to [`Self::start`].
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.state() == LifecycleState::Closed {
            return Err(Error::AlreadyClosed);
        }

        if let Some(streaming) = &self.streaming {
            streaming.cancel();
        }

        match self.watcher.take() {
            Some(watcher) => {
                if let Err(err) = watcher.await {
                    self.shared
                        .catcher
                        .add(eyre!("system metrics watcher failed: {err}"));
                }
            }
            // Start never got as far as spawning the watcher.
            None => self.shared.cleanup().await,
        }

        self.shared.catcher.resolve().map_err(Error::from)
    }
}
