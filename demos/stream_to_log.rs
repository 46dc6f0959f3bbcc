//! Stream the built-in host metrics to a client that just logs what it
//! receives.
//!
//! Run it with a collector listening for OTLP/HTTP (e.g. `otel-desktop-viewer`)
//! to see one span per stream and one child span per sample. Press Ctrl-C to
//! close the collector and print any errors.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use system_metrics_streamer::{
    CollectorOptions, DialOptions, MetricDataOptions, MetricStream, RecordInfo, StreamOptions,
    SystemMetricsClient, SystemMetricsCollector, TaskInfo, default_collectors, init_metrics,
    init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Default)]
struct LogClient {
    records: AtomicU64,
}

struct LogStream {
    metric: String,
    written: Arc<AtomicU64>,
}

impl MetricStream for LogStream {
    async fn write(&mut self, data: Vec<u8>) -> eyre::Result<()> {
        let total = self.written.fetch_add(data.len() as u64, Ordering::Relaxed) + data.len() as u64;
        info!(metric = %self.metric, bytes = data.len(), total, "wrote sample");
        Ok(())
    }

    async fn close(&mut self) -> eyre::Result<()> {
        info!(metric = %self.metric, "closed stream");
        Ok(())
    }
}

impl SystemMetricsClient for LogClient {
    type Stream = LogStream;

    async fn connect(opts: &DialOptions) -> eyre::Result<Self> {
        info!(?opts, "pretending to dial");
        Ok(Self::default())
    }

    async fn create_record(&self, info: &RecordInfo) -> eyre::Result<String> {
        let n = self.records.fetch_add(1, Ordering::Relaxed);
        info!(task_id = %info.task_id, mainline = info.mainline, "created record");
        Ok(format!("{}-{n}", info.task_id))
    }

    async fn open_stream(
        &self,
        data: &MetricDataOptions,
        opts: &StreamOptions,
    ) -> eyre::Result<LogStream> {
        info!(id = %data.id, metric = %data.metric_type, format = %data.format, ?opts, "opened stream");
        Ok(LogStream {
            metric: data.metric_type.clone(),
            written: Arc::new(AtomicU64::new(0)),
        })
    }

    async fn close_record(&self, id: &str, had_errors: bool) -> eyre::Result<()> {
        info!(id, had_errors, "closed record");
        Ok(())
    }

    async fn close_client(&self) -> eyre::Result<()> {
        info!("closed client");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Set up the tracing.
    let provider = init_tracing()?;
    // Set up a prometheus metrics exporter on port 9000
    init_metrics(None)?;

    let task = TaskInfo {
        id: "demo_task".into(),
        display_name: "demo".into(),
        project: "system-metrics-streamer".into(),
        ..Default::default()
    };
    let mut opts = CollectorOptions::new(task)
        .with_interval_ms(5_000)
        .with_dial(DialOptions {
            base_address: "localhost".into(),
            rpc_port: 9090,
            ..Default::default()
        });
    opts.collectors = default_collectors();

    let mut collector = SystemMetricsCollector::<LogClient>::new(opts).await?;

    let cancel = CancellationToken::new();
    collector.start(&cancel).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    if let Err(err) = collector.close().await {
        info!(error = %err, "collector closed with errors");
    }

    // Ensure the provider has a chance to shut down cleanly.
    // This allows it a chance to flush any remaining spans to the collector.
    provider.shutdown().map_err(Into::into)
}
