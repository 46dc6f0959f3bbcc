#![allow(dead_code)]

use eyre::eyre;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use system_metrics_streamer::{
    CollectorOptions, DataFormat, DialOptions, MetricCollector, MetricDataOptions, MetricStream,
    RecordInfo, StreamOptions, SystemMetricsClient, TaskInfo,
};

/// Everything the mock service saw.
#[derive(Debug, Default)]
pub struct Recorder {
    pub records: Mutex<Vec<RecordInfo>>,
    pub opened: Mutex<Vec<(MetricDataOptions, StreamOptions)>>,
    pub payloads: Mutex<HashMap<String, Vec<Vec<u8>>>>,
    pub closed_streams: Mutex<Vec<String>>,
    pub closed_records: Mutex<Vec<(String, bool)>>,
    pub client_closes: AtomicUsize,

    pub fail_create: AtomicBool,
    pub fail_open: Mutex<HashSet<String>>,
    pub fail_write: Mutex<HashSet<String>>,
    pub fail_close: Mutex<HashSet<String>>,
    /// `close_record` never returns.
    pub hang_close_record: AtomicBool,
}

impl Recorder {
    pub fn payloads(&self, metric: &str) -> Vec<Vec<u8>> {
        self.payloads
            .lock()
            .unwrap()
            .get(metric)
            .cloned()
            .unwrap_or_default()
    }

    pub fn closed_records(&self) -> Vec<(String, bool)> {
        self.closed_records.lock().unwrap().clone()
    }

    pub fn closed_streams(&self) -> Vec<String> {
        let mut closed = self.closed_streams.lock().unwrap().clone();
        closed.sort();
        closed
    }

    pub fn client_closes(&self) -> usize {
        self.client_closes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockClient {
    pub recorder: Arc<Recorder>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MockStream {
    metric: String,
    recorder: Arc<Recorder>,
}

impl MetricStream for MockStream {
    async fn write(&mut self, data: Vec<u8>) -> eyre::Result<()> {
        if self.recorder.fail_write.lock().unwrap().contains(&self.metric) {
            return Err(eyre!("connection reset"));
        }
        self.recorder
            .payloads
            .lock()
            .unwrap()
            .entry(self.metric.clone())
            .or_default()
            .push(data);
        Ok(())
    }

    async fn close(&mut self) -> eyre::Result<()> {
        self.recorder
            .closed_streams
            .lock()
            .unwrap()
            .push(self.metric.clone());
        if self.recorder.fail_close.lock().unwrap().contains(&self.metric) {
            return Err(eyre!("flush failed"));
        }
        Ok(())
    }
}

impl SystemMetricsClient for MockClient {
    type Stream = MockStream;

    async fn connect(opts: &DialOptions) -> eyre::Result<Self> {
        if opts.base_address.is_empty() {
            return Err(eyre!("no address to dial"));
        }
        Ok(Self::new())
    }

    async fn create_record(&self, info: &RecordInfo) -> eyre::Result<String> {
        if self.recorder.fail_create.load(Ordering::SeqCst) {
            return Err(eyre!("service unavailable"));
        }
        let mut records = self.recorder.records.lock().unwrap();
        records.push(info.clone());
        Ok(format!("record-{}", records.len()))
    }

    async fn open_stream(
        &self,
        data: &MetricDataOptions,
        opts: &StreamOptions,
    ) -> eyre::Result<MockStream> {
        if self.recorder.fail_open.lock().unwrap().contains(&data.metric_type) {
            return Err(eyre!("stream refused"));
        }
        self.recorder
            .opened
            .lock()
            .unwrap()
            .push((data.clone(), *opts));
        Ok(MockStream {
            metric: data.metric_type.clone(),
            recorder: Arc::clone(&self.recorder),
        })
    }

    async fn close_record(&self, id: &str, had_errors: bool) -> eyre::Result<()> {
        if self.recorder.hang_close_record.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.recorder
            .closed_records
            .lock()
            .unwrap()
            .push((id.to_owned(), had_errors));
        Ok(())
    }

    async fn close_client(&self) -> eyre::Result<()> {
        self.recorder.client_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A collector driven by a closure of the 1-based collection number.
pub struct Scripted<F> {
    name: &'static str,
    format: DataFormat,
    count: u64,
    script: F,
}

impl<F> Scripted<F> {
    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = format;
        self
    }
}

impl<F> MetricCollector for Scripted<F>
where
    F: FnMut(u64) -> eyre::Result<Vec<u8>> + Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn format(&self) -> DataFormat {
        self.format
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        self.count += 1;
        (self.script)(self.count)
    }
}

pub fn scripted<F>(name: &'static str, script: F) -> Scripted<F>
where
    F: FnMut(u64) -> eyre::Result<Vec<u8>> + Send + 'static,
{
    Scripted {
        name,
        format: DataFormat::Text,
        count: 0,
        script,
    }
}

/// Produces `p1`, `p2`, ... forever.
pub fn ticking(name: &'static str) -> impl MetricCollector {
    scripted(name, |n| Ok(format!("p{n}").into_bytes()))
}

/// Succeeds until collection number `n`, which fails.
pub fn failing_on(name: &'static str, n: u64) -> impl MetricCollector {
    scripted(name, move |i| {
        if i == n {
            Err(eyre!("sensor unavailable"))
        } else {
            Ok(format!("p{i}").into_bytes())
        }
    })
}

pub fn panicking(name: &'static str) -> impl MetricCollector {
    scripted(name, |_| panic!("collector exploded"))
}

pub fn task() -> TaskInfo {
    TaskInfo {
        id: "task_1".into(),
        display_name: "compile".into(),
        project: "proj".into(),
        version: "v1".into(),
        build_variant: "linux".into(),
        execution: 0,
        is_patch: true,
    }
}

pub fn options(client: &MockClient, interval_ms: i64) -> CollectorOptions<MockClient> {
    CollectorOptions::new(task())
        .with_interval_ms(interval_ms)
        .with_client(client.clone())
}

/// Let time pass in small steps until `cond` holds.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
