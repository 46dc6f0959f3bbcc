//! Host metrics collectors backed by [`sysinfo`].
//!
//! These are ready-made [`MetricCollector`]s for the common host metrics.
//! Hosts are free to supply their own instead, the streaming machinery does
//! not depend on any of them.

use crate::{DataFormat, MetricCollector};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Disks, ProcessesToUpdate, System};
use tracing::{instrument, trace};

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn to_json(value: &impl Serialize) -> eyre::Result<Vec<u8>> {
    serde_json::to_vec(value).wrap_err("failed to encode metric as json")
}

/// Encode `rows` as CSV, with a header row taken from the field names.
fn to_csv<T: Serialize>(rows: impl IntoIterator<Item = T>) -> eyre::Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row).wrap_err("failed to encode metric as csv")?;
    }
    wtr.into_inner()
        .map_err(|err| eyre::eyre!("failed to flush csv: {}", err.error()))
}

/// Every built-in collector, boxed.
pub fn default_collectors() -> Vec<Box<dyn MetricCollector>> {
    vec![
        Box::new(UptimeCollector::new()),
        Box::new(CpuCollector::new()),
        Box::new(MemoryCollector::new()),
        Box::new(DiskUsageCollector::new()),
        Box::new(ProcessCollector::new()),
    ]
}

#[derive(Debug, Serialize)]
struct Uptime {
    timestamp_ms: u64,
    uptime_secs: u64,
    boot_time_secs: u64,
}

/// Host uptime, as JSON.
#[derive(Debug, Default)]
pub struct UptimeCollector;

impl UptimeCollector {
    /// Create an uptime collector.
    pub fn new() -> Self {
        Self
    }
}

impl MetricCollector for UptimeCollector {
    fn name(&self) -> &str {
        "uptime"
    }

    fn format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        to_json(&Uptime {
            timestamp_ms: timestamp_ms(),
            uptime_secs: System::uptime(),
            boot_time_secs: System::boot_time(),
        })
    }
}

/// CPU statistics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CpuStats {
    /// CPU name
    pub name: String,

    /// CPU usage percentage
    pub usage: f32,

    /// CPU frequency in MHz
    pub frequency: u64,
}

#[derive(Debug, Serialize)]
struct CpuSample {
    timestamp_ms: u64,
    global_usage: f32,
    cpus: Vec<CpuStats>,
}

/// Per-core CPU usage and frequency, as JSON.
///
/// Usage is computed from the difference between two refreshes, so the first
/// sample reports zero usage.
pub struct CpuCollector {
    system: System,
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuCollector {
    /// Create a CPU collector. The first sample has no usage history, so its
    /// usage figures read zero.
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    #[instrument(skip(self), name = "Taking CPU observation")]
    fn observe(&mut self) -> CpuSample {
        self.system.refresh_cpu_all();
        trace!("Refreshed CPU information");

        let cpus = self
            .system
            .cpus()
            .iter()
            .map(|cpu| CpuStats {
                name: cpu.name().to_owned(),
                usage: cpu.cpu_usage(),
                frequency: cpu.frequency(),
            })
            .collect();

        CpuSample {
            timestamp_ms: timestamp_ms(),
            global_usage: self.system.global_cpu_usage(),
            cpus,
        }
    }
}

impl MetricCollector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        let sample = self.observe();
        to_json(&sample)
    }
}

#[derive(Debug, Serialize)]
struct MemorySample {
    timestamp_ms: u64,
    total_bytes: u64,
    used_bytes: u64,
    available_bytes: u64,
    total_swap_bytes: u64,
    used_swap_bytes: u64,
}

/// Memory and swap usage, as JSON.
pub struct MemoryCollector {
    system: System,
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCollector {
    /// Create a memory collector.
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MetricCollector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        self.system.refresh_memory();
        to_json(&MemorySample {
            timestamp_ms: timestamp_ms(),
            total_bytes: self.system.total_memory(),
            used_bytes: self.system.used_memory(),
            available_bytes: self.system.available_memory(),
            total_swap_bytes: self.system.total_swap(),
            used_swap_bytes: self.system.used_swap(),
        })
    }
}

#[derive(Debug, Serialize)]
struct DiskStats {
    name: String,
    mount_point: String,
    file_system: String,
    total_bytes: u64,
    available_bytes: u64,
}

#[derive(Debug, Serialize)]
struct DiskSample {
    timestamp_ms: u64,
    disks: Vec<DiskStats>,
}

/// Space used on each mounted disk, as JSON.
#[derive(Debug, Default)]
pub struct DiskUsageCollector;

impl DiskUsageCollector {
    /// Create a disk usage collector.
    pub fn new() -> Self {
        Self
    }
}

impl MetricCollector for DiskUsageCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        // Mounts come and go, so list them fresh each time.
        let disks = Disks::new_with_refreshed_list();
        let disks = disks
            .list()
            .iter()
            .map(|disk| DiskStats {
                name: disk.name().to_string_lossy().into_owned(),
                mount_point: disk.mount_point().display().to_string(),
                file_system: disk.file_system().to_string_lossy().into_owned(),
                total_bytes: disk.total_space(),
                available_bytes: disk.available_space(),
            })
            .collect();
        to_json(&DiskSample {
            timestamp_ms: timestamp_ms(),
            disks,
        })
    }
}

/// One row of the process table.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessRow {
    pub timestamp_ms: u64,
    pub pid: u32,
    pub name: String,
    pub cpu_usage: f32,
    pub memory_bytes: u64,
}

/// CPU and memory of every running process, as CSV with a header row.
pub struct ProcessCollector {
    system: System,
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessCollector {
    /// Create a process collector. Rows are [`ProcessRow`]s, sorted by pid.
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MetricCollector for ProcessCollector {
    fn name(&self) -> &str {
        "process"
    }

    fn format(&self) -> DataFormat {
        DataFormat::Csv
    }

    fn collect(&mut self) -> eyre::Result<Vec<u8>> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let mut processes: Vec<_> = self.system.processes().iter().collect();
        processes.sort_by_key(|(pid, _)| pid.as_u32());

        let now = timestamp_ms();
        to_csv(processes.into_iter().map(|(pid, process)| ProcessRow {
            timestamp_ms: now,
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            cpu_usage: process.cpu_usage(),
            memory_bytes: process.memory(),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn awkward_process_names_survive_csv() {
        let name = "worker, \"main\"\nthread";
        let bytes = to_csv([ProcessRow {
            timestamp_ms: 1,
            pid: 42,
            name: name.into(),
            cpu_usage: 1.5,
            memory_bytes: 1024,
        }])
        .unwrap();

        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let rows: Vec<ProcessRow> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pid, 42);
        assert_eq!(rows[0].name, name);
        assert_eq!(rows[0].memory_bytes, 1024);
    }

    #[test]
    fn default_collectors_are_distinct() {
        let collectors = default_collectors();
        let mut names: Vec<_> = collectors.iter().map(|c| c.name().to_owned()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names, ["cpu", "disk", "memory", "process", "uptime"]);
    }

    #[test]
    fn uptime_is_json() {
        let bytes = UptimeCollector::new().collect().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["uptime_secs"].is_u64());
        assert!(value["timestamp_ms"].as_u64().unwrap() > 0);
    }

    #[test]
    fn memory_is_json() {
        let mut collector = MemoryCollector::new();
        let value: serde_json::Value =
            serde_json::from_slice(&collector.collect().unwrap()).unwrap();
        assert!(value["total_bytes"].is_u64());
        assert!(value["used_swap_bytes"].is_u64());
    }

    #[test]
    fn cpu_is_json() {
        let mut collector = CpuCollector::new();
        let value: serde_json::Value =
            serde_json::from_slice(&collector.collect().unwrap()).unwrap();
        assert!(value["cpus"].is_array());
    }

    #[test]
    fn processes_are_csv() {
        let mut collector = ProcessCollector::new();
        assert_eq!(collector.format(), DataFormat::Csv);
        let bytes = collector.collect().unwrap();

        let mut rdr = csv::Reader::from_reader(bytes.as_slice());
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            ["timestamp_ms", "pid", "name", "cpu_usage", "memory_bytes"]
        );
        let rows: Vec<ProcessRow> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
        assert!(rows.iter().any(|row| row.pid == std::process::id()));
    }
}
