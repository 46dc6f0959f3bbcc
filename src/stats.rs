//! Per-stream bookkeeping, see [`StreamStats`].

use std::{collections::VecDeque, time::Duration};
use tracing::info;

/// Number of recent payload sizes kept for the rolling average.
const WINDOW: usize = 10;

/// Counters for one metric stream, reported when its supervisor exits.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    samples: u64,
    bytes: u64,
    recent_sizes: VecDeque<usize>,
    slowest_write: Duration,
}

impl StreamStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self {
            recent_sizes: VecDeque::with_capacity(WINDOW),
            ..Default::default()
        }
    }

    /// Record one payload written to the stream.
    pub fn record_write(&mut self, size: usize, took: Duration) {
        self.samples += 1;
        self.bytes += size as u64;
        if self.recent_sizes.len() == WINDOW {
            self.recent_sizes.pop_front();
        }
        self.recent_sizes.push_back(size);
        self.slowest_write = self.slowest_write.max(took);
    }

    /// Samples written so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// The longest time a single write took.
    pub fn slowest_write(&self) -> Duration {
        self.slowest_write
    }

    /// Average size of the last few payloads, or 0 if nothing was written.
    pub fn recent_average_size(&self) -> f64 {
        if self.recent_sizes.is_empty() {
            return 0.0;
        }
        let total: usize = self.recent_sizes.iter().sum();
        total as f64 / self.recent_sizes.len() as f64
    }

    /// Emit a tracing event summarizing the stream.
    pub fn report(&self) {
        info!(
            samples = self.samples,
            bytes = self.bytes,
            recent_average_size = self.recent_average_size(),
            slowest_write_ms = self.slowest_write.as_millis() as u64,
            "system metrics stream finished"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_stats() {
        let stats = StreamStats::new();
        assert_eq!(stats.samples(), 0);
        assert_eq!(stats.recent_average_size(), 0.0);
    }

    #[test]
    fn rolling_average_uses_last_window() {
        let mut stats = StreamStats::new();
        for _ in 0..WINDOW {
            stats.record_write(1, Duration::from_millis(1));
        }
        for _ in 0..WINDOW {
            stats.record_write(5, Duration::from_millis(3));
        }
        assert_eq!(stats.samples(), 2 * WINDOW as u64);
        assert_eq!(stats.bytes(), 6 * WINDOW as u64);
        assert_eq!(stats.recent_average_size(), 5.0);
        assert_eq!(stats.slowest_write(), Duration::from_millis(3));
    }
}
