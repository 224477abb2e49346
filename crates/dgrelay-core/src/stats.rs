//! Real-time statistics for a relay run.
//!
//! Three value types (source, ring, destination) are updated in place behind
//! per-substat locks and snapshotted by copy; the aggregate snapshot takes
//! the three cells independently, so the values are mutually consistent
//! enough for reporting but carry no cross-substat invariants.

use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};

/// A value wrapped with a mutex for in-place update and copy-out snapshots.
#[derive(Debug, Default)]
pub struct StatsCell<T>(Mutex<T>);

impl<T: Clone + Default> StatsCell<T> {
    /// Create a cell holding the default value.
    pub fn new() -> Self {
        Self(Mutex::new(T::default()))
    }

    /// Copy the current value out.
    pub fn get(&self) -> T {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the current value.
    pub fn set(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Mutate the current value in place under the lock.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

/// Statistics reported by the datagram source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Largest number of datagrams produced by one receive call.
    pub max_clump_size: usize,
    /// Wall-clock time the first datagram was produced.
    pub start_clock_time: Option<SystemTime>,
    /// Monotonic time the first datagram was produced.
    pub start_time: Option<Instant>,
    /// Monotonic time the most recent datagram was produced.
    pub end_time: Option<Instant>,
}

impl SourceStats {
    /// Seconds between the first and last produced datagram.
    pub fn elapsed_secs(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).as_secs_f64(),
            _ => 0.0,
        }
    }

    /// One-line summary.
    pub fn brief_str(&self) -> String {
        format!(
            "max_clump_size={}, start_clock_time={}, elapsed_secs={:.3}",
            self.max_clump_size,
            format_clock(self.start_clock_time),
            self.elapsed_secs(),
        )
    }
}

/// Statistics maintained by the ring between source and destination.
#[derive(Debug, Clone, Default)]
pub struct RingStats {
    /// Peak number of bytes buffered for writing, prefixes included.
    pub max_backlog_bytes: usize,
    /// Records produced.
    pub n_datagrams: u64,
    /// Records discarded (truncated or flagged receives).
    pub n_datagrams_discarded: u64,
    /// Payload bytes produced, not counting length prefixes.
    pub n_datagram_bytes: u64,
    /// Smallest payload produced.
    pub min_datagram_size: usize,
    /// Largest payload produced.
    pub max_datagram_size: usize,
    /// Payload size of the first record produced.
    pub first_datagram_size: usize,
}

impl RingStats {
    /// One-line summary.
    pub fn brief_str(&self) -> String {
        format!(
            "max_backlog_bytes={}, n_datagrams={}, n_datagrams_discarded={}, \
             n_datagram_bytes={}, min_datagram_size={}, max_datagram_size={}, \
             first_datagram_size={}",
            self.max_backlog_bytes,
            self.n_datagrams,
            self.n_datagrams_discarded,
            self.n_datagram_bytes,
            self.min_datagram_size,
            self.max_datagram_size,
            self.first_datagram_size,
        )
    }
}

/// Statistics reported by the datagram destination. Currently empty;
/// destinations keep the slot so the aggregate shape is stable.
#[derive(Debug, Clone, Default)]
pub struct DestinationStats {}

impl DestinationStats {
    /// One-line summary (empty for now).
    pub fn brief_str(&self) -> String {
        String::new()
    }
}

/// Aggregated snapshot across source, ring, and destination.
#[derive(Debug, Clone, Default)]
pub struct CopierStats {
    /// Monotonically increasing sequence number stamped at snapshot time.
    pub stat_seq: u64,
    /// Source-side snapshot.
    pub source: SourceStats,
    /// Ring snapshot.
    pub ring: RingStats,
    /// Destination-side snapshot.
    pub destination: DestinationStats,
}

impl CopierStats {
    /// Seconds between the first and last produced datagram.
    pub fn elapsed_secs(&self) -> f64 {
        self.source.elapsed_secs()
    }

    /// Datagrams per second. The interval runs from the first record to the
    /// last, so `n - 1` records crossed it.
    pub fn throughput_datagrams_per_sec(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        (self.ring.n_datagrams.max(1) - 1) as f64 / secs
    }

    /// Payload bytes per second, excluding the first record's bytes so the
    /// initial sample is not double-counted.
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed_secs();
        if secs == 0.0 {
            return 0.0;
        }
        let first = self.ring.first_datagram_size as u64;
        (self.ring.n_datagram_bytes.max(first) - first) as f64 / secs
    }

    /// Mean payload size in bytes.
    pub fn mean_datagram_size(&self) -> f64 {
        if self.ring.n_datagrams == 0 {
            return 0.0;
        }
        self.ring.n_datagram_bytes as f64 / self.ring.n_datagrams as f64
    }

    /// Single-line human-readable summary for the stats signal and the
    /// end-of-run report.
    pub fn brief_str(&self) -> String {
        let mut out = self.source.brief_str();
        for part in [self.ring.brief_str(), self.destination.brief_str()] {
            if !part.is_empty() {
                if !out.is_empty() {
                    out.push_str(", ");
                }
                out.push_str(&part);
            }
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!(
            "elapsed_secs={:.3}, throughput_datagrams_per_sec={:.1}, \
             throughput_bytes_per_sec={:.1}, mean_datagram_size={:.1}",
            self.elapsed_secs(),
            self.throughput_datagrams_per_sec(),
            self.throughput_bytes_per_sec(),
            self.mean_datagram_size(),
        ));
        out
    }
}

fn format_clock(time: Option<SystemTime>) -> String {
    match time {
        Some(t) => {
            DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true)
        }
        None => "-".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cell_update_and_snapshot() {
        let cell: StatsCell<RingStats> = StatsCell::new();
        cell.update(|s| {
            s.n_datagrams = 3;
            s.n_datagram_bytes = 17;
        });
        let snap = cell.get();
        assert_eq!(snap.n_datagrams, 3);
        assert_eq!(snap.n_datagram_bytes, 17);

        // Snapshots are copies, not views.
        cell.update(|s| s.n_datagrams = 99);
        assert_eq!(snap.n_datagrams, 3);
    }

    #[test]
    fn elapsed_zero_without_timestamps() {
        assert_eq!(SourceStats::default().elapsed_secs(), 0.0);
        assert_eq!(CopierStats::default().throughput_datagrams_per_sec(), 0.0);
    }

    #[test]
    fn throughput_uses_interval_count() {
        let start = Instant::now();
        let stats = CopierStats {
            source: SourceStats {
                start_time: Some(start),
                end_time: Some(start + Duration::from_secs(2)),
                ..SourceStats::default()
            },
            ring: RingStats {
                n_datagrams: 5,
                n_datagram_bytes: 110,
                first_datagram_size: 10,
                ..RingStats::default()
            },
            ..CopierStats::default()
        };
        // 4 intervals over 2 seconds.
        assert!((stats.throughput_datagrams_per_sec() - 2.0).abs() < 1e-9);
        // First record's 10 bytes excluded: 100 bytes over 2 seconds.
        assert!((stats.throughput_bytes_per_sec() - 50.0).abs() < 1e-9);
        assert!((stats.mean_datagram_size() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn single_datagram_has_no_throughput() {
        let start = Instant::now();
        let stats = CopierStats {
            source: SourceStats {
                start_time: Some(start),
                end_time: Some(start + Duration::from_secs(1)),
                ..SourceStats::default()
            },
            ring: RingStats {
                n_datagrams: 1,
                n_datagram_bytes: 42,
                first_datagram_size: 42,
                ..RingStats::default()
            },
            ..CopierStats::default()
        };
        assert_eq!(stats.throughput_datagrams_per_sec(), 0.0);
        assert_eq!(stats.throughput_bytes_per_sec(), 0.0);
    }

    #[test]
    fn brief_str_includes_fields() {
        let stats = CopierStats {
            ring: RingStats {
                n_datagrams: 2,
                n_datagram_bytes: 3,
                min_datagram_size: 1,
                max_datagram_size: 2,
                ..RingStats::default()
            },
            ..CopierStats::default()
        };
        let line = stats.brief_str();
        assert!(line.contains("n_datagrams=2"));
        assert!(line.contains("n_datagram_bytes=3"));
        assert!(line.contains("start_clock_time=-"));
        assert!(line.contains("throughput_datagrams_per_sec="));
        assert!(!line.contains('\n'));
    }
}
