use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

/// Counters shared by all client tasks of a single run.
///
/// Counters only ever increase. They are independent of each other,
/// so relaxed ordering is sufficient: the final values are read after
/// all tasks were joined.
#[derive(Debug, Default)]
pub struct Metrics {
    launched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub received: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_launched(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.record_failed_n(1);
    }

    pub fn record_failed_n(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            launched: self.launched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BenchmarkMode {
    Connections,
    Publish,
    Subscribe,
}

impl BenchmarkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BenchmarkMode::Connections => "conn",
            BenchmarkMode::Publish => "pub",
            BenchmarkMode::Subscribe => "sub",
        }
    }

    /// Unit in which the throughput of this mode is expressed.
    pub fn unit(self) -> &'static str {
        match self {
            BenchmarkMode::Connections => "conn",
            BenchmarkMode::Publish | BenchmarkMode::Subscribe => "msg",
        }
    }
}

impl fmt::Display for BenchmarkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consolidated outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub mode: BenchmarkMode,
    pub clients: usize,
    /// clients actually started (less than `clients` when cancelled)
    pub launched: u64,
    /// intended units of work
    pub expected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub received: u64,
    pub elapsed: Duration,
    pub throughput_per_second: f64,
}

impl BenchmarkResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// `units / elapsed`, defined as 0 when no time elapsed.
pub fn throughput(units: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { units as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        for (units, elapsed, expected) in [
            (0, Duration::ZERO, 0.0),
            (100, Duration::ZERO, 0.0),
            (0, Duration::from_secs(1), 0.0),
            (100, Duration::from_secs(2), 50.0),
            (10, Duration::from_millis(500), 20.0),
        ] {
            let value = throughput(units, elapsed);
            assert!(value.is_finite() && value >= 0.0);
            assert_eq!(
                expected, value,
                "units: {units}, elapsed: {elapsed:?}"
            );
        }
    }

    #[test]
    fn test_metrics_concurrent_increments() {
        let metrics = std::sync::Arc::new(Metrics::new());

        std::thread::scope(|s| {
            for _ in 0..8 {
                let metrics = metrics.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_succeeded();
                        metrics.record_received();
                    }
                    metrics.record_failed_n(3);
                });
            }
        });

        assert_eq!(
            MetricsSnapshot {
                launched: 0,
                succeeded: 8000,
                failed: 24,
                received: 8000,
            },
            metrics.snapshot()
        );
    }
}
