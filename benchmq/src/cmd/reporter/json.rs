use std::time::Duration;

use benchmq_lib::bench::{BenchmarkMode, BenchmarkResult, MetricsSnapshot};

use super::{Progress, Reporter};

pub struct JsonlReporter {
    interval: Duration,
    progress: Progress,
}

impl JsonlReporter {
    pub fn new(mode: BenchmarkMode, interval: Duration) -> Self {
        Self {
            interval,
            progress: Progress::new(mode),
        }
    }
}

impl Reporter for JsonlReporter {
    fn on_tick(&mut self, now: Duration, snapshot: MetricsSnapshot) {
        if now.saturating_sub(self.progress.last_tick) < self.interval {
            return;
        }
        let tick = self.progress.advance(now, &snapshot);

        let line = serde_json::json!({
            "type": "progress",
            "mode": self.progress.mode.as_str(),
            "t_ms": now.as_millis(),
            "interval_ms": tick.interval.as_millis(),
            "rate": tick.rate,
            "interval": {
                "completed": tick.completed,
            },
            "total": {
                "launched": snapshot.launched,
                "succeeded": snapshot.succeeded,
                "failed": snapshot.failed,
                "received": snapshot.received,
            }
        });
        println!("{}", line);
    }

    fn finish(&mut self, result: &BenchmarkResult) {
        let line = serde_json::json!({
            "type": "final",
            "mode": result.mode.as_str(),
            "clients": result.clients,
            "launched": result.launched,
            "expected": result.expected,
            "succeeded": result.succeeded,
            "failed": result.failed,
            "received": result.received,
            "elapsed_seconds": result.elapsed_seconds(),
            "throughput_per_second": result.throughput_per_second,
        });
        println!("{}", line);
    }
}
