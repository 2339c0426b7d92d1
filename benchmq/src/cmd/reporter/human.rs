use std::time::Duration;

use benchmq_lib::bench::{BenchmarkMode, BenchmarkResult, MetricsSnapshot};

use super::{Progress, Reporter};

pub struct HumanReporter {
    interval: Duration,
    progress: Progress,
}

impl HumanReporter {
    pub fn new(mode: BenchmarkMode, interval: Duration) -> Self {
        Self {
            interval,
            progress: Progress::new(mode),
        }
    }
}

impl Reporter for HumanReporter {
    fn on_tick(&mut self, now: Duration, snapshot: MetricsSnapshot) {
        if now.saturating_sub(self.progress.last_tick) < self.interval {
            return;
        }
        let tick = self.progress.advance(now, &snapshot);

        println!(
            "t={:.1}s mode={} launched={} rate={:.1} {}/s ok={} failed={} received={}",
            now.as_secs_f64(),
            self.progress.mode,
            snapshot.launched,
            tick.rate,
            self.progress.mode.unit(),
            snapshot.succeeded,
            snapshot.failed,
            snapshot.received,
        );
    }

    fn finish(&mut self, result: &BenchmarkResult) {
        let elapsed = truncate_to_millis(result.elapsed);
        println!(
            "done mode={} clients={} launched={} expected={} ok={} failed={} received={} elapsed={} throughput={:.1} {}/s",
            result.mode,
            result.clients,
            result.launched,
            result.expected,
            result.succeeded,
            result.failed,
            result.received,
            humantime::format_duration(elapsed),
            result.throughput_per_second,
            result.mode.unit(),
        );
    }
}

/// Drop the sub-millisecond part, which only adds noise to the summary.
fn truncate_to_millis(duration: Duration) -> Duration {
    Duration::new(duration.as_secs(), duration.subsec_millis() * 1_000_000)
}
