use std::time::Duration;

use benchmq_lib::bench::{BenchmarkMode, BenchmarkResult, MetricsSnapshot};

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + Sync + 'static {
    fn on_tick(&mut self, now: Duration, snapshot: MetricsSnapshot);
    fn finish(&mut self, result: &BenchmarkResult);
}

/// Rate of completed units over the last interval.
#[derive(Debug)]
struct Progress {
    mode: BenchmarkMode,
    last_tick: Duration,
    last_completed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tick {
    interval: Duration,
    completed: u64,
    rate: f64,
}

impl Progress {
    fn new(mode: BenchmarkMode) -> Self {
        Self {
            mode,
            last_tick: Duration::ZERO,
            last_completed: 0,
        }
    }

    /// units counted as completed for the throughput of the mode
    fn completed(&self, snapshot: &MetricsSnapshot) -> u64 {
        match self.mode {
            BenchmarkMode::Connections | BenchmarkMode::Publish => snapshot.succeeded,
            BenchmarkMode::Subscribe => snapshot.received,
        }
    }

    fn advance(&mut self, now: Duration, snapshot: &MetricsSnapshot) -> Tick {
        let completed = self.completed(snapshot);
        let interval = now.saturating_sub(self.last_tick);
        let delta = completed.saturating_sub(self.last_completed);

        self.last_tick = now;
        self.last_completed = completed;

        Tick {
            interval,
            completed: delta,
            rate: benchmq_lib::bench::throughput(delta, interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_advance() {
        let mut progress = Progress::new(BenchmarkMode::Subscribe);

        let tick = progress.advance(
            Duration::from_secs(1),
            &MetricsSnapshot {
                received: 50,
                succeeded: 1000,
                ..Default::default()
            },
        );
        assert_eq!(
            Tick {
                interval: Duration::from_secs(1),
                completed: 50,
                rate: 50.0,
            },
            tick
        );

        let tick = progress.advance(
            Duration::from_millis(3000),
            &MetricsSnapshot {
                received: 150,
                ..Default::default()
            },
        );
        assert_eq!(100, tick.completed);
        assert_eq!(50.0, tick.rate);

        // no time elapsed: rate is defined as zero
        let tick = progress.advance(Duration::from_millis(3000), &MetricsSnapshot::default());
        assert_eq!(0, tick.completed);
        assert_eq!(0.0, tick.rate);
    }
}
