use std::time::Duration;

use benchmq_lib::{
    bench::{BenchmarkMode, BenchmarkResult, BenchmarkSpec, Orchestrator},
    mqtt::rumqtt::{DEFAULT_MAX_PACKET_SIZE, RumqttFactory},
};
use rama::{graceful::ShutdownGuard, telemetry::tracing};
use tokio::time::{Instant, MissedTickBehavior};

use super::reporter::{HumanReporter, JsonlReporter, Reporter};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Room for the fixed header, topic length prefix and packet identifier.
const PUBLISH_OVERHEAD: usize = 16;

/// Run the benchmark against the broker, reporting progress every second.
pub(super) async fn run(
    mode: BenchmarkMode,
    spec: BenchmarkSpec,
    guard: ShutdownGuard,
    json: bool,
) -> BenchmarkResult {
    let max_packet_size = max_packet_size(&spec);
    tracing::debug!(%max_packet_size, "mqtt client factory ready");

    let factory = RumqttFactory::new().with_max_packet_size(max_packet_size);
    let orchestrator = Orchestrator::new(spec, factory, guard);
    let metrics = orchestrator.metrics();

    let mut reporter: Box<dyn Reporter> = if json {
        Box::new(JsonlReporter::new(mode, REPORT_INTERVAL))
    } else {
        Box::new(HumanReporter::new(mode, REPORT_INTERVAL))
    };

    let mut run = std::pin::pin!(async move {
        match mode {
            BenchmarkMode::Connections => orchestrator.run_connections().await,
            BenchmarkMode::Publish => orchestrator.run_publish().await,
            BenchmarkMode::Subscribe => orchestrator.run_subscribe().await,
        }
    });

    let start = Instant::now();
    let mut ticker = tokio::time::interval_at(start + REPORT_INTERVAL, REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            result = run.as_mut() => break result,
            _ = ticker.tick() => reporter.on_tick(start.elapsed(), metrics.snapshot()),
        }
    };

    reporter.finish(&result);
    result
}

fn max_packet_size(spec: &BenchmarkSpec) -> usize {
    DEFAULT_MAX_PACKET_SIZE.max(spec.message().len() + spec.topic().len() + PUBLISH_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_packet_size() {
        let small = BenchmarkSpec::builder().build().unwrap();
        assert_eq!(DEFAULT_MAX_PACKET_SIZE, max_packet_size(&small));

        let large = BenchmarkSpec::builder()
            .with_topic("bench")
            .with_message(vec![0u8; 64 * 1024])
            .build()
            .unwrap();
        assert_eq!(64 * 1024 + 5 + PUBLISH_OVERHEAD, max_packet_size(&large));
    }
}
