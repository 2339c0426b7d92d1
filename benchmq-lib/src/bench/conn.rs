use rama::telemetry::tracing;

use super::ClientTask;
use crate::mqtt::MqttClient;

pub(super) async fn run<C: MqttClient>(task: ClientTask<C>) {
    let ClientTask {
        client_id,
        mut client,
        metrics,
        ..
    } = task;

    let start = tokio::time::Instant::now();
    match client.connect().await {
        Ok(()) => {
            metrics.record_succeeded();
            tracing::debug!(%client_id, elapsed = ?start.elapsed(), "client connected");
            client.disconnect().await;
        }
        Err(err) => {
            metrics.record_failed();
            tracing::warn!(%client_id, elapsed = ?start.elapsed(), "client failed to connect: {err}");
        }
    }
}
