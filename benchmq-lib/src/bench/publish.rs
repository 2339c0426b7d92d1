use rama::telemetry::tracing;

use super::{ClientTask, sleep_or_cancel};
use crate::mqtt::MqttClient;

/// Connect once, publish `message_count` messages (each preceded by the
/// configured delay) and disconnect.
///
/// A client which fails to connect accounts all of its messages as failed.
pub(super) async fn run<C: MqttClient>(task: ClientTask<C>) {
    let ClientTask {
        client_id,
        mut client,
        spec,
        metrics,
        guard,
    } = task;

    if let Err(err) = client.connect().await {
        metrics.record_failed_n(spec.message_count());
        tracing::warn!(
            %client_id,
            messages = spec.message_count(),
            "client failed to connect, count all its messages as failed: {err}"
        );
        return;
    }
    tracing::debug!(%client_id, "client connected: start publishing");

    let (topic, qos, retain) = (spec.topic(), spec.qos(), spec.retained());
    for seq in 0..spec.message_count() {
        if !sleep_or_cancel(&guard, spec.delay()).await {
            tracing::debug!(
                %client_id,
                sent = seq,
                "stop publishing: guard shutdown"
            );
            break;
        }

        match client.publish(topic, qos, retain, spec.message()).await {
            Ok(()) => {
                metrics.record_succeeded();
                tracing::trace!(%client_id, topic, %qos, retain, seq, "message published");
            }
            Err(err) => {
                metrics.record_failed();
                tracing::warn!(%client_id, topic, %qos, seq, "failed to publish message: {err}");
            }
        }
    }

    client.disconnect().await;
}
