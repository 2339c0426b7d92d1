use std::{sync::Arc, time::Duration};

use rama::telemetry::tracing;

use super::{ClientTask, sleep_or_cancel};
use crate::mqtt::{Message, MessageHandler, MqttClient};

/// How long a subscriber listens when no delay is configured.
pub const FALLBACK_LISTEN_WINDOW: Duration = Duration::from_secs(5);

/// Time a subscriber stays connected after its subscription was granted:
/// `delay * count`, or [`FALLBACK_LISTEN_WINDOW`] when `delay` is zero.
///
/// This only bounds how long deliveries are observed, the received count
/// is a lower bound of what the broker sends.
pub fn listen_window(delay: Duration, count: u64) -> Duration {
    if delay.is_zero() {
        return FALLBACK_LISTEN_WINDOW;
    }
    delay.saturating_mul(u32::try_from(count).unwrap_or(u32::MAX))
}

pub(super) async fn run<C: MqttClient>(task: ClientTask<C>) {
    let ClientTask {
        client_id,
        mut client,
        spec,
        metrics,
        guard,
    } = task;

    if let Err(err) = client.connect().await {
        metrics.record_failed();
        tracing::warn!(%client_id, "client failed to connect: {err}");
        return;
    }

    let on_message: MessageHandler = {
        let metrics = metrics.clone();
        let client_id = client_id.clone();
        Arc::new(move |msg: Message<'_>| {
            metrics.record_received();
            tracing::trace!(
                %client_id,
                topic = msg.topic,
                qos = %msg.qos,
                retain = msg.retain,
                size = msg.payload.len(),
                "message received"
            );
        })
    };

    let (topic, qos) = (spec.topic(), spec.qos());
    if let Err(err) = client
        .subscribe(topic, qos, spec.retained(), on_message)
        .await
    {
        metrics.record_failed();
        tracing::warn!(%client_id, topic, %qos, "client failed to subscribe: {err}");
        client.disconnect().await;
        return;
    }

    metrics.record_resolved(1);

    let window = listen_window(spec.delay(), spec.message_count());
    tracing::debug!(%client_id, topic, %qos, ?window, "subscribed: listen for messages");

    if !sleep_or_cancel(&guard, window).await {
        tracing::debug!(%client_id, "listen window cut short: guard shutdown");
    }

    client.disconnect().await;
}
