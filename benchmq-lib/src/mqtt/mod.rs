//! The narrow MQTT client boundary used by the benchmark engine.
//!
//! The engine never speaks the protocol itself. It drives one [`MqttClient`]
//! per simulated client, created by a [`ClientFactory`], through
//! connect → publish/subscribe → disconnect. Every operation resolves only
//! once the broker answered (CONNACK, PUBACK/PUBCOMP, SUBACK), so the
//! benchmark workflows read as straight-line code regardless of how the
//! underlying library schedules its callbacks.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use rama::telemetry::tracing;
use secrecy::SecretString;

mod error;
mod topic;

pub mod rumqtt;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use self::{
    error::{ConnectionError, PublishError, SubscribeError},
    topic::{TopicError, TopicUsage, topic_matches, validate},
};

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum QoS {
    /// at most once
    #[default]
    AtMostOnce = 0,
    /// at least once
    AtLeastOnce = 1,
    /// exactly once
    ExactlyOnce = 2,
}

impl QoS {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidQoS(pub u8);

impl fmt::Display for InvalidQoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid QoS {} (must be 0, 1, or 2)", self.0)
    }
}

impl std::error::Error for InvalidQoS {}

impl TryFrom<u8> for QoS {
    type Error = InvalidQoS;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(InvalidQoS(other)),
        }
    }
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

/// Callback invoked once per message received on a subscription.
///
/// It can be called from the client's network task, concurrently with
/// the task that owns the client and with handlers of other clients.
pub type MessageHandler = Arc<dyn Fn(Message<'_>) + Send + Sync + 'static>;

/// Per-client connection parameters handed to a [`ClientFactory`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions<'a> {
    pub client_id: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub username: Option<&'a str>,
    pub password: Option<&'a SecretString>,
}

/// A single MQTT client session, exclusively owned by one benchmark task.
///
/// Implementations must release their broker session when dropped, so a
/// task that unwinds halfway through its workflow never leaks a connection.
pub trait MqttClient: Send + 'static {
    /// Connect and wait for the broker to accept or reject the session.
    fn connect(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Disconnect from the broker.
    ///
    /// Idempotent: calling it on a client that is not connected (anymore) is a no-op.
    /// Returns only after every message handler invocation of this client finished.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    /// Publish a message and wait until it is acknowledged as required by `qos`.
    fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Subscribe to `topic` and wait for the broker to grant the subscription.
    ///
    /// `on_message` is called once per delivered message. A panicking handler
    /// is contained and logged, it never tears down the subscription.
    fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        retained: bool,
        on_message: MessageHandler,
    ) -> impl Future<Output = Result<(), SubscribeError>> + Send;

    /// Pre-flight check of a topic before it is used to publish or subscribe.
    fn validate(&self, topic: &str, usage: TopicUsage) -> Result<(), TopicError> {
        validate(topic, usage)
    }
}

/// Creates one [`MqttClient`] per simulated client.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: MqttClient;

    fn new_client(&self, options: ClientOptions<'_>) -> Self::Client;
}

/// Invoke a subscription handler, containing any panic it raises.
pub fn dispatch_message(client_id: &str, handler: &MessageHandler, message: Message<'_>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(message))) {
        tracing::error!(
            client_id,
            topic = message.topic,
            qos = %message.qos,
            "message handler panicked: {}",
            panic_message(panic.as_ref()),
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    use rama::telemetry::tracing;
    use tracing_test::traced_test;

    #[test]
    fn test_qos_try_from() {
        for (input, expected) in [
            (0u8, Some(QoS::AtMostOnce)),
            (1, Some(QoS::AtLeastOnce)),
            (2, Some(QoS::ExactlyOnce)),
            (3, None),
            (255, None),
        ] {
            match (QoS::try_from(input), expected) {
                (Ok(qos), Some(expected)) => {
                    assert_eq!(qos, expected, "input: {input}");
                    assert_eq!(qos.as_u8(), input);
                }
                (Err(InvalidQoS(value)), None) => assert_eq!(value, input),
                (result, expected) => {
                    panic!("input = {input}, unexpected result {result:?}, expected: {expected:?}")
                }
            }
        }
    }

    #[traced_test]
    #[test]
    fn test_dispatch_message_contains_handler_panic() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: MessageHandler = {
            let calls = calls.clone();
            Arc::new(move |msg: Message<'_>| {
                calls.fetch_add(1, Ordering::Relaxed);
                if msg.payload == b"boom" {
                    panic!("handler exploded");
                }
            })
        };

        for payload in [&b"a"[..], b"boom", b"b"] {
            dispatch_message(
                "client-0",
                &handler,
                Message {
                    topic: "bench/test",
                    payload,
                    qos: QoS::AtLeastOnce,
                    retain: false,
                },
            );
        }

        assert_eq!(3, calls.load(Ordering::Relaxed));
        assert!(logs_contain("message handler panicked: handler exploded"));
    }
}
