//! In-memory broker implementing the client contract, for tests.
//!
//! Failures are programmed per client id. Messages published by one mock
//! client are routed to every mock subscription whose filter matches, and
//! tests can inject messages from the outside with [`MockBroker::push`].

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use rama::telemetry::tracing;

use super::{
    ClientFactory, ClientOptions, ConnectionError, Message, MessageHandler, MqttClient,
    PublishError, QoS, SubscribeError, TopicUsage, dispatch_message, topic_matches,
};

#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
pub struct MockBrokerBuilder {
    behaviour: Behaviour,
}

#[derive(Debug, Default)]
struct Behaviour {
    refuse_connect: HashSet<String>,
    fail_publish: HashSet<String>,
    panic_on_publish: HashSet<String>,
    fail_subscribe: HashSet<String>,
    deliver_on_subscribe: usize,
    connect_delay: Duration,
}

#[derive(Default)]
struct Inner {
    behaviour: Behaviour,
    stats: Stats,
    created: Mutex<Vec<String>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("behaviour", &self.behaviour)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

struct Subscription {
    client_id: String,
    filter: String,
    handler: MessageHandler,
}

#[derive(Default)]
struct Stats {
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    disconnect_calls: AtomicUsize,
    disconnects: AtomicUsize,
    publish_attempts: AtomicUsize,
    publishes: AtomicUsize,
    subscribes: AtomicUsize,
    active_sessions: AtomicUsize,
}

/// Counters of everything the mock broker observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connect_attempts: usize,
    pub connects: usize,
    /// every `disconnect` call, including no-op ones
    pub disconnect_calls: usize,
    /// sessions actually closed through `disconnect`
    pub disconnects: usize,
    pub publish_attempts: usize,
    pub publishes: usize,
    pub subscribes: usize,
    /// sessions still open (neither disconnected nor dropped)
    pub active_sessions: usize,
}

impl Stats {
    fn snapshot(&self) -> MockStats {
        MockStats {
            connect_attempts: self.connect_attempts.load(Ordering::Acquire),
            connects: self.connects.load(Ordering::Acquire),
            disconnect_calls: self.disconnect_calls.load(Ordering::Acquire),
            disconnects: self.disconnects.load(Ordering::Acquire),
            publish_attempts: self.publish_attempts.load(Ordering::Acquire),
            publishes: self.publishes.load(Ordering::Acquire),
            subscribes: self.subscribes.load(Ordering::Acquire),
            active_sessions: self.active_sessions.load(Ordering::Acquire),
        }
    }
}

impl MockBrokerBuilder {
    pub fn refuse_connect(mut self, client_id: impl Into<String>) -> Self {
        self.behaviour.refuse_connect.insert(client_id.into());
        self
    }

    pub fn fail_publish_for(mut self, client_id: impl Into<String>) -> Self {
        self.behaviour.fail_publish.insert(client_id.into());
        self
    }

    pub fn panic_on_publish_for(mut self, client_id: impl Into<String>) -> Self {
        self.behaviour.panic_on_publish.insert(client_id.into());
        self
    }

    pub fn fail_subscribe_for(mut self, client_id: impl Into<String>) -> Self {
        self.behaviour.fail_subscribe.insert(client_id.into());
        self
    }

    /// Deliver `n` messages to every new subscription right after it is granted.
    pub fn deliver_on_subscribe(mut self, n: usize) -> Self {
        self.behaviour.deliver_on_subscribe = n;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.behaviour.connect_delay = delay;
        self
    }

    pub fn build(self) -> MockBroker {
        MockBroker {
            inner: Arc::new(Inner {
                behaviour: self.behaviour,
                ..Default::default()
            }),
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockBrokerBuilder {
        MockBrokerBuilder::default()
    }

    pub fn stats(&self) -> MockStats {
        self.inner.stats.snapshot()
    }

    /// Ids of all clients created through this broker, in creation order.
    pub fn created_clients(&self) -> Vec<String> {
        self.inner.created.lock().clone()
    }

    /// Deliver a message to every matching subscription.
    ///
    /// Returns the number of subscriptions it was delivered to.
    pub fn push(&self, topic: &str, payload: &[u8]) -> usize {
        self.route(
            Message {
                topic,
                payload,
                qos: QoS::AtMostOnce,
                retain: false,
            },
            None,
        )
    }

    fn route(&self, message: Message<'_>, only_client: Option<&str>) -> usize {
        // handlers run outside of the lock: they may publish themselves
        let targets: Vec<(String, MessageHandler)> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .filter(|sub| only_client.is_none_or(|id| id == sub.client_id))
            .filter(|sub| topic_matches(&sub.filter, message.topic))
            .map(|sub| (sub.client_id.clone(), sub.handler.clone()))
            .collect();

        for (client_id, handler) in &targets {
            dispatch_message(client_id, handler, message);
        }
        targets.len()
    }

    fn release_session(&self, client_id: &str) {
        self.inner
            .subscriptions
            .lock()
            .retain(|sub| sub.client_id != client_id);
        self.inner
            .stats
            .active_sessions
            .fetch_sub(1, Ordering::AcqRel);
    }
}

impl ClientFactory for MockBroker {
    type Client = MockClient;

    fn new_client(&self, options: ClientOptions<'_>) -> Self::Client {
        self.inner.created.lock().push(options.client_id.to_owned());
        MockClient {
            broker: self.clone(),
            client_id: options.client_id.to_owned(),
            connected: false,
        }
    }
}

#[derive(Debug)]
pub struct MockClient {
    broker: MockBroker,
    client_id: String,
    connected: bool,
}

impl MqttClient for MockClient {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let inner = &self.broker.inner;
        inner.stats.connect_attempts.fetch_add(1, Ordering::AcqRel);

        if !inner.behaviour.connect_delay.is_zero() {
            tokio::time::sleep(inner.behaviour.connect_delay).await;
        }

        if inner.behaviour.refuse_connect.contains(&self.client_id) {
            return Err(ConnectionError::Refused("not authorized".to_owned()));
        }

        if !self.connected {
            self.connected = true;
            inner.stats.connects.fetch_add(1, Ordering::AcqRel);
            inner.stats.active_sessions.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.broker
            .inner
            .stats
            .disconnect_calls
            .fetch_add(1, Ordering::AcqRel);

        if std::mem::take(&mut self.connected) {
            self.broker.release_session(&self.client_id);
            self.broker
                .inner
                .stats
                .disconnects
                .fetch_add(1, Ordering::AcqRel);
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        self.validate(topic, TopicUsage::Publish)
            .map_err(PublishError::InvalidTopic)?;
        if !self.connected {
            return Err(PublishError::NotConnected);
        }

        let inner = &self.broker.inner;
        inner.stats.publish_attempts.fetch_add(1, Ordering::AcqRel);

        if inner.behaviour.panic_on_publish.contains(&self.client_id) {
            panic!("mock broker: publish panic for {}", self.client_id);
        }
        if inner.behaviour.fail_publish.contains(&self.client_id) {
            return Err(PublishError::Rejected("mock broker: publish refused".to_owned()));
        }

        inner.stats.publishes.fetch_add(1, Ordering::AcqRel);
        self.broker.route(
            Message {
                topic,
                payload,
                qos,
                retain,
            },
            None,
        );
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        qos: QoS,
        retained: bool,
        on_message: MessageHandler,
    ) -> Result<(), SubscribeError> {
        self.validate(topic, TopicUsage::Subscribe)
            .map_err(SubscribeError::InvalidTopic)?;
        if !self.connected {
            return Err(SubscribeError::NotConnected);
        }

        let inner = &self.broker.inner;
        if inner.behaviour.fail_subscribe.contains(&self.client_id) {
            return Err(SubscribeError::Rejected);
        }

        inner.subscriptions.lock().push(Subscription {
            client_id: self.client_id.clone(),
            filter: topic.to_owned(),
            handler: on_message,
        });
        inner.stats.subscribes.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(client_id = %self.client_id, topic, %qos, retained, "mock subscribe");

        for _ in 0..inner.behaviour.deliver_on_subscribe {
            self.broker.route(
                Message {
                    topic: "mock/backlog",
                    payload: b"backlog",
                    qos,
                    retain: retained,
                },
                Some(&self.client_id),
            );
        }
        Ok(())
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        if self.connected {
            self.broker.release_session(&self.client_id);
        }
    }
}
