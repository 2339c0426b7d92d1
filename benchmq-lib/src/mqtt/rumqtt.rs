//! [`MqttClient`] implementation on top of the `rumqttc` async client.
//!
//! `rumqttc` hands out a request handle ([`AsyncClient`]) and an [`EventLoop`]
//! which has to be polled to make progress. Each [`RumqttClient`] spawns a
//! dedicated task driving its event loop. That task:
//!
//! - reports the CONNACK outcome back to [`MqttClient::connect`];
//! - forwards acknowledgements (packet written, PUBACK, PUBCOMP, SUBACK)
//!   over a channel so `publish` and `subscribe` can wait for them;
//! - invokes the subscription handler for incoming PUBLISH packets.
//!
//! A client only ever has a single publish or subscribe in flight, as both
//! take `&mut self` and wait for their acknowledgement, so acknowledgements
//! can be matched in order without tracking packet identifiers.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use rama::{error::BoxError, telemetry::tracing};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use secrecy::ExposeSecret as _;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::{
    ClientFactory, ClientOptions, ConnectionError, Message, MessageHandler, MqttClient,
    PublishError, QoS, SubscribeError, TopicUsage, dispatch_message,
};

/// Capacity of the request channel between [`AsyncClient`] and its [`EventLoop`].
const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Default maximum packet size (incoming and outgoing).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 10 * 1024;

/// Creates [`RumqttClient`]s.
#[derive(Debug, Clone)]
pub struct RumqttFactory {
    max_packet_size: usize,
}

impl Default for RumqttFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RumqttFactory {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Raise (or lower) the maximum packet size, e.g. to fit large benchmark payloads.
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }
}

impl ClientFactory for RumqttFactory {
    type Client = RumqttClient;

    fn new_client(&self, options: ClientOptions<'_>) -> Self::Client {
        let mut mqtt_options = MqttOptions::new(options.client_id, options.host, options.port);
        mqtt_options
            .set_keep_alive(options.keep_alive)
            .set_clean_session(options.clean_session)
            .set_max_packet_size(self.max_packet_size, self.max_packet_size);

        if let Some(username) = options.username {
            let password = options
                .password
                .map(|password| password.expose_secret())
                .unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }

        RumqttClient {
            client_id: options.client_id.to_owned(),
            options: mqtt_options,
            session: None,
            handler: Arc::new(ArcSwapOption::empty()),
        }
    }
}

pub struct RumqttClient {
    client_id: String,
    options: MqttOptions,
    session: Option<Session>,
    handler: Arc<ArcSwapOption<MessageHandler>>,
}

impl std::fmt::Debug for RumqttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RumqttClient")
            .field("client_id", &self.client_id)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

struct Session {
    client: AsyncClient,
    acks: mpsc::UnboundedReceiver<Ack>,
    event_loop: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    /// a PUBLISH packet was written to the network
    Written,
    PubAck,
    PubComp,
    SubAck { granted: bool },
}

impl Ack {
    fn completes_publish(self, qos: QoS) -> bool {
        matches!(
            (self, qos),
            (Ack::Written, QoS::AtMostOnce)
                | (Ack::PubAck, QoS::AtLeastOnce)
                | (Ack::PubComp, QoS::ExactlyOnce)
        )
    }
}

impl MqttClient for RumqttClient {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            return Ok(());
        }

        let (client, event_loop) =
            AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        let (ack_tx, acks) = mpsc::unbounded_channel();

        let event_loop = tokio::spawn(drive_event_loop(
            EventLoopContext {
                client_id: self.client_id.clone(),
                handler: self.handler.clone(),
                acks: ack_tx,
            },
            event_loop,
            connack_tx,
        ));

        match connack_rx.await {
            Ok(Ok(())) => {
                self.session = Some(Session {
                    client,
                    acks,
                    event_loop,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                event_loop.abort();
                Err(err)
            }
            Err(_) => {
                event_loop.abort();
                Err(ConnectionError::Closed)
            }
        }
    }

    async fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(err) = session.client.disconnect().await {
            tracing::debug!(
                client_id = %self.client_id,
                "disconnect request not delivered (event loop already stopped): {err}"
            );
        }

        // the event loop task is the only caller of the message handler
        if let Err(err) = session.event_loop.await
            && err.is_panic()
        {
            tracing::error!(client_id = %self.client_id, "mqtt event loop panicked: {err}");
        }

        self.handler.store(None);
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
        let session = self.session.as_mut().ok_or(PublishError::NotConnected)?;

        session
            .client
            .publish(topic, qos.into(), retain, payload.to_vec())
            .await
            .map_err(|err| PublishError::Request(BoxError::from(err)))?;

        loop {
            match session.acks.recv().await {
                Some(ack) if ack.completes_publish(qos) => return Ok(()),
                Some(_) => continue,
                None => return Err(PublishError::ConnectionLost),
            }
        }
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
        let session = self.session.as_mut().ok_or(SubscribeError::NotConnected)?;

        // MQTT 3.1.1 has no subscribe-side retain option:
        // retained deliveries are handed to the handler like any other message.
        tracing::debug!(client_id = %self.client_id, topic, %qos, retained, "subscribe");

        self.handler.store(Some(Arc::new(on_message)));

        session
            .client
            .subscribe(topic, qos.into())
            .await
            .map_err(|err| SubscribeError::Request(BoxError::from(err)))?;

        loop {
            match session.acks.recv().await {
                Some(Ack::SubAck { granted: true }) => return Ok(()),
                Some(Ack::SubAck { granted: false }) => return Err(SubscribeError::Rejected),
                Some(_) => continue,
                None => return Err(SubscribeError::ConnectionLost),
            }
        }
    }
}

impl Drop for RumqttClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::debug!(
                client_id = %self.client_id,
                "drop connected mqtt client: abort event loop to release the session"
            );
            session.event_loop.abort();
        }
    }
}

struct EventLoopContext {
    client_id: String,
    handler: Arc<ArcSwapOption<MessageHandler>>,
    acks: mpsc::UnboundedSender<Ack>,
}

async fn drive_event_loop(
    ctx: EventLoopContext,
    mut event_loop: EventLoop,
    connack: oneshot::Sender<Result<(), ConnectionError>>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    let _ = connack.send(Ok(()));
                    break;
                }
                let _ = connack.send(Err(ConnectionError::Refused(format!("{:?}", ack.code))));
                return;
            }
            Ok(event) => {
                tracing::trace!(client_id = %ctx.client_id, "mqtt event before connack: {event:?}");
            }
            Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                let _ = connack.send(Err(ConnectionError::Refused(format!("{code:?}"))));
                return;
            }
            Err(err) => {
                let _ = connack.send(Err(ConnectionError::Transport(BoxError::from(err))));
                return;
            }
        }
    }

    let started = tokio::time::Instant::now();
    loop {
        let ack = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Some(handler) = ctx.handler.load().as_ref() {
                    dispatch_message(
                        &ctx.client_id,
                        handler,
                        Message {
                            topic: &publish.topic,
                            payload: &publish.payload,
                            qos: publish.qos.into(),
                            retain: publish.retain,
                        },
                    );
                }
                continue;
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => Ack::PubAck,
            Ok(Event::Incoming(Packet::PubComp(_))) => Ack::PubComp,
            Ok(Event::Incoming(Packet::SubAck(suback))) => Ack::SubAck {
                granted: suback
                    .return_codes
                    .iter()
                    .all(|code| !matches!(code, SubscribeReasonCode::Failure)),
            },
            Ok(Event::Outgoing(Outgoing::Publish(_))) => Ack::Written,
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::trace!(client_id = %ctx.client_id, "mqtt event loop: disconnect sent");
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(
                    client_id = %ctx.client_id,
                    elapsed = ?started.elapsed(),
                    "mqtt event loop stopped: {err}"
                );
                break;
            }
        };

        // receiver is gone once the client disconnected or got dropped
        let _ = ctx.acks.send(ack);
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::{TcpListener, TcpStream},
    };

    fn options(client_id: &str, port: u16) -> ClientOptions<'_> {
        ClientOptions {
            client_id,
            host: "127.0.0.1",
            port,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_ack_completes_publish() {
        for (ack, qos, expected) in [
            (Ack::Written, QoS::AtMostOnce, true),
            (Ack::Written, QoS::AtLeastOnce, false),
            (Ack::Written, QoS::ExactlyOnce, false),
            (Ack::PubAck, QoS::AtLeastOnce, true),
            (Ack::PubAck, QoS::ExactlyOnce, false),
            (Ack::PubComp, QoS::ExactlyOnce, true),
            (Ack::SubAck { granted: true }, QoS::AtMostOnce, false),
        ] {
            assert_eq!(
                ack.completes_publish(qos),
                expected,
                "ack: {ack:?}, qos: {qos:?}"
            );
        }
    }

    #[test]
    fn test_qos_conversion() {
        for qos in [QoS::AtMostOnce, QoS::AtLeastOnce, QoS::ExactlyOnce] {
            let converted: rumqttc::QoS = qos.into();
            assert_eq!(QoS::from(converted), qos);
        }
    }

    #[tokio::test]
    async fn test_publish_and_subscribe_require_connection() {
        let mut client = RumqttFactory::new().new_client(options("bench-0", 1883));

        assert!(matches!(
            client
                .publish("bench/test", QoS::AtMostOnce, false, b"hello")
                .await,
            Err(PublishError::NotConnected)
        ));
        assert!(matches!(
            client
                .subscribe("bench/test", QoS::AtMostOnce, false, Arc::new(|_| ()))
                .await,
            Err(SubscribeError::NotConnected)
        ));
        assert!(matches!(
            client
                .publish("bench/#", QoS::AtMostOnce, false, b"hello")
                .await,
            Err(PublishError::InvalidTopic(_))
        ));

        // never connected: both calls are no-ops
        client.disconnect().await;
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut client = RumqttFactory::new().new_client(options("bench-0", port));
        let err = client.connect().await.unwrap_err();
        assert!(
            matches!(err, ConnectionError::Transport(_)),
            "unexpected error: {err}"
        );

        client.disconnect().await;
    }

    const TOPIC: &str = "bench/test";

    async fn bind() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    /// Read a single MQTT packet, returning its first header byte and body.
    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0usize;
        for shift in [0, 7, 14, 21] {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Accept one client and answer its CONNECT with the given return code.
    async fn accept(listener: &TcpListener, return_code: u8) -> TcpStream {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, _) = read_packet(&mut stream).await.unwrap();
        assert_eq!(0x10, header, "expected CONNECT");
        stream
            .write_all(&[0x20, 0x02, 0x00, return_code])
            .await
            .unwrap();
        stream
    }

    async fn expect_disconnect(stream: &mut TcpStream) {
        let (header, _) = read_packet(stream).await.unwrap();
        assert_eq!(0xe0, header, "expected DISCONNECT");
    }

    fn publish_packet_id(header: u8, body: &[u8]) -> [u8; 2] {
        assert_eq!(0x30, header & 0xf0, "expected PUBLISH");
        let topic_len = usize::from(u16::from_be_bytes([body[0], body[1]]));
        [body[2 + topic_len], body[3 + topic_len]]
    }

    /// QoS 0 PUBLISH packet as sent by a broker.
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let topic_len = u16::try_from(topic.len()).unwrap();
        let remaining = u8::try_from(2 + topic.len() + payload.len()).unwrap();
        let mut packet = vec![0x30, remaining];
        packet.extend_from_slice(&topic_len.to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    /// Drive `fut` until the broker saw its request (`seen`), check it keeps
    /// waiting for the acknowledgement, then let the broker send it (`release`).
    async fn resolves_after_ack<F>(
        fut: F,
        seen: oneshot::Receiver<()>,
        release: oneshot::Sender<()>,
    ) -> F::Output
    where
        F: Future<Output: std::fmt::Debug>,
    {
        let mut fut = std::pin::pin!(fut);
        tokio::select! {
            output = &mut fut => panic!("resolved before the broker saw the request: {output:?}"),
            _ = seen => (),
        }
        assert!(
            tokio::time::timeout(Duration::from_millis(100), &mut fut)
                .await
                .is_err(),
            "resolved without acknowledgement"
        );
        release.send(()).unwrap();
        fut.await
    }

    #[tokio::test]
    async fn test_connect_refused_by_broker() {
        let (listener, port) = bind().await;
        let broker: JoinHandle<()> = tokio::spawn(async move {
            // 0x05: not authorized
            let mut stream = accept(&listener, 0x05).await;
            let _ = read_packet(&mut stream).await;
        });

        let mut client = RumqttFactory::new().new_client(options("bench-0", port));
        let err = client.connect().await.unwrap_err();
        assert!(
            matches!(err, ConnectionError::Refused(_)),
            "unexpected error: {err}"
        );
        assert!(matches!(
            client.publish(TOPIC, QoS::AtMostOnce, false, b"x").await,
            Err(PublishError::NotConnected)
        ));

        drop(client);
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_resolves_on_acknowledgement() {
        let (listener, port) = bind().await;
        let (qos1_seen_tx, qos1_seen) = oneshot::channel();
        let (puback_tx, puback_rx) = oneshot::channel::<()>();
        let (qos2_seen_tx, qos2_seen) = oneshot::channel();
        let (pubcomp_tx, pubcomp_rx) = oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let mut stream = accept(&listener, 0x00).await;

            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x32, header, "expected QoS 1 PUBLISH");
            let id = publish_packet_id(header, &body);
            qos1_seen_tx.send(()).unwrap();
            puback_rx.await.unwrap();
            stream.write_all(&[0x40, 0x02, id[0], id[1]]).await.unwrap();

            // PUBREC alone does not complete a QoS 2 publish
            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x34, header, "expected QoS 2 PUBLISH");
            let id = publish_packet_id(header, &body);
            stream.write_all(&[0x50, 0x02, id[0], id[1]]).await.unwrap();
            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x62, header, "expected PUBREL");
            assert_eq!(id.as_slice(), body.as_slice());
            qos2_seen_tx.send(()).unwrap();
            pubcomp_rx.await.unwrap();
            stream.write_all(&[0x70, 0x02, id[0], id[1]]).await.unwrap();

            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x30, header, "expected QoS 0 PUBLISH");
            assert!(body.ends_with(b"qos0"));

            expect_disconnect(&mut stream).await;
        });

        let mut client = RumqttFactory::new().new_client(options("bench-0", port));
        client.connect().await.unwrap();

        resolves_after_ack(
            client.publish(TOPIC, QoS::AtLeastOnce, false, b"qos1"),
            qos1_seen,
            puback_tx,
        )
        .await
        .unwrap();
        resolves_after_ack(
            client.publish(TOPIC, QoS::ExactlyOnce, false, b"qos2"),
            qos2_seen,
            pubcomp_tx,
        )
        .await
        .unwrap();
        client
            .publish(TOPIC, QoS::AtMostOnce, false, b"qos0")
            .await
            .unwrap();

        client.disconnect().await;
        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_delivers_until_disconnect() {
        let (listener, port) = bind().await;
        let broker = tokio::spawn(async move {
            let mut stream = accept(&listener, 0x00).await;

            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x82, header, "expected SUBSCRIBE");
            let mut packets = vec![0x90, 0x03, body[0], body[1], 0x01];
            for payload in [b"one".as_slice(), b"two", b"three"] {
                packets.extend(publish_packet(TOPIC, payload));
            }
            stream.write_all(&packets).await.unwrap();

            expect_disconnect(&mut stream).await;
        });

        let received = Arc::new(AtomicUsize::new(0));
        let handler: MessageHandler = {
            let received = received.clone();
            Arc::new(move |msg: Message<'_>| {
                assert_eq!(TOPIC, msg.topic);
                received.fetch_add(1, Ordering::Relaxed);
            })
        };

        let mut client = RumqttFactory::new().new_client(options("bench-0", port));
        client.connect().await.unwrap();
        client
            .subscribe(TOPIC, QoS::AtLeastOnce, false, handler)
            .await
            .unwrap();

        // the event loop is drained before disconnect returns
        client.disconnect().await;
        assert_eq!(3, received.load(Ordering::Relaxed));

        broker.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_rejected_by_broker() {
        let (listener, port) = bind().await;
        let broker = tokio::spawn(async move {
            let mut stream = accept(&listener, 0x00).await;

            let (header, body) = read_packet(&mut stream).await.unwrap();
            assert_eq!(0x82, header, "expected SUBSCRIBE");
            stream
                .write_all(&[0x90, 0x03, body[0], body[1], 0x80])
                .await
                .unwrap();

            expect_disconnect(&mut stream).await;
        });

        let mut client = RumqttFactory::new().new_client(options("bench-0", port));
        client.connect().await.unwrap();
        assert!(matches!(
            client
                .subscribe(TOPIC, QoS::AtMostOnce, false, Arc::new(|_| ()))
                .await,
            Err(SubscribeError::Rejected)
        ));

        client.disconnect().await;
        broker.await.unwrap();
    }
}
