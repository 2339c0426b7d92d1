use std::{fmt, time::Duration};

use secrecy::{ExposeSecret as _, SecretString};

use crate::{
    config::Config,
    mqtt::{ClientOptions, QoS},
};

pub const DEFAULT_CLIENTS: i64 = 100;
pub const DEFAULT_DELAY_MILLIS: i64 = 1000;
pub const DEFAULT_TOPIC: &str = "benchmq";
pub const DEFAULT_QOS: u8 = 0;
pub const DEFAULT_MESSAGE_COUNT: i64 = 1000;
pub const DEFAULT_MESSAGE: &str = "Hello, World!";

/// Validated, immutable description of one benchmark run.
///
/// Only a [`BenchmarkSpecBuilder`] can produce one.
pub struct BenchmarkSpec {
    clients: usize,
    client_id_prefix: String,
    delay: Duration,
    topic: String,
    qos: QoS,
    retained: bool,
    message_count: u64,
    message: Vec<u8>,
    clean_session: bool,
    keep_alive: u16,
    username: Option<String>,
    password: Option<SecretString>,
    host: String,
    port: u16,
}

impl fmt::Debug for BenchmarkSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkSpec")
            .field("clients", &self.clients)
            .field("client_id_prefix", &self.client_id_prefix)
            .field("delay", &self.delay)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("retained", &self.retained)
            .field("message_count", &self.message_count)
            .field("message_len", &self.message.len())
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl BenchmarkSpec {
    /// Builder seeded with the built-in defaults (as if no config file exists).
    pub fn builder() -> BenchmarkSpecBuilder {
        let mut cfg = Config::default();
        cfg.set_defaults(false);
        Self::builder_from_config(&cfg)
    }

    /// Builder seeded with the broker and client settings of a loaded config.
    pub fn builder_from_config(cfg: &Config) -> BenchmarkSpecBuilder {
        BenchmarkSpecBuilder {
            clients: DEFAULT_CLIENTS,
            client_id_prefix: cfg.client.client_id.clone(),
            delay_millis: DEFAULT_DELAY_MILLIS,
            topic: DEFAULT_TOPIC.to_owned(),
            qos: DEFAULT_QOS,
            retained: false,
            message_count: DEFAULT_MESSAGE_COUNT,
            message: DEFAULT_MESSAGE.as_bytes().to_vec(),
            clean_session: cfg.client.clean_session,
            keep_alive: cfg.client.keep_alive,
            username: cfg.client.username.clone(),
            password: cfg
                .client
                .password
                .as_ref()
                .map(|password| SecretString::from(password.expose_secret().to_owned())),
            host: cfg.server.host.clone(),
            port: u32::from(cfg.server.port),
        }
    }

    pub fn clients(&self) -> usize {
        self.clients
    }

    pub fn client_id_prefix(&self) -> &str {
        &self.client_id_prefix
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retained(&self) -> bool {
        self.retained
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Units of work the run intends to complete: one per message for
    /// publish and subscribe runs.
    pub fn expected_messages(&self) -> u64 {
        (self.clients as u64).saturating_mul(self.message_count)
    }

    /// Identity of the client with the given index: `"{prefix}-{index}"`.
    pub fn client_id(&self, index: usize) -> String {
        format!("{}-{index}", self.client_id_prefix)
    }

    pub fn client_options<'a>(&'a self, client_id: &'a str) -> ClientOptions<'a> {
        ClientOptions {
            client_id,
            host: &self.host,
            port: self.port,
            keep_alive: Duration::from_secs(u64::from(self.keep_alive)),
            clean_session: self.clean_session,
            username: self.username.as_deref(),
            password: self.password.as_ref(),
        }
    }
}

/// Collects overrides on top of a base configuration.
///
/// Values are kept unvalidated (and in wide types) until [`build`](Self::build),
/// so out of range input coming from the command line is reported as a
/// [`ValidationError`] instead of being truncated.
pub struct BenchmarkSpecBuilder {
    clients: i64,
    client_id_prefix: String,
    delay_millis: i64,
    topic: String,
    qos: u8,
    retained: bool,
    message_count: i64,
    message: Vec<u8>,
    clean_session: bool,
    keep_alive: u16,
    username: Option<String>,
    password: Option<SecretString>,
    host: String,
    port: u32,
}

impl fmt::Debug for BenchmarkSpecBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkSpecBuilder")
            .field("clients", &self.clients)
            .field("client_id_prefix", &self.client_id_prefix)
            .field("delay_millis", &self.delay_millis)
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("message_count", &self.message_count)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl BenchmarkSpecBuilder {
    pub fn with_clients(mut self, clients: i64) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_id_prefix = prefix.into();
        self
    }

    pub fn with_delay_millis(mut self, delay: i64) -> Self {
        self.delay_millis = delay;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    pub fn with_message_count(mut self, count: i64) -> Self {
        self.message_count = count;
        self
    }

    pub fn with_message(mut self, message: impl Into<Vec<u8>>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive = seconds;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|username| !username.is_empty());
        self
    }

    pub fn with_password(mut self, password: Option<SecretString>) -> Self {
        self.password = password;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u32) -> Self {
        self.port = port;
        self
    }

    /// Validate all values, reporting the first violated constraint.
    pub fn build(self) -> Result<BenchmarkSpec, ValidationError> {
        let clients = match usize::try_from(self.clients) {
            Ok(clients) if clients > 0 => clients,
            _ => return Err(ValidationError::InvalidClients(self.clients)),
        };
        let delay = match u64::try_from(self.delay_millis) {
            Ok(millis) => Duration::from_millis(millis),
            Err(_) => return Err(ValidationError::InvalidDelay(self.delay_millis)),
        };
        if self.host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        let port = match u16::try_from(self.port) {
            Ok(port) if port > 0 => port,
            _ => return Err(ValidationError::InvalidPort(self.port)),
        };
        let qos = QoS::try_from(self.qos).map_err(|err| ValidationError::InvalidQoS(err.0))?;
        let message_count = u64::try_from(self.message_count)
            .map_err(|_| ValidationError::InvalidMessageCount(self.message_count))?;
        if self.client_id_prefix.is_empty() {
            return Err(ValidationError::EmptyClientId);
        }

        Ok(BenchmarkSpec {
            clients,
            client_id_prefix: self.client_id_prefix,
            delay,
            topic: self.topic,
            qos,
            retained: self.retained,
            message_count,
            message: self.message,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            username: self.username,
            password: self.password,
            host: self.host,
            port,
        })
    }
}

/// The benchmark definition violates a constraint. Fatal, reported before any client starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidClients(i64),
    InvalidDelay(i64),
    EmptyHost,
    EmptyTopic,
    InvalidPort(u32),
    InvalidQoS(u8),
    InvalidMessageCount(i64),
    EmptyClientId,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidClients(n) => {
                write!(f, "bench: clients must be > 0 (got {n})")
            }
            ValidationError::InvalidDelay(n) => write!(f, "bench: delay must be >= 0 (got {n})"),
            ValidationError::EmptyHost => write!(f, "bench: host cannot be empty"),
            ValidationError::EmptyTopic => write!(f, "bench: topic cannot be empty"),
            ValidationError::InvalidPort(n) => {
                write!(f, "bench: port must be within 1..=65535 (got {n})")
            }
            ValidationError::InvalidQoS(n) => {
                write!(f, "bench: qos must be 0, 1, or 2 (got {n})")
            }
            ValidationError::InvalidMessageCount(n) => {
                write!(f, "bench: message count must be >= 0 (got {n})")
            }
            ValidationError::EmptyClientId => write!(f, "bench: client id cannot be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}
