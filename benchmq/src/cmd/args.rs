use benchmq_lib::{
    bench::{BenchmarkSpec, BenchmarkSpecBuilder},
    config::Config,
};
use clap::Args;
use rama::telemetry::tracing;
use secrecy::SecretString;

/// Client flags shared by all benchmark commands.
///
/// Flags which are not given fall back to the config file,
/// or to the built-in default when the config file does not define them.
#[derive(Debug, Clone, Default, Args)]
pub struct ClientArgs {
    /// client id prefix, clients connect as "{prefix}-{index}" [default: config or benchmq-client]
    #[arg(long = "client-id", short = 'i', value_name = "PREFIX")]
    pub client_id: Option<String>,

    /// amount of simulated clients [default: 100]
    #[arg(long, short = 'c', value_name = "N", allow_negative_numbers = true)]
    pub clients: Option<i64>,

    /// delay in milliseconds: between connections (conn),
    /// before each message (pub) or sizing the listen window (sub) [default: 1000]
    #[arg(long, short = 'd', value_name = "MILLIS", allow_negative_numbers = true)]
    pub delay: Option<i64>,

    /// start with a clean session [default: config or true]
    #[arg(
        long = "clean",
        short = 'x',
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub clean_session: Option<bool>,

    /// keep alive interval in seconds [default: config or 60]
    #[arg(long = "keepalive", short = 'k', value_name = "SECONDS")]
    pub keep_alive: Option<u16>,

    /// username to authenticate with [default: config]
    #[arg(long, short = 'u')]
    pub username: Option<String>,

    /// password to authenticate with [default: config]
    #[arg(long, short = 'p')]
    pub password: Option<String>,

    /// broker host [default: config or localhost]
    #[arg(long, short = 'H')]
    pub host: Option<String>,

    /// broker port [default: config or 1883]
    #[arg(long, short = 'P', allow_negative_numbers = true)]
    pub port: Option<u32>,
}

/// Topic flags of the publish and subscribe commands.
#[derive(Debug, Clone, Default, Args)]
pub struct TopicArgs {
    /// topic to publish to or subscribe on [default: benchmq]
    #[arg(long, short = 't')]
    pub topic: Option<String>,

    /// quality of service: 0, 1 or 2 [default: 0]
    #[arg(long, short = 'q')]
    pub qos: Option<u8>,

    /// messages per client (pub) or expected per client (sub) [default: 1000]
    #[arg(long, short = 'n', value_name = "N", allow_negative_numbers = true)]
    pub count: Option<i64>,
}

macro_rules! apply_overrides {
    ($builder:ident, {$($arg:expr => $with:ident ($property:literal, $fallback:literal)),+ $(,)?}) => {
        $(
            $builder = match $arg {
                Some(value) => {
                    tracing::info!("property '{}': use cli flag: {value}", $property);
                    $builder.$with(value)
                }
                None => {
                    tracing::info!("property '{}': use {}", $property, $fallback);
                    $builder
                }
            };
        )+
    };
}

/// Merge the command flags on top of the loaded config.
pub(super) fn spec_builder(
    cfg: &Config,
    client: ClientArgs,
    topic: Option<TopicArgs>,
) -> BenchmarkSpecBuilder {
    let mut builder = BenchmarkSpec::builder_from_config(cfg);

    apply_overrides!(builder, {
        client.client_id => with_client_id_prefix("client_id", "config"),
        client.clients => with_clients("clients", "default"),
        client.delay => with_delay_millis("delay", "default"),
        client.clean_session => with_clean_session("clean_session", "config"),
        client.keep_alive => with_keep_alive("keep_alive", "config"),
        client.host => with_host("host", "config"),
        client.port => with_port("port", "config"),
    });

    builder = match client.username {
        Some(username) => {
            tracing::info!("property 'username': use cli flag: {username}");
            builder.with_username(Some(username))
        }
        None => {
            tracing::info!("property 'username': use config");
            builder
        }
    };

    builder = match client.password {
        Some(password) => {
            tracing::info!("property 'password': use cli flag");
            builder.with_password(Some(SecretString::from(password)))
        }
        None => {
            tracing::info!("property 'password': use config");
            builder
        }
    };

    if let Some(topic) = topic {
        apply_overrides!(builder, {
            topic.topic => with_topic("topic", "default"),
            topic.qos => with_qos("qos", "default"),
            topic.count => with_message_count("count", "default"),
        });
    }

    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    use benchmq_lib::{bench::ValidationError, mqtt::QoS};

    fn config() -> Config {
        let mut cfg = Config::from_yaml(
            "server:\n  host: broker.local\n  port: 1884\nclient:\n  client_id: cfg-client\n  clean_session: false\n",
        )
        .unwrap();
        cfg.set_defaults(true);
        cfg
    }

    #[test]
    fn test_flags_fall_back_to_config() {
        let spec = spec_builder(&config(), ClientArgs::default(), None)
            .build()
            .unwrap();

        assert_eq!("broker.local", spec.host());
        assert_eq!(1884, spec.port());
        assert_eq!("cfg-client-0", spec.client_id(0));
        assert!(!spec.clean_session());
        assert_eq!(100, spec.clients());
        assert_eq!("benchmq", spec.topic());
    }

    #[test]
    fn test_flags_override_config() {
        let spec = spec_builder(
            &config(),
            ClientArgs {
                client_id: Some("cli".to_owned()),
                clients: Some(3),
                delay: Some(0),
                clean_session: Some(true),
                host: Some("127.0.0.1".to_owned()),
                port: Some(1883),
                ..Default::default()
            },
            Some(TopicArgs {
                topic: Some("bench/x".to_owned()),
                qos: Some(2),
                count: Some(7),
            }),
        )
        .build()
        .unwrap();

        assert_eq!("127.0.0.1", spec.host());
        assert_eq!(1883, spec.port());
        assert_eq!("cli-2", spec.client_id(2));
        assert!(spec.clean_session());
        assert_eq!(3, spec.clients());
        assert_eq!("bench/x", spec.topic());
        assert_eq!(QoS::ExactlyOnce, spec.qos());
        assert_eq!(7, spec.message_count());
    }

    #[test]
    fn test_invalid_flags_fail_validation() {
        for (client, topic, expected) in [
            (
                ClientArgs {
                    clients: Some(0),
                    ..Default::default()
                },
                None,
                ValidationError::InvalidClients(0),
            ),
            (
                ClientArgs {
                    delay: Some(-10),
                    ..Default::default()
                },
                None,
                ValidationError::InvalidDelay(-10),
            ),
            (
                ClientArgs {
                    port: Some(70000),
                    ..Default::default()
                },
                None,
                ValidationError::InvalidPort(70000),
            ),
            (
                ClientArgs::default(),
                Some(TopicArgs {
                    qos: Some(3),
                    ..Default::default()
                }),
                ValidationError::InvalidQoS(3),
            ),
        ] {
            match spec_builder(&config(), client, topic).build() {
                Err(err) => assert_eq!(expected, err),
                Ok(spec) => panic!("expected {expected:?}, got valid spec: {spec:?}"),
            }
        }
    }
}
