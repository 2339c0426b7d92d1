//! Optional YAML configuration file.
//!
//! ```yaml
//! name: BenchMQ
//! version: 1.0.0
//! environment: development
//! server:
//!   host: localhost
//!   port: 1883
//! client:
//!   client_id: benchmq-client
//!   keep_alive: 60
//!   clean_session: true
//!   username: user
//!   password: secret
//! ```
//!
//! Every field is optional. A missing file yields the built-in defaults,
//! unknown fields are rejected.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use rama::telemetry::tracing;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_NAME: &str = "BenchMQ";
pub const DEFAULT_VERSION: &str = "1.0.0";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "benchmq-client";
pub const DEFAULT_KEEP_ALIVE: u16 = 60;

const KNOWN_ENVIRONMENTS: &[&str] = &["development", "production"];

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_password")]
    pub password: Option<SecretString>,
}

fn deserialize_password<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let password: Option<String> = Option::deserialize(deserializer)?;
    Ok(password
        .filter(|password| !password.is_empty())
        .map(SecretString::from))
}

impl Config {
    /// Load the config file at `path`, fill in the defaults and validate the result.
    ///
    /// A file which does not exist is not an error: the defaults are used instead.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let (mut cfg, file_loaded) = match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                tracing::debug!(path = %path.display(), "config file loaded");
                (Self::from_yaml(&raw)?, true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %path.display(),
                    "no config file found: use built-in defaults"
                );
                (Self::default(), false)
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        cfg.set_defaults(file_loaded);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Decode a config document, without applying any defaults.
    ///
    /// An empty document decodes into an all-empty config.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(ConfigError::Decode)
    }

    /// Replace empty or zero values with their defaults.
    ///
    /// `clean_session` can only be told apart from an explicit `false`
    /// by knowing whether a file was loaded at all.
    pub fn set_defaults(&mut self, file_loaded: bool) {
        if self.name.is_empty() {
            self.name = DEFAULT_NAME.to_owned();
        }
        if self.version.is_empty() {
            self.version = DEFAULT_VERSION.to_owned();
        }
        if self.environment.is_empty() {
            self.environment = DEFAULT_ENVIRONMENT.to_owned();
        }
        if self.server.host.is_empty() {
            self.server.host = DEFAULT_HOST.to_owned();
        }
        if self.server.port == 0 {
            self.server.port = DEFAULT_PORT;
        }
        if self.client.client_id.is_empty() {
            self.client.client_id = DEFAULT_CLIENT_ID.to_owned();
        }
        if self.client.keep_alive == 0 {
            self.client.keep_alive = DEFAULT_KEEP_ALIVE;
        }
        if !file_loaded {
            self.client.clean_session = true;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::EmptyServerHost);
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort);
        }
        if !KNOWN_ENVIRONMENTS.contains(&self.environment.as_str()) {
            tracing::warn!(
                environment = %self.environment,
                "unknown environment in config (expected one of {KNOWN_ENVIRONMENTS:?})"
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Decode(serde_yaml::Error),
    EmptyServerHost,
    InvalidServerPort,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, .. } => {
                write!(f, "config: failed to read '{}'", path.display())
            }
            ConfigError::Decode(err) => write!(f, "config: failed to decode yaml: {err}"),
            ConfigError::EmptyServerHost => write!(f, "config: server host cannot be empty"),
            ConfigError::InvalidServerPort => write!(f, "config: server port must be > 0"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Decode(err) => Some(err),
            _ => None,
        }
    }
}
