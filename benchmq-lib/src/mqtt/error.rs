use std::fmt;

use rama::error::BoxError;

use super::TopicError;

/// A client failed to establish its session.
#[derive(Debug)]
pub enum ConnectionError {
    /// The broker answered the CONNECT with a non-success return code.
    Refused(String),
    /// The network or protocol layer failed before the broker answered.
    Transport(BoxError),
    /// The client's network task stopped before a CONNACK was received.
    Closed,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Refused(reason) => {
                write!(f, "mqtt connection refused by broker: {reason}")
            }
            ConnectionError::Transport(err) => write!(f, "mqtt connection failed: {err}"),
            ConnectionError::Closed => {
                write!(f, "mqtt connection closed before it was acknowledged")
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// A single publish did not get acknowledged.
#[derive(Debug)]
pub enum PublishError {
    InvalidTopic(TopicError),
    NotConnected,
    /// The publish request could not be handed to the network layer.
    Request(BoxError),
    /// The broker explicitly refused the message.
    Rejected(String),
    /// The session ended while waiting for the acknowledgement.
    ConnectionLost,
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::InvalidTopic(err) => write!(f, "mqtt publish: {err}"),
            PublishError::NotConnected => write!(f, "mqtt publish: client is not connected"),
            PublishError::Request(err) => write!(f, "mqtt publish failed: {err}"),
            PublishError::Rejected(reason) => write!(f, "mqtt publish rejected: {reason}"),
            PublishError::ConnectionLost => {
                write!(f, "mqtt publish: connection lost before acknowledgement")
            }
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::InvalidTopic(err) => Some(err),
            PublishError::Request(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// A subscription could not be established.
#[derive(Debug)]
pub enum SubscribeError {
    InvalidTopic(TopicError),
    NotConnected,
    Request(BoxError),
    /// The broker answered the SUBSCRIBE with a failure return code.
    Rejected,
    ConnectionLost,
}

impl fmt::Display for SubscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscribeError::InvalidTopic(err) => write!(f, "mqtt subscribe: {err}"),
            SubscribeError::NotConnected => write!(f, "mqtt subscribe: client is not connected"),
            SubscribeError::Request(err) => write!(f, "mqtt subscribe failed: {err}"),
            SubscribeError::Rejected => write!(f, "mqtt subscribe rejected by broker"),
            SubscribeError::ConnectionLost => {
                write!(f, "mqtt subscribe: connection lost before acknowledgement")
            }
        }
    }
}

impl std::error::Error for SubscribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SubscribeError::InvalidTopic(err) => Some(err),
            SubscribeError::Request(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
