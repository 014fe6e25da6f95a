//! Error handling for the hub transport.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

/// The main result type used throughout the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;

/// Every failure class the client can run into.
///
/// Most of these never reach a caller: they are recovered internally and only
/// show up in logs. [`TransportError::AuthRejected`] is the one fatal class.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Opening the channel to the hub failed.
    #[error("Connect error: {message}")]
    Connect { message: String },

    /// Reading from or writing to an open channel failed.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The channel was closed, by either side.
    #[error("Connection closed{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { reason: Option<String> },

    /// The hub refused the configured credential.
    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    /// The hub answered a request with `success: false`.
    #[error("Request {id} failed: {code}: {message}")]
    RequestFailed {
        id: u64,
        code: String,
        message: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame carried a type tag nobody registered for.
    #[error("No handler registered for message type {tag:?}")]
    DispatchMiss { tag: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// HTTP errors from the health probe.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<FromUtf8Error> for TransportError {
    fn from(e: FromUtf8Error) -> Self {
        Self::Serialization(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl TransportError {
    /// Create a connect error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a connection closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create an authentication rejected error.
    pub fn auth_rejected(message: impl Into<String>) -> Self {
        Self::AuthRejected {
            message: message.into(),
        }
    }

    /// Create a request failed error.
    pub fn request_failed(id: u64, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            id,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a dispatch miss error.
    pub fn dispatch_miss(tag: impl Into<String>) -> Self {
        Self::DispatchMiss { tag: tag.into() }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the client should give up instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::Config { .. })
    }
}
