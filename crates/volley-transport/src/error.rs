use std::time::Duration;

use volley_protocol::{ProtocolError, StatusCode};

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening or binding a socket failed.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// The TCP handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The host name did not resolve to any address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The peer sent bytes that do not frame or decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// The status reported to the session when this error ends a channel.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ConnectTimeout(_) => StatusCode::ConnectTimeout,
            Self::Protocol(_) => StatusCode::ProtocolError,
            _ => StatusCode::NetworkError,
        }
    }
}
