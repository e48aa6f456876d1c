//! Unified error type for Volley.

use volley_protocol::ProtocolError;
use volley_room::RoomError;
use volley_session::SessionError;
use volley_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// The `#[from]` conversions let `?` lift a layer error into this type, so
/// application code can work with one error type throughout.
#[derive(Debug, thiserror::Error)]
pub enum VolleyError {
    /// Socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bytes that do not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A rejected session call.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Unusable room data from the server.
    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use volley_protocol::Status;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let volley_err: VolleyError = err.into();
        assert!(matches!(volley_err, VolleyError::Transport(_)));
        assert!(volley_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let volley_err: VolleyError = err.into();
        assert!(matches!(volley_err, VolleyError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error_keeps_message() {
        let err = SessionError::Failed(Status::NetworkError);
        let volley_err: VolleyError = err.into();
        assert!(matches!(volley_err, VolleyError::Session(_)));
        assert_eq!(volley_err.to_string(), "operation failed: NetworkError(2)");
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::InvalidSnapshot("empty room id".into());
        let volley_err: VolleyError = err.into();
        assert!(matches!(volley_err, VolleyError::Room(_)));
    }
}
