//! Error types for the session layer.

use volley_protocol::Status;

/// Errors returned directly from [`Session`](crate::Session) calls.
///
/// Everything except [`Failed`](Self::Failed) is a contract violation: the
/// call was rejected before any network I/O and nothing was retried.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operation needs a joined room and there is none.
    #[error("no room is joined")]
    RoomNotJoined,

    /// A payload or property set exceeds its size ceiling.
    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Property keys must be non-empty.
    #[error("property key cannot be empty")]
    EmptyPropertyKey,

    /// `reconnect` was called before `connect` supplied an event sink.
    #[error("reconnect requires a prior connect")]
    NoConnectionSink,

    /// The session actor is gone (shut down or panicked).
    #[error("session has stopped")]
    Stopped,

    /// The operation reports its status immediately and it was not
    /// `Success`, e.g. `SessionNotConnected` or `NetworkError`.
    #[error("operation failed: {0}")]
    Failed(Status),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_message() {
        let err = SessionError::PayloadTooLarge {
            size: 2049,
            limit: 2048,
        };
        assert_eq!(err.to_string(), "payload is 2049 bytes, limit is 2048");
    }

    #[test]
    fn test_failed_message_includes_status_code() {
        let err = SessionError::Failed(Status::SessionNotConnected);
        assert_eq!(err.to_string(), "operation failed: SessionNotConnected(10)");
    }
}
