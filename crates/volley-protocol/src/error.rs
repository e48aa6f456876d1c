//! Error types for the protocol layer.
//!
//! Each crate in Volley defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong: bad framing, a message
//! prost could not decode, or a frame larger than we are willing to buffer.
//! Networking problems live in the transport crate.

/// Errors that can occur while framing or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Protobuf decoding failed (truncated field, bad wire type, invalid
    /// UTF-8 in a string field, ...).
    ///
    /// The inner `prost::DecodeError` is kept so logs show exactly which
    /// field broke.
    #[error("decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The framing around a message is corrupt, for example a length
    /// prefix that never terminates, or an empty datagram.
    ///
    /// Once this happens on a stream the read position can no longer be
    /// trusted, so the owning connection must be torn down.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A length prefix announced a frame larger than [`MAX_FRAME_LEN`].
    ///
    /// [`MAX_FRAME_LEN`]: crate::MAX_FRAME_LEN
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// The message decoded but violates protocol rules, e.g. an envelope
    /// without a payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
