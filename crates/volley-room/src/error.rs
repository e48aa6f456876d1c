//! Error types for the room layer.

/// Errors that can occur while building the room model from server data.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// A success response arrived without a usable room snapshot.
    #[error("invalid room snapshot: {0}")]
    InvalidSnapshot(String),
}
