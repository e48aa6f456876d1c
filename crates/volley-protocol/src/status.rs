//! Status codes.
//!
//! Two related enums live here:
//!
//! - [`StatusCode`]: the code the *server* puts on the wire. It includes
//!   transport-level reasons the application never needs to distinguish
//!   (`ConnectTimeout`, `UnresponsiveClient`).
//! - [`Status`]: the code the *application* sees in session events. It
//!   adds client-side outcomes (`SessionNotConnected`) and folds the
//!   wire-only reasons into `NetworkError`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// StatusCode (wire)
// ---------------------------------------------------------------------------

/// Status carried by server responses and connection events.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration,
)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,
    InternalError = 1,
    NetworkError = 2,
    ConnectTimeout = 3,
    SessionClosed = 4,
    ReplacedByNewConnection = 5,
    UnresponsiveClient = 6,
    NewServerLocation = 7,
    InvalidMessage = 8,
    ProtocolError = 9,
    PermissionDenied = 10,
    AlreadyConnected = 11,
    RoomNotJoined = 12,
    AlreadyCreated = 13,
    RoomClosed = 14,
    RoomNotFound = 15,
    RoomFull = 16,
    InvalidData = 17,
    BadState = 18,
    PeerNotFound = 19,
}

// ---------------------------------------------------------------------------
// Status (surface)
// ---------------------------------------------------------------------------

/// Outcome reported to the application.
///
/// The numeric values are stable and can be logged or shipped to analytics
/// as-is (see [`Status::code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
    InternalError,
    NetworkError,
    SessionClosed,
    ReplacedByNewConnection,
    /// Informational: the server redirected us and we are following.
    NewServerLocation,
    InvalidMessage,
    ProtocolError,
    PermissionDenied,
    AlreadyConnected,
    SessionNotConnected,
    RoomNotJoined,
    RoomAlreadyCreated,
    RoomClosed,
    RoomNotFound,
    RoomFull,
    InvalidData,
    BadState,
    PeerNotFound,
}

impl Status {
    /// Returns the stable numeric code for this status.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::InternalError => 1,
            Self::NetworkError => 2,
            Self::SessionClosed => 3,
            Self::ReplacedByNewConnection => 4,
            Self::NewServerLocation => 5,
            Self::InvalidMessage => 6,
            Self::ProtocolError => 7,
            Self::PermissionDenied => 8,
            Self::AlreadyConnected => 9,
            Self::SessionNotConnected => 10,
            Self::RoomNotJoined => 11,
            Self::RoomAlreadyCreated => 12,
            Self::RoomClosed => 13,
            Self::RoomNotFound => 14,
            Self::RoomFull => 15,
            Self::InvalidData => 16,
            Self::BadState => 17,
            Self::PeerNotFound => 18,
        }
    }

    /// Returns `true` for [`Status::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Success => Self::Success,
            StatusCode::InternalError => Self::InternalError,
            StatusCode::NetworkError
            | StatusCode::ConnectTimeout
            | StatusCode::UnresponsiveClient => Self::NetworkError,
            StatusCode::SessionClosed => Self::SessionClosed,
            StatusCode::ReplacedByNewConnection => {
                Self::ReplacedByNewConnection
            }
            StatusCode::NewServerLocation => Self::NewServerLocation,
            StatusCode::InvalidMessage => Self::InvalidMessage,
            StatusCode::ProtocolError => Self::ProtocolError,
            StatusCode::PermissionDenied => Self::PermissionDenied,
            StatusCode::AlreadyConnected => Self::AlreadyConnected,
            StatusCode::RoomNotJoined => Self::RoomNotJoined,
            StatusCode::AlreadyCreated => Self::RoomAlreadyCreated,
            StatusCode::RoomClosed => Self::RoomClosed,
            StatusCode::RoomNotFound => Self::RoomNotFound,
            StatusCode::RoomFull => Self::RoomFull,
            StatusCode::InvalidData => Self::InvalidData,
            StatusCode::BadState => Self::BadState,
            StatusCode::PeerNotFound => Self::PeerNotFound,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", self.code())
    }
}
