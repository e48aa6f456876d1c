//! Wire protocol for Volley.
//!
//! This crate defines the "language" the client and the realtime server
//! speak:
//!
//! - **Types** ([`Envelope`], [`Payload`], the per-message structs): the
//!   protobuf messages that travel on the wire.
//! - **Typed maps** ([`TypedMap`], [`Value`]): string-keyed values used for
//!   payloads, room configuration and properties, plus the size estimate
//!   used to enforce payload ceilings.
//! - **Status codes** ([`StatusCode`] on the wire, [`Status`] for the
//!   application).
//! - **Codec** ([`FrameDecoder`], [`encode_frame`], [`encode_datagram`],
//!   [`decode_datagram`]): stream and datagram framing.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or sessions. It turns
//! bytes into envelopes and back.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (state machine)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod map;
mod status;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::{
    Datagram, FrameDecoder, HEADER_END, HEADER_HEARTBEAT, HEADER_START,
    MAX_FRAME_LEN, decode_datagram, encode_datagram, encode_frame,
    encode_heartbeat,
};
pub use error::ProtocolError;
pub use map::{TypedMap, Value};
pub use status::{Status, StatusCode};
pub use types::{
    Ack, ClockSync, Connect, Connected, ConnectionClosed, ConnectionFailed,
    CreateRoom, Disconnect, EntryValue, Envelope, JoinRoom, LeaveRoom,
    MapEntry, MatchStateChanged, MatchStateCode, ParticipantInfo,
    ParticipantPropertyUpdated, Payload, PayloadKind, PeerJoinedRoom,
    PeerLeftRoom, Ping, Pong, ResetMatch, RoomClosed, RoomCreated, RoomInfo,
    RoomJoined, RoomLeft, RoomMessage, RoomPropertyUpdated,
    SetParticipantProperty, SetRoomProperty, StartMatch, StopMatch,
};

// ---------------------------------------------------------------------------
// Payload ceilings
// ---------------------------------------------------------------------------

/// Largest [`TypedMap::serialized_size`] accepted for an unreliable room
/// message. Chosen so the datagram stays under a typical path MTU.
pub const MAX_UNRELIABLE_PAYLOAD: usize = 1300;

/// Largest [`TypedMap::serialized_size`] accepted for a reliable room
/// message.
pub const MAX_RELIABLE_PAYLOAD: usize = 2048;

/// Largest [`TypedMap::serialized_size`] accepted for a property set.
pub const MAX_PROPERTY_SIZE: usize = 1500;
