//! Message types for Volley's wire format.
//!
//! Every structure here is a protobuf message (derived with `prost`), so the
//! byte layout is the standard protobuf encoding and any protobuf runtime on
//! the server side can read it.
//!
//! The top-level unit is the [`Envelope`]. It carries the sequencing fields
//! (`msg_id`, `ack_id`, `is_reliable`) and exactly one [`Payload`]. The
//! payload's variant *is* the message type; there is no separate type tag.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ msg_id: 7        ← sender's sequence │
//! │ ack_id: 12       ← "I processed ≤12" │
//! │ is_reliable: true                    │
//! │ ┌──────────────────────────────────┐ │
//! │ │ payload: RoomMessage { ... }     │ │
//! │ └──────────────────────────────────┘ │
//! └──────────────────────────────────────┘
//! ```
//!
//! Field numbers are part of the wire contract. Never renumber a field;
//! add new ones instead.

use crate::status::StatusCode;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level wire message, used in both directions.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    /// Sender-assigned id. For reliable envelopes this is a sequence number
    /// starting at 1; for unreliable envelopes it is the sender's match time.
    /// `0` means "not sequenced" (connection handshake, server pushes).
    #[prost(uint32, tag = "1")]
    pub msg_id: u32,

    /// Highest contiguous reliable id the sender has processed from us.
    #[prost(uint32, tag = "2")]
    pub ack_id: u32,

    #[prost(bool, tag = "3")]
    pub is_reliable: bool,

    #[prost(
        oneof = "Payload",
        tags = "10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, \
                30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43"
    )]
    pub payload: Option<Payload>,
}

impl Envelope {
    /// Builds an envelope around any payload type.
    pub fn new(
        msg_id: u32,
        ack_id: u32,
        is_reliable: bool,
        payload: impl Into<Payload>,
    ) -> Self {
        Self {
            msg_id,
            ack_id,
            is_reliable,
            payload: Some(payload.into()),
        }
    }

    /// A locally synthesized `ConnectionFailed` push.
    ///
    /// Transport channels hand these to the session when a socket dies, so
    /// local I/O failures and server-reported failures share one code path.
    pub fn connection_failed(status: StatusCode) -> Self {
        let mut failed = ConnectionFailed::default();
        failed.set_status(status);
        Self::new(0, 0, true, failed)
    }

    /// Returns the message type, or `None` for an envelope with no payload.
    pub fn kind(&self) -> Option<PayloadKind> {
        self.payload.as_ref().map(Payload::kind)
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// The body of an envelope.
///
/// Variants in the 10s are sent by the client, variants in the 30s by the
/// server. `Ping`, `Pong` and `RoomMessage` travel both ways.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Payload {
    // -- Client → Server --
    #[prost(message, tag = "10")]
    Connect(Connect),
    #[prost(message, tag = "11")]
    Disconnect(Disconnect),
    #[prost(message, tag = "12")]
    Ping(Ping),
    #[prost(message, tag = "13")]
    Pong(Pong),
    #[prost(message, tag = "14")]
    CreateRoom(CreateRoom),
    #[prost(message, tag = "15")]
    JoinRoom(JoinRoom),
    #[prost(message, tag = "16")]
    LeaveRoom(LeaveRoom),
    #[prost(message, tag = "17")]
    StartMatch(StartMatch),
    #[prost(message, tag = "18")]
    StopMatch(StopMatch),
    #[prost(message, tag = "19")]
    ResetMatch(ResetMatch),
    #[prost(message, tag = "20")]
    SetRoomProperty(SetRoomProperty),
    #[prost(message, tag = "21")]
    SetParticipantProperty(SetParticipantProperty),
    #[prost(message, tag = "22")]
    RoomMessage(RoomMessage),

    // -- Server → Client --
    #[prost(message, tag = "30")]
    Connected(Connected),
    #[prost(message, tag = "31")]
    ConnectionFailed(ConnectionFailed),
    #[prost(message, tag = "32")]
    ConnectionClosed(ConnectionClosed),
    #[prost(message, tag = "33")]
    ClockSync(ClockSync),
    #[prost(message, tag = "34")]
    RoomCreated(RoomCreated),
    #[prost(message, tag = "35")]
    RoomClosed(RoomClosed),
    #[prost(message, tag = "36")]
    RoomJoined(RoomJoined),
    #[prost(message, tag = "37")]
    RoomLeft(RoomLeft),
    #[prost(message, tag = "38")]
    PeerJoinedRoom(PeerJoinedRoom),
    #[prost(message, tag = "39")]
    PeerLeftRoom(PeerLeftRoom),
    #[prost(message, tag = "40")]
    MatchStateChanged(MatchStateChanged),
    #[prost(message, tag = "41")]
    RoomPropertyUpdated(RoomPropertyUpdated),
    #[prost(message, tag = "42")]
    ParticipantPropertyUpdated(ParticipantPropertyUpdated),
    #[prost(message, tag = "43")]
    Ack(Ack),
}

/// Field-less discriminant of [`Payload`].
///
/// Used for logging and as the staleness key of protocol-level unreliable
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PayloadKind {
    Connect,
    Disconnect,
    Ping,
    Pong,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    StartMatch,
    StopMatch,
    ResetMatch,
    SetRoomProperty,
    SetParticipantProperty,
    RoomMessage,
    Connected,
    ConnectionFailed,
    ConnectionClosed,
    ClockSync,
    RoomCreated,
    RoomClosed,
    RoomJoined,
    RoomLeft,
    PeerJoinedRoom,
    PeerLeftRoom,
    MatchStateChanged,
    RoomPropertyUpdated,
    ParticipantPropertyUpdated,
    Ack,
}

/// Generates `Payload::kind` and one `From<Message> for Payload` impl per
/// variant, keeping the three lists in lockstep.
macro_rules! payload_variants {
    ($($name:ident),+ $(,)?) => {
        impl Payload {
            pub fn kind(&self) -> PayloadKind {
                match self {
                    $(Self::$name(_) => PayloadKind::$name,)+
                }
            }
        }

        $(
            impl From<$name> for Payload {
                fn from(message: $name) -> Self {
                    Self::$name(message)
                }
            }
        )+
    };
}

payload_variants!(
    Connect,
    Disconnect,
    Ping,
    Pong,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    StartMatch,
    StopMatch,
    ResetMatch,
    SetRoomProperty,
    SetParticipantProperty,
    RoomMessage,
    Connected,
    ConnectionFailed,
    ConnectionClosed,
    ClockSync,
    RoomCreated,
    RoomClosed,
    RoomJoined,
    RoomLeft,
    PeerJoinedRoom,
    PeerLeftRoom,
    MatchStateChanged,
    RoomPropertyUpdated,
    ParticipantPropertyUpdated,
    Ack,
);

// ---------------------------------------------------------------------------
// Shared building blocks
// ---------------------------------------------------------------------------

/// One key/value pair of a typed map as it appears on the wire.
///
/// An entry with no value is "void": on a property update it means
/// "remove this key".
#[derive(Clone, PartialEq, prost::Message)]
pub struct MapEntry {
    #[prost(string, tag = "1")]
    pub name: String,

    #[prost(
        oneof = "EntryValue",
        tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11"
    )]
    pub value: Option<EntryValue>,
}

/// The typed value of a [`MapEntry`].
///
/// Protobuf distinguishes three 32-bit and three 64-bit integer encodings.
/// Writers pick `Uint*` for non-negative values and `Sint*` (zigzag) for
/// negative ones; `Int*` is accepted on read.
#[derive(Clone, PartialEq, prost::Oneof)]
pub enum EntryValue {
    #[prost(int32, tag = "2")]
    Int32(i32),
    #[prost(uint32, tag = "3")]
    Uint32(u32),
    #[prost(sint32, tag = "4")]
    Sint32(i32),
    #[prost(int64, tag = "5")]
    Int64(i64),
    #[prost(uint64, tag = "6")]
    Uint64(u64),
    #[prost(sint64, tag = "7")]
    Sint64(i64),
    #[prost(double, tag = "8")]
    Double(f64),
    #[prost(bool, tag = "9")]
    Bool(bool),
    #[prost(string, tag = "10")]
    Str(String),
    #[prost(bytes = "vec", tag = "11")]
    Bytes(Vec<u8>),
}

/// Match lifecycle as reported by the server.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration,
)]
#[repr(i32)]
pub enum MatchStateCode {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Finished = 3,
}

/// A participant as carried in room snapshots and join events.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ParticipantInfo {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(message, repeated, tag = "2")]
    pub properties: Vec<MapEntry>,
}

/// Full room snapshot sent on create/join.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomInfo {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(enumeration = "MatchStateCode", tag = "2")]
    pub match_state: i32,
    #[prost(message, repeated, tag = "3")]
    pub config: Vec<MapEntry>,
    #[prost(message, repeated, tag = "4")]
    pub properties: Vec<MapEntry>,
    #[prost(message, repeated, tag = "5")]
    pub participants: Vec<ParticipantInfo>,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Opens (or resumes, when `session_id` is set) a session.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Connect {
    #[prost(string, tag = "1")]
    pub player_id: String,
    #[prost(string, tag = "2")]
    pub game_id: String,
    #[prost(string, tag = "3")]
    pub access_token: String,
    #[prost(string, optional, tag = "4")]
    pub session_id: Option<String>,
}

/// Destroys the session on the server.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Disconnect {}

/// Latency probe. Either side may send one; `id` and `timestamp` are match
/// times and are echoed back in the [`Pong`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct Ping {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub timestamp: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Pong {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub timestamp: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateRoom {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(message, repeated, tag = "2")]
    pub room_config: Vec<MapEntry>,
    #[prost(message, repeated, tag = "3")]
    pub room_properties: Vec<MapEntry>,
    #[prost(message, repeated, tag = "4")]
    pub participant_properties: Vec<MapEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct JoinRoom {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(message, repeated, tag = "2")]
    pub participant_properties: Vec<MapEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LeaveRoom {
    #[prost(string, tag = "1")]
    pub room_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StartMatch {
    #[prost(string, tag = "1")]
    pub room_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StopMatch {
    #[prost(string, tag = "1")]
    pub room_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResetMatch {
    #[prost(string, tag = "1")]
    pub room_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetRoomProperty {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(message, optional, tag = "2")]
    pub property: Option<MapEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetParticipantProperty {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(message, optional, tag = "2")]
    pub property: Option<MapEntry>,
}

/// Application data exchanged between participants of a room.
///
/// Outbound, `to_id` selects a single recipient (absent = broadcast).
/// Inbound, the server fills in `from_id`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomMessage {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(uint32, tag = "2")]
    pub timestamp: u32,
    #[prost(uint32, tag = "3")]
    pub tag: u32,
    #[prost(bool, tag = "4")]
    pub is_reliable: bool,
    #[prost(string, optional, tag = "5")]
    pub to_id: Option<String>,
    #[prost(string, tag = "6")]
    pub from_id: String,
    #[prost(message, repeated, tag = "7")]
    pub payload: Vec<MapEntry>,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, prost::Message)]
pub struct Connected {
    #[prost(string, tag = "1")]
    pub session_id: String,
    /// Server match time at the moment the session was accepted.
    #[prost(uint32, tag = "2")]
    pub mm_time: u32,
    #[prost(message, repeated, tag = "3")]
    pub info: Vec<MapEntry>,
    /// `0` when the server offers no UDP endpoint.
    #[prost(uint32, tag = "4")]
    pub udp_port: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionFailed {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
}

/// The server ended the session. For `NewServerLocation`, `hostname` and
/// `port` name the address to reconnect to.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionClosed {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub hostname: String,
    #[prost(uint32, tag = "3")]
    pub port: u32,
}

/// Measured one-way latency, in milliseconds.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ClockSync {
    #[prost(uint32, tag = "1")]
    pub latency: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomCreated {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub room: Option<RoomInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomClosed {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomJoined {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub room: Option<RoomInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomLeft {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PeerJoinedRoom {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(message, optional, tag = "2")]
    pub participant: Option<ParticipantInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PeerLeftRoom {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(string, tag = "2")]
    pub participant_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MatchStateChanged {
    #[prost(string, tag = "1")]
    pub room_id: String,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
    #[prost(enumeration = "MatchStateCode", tag = "3")]
    pub match_state: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RoomPropertyUpdated {
    #[prost(string, tag = "1")]
    pub room_id: String,
    /// Participant that requested the change.
    #[prost(string, tag = "2")]
    pub participant_id: String,
    #[prost(enumeration = "StatusCode", tag = "3")]
    pub status: i32,
    #[prost(message, optional, tag = "4")]
    pub property: Option<MapEntry>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ParticipantPropertyUpdated {
    #[prost(string, tag = "1")]
    pub room_id: String,
    /// Participant whose property changed.
    #[prost(string, tag = "2")]
    pub participant_id: String,
    #[prost(enumeration = "StatusCode", tag = "3")]
    pub status: i32,
    #[prost(message, optional, tag = "4")]
    pub property: Option<MapEntry>,
}

/// Delivery report for a reliable [`RoomMessage`] we sent.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Ack {
    #[prost(uint32, tag = "1")]
    pub msg_id: u32,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub status: i32,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_envelope_new_wraps_payload() {
        let env = Envelope::new(3, 1, true, LeaveRoom {
            room_id: "r1".into(),
        });
        assert_eq!(env.msg_id, 3);
        assert_eq!(env.ack_id, 1);
        assert!(env.is_reliable);
        assert_eq!(env.kind(), Some(PayloadKind::LeaveRoom));
    }

    #[test]
    fn test_envelope_without_payload_has_no_kind() {
        assert_eq!(Envelope::default().kind(), None);
    }

    #[test]
    fn test_connection_failed_is_unsequenced() {
        let env = Envelope::connection_failed(StatusCode::ConnectTimeout);
        assert_eq!(env.msg_id, 0);
        match env.payload {
            Some(Payload::ConnectionFailed(f)) => {
                assert_eq!(f.status(), StatusCode::ConnectTimeout);
            }
            other => panic!("expected ConnectionFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_protobuf_round_trip() {
        let env = Envelope::new(
            0,
            4,
            true,
            Connect {
                player_id: "p1".into(),
                game_id: "g1".into(),
                access_token: "tok".into(),
                session_id: Some("s1".into()),
            },
        );
        let bytes = env.encode_to_vec();
        let decoded = Envelope::decode(bytes.as_slice()).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn test_unknown_status_value_reads_as_default() {
        // A newer server may send codes we do not know yet. The generated
        // getter falls back to the first variant instead of failing.
        let failed = ConnectionFailed { status: 4242 };
        assert_eq!(failed.status(), StatusCode::Success);
    }

    #[test]
    fn test_room_info_match_state_getter() {
        let mut info = RoomInfo::default();
        info.set_match_state(MatchStateCode::Running);
        assert_eq!(info.match_state(), MatchStateCode::Running);
    }

    #[test]
    fn test_map_entry_void_has_no_value() {
        let entry = MapEntry {
            name: "gone".into(),
            value: None,
        };
        let decoded =
            MapEntry::decode(entry.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.value, None);
    }

    #[test]
    fn test_decode_garbage_returns_error() {
        // A field header claiming a length-delimited field that runs past
        // the end of the buffer.
        let garbage = [0x0a, 0xff, 0x01];
        assert!(Envelope::decode(&garbage[..]).is_err());
    }
}
