//! Events the session reports to the application.
//!
//! The session never calls application code. It pushes [`SessionEvent`]s
//! onto [`EventSink`]s the application handed in, and the application
//! drains the matching [`EventStream`] on whatever task it likes. One
//! stream can serve every registration, or each room and request can get
//! its own.

use serde::Serialize;
use tokio::sync::mpsc;
use volley_protocol::{Status, TypedMap};
use volley_room::{MatchState, Message, Participant, Room};

/// Sending half of an event stream. Sends never block; events for a
/// dropped stream are discarded.
pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half of an event stream.
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Where events about one room go.
#[derive(Debug, Clone)]
pub struct RoomSinks {
    /// Room lifecycle, peers, match state and property changes.
    pub room: EventSink,
    /// [`SessionEvent::MessageReceived`] for the room.
    pub messages: EventSink,
}

impl RoomSinks {
    pub fn new(room: EventSink, messages: EventSink) -> Self {
        Self { room, messages }
    }

    /// Routes room events and messages to the same sink.
    pub fn single(sink: EventSink) -> Self {
        Self {
            room: sink.clone(),
            messages: sink,
        }
    }
}

/// Everything the session reports.
///
/// Room-carrying variants hold a snapshot of the current room taken when
/// the event was emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    // -- Connection (sink given to `connect`) --
    Connected {
        info: TypedMap,
    },
    /// A network failure or redirect; a new attempt is under way.
    Reconnecting {
        status: Status,
    },
    ConnectionFailed {
        status: Status,
    },
    ConnectionClosed {
        status: Status,
    },

    // -- Ping (sink given to `ping`) --
    Pong {
        ping_id: u32,
        latency: u32,
    },
    /// No pong arrived in time, or the ping could not be sent.
    PingTimeout,

    // -- Room (room sink given to `create_room`/`join_room`) --
    RoomCreated {
        status: Status,
        room: Option<Room>,
    },
    RoomJoined {
        status: Status,
        room: Option<Room>,
    },
    RoomClosed {
        status: Status,
        room_id: String,
    },
    RoomLeft {
        status: Status,
        room_id: String,
    },
    PeerJoined {
        room: Room,
        participant: Participant,
    },
    PeerLeft {
        room: Room,
        participant_id: String,
    },
    /// `state` is [`MatchState::Unknown`] when `status` is not `Success`.
    MatchStateChanged {
        status: Status,
        room: Room,
        state: MatchState,
    },
    RoomPropertyChanged {
        status: Status,
        room: Room,
        participant_id: String,
        key: String,
    },
    ParticipantPropertyChanged {
        status: Status,
        room: Room,
        participant_id: String,
        key: String,
    },

    // -- Messages --
    /// Delivered to the room's message sink.
    MessageReceived(Message),
    /// Delivered to the sink given to `send_reliable_message`.
    MessageSent {
        status: Status,
        msg_id: u32,
    },
}

/// Pushes an event if there is somewhere to push it.
pub(crate) fn emit(sink: Option<&EventSink>, event: SessionEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sink_receives_both_kinds() {
        let (tx, mut rx) = event_channel();
        let sinks = RoomSinks::single(tx);
        emit(Some(&sinks.room), SessionEvent::PingTimeout);
        emit(
            Some(&sinks.messages),
            SessionEvent::MessageSent {
                status: Status::Success,
                msg_id: 1,
            },
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::PingTimeout);
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::MessageSent { msg_id: 1, .. }
        ));
    }

    #[test]
    fn test_emit_to_dropped_stream_is_silent() {
        let (tx, rx) = event_channel();
        drop(rx);
        emit(Some(&tx), SessionEvent::PingTimeout);
        emit(None, SessionEvent::PingTimeout);
    }

    #[test]
    fn test_event_serializes_to_json() {
        let event = SessionEvent::Reconnecting {
            status: Status::NetworkError,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"Reconnecting":{"status":"NetworkError"}}"#);
    }
}
