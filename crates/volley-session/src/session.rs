//! The application-facing session handle.
//!
//! [`Session`] is a cheap, cloneable handle to the session actor. Every
//! method sends one command and waits for the actor's reply, so calls from
//! any task are serialized with network events. Results that depend on the
//! server (room created, match started, message acknowledged) arrive later
//! as [`SessionEvent`](crate::SessionEvent)s on the sink passed in.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use volley_protocol::{
    MAX_PROPERTY_SIZE, MAX_RELIABLE_PAYLOAD, MAX_UNRELIABLE_PAYLOAD, TypedMap, Value,
};
use volley_room::{Room, RoomConfig};

use crate::engine::{Command, PropertyTarget, Request, RoomOp, Setting, spawn_engine};
use crate::event::{EventSink, RoomSinks};
use crate::{IdentityProvider, SessionConfig, SessionError};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// Connection lifecycle of a session.
///
/// ```text
/// Disconnected ──(connect)──→ Connecting ──(Connected)──→ Connected
///      ↑                          │                           │
///      └──────(failure, close)────┴───────(failure, close)────┘
/// ```
///
/// A network failure with reconnect enabled passes back through
/// `Disconnected` to `Connecting` on its own after the reconnect delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle to a running session actor.
///
/// Created with [`Session::new`], which must be called inside a Tokio
/// runtime. The actor stops when [`Session::shutdown`] is called or the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct Session {
    sender: mpsc::Sender<Command>,
}

impl Session {
    pub fn new(config: SessionConfig, identity: impl IdentityProvider) -> Self {
        Self {
            sender: spawn_engine(config, Box::new(identity)),
        }
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Command::Request(request(reply_tx)))
            .await
            .map_err(|_| SessionError::Stopped)?;
        reply_rx.await.map_err(|_| SessionError::Stopped)
    }

    async fn configure(&self, setting: Setting) -> Result<(), SessionError> {
        self.sender
            .send(Command::Request(Request::Configure(setting)))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    // -- Connection --

    /// Starts connecting. Connection events (`Connected`, `Reconnecting`,
    /// `ConnectionFailed`, `ConnectionClosed`) go to `sink` from now on.
    pub async fn connect(&self, sink: EventSink) -> Result<(), SessionError> {
        self.call(|reply| Request::Connect { sink, reply }).await
    }

    /// Opens a new connection that resumes the current session, using the
    /// sink from the last [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        self.call(|reply| Request::Reconnect { reply }).await?
    }

    /// Tells the server goodbye and forgets all session state.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.call(|reply| Request::Disconnect { reply }).await
    }

    /// Measures round-trip time. Exactly one of `Pong` or `PingTimeout`
    /// arrives on `sink`.
    pub async fn ping(&self, sink: EventSink, timeout: Duration) -> Result<(), SessionError> {
        self.call(|reply| Request::Ping {
            sink,
            timeout,
            reply,
        })
        .await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, SessionError> {
        self.call(|reply| Request::State { reply }).await
    }

    /// `false` also when the actor has stopped.
    pub async fn is_connected(&self) -> bool {
        matches!(self.connection_state().await, Ok(ConnectionState::Connected))
    }

    /// The info map from the last `Connected`, while connected.
    pub async fn session_info(&self) -> Result<Option<TypedMap>, SessionError> {
        self.call(|reply| Request::SessionInfo { reply }).await
    }

    pub async fn set_reconnect(&self, enabled: bool) -> Result<(), SessionError> {
        self.configure(Setting::Reconnect(enabled)).await
    }

    pub async fn set_reconnect_delay(&self, delay: Duration) -> Result<(), SessionError> {
        self.configure(Setting::ReconnectDelay(delay)).await
    }

    pub async fn set_max_retries(&self, max_retries: u32) -> Result<(), SessionError> {
        self.configure(Setting::MaxRetries(max_retries)).await
    }

    /// Takes effect on the next connection.
    pub async fn set_tcp_heartbeat(&self, interval: Duration) -> Result<(), SessionError> {
        self.configure(Setting::TcpHeartbeat(interval)).await
    }

    /// Takes effect on the next connection.
    pub async fn set_udp_heartbeat(&self, interval: Duration) -> Result<(), SessionError> {
        self.configure(Setting::UdpHeartbeat(interval)).await
    }

    /// Disconnects and stops the actor. Later calls on any handle return
    /// [`SessionError::Stopped`].
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Command::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| SessionError::Stopped)?;
        reply_rx.await.map_err(|_| SessionError::Stopped)
    }

    // -- Rooms --

    /// Asks the server to create a room and join it. The outcome arrives as
    /// `RoomCreated` on `sinks.room`.
    pub async fn create_room(
        &self,
        room_id: impl Into<String>,
        config: &RoomConfig,
        room_properties: TypedMap,
        participant_properties: TypedMap,
        sinks: RoomSinks,
    ) -> Result<(), SessionError> {
        check_size(room_properties.serialized_size(), MAX_PROPERTY_SIZE)?;
        check_size(participant_properties.serialized_size(), MAX_PROPERTY_SIZE)?;
        let room_id = room_id.into();
        let config = config.to_map();
        self.call(|reply| Request::CreateRoom {
            room_id,
            config,
            room_properties,
            participant_properties,
            sinks,
            reply,
        })
        .await
    }

    /// Asks the server to join an existing room. The outcome arrives as
    /// `RoomJoined` on `sinks.room`.
    pub async fn join_room(
        &self,
        room_id: impl Into<String>,
        participant_properties: TypedMap,
        sinks: RoomSinks,
    ) -> Result<(), SessionError> {
        check_size(participant_properties.serialized_size(), MAX_PROPERTY_SIZE)?;
        let room_id = room_id.into();
        self.call(|reply| Request::JoinRoom {
            room_id,
            participant_properties,
            sinks,
            reply,
        })
        .await
    }

    /// Snapshot of the room this session is in.
    pub async fn current_room(&self) -> Result<Option<Room>, SessionError> {
        self.call(|reply| Request::CurrentRoom { reply }).await
    }

    pub async fn leave_room(&self) -> Result<(), SessionError> {
        self.room_op(RoomOp::Leave).await
    }

    pub async fn start_match(&self) -> Result<(), SessionError> {
        self.room_op(RoomOp::StartMatch).await
    }

    pub async fn stop_match(&self) -> Result<(), SessionError> {
        self.room_op(RoomOp::StopMatch).await
    }

    pub async fn reset_match(&self) -> Result<(), SessionError> {
        self.room_op(RoomOp::ResetMatch).await
    }

    async fn room_op(&self, op: RoomOp) -> Result<(), SessionError> {
        self.call(|reply| Request::Room { op, reply }).await?
    }

    /// Sets (or with `None`, removes) a room property. Applied locally
    /// only once the server echoes it back.
    pub async fn set_room_property(
        &self,
        key: impl Into<String>,
        value: Option<Value>,
    ) -> Result<(), SessionError> {
        self.set_property(PropertyTarget::Room, key.into(), value)
            .await
    }

    /// Sets (or with `None`, removes) a property of this participant.
    pub async fn set_participant_property(
        &self,
        key: impl Into<String>,
        value: Option<Value>,
    ) -> Result<(), SessionError> {
        self.set_property(PropertyTarget::Participant, key.into(), value)
            .await
    }

    async fn set_property(
        &self,
        target: PropertyTarget,
        key: String,
        value: Option<Value>,
    ) -> Result<(), SessionError> {
        if key.is_empty() {
            return Err(SessionError::EmptyPropertyKey);
        }
        if let Some(value) = &value {
            let size = TypedMap::new()
                .with(key.as_str(), value.clone())
                .serialized_size();
            check_size(size, MAX_PROPERTY_SIZE)?;
        }
        self.call(|reply| Request::SetProperty {
            target,
            key,
            value,
            reply,
        })
        .await?
    }

    // -- Messages --

    /// Sends a latest-value-wins message to one peer, or the whole room
    /// when `peer` is `None`. Nothing confirms delivery.
    pub async fn send_unreliable_message(
        &self,
        peer: Option<&str>,
        tag: u32,
        payload: TypedMap,
    ) -> Result<(), SessionError> {
        check_size(payload.serialized_size(), MAX_UNRELIABLE_PAYLOAD)?;
        let peer = peer.map(str::to_owned);
        self.call(|reply| Request::SendUnreliable {
            peer,
            tag,
            payload,
            reply,
        })
        .await?
    }

    /// Sends an ordered, acknowledged message. Returns its id; the matching
    /// `MessageSent` arrives on `sink` once the server acks it.
    pub async fn send_reliable_message(
        &self,
        sink: EventSink,
        peer: Option<&str>,
        tag: u32,
        payload: TypedMap,
    ) -> Result<u32, SessionError> {
        check_size(payload.serialized_size(), MAX_RELIABLE_PAYLOAD)?;
        let peer = peer.map(str::to_owned);
        self.call(|reply| Request::SendReliable {
            sink,
            peer,
            tag,
            payload,
            reply,
        })
        .await?
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), SessionError> {
    if size > limit {
        return Err(SessionError::PayloadTooLarge { size, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_size_accepts_exact_limit() {
        assert!(check_size(2048, 2048).is_ok());
        assert!(matches!(
            check_size(2049, 2048),
            Err(SessionError::PayloadTooLarge {
                size: 2049,
                limit: 2048
            })
        ));
    }

    #[test]
    fn test_connection_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
    }
}
