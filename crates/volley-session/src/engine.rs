//! The session actor: one task that owns every piece of session state.
//!
//! Application calls, envelopes from both channels and timer expiries all
//! arrive as [`Command`]s on one queue and are handled strictly in order,
//! so nothing in here needs a lock. Channels and timers hold only a weak
//! reference to the queue; once every [`Session`](crate::Session) handle is
//! dropped the actor disconnects and exits.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use volley_protocol::{
    Ack, Connect, Connected, ConnectionClosed, CreateRoom, Disconnect,
    Envelope, JoinRoom, LeaveRoom, MapEntry, MatchStateChanged,
    MatchStateCode, ParticipantPropertyUpdated, Payload, PeerJoinedRoom,
    PeerLeftRoom, Ping, Pong, ResetMatch, RoomClosed, RoomInfo, RoomLeft,
    RoomMessage, RoomPropertyUpdated, SetParticipantProperty,
    SetRoomProperty, StartMatch, Status, StatusCode, StopMatch, TypedMap,
    Value,
};
use volley_room::{MatchState, Message, Participant, Room};
use volley_transport::{
    ConnectionId, Inbound, InboundSink, ReliableChannel, UnreliableChannel,
};

use crate::event::{EventSink, RoomSinks, SessionEvent, emit};
use crate::{
    ConnectionState, IdentityProvider, MatchClock, ReceiveWindow, SendWindow,
    SessionConfig, SessionError, Staleness, StreamKey,
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    Request(Request),
    Inbound(Inbound),
    Timer(Timer),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Application calls. Each carries a `oneshot` for its result.
pub(crate) enum Request {
    Connect {
        sink: EventSink,
        reply: oneshot::Sender<()>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Ping {
        sink: EventSink,
        timeout: Duration,
        reply: oneshot::Sender<()>,
    },
    CreateRoom {
        room_id: String,
        config: TypedMap,
        room_properties: TypedMap,
        participant_properties: TypedMap,
        sinks: RoomSinks,
        reply: oneshot::Sender<()>,
    },
    JoinRoom {
        room_id: String,
        participant_properties: TypedMap,
        sinks: RoomSinks,
        reply: oneshot::Sender<()>,
    },
    Room {
        op: RoomOp,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetProperty {
        target: PropertyTarget,
        key: String,
        value: Option<Value>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendUnreliable {
        peer: Option<String>,
        tag: u32,
        payload: TypedMap,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendReliable {
        sink: EventSink,
        peer: Option<String>,
        tag: u32,
        payload: TypedMap,
        reply: oneshot::Sender<Result<u32, SessionError>>,
    },
    CurrentRoom {
        reply: oneshot::Sender<Option<Room>>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    SessionInfo {
        reply: oneshot::Sender<Option<TypedMap>>,
    },
    Configure(Setting),
}

/// Reliable room operations that carry nothing but the room id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoomOp {
    Leave,
    StartMatch,
    StopMatch,
    ResetMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropertyTarget {
    Room,
    Participant,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Setting {
    Reconnect(bool),
    ReconnectDelay(Duration),
    MaxRetries(u32),
    TcpHeartbeat(Duration),
    UdpHeartbeat(Duration),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Timer {
    /// Valid only while `generation` matches the engine's.
    Reconnect { generation: u64 },
    /// A no-op once the pong has removed the ping.
    PingTimeout { ping_id: u32 },
}

/// Inbound sink handed to the channels.
#[derive(Clone)]
struct QueueSink(mpsc::WeakSender<Command>);

impl InboundSink for QueueSink {
    async fn deliver(&self, inbound: Inbound) -> bool {
        match self.0.upgrade() {
            Some(queue) => queue.send(Command::Inbound(inbound)).await.is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct SessionEngine {
    config: SessionConfig,
    identity: Box<dyn IdentityProvider>,
    receiver: mpsc::Receiver<Command>,
    queue: mpsc::WeakSender<Command>,

    // -- Connection --
    state: ConnectionState,
    reliable: Option<ReliableChannel>,
    unreliable: Option<UnreliableChannel>,
    connection_sink: Option<EventSink>,
    retries: u32,
    /// Bumped on every reset; reconnect timers from an older generation
    /// are ignored.
    generation: u64,
    session_id: Option<String>,
    session_info: Option<TypedMap>,

    // -- Sequencing --
    clock: MatchClock,
    send_window: SendWindow,
    receive_window: ReceiveWindow,
    staleness: Staleness,

    // -- Room and listeners --
    current_room: Option<Room>,
    /// Room of the create/join request awaiting its response.
    pending_room: Option<String>,
    pings: HashMap<u32, EventSink>,
    room_sinks: HashMap<String, EventSink>,
    message_sinks: HashMap<String, EventSink>,
    sent_sinks: HashMap<u32, EventSink>,
}

impl SessionEngine {
    async fn run(mut self) {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            "session actor started"
        );

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                Command::Request(request) => self.handle_request(request).await,
                Command::Inbound(inbound) => self.handle_inbound(inbound).await,
                Command::Timer(timer) => self.handle_timer(timer).await,
                Command::Shutdown { reply } => {
                    self.disconnect().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        self.disconnect().await;
        tracing::info!("session actor stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { sink, reply } => {
                self.connection_sink = Some(sink);
                self.open_connection().await;
                let _ = reply.send(());
            }
            Request::Reconnect { reply } => {
                let result = if self.connection_sink.is_some() {
                    self.open_connection().await;
                    Ok(())
                } else {
                    Err(SessionError::NoConnectionSink)
                };
                let _ = reply.send(result);
            }
            Request::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Request::Ping {
                sink,
                timeout,
                reply,
            } => {
                self.ping(sink, timeout).await;
                let _ = reply.send(());
            }
            Request::CreateRoom {
                room_id,
                config,
                room_properties,
                participant_properties,
                sinks,
                reply,
            } => {
                let msg = CreateRoom {
                    room_id,
                    room_config: config.to_wire(),
                    room_properties: room_properties.to_wire(),
                    participant_properties: participant_properties.to_wire(),
                };
                self.enter_room(msg.room_id.clone(), msg.into(), sinks, false)
                    .await;
                let _ = reply.send(());
            }
            Request::JoinRoom {
                room_id,
                participant_properties,
                sinks,
                reply,
            } => {
                let msg = JoinRoom {
                    room_id,
                    participant_properties: participant_properties.to_wire(),
                };
                self.enter_room(msg.room_id.clone(), msg.into(), sinks, true)
                    .await;
                let _ = reply.send(());
            }
            Request::Room { op, reply } => {
                let result = self.room_op(op).await;
                let _ = reply.send(result);
            }
            Request::SetProperty {
                target,
                key,
                value,
                reply,
            } => {
                let result = self.set_property(target, key, value).await;
                let _ = reply.send(result);
            }
            Request::SendUnreliable {
                peer,
                tag,
                payload,
                reply,
            } => {
                let result = self.send_unreliable_message(peer, tag, payload).await;
                let _ = reply.send(result);
            }
            Request::SendReliable {
                sink,
                peer,
                tag,
                payload,
                reply,
            } => {
                let result =
                    self.send_reliable_message(sink, peer, tag, payload).await;
                let _ = reply.send(result);
            }
            Request::CurrentRoom { reply } => {
                let _ = reply.send(self.current_room.clone());
            }
            Request::State { reply } => {
                let _ = reply.send(self.state);
            }
            Request::SessionInfo { reply } => {
                let _ = reply.send(self.session_info.clone());
            }
            Request::Configure(setting) => self.configure(setting),
        }
    }

    fn configure(&mut self, setting: Setting) {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        match setting {
            Setting::Reconnect(enabled) => self.config.reconnect = enabled,
            Setting::ReconnectDelay(d) => self.config.reconnect_delay_ms = millis(d),
            Setting::MaxRetries(n) => self.config.max_retries = n,
            Setting::TcpHeartbeat(d) => self.config.tcp_heartbeat_ms = millis(d),
            Setting::UdpHeartbeat(d) => self.config.udp_heartbeat_ms = millis(d),
        }
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn schedule(&self, delay: Duration, timer: Timer) {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Command::Timer(timer)).await;
            }
        });
    }

    async fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Reconnect { generation } => {
                if generation != self.generation || self.reliable.is_some() {
                    tracing::debug!(generation, "ignoring stale reconnect timer");
                    return;
                }
                self.retries += 1;
                tracing::info!(retries = self.retries, "reconnecting");
                self.open_connection().await;
            }
            Timer::PingTimeout { ping_id } => {
                if let Some(sink) = self.pings.remove(&ping_id) {
                    tracing::debug!(ping_id, "ping timed out");
                    emit(Some(&sink), SessionEvent::PingTimeout);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    async fn open_connection(&mut self) {
        if self.retries >= self.config.max_retries {
            tracing::warn!(retries = self.retries, "retry budget exhausted");
            self.retries = 0;
            self.emit_connection(SessionEvent::ConnectionFailed {
                status: Status::NetworkError,
            });
            return;
        }

        self.close_unreliable();
        if let Some(previous) = self.reliable.take() {
            previous.close(None).await;
        }

        let connect = Connect {
            player_id: self.identity.player_id(),
            game_id: self.identity.game_id(),
            access_token: self.identity.access_token(),
            session_id: self.session_id.clone(),
        };
        let last_received = self.receive_window.last_received();
        let initial = Envelope::new(0, last_received, true, connect);
        let channel = ReliableChannel::open(
            &self.config.host,
            self.config.port,
            initial,
            self.config.tcp_options(),
            QueueSink(self.queue.clone()),
        );
        tracing::info!(
            conn_id = %channel.id(),
            host = %self.config.host,
            port = self.config.port,
            last_received,
            resuming = self.session_id.is_some(),
            "opening connection"
        );
        self.reliable = Some(channel);
        self.state = ConnectionState::Connecting;
    }

    async fn open_unreliable(&mut self, port: u32) {
        let Ok(port) = u16::try_from(port) else {
            tracing::warn!(port, "server announced an invalid UDP port");
            return;
        };
        match UnreliableChannel::open(
            &self.config.host,
            port,
            self.config.udp_options(),
            QueueSink(self.queue.clone()),
        )
        .await
        {
            Ok(channel) => self.unreliable = Some(channel),
            Err(e) => {
                tracing::warn!(error = %e, "UDP unavailable, continuing over TCP only");
            }
        }
    }

    fn close_unreliable(&mut self) {
        if let Some(channel) = self.unreliable.take() {
            channel.close();
        }
    }

    /// Forgets the live connection but keeps sequencing and room state so a
    /// later connect can resume.
    fn drop_connection(&mut self) {
        self.close_unreliable();
        self.reliable = None;
        self.state = ConnectionState::Disconnected;
        self.session_info = None;
        self.fail_pings();
    }

    /// Answers every outstanding ping with `PingTimeout`.
    fn fail_pings(&mut self) {
        for (ping_id, sink) in self.pings.drain() {
            tracing::debug!(ping_id, "ping abandoned with its connection");
            emit(Some(&sink), SessionEvent::PingTimeout);
        }
    }

    /// Back to a freshly constructed session. The connection sink and the
    /// configuration survive.
    fn reset(&mut self) {
        self.drop_connection();
        self.generation += 1;
        self.retries = 0;
        self.session_id = None;
        self.send_window.clear();
        self.receive_window.clear();
        self.staleness.clear();
        self.current_room = None;
        self.pending_room = None;
        self.room_sinks.clear();
        self.message_sinks.clear();
        self.sent_sinks.clear();
    }

    async fn disconnect(&mut self) {
        self.close_unreliable();
        if let Some(channel) = self.reliable.take() {
            let goodbye = self
                .is_connected()
                .then(|| Envelope::new(0, 0, true, Disconnect {}));
            channel.close(goodbye.as_ref()).await;
            tracing::info!("disconnected");
        }
        self.reset();
    }

    fn emit_connection(&self, event: SessionEvent) {
        emit(self.connection_sink.as_ref(), event);
    }

    /// Reconnect-or-fail after a transport-level failure.
    fn on_network_failure(&mut self) {
        if self.config.reconnect {
            self.emit_connection(SessionEvent::Reconnecting {
                status: Status::NetworkError,
            });
            tracing::info!(
                delay_ms = self.config.reconnect_delay_ms,
                retries = self.retries,
                "reconnect scheduled"
            );
            self.schedule(
                self.config.reconnect_delay(),
                Timer::Reconnect {
                    generation: self.generation,
                },
            );
        } else {
            self.retries = 0;
            self.emit_connection(SessionEvent::ConnectionFailed {
                status: Status::NetworkError,
            });
        }
    }

    async fn on_connected(&mut self, msg: Connected) {
        let info = TypedMap::from_wire(&msg.info);
        self.state = ConnectionState::Connected;
        self.retries = 0;
        self.session_info = Some(info.clone());
        self.clock.anchor(msg.mm_time);
        tracing::info!(
            session_id = %msg.session_id,
            mm_time = msg.mm_time,
            udp_port = msg.udp_port,
            "connected"
        );
        self.session_id = Some(msg.session_id);
        self.emit_connection(SessionEvent::Connected { info });

        if msg.udp_port != 0 {
            self.open_unreliable(msg.udp_port).await;
        }

        let Some(channel) = &self.reliable else {
            return;
        };
        for envelope in self.send_window.replay(self.receive_window.last_received()) {
            tracing::debug!(
                msg_id = envelope.msg_id,
                ack_id = envelope.ack_id,
                "replaying unacknowledged message"
            );
            channel.send(&envelope).await;
        }
    }

    fn on_connection_failed(&mut self, status: StatusCode) {
        tracing::warn!(?status, retries = self.retries, "connection failed");
        self.drop_connection();
        match status {
            StatusCode::NetworkError | StatusCode::ConnectTimeout => {
                self.on_network_failure();
            }
            other => {
                self.retries = 0;
                self.emit_connection(SessionEvent::ConnectionFailed {
                    status: other.into(),
                });
            }
        }
    }

    async fn on_connection_closed(&mut self, msg: ConnectionClosed) {
        let status = msg.status();
        tracing::info!(?status, "server closed the connection");
        self.close_unreliable();

        match status {
            StatusCode::SessionClosed => {
                self.reset();
                self.emit_connection(SessionEvent::ConnectionClosed {
                    status: Status::SessionClosed,
                });
            }
            StatusCode::UnresponsiveClient => {
                self.drop_connection();
                self.on_network_failure();
            }
            StatusCode::NewServerLocation => {
                let Ok(port) = u16::try_from(msg.port) else {
                    tracing::warn!(port = msg.port, "redirect to an invalid port");
                    self.drop_connection();
                    self.emit_connection(SessionEvent::ConnectionFailed {
                        status: Status::ProtocolError,
                    });
                    return;
                };
                tracing::info!(host = %msg.hostname, port, "following server redirect");
                self.config.host = msg.hostname;
                self.config.port = port;
                self.fail_pings();
                if self.is_connected() {
                    self.emit_connection(SessionEvent::Reconnecting {
                        status: Status::NewServerLocation,
                    });
                }
                self.open_connection().await;
            }
            other => {
                self.drop_connection();
                self.retries = 0;
                self.emit_connection(SessionEvent::ConnectionClosed {
                    status: other.into(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn is_current(&self, id: ConnectionId) -> bool {
        self.reliable.as_ref().is_some_and(|c| c.id() == id)
            || self.unreliable.as_ref().is_some_and(|c| c.id() == id)
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        if !self.is_current(inbound.from) {
            tracing::debug!(conn_id = %inbound.from, "dropping envelope from a replaced channel");
            return;
        }
        let envelope = inbound.envelope;

        let pruned = self.send_window.ack(envelope.ack_id);
        if pruned > 0 {
            tracing::debug!(ack_id = envelope.ack_id, pruned, "acknowledged");
        }

        if envelope.msg_id == 0 {
            self.dispatch(envelope).await;
        } else if !envelope.is_reliable {
            if let Some(key) = StreamKey::of(&envelope) {
                if !self.staleness.admit(key, envelope.msg_id) {
                    tracing::debug!(msg_id = envelope.msg_id, "dropping stale unreliable message");
                    return;
                }
            }
            self.dispatch(envelope).await;
        } else {
            for ready in self.receive_window.accept(envelope) {
                self.dispatch(ready).await;
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let Some(payload) = envelope.payload else {
            return;
        };
        match payload {
            Payload::Connected(msg) => self.on_connected(msg).await,
            Payload::ConnectionFailed(msg) => self.on_connection_failed(msg.status()),
            Payload::ConnectionClosed(msg) => self.on_connection_closed(msg).await,
            Payload::ClockSync(msg) => {
                self.clock.apply_latency(msg.latency);
                tracing::debug!(
                    latency = msg.latency,
                    match_time = self.clock.now(),
                    "clock synchronized"
                );
            }
            Payload::Ping(msg) => self.on_server_ping(msg).await,
            Payload::Pong(msg) => self.on_pong(msg),
            Payload::RoomCreated(msg) => {
                self.on_room_entered(msg.status(), msg.room, false);
            }
            Payload::RoomJoined(msg) => {
                self.on_room_entered(msg.status(), msg.room, true);
            }
            Payload::RoomClosed(msg) => self.on_room_closed(msg),
            Payload::RoomLeft(msg) => self.on_room_left(msg),
            Payload::PeerJoinedRoom(msg) => self.on_peer_joined(msg),
            Payload::PeerLeftRoom(msg) => self.on_peer_left(msg),
            Payload::MatchStateChanged(msg) => self.on_match_state_changed(msg),
            Payload::RoomPropertyUpdated(msg) => self.on_room_property_updated(msg),
            Payload::ParticipantPropertyUpdated(msg) => {
                self.on_participant_property_updated(msg);
            }
            Payload::RoomMessage(msg) => self.on_room_message(msg),
            Payload::Ack(msg) => self.on_ack(msg),
            other => {
                tracing::warn!(kind = ?other.kind(), "ignoring server-bound payload");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ping and clock
    // -----------------------------------------------------------------------

    /// Sends over UDP when it is live, otherwise over TCP.
    async fn send_unreliable(&self, envelope: &Envelope) -> bool {
        match (&self.unreliable, &self.reliable) {
            (Some(udp), _) if udp.is_connected() => udp.send(envelope).await,
            (_, Some(tcp)) => tcp.send(envelope).await,
            _ => false,
        }
    }

    async fn ping(&mut self, sink: EventSink, timeout: Duration) {
        if !self.is_connected() {
            emit(Some(&sink), SessionEvent::PingTimeout);
            return;
        }
        let timestamp = self.clock.now();
        let mut id = timestamp;
        while self.pings.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        let envelope = Envelope::new(
            id,
            self.receive_window.last_received(),
            false,
            Ping { id, timestamp },
        );
        if !self.send_unreliable(&envelope).await {
            emit(Some(&sink), SessionEvent::PingTimeout);
            return;
        }
        tracing::debug!(ping_id = id, "ping sent");
        self.pings.insert(id, sink);
        self.schedule(timeout, Timer::PingTimeout { ping_id: id });
    }

    async fn on_server_ping(&mut self, ping: Ping) {
        self.clock.anchor(ping.timestamp);
        let pong = Envelope::new(
            self.clock.now(),
            self.receive_window.last_received(),
            false,
            Pong {
                id: ping.id,
                timestamp: ping.timestamp,
            },
        );
        if !self.send_unreliable(&pong).await {
            tracing::debug!(ping_id = ping.id, "could not answer server ping");
        }
    }

    fn on_pong(&mut self, pong: Pong) {
        let Some(sink) = self.pings.remove(&pong.id) else {
            tracing::debug!(ping_id = pong.id, "pong for an expired ping");
            return;
        };
        let latency = self.clock.now().wrapping_sub(pong.timestamp);
        emit(
            Some(&sink),
            SessionEvent::Pong {
                ping_id: pong.id,
                latency,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Outbound reliable operations
    // -----------------------------------------------------------------------

    /// Stamps, sends and records one reliable envelope. `None` if the send
    /// failed; counters are untouched in that case.
    async fn send_reliable(&mut self, payload: Payload) -> Option<u32> {
        let msg_id = self.send_window.next_id();
        let ack_id = self.receive_window.last_received();
        let kind = payload.kind();
        let envelope = Envelope::new(msg_id, ack_id, true, payload);

        let sent = match &self.reliable {
            Some(channel) => channel.send(&envelope).await,
            None => false,
        };
        if !sent {
            tracing::warn!(msg_id, ack_id, ?kind, "failed to send reliable message");
            return None;
        }
        tracing::debug!(msg_id, ack_id, ?kind, "reliable message sent");
        self.send_window.push(envelope);
        Some(msg_id)
    }

    async fn enter_room(
        &mut self,
        room_id: String,
        request: Payload,
        sinks: RoomSinks,
        joining: bool,
    ) {
        if !self.is_connected() {
            emit(
                Some(&sinks.room),
                room_entry_event(joining, Status::SessionNotConnected, None),
            );
            return;
        }
        self.room_sinks.insert(room_id.clone(), sinks.room);
        self.message_sinks.insert(room_id.clone(), sinks.messages);
        self.pending_room = Some(room_id.clone());

        if self.send_reliable(request).await.is_none() {
            self.pending_room = None;
            self.message_sinks.remove(&room_id);
            let sink = self.room_sinks.remove(&room_id);
            emit(
                sink.as_ref(),
                room_entry_event(joining, Status::NetworkError, None),
            );
        }
    }

    async fn room_op(&mut self, op: RoomOp) -> Result<(), SessionError> {
        let room = self
            .current_room
            .clone()
            .ok_or(SessionError::RoomNotJoined)?;
        let room_id = room.id().to_owned();

        let status = if self.is_connected() {
            let id = room_id.clone();
            let payload: Payload = match op {
                RoomOp::Leave => LeaveRoom { room_id: id }.into(),
                RoomOp::StartMatch => StartMatch { room_id: id }.into(),
                RoomOp::StopMatch => StopMatch { room_id: id }.into(),
                RoomOp::ResetMatch => ResetMatch { room_id: id }.into(),
            };
            if self.send_reliable(payload).await.is_some() {
                return Ok(());
            }
            Status::NetworkError
        } else {
            Status::SessionNotConnected
        };

        let event = match op {
            RoomOp::Leave => SessionEvent::RoomLeft {
                status,
                room_id: room_id.clone(),
            },
            _ => SessionEvent::MatchStateChanged {
                status,
                room,
                state: MatchState::Unknown,
            },
        };
        emit(self.room_sinks.get(&room_id), event);
        Ok(())
    }

    async fn set_property(
        &mut self,
        target: PropertyTarget,
        key: String,
        value: Option<Value>,
    ) -> Result<(), SessionError> {
        let room = self
            .current_room
            .clone()
            .ok_or(SessionError::RoomNotJoined)?;
        let room_id = room.id().to_owned();

        let status = if self.is_connected() {
            let entry = match &value {
                Some(value) => value.to_entry(&key),
                None => MapEntry {
                    name: key.clone(),
                    value: None,
                },
            };
            let payload: Payload = match target {
                PropertyTarget::Room => SetRoomProperty {
                    room_id: room_id.clone(),
                    property: Some(entry),
                }
                .into(),
                PropertyTarget::Participant => SetParticipantProperty {
                    room_id: room_id.clone(),
                    property: Some(entry),
                }
                .into(),
            };
            if self.send_reliable(payload).await.is_some() {
                return Ok(());
            }
            Status::NetworkError
        } else {
            Status::SessionNotConnected
        };

        let participant_id = self.identity.player_id();
        let event = match target {
            PropertyTarget::Room => SessionEvent::RoomPropertyChanged {
                status,
                room,
                participant_id,
                key,
            },
            PropertyTarget::Participant => {
                SessionEvent::ParticipantPropertyChanged {
                    status,
                    room,
                    participant_id,
                    key,
                }
            }
        };
        emit(self.room_sinks.get(&room_id), event);
        Ok(())
    }

    async fn send_unreliable_message(
        &mut self,
        peer: Option<String>,
        tag: u32,
        payload: TypedMap,
    ) -> Result<(), SessionError> {
        let room = self
            .current_room
            .as_ref()
            .ok_or(SessionError::RoomNotJoined)?;
        if !self.is_connected() {
            return Err(SessionError::Failed(Status::SessionNotConnected));
        }

        let msg_id = self.clock.now();
        let msg = RoomMessage {
            room_id: room.id().to_owned(),
            timestamp: msg_id,
            tag,
            is_reliable: false,
            to_id: peer,
            from_id: String::new(),
            payload: payload.to_wire(),
        };
        let envelope =
            Envelope::new(msg_id, self.receive_window.last_received(), false, msg);
        if !self.send_unreliable(&envelope).await {
            return Err(SessionError::Failed(Status::NetworkError));
        }
        tracing::debug!(msg_id, tag, "unreliable room message sent");
        Ok(())
    }

    async fn send_reliable_message(
        &mut self,
        sink: EventSink,
        peer: Option<String>,
        tag: u32,
        payload: TypedMap,
    ) -> Result<u32, SessionError> {
        let room = self
            .current_room
            .as_ref()
            .ok_or(SessionError::RoomNotJoined)?;
        if !self.is_connected() {
            return Err(SessionError::Failed(Status::SessionNotConnected));
        }

        let msg = RoomMessage {
            room_id: room.id().to_owned(),
            timestamp: self.clock.now(),
            tag,
            is_reliable: true,
            to_id: peer,
            from_id: String::new(),
            payload: payload.to_wire(),
        };
        let msg_id = self
            .send_reliable(msg.into())
            .await
            .ok_or(SessionError::Failed(Status::NetworkError))?;
        self.sent_sinks.insert(msg_id, sink);
        Ok(msg_id)
    }

    // -----------------------------------------------------------------------
    // Inbound room events
    // -----------------------------------------------------------------------

    fn is_current_room(&self, room_id: &str) -> bool {
        self.current_room
            .as_ref()
            .is_some_and(|room| room.is_same_room(room_id))
    }

    fn current_room_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.current_room
            .as_mut()
            .filter(|room| room.is_same_room(room_id))
    }

    fn on_room_entered(
        &mut self,
        status: StatusCode,
        snapshot: Option<RoomInfo>,
        joined: bool,
    ) {
        // Failure responses may carry no snapshot; fall back to the room
        // whose request is still pending.
        let pending = self.pending_room.take();
        let room_id = snapshot
            .as_ref()
            .map(|info| info.room_id.clone())
            .filter(|id| !id.is_empty())
            .or(pending)
            .unwrap_or_default();

        let status = if status == StatusCode::Success {
            match snapshot.as_ref().map(Room::from_snapshot) {
                Some(Ok(room)) => {
                    tracing::info!(
                        room_id = %room_id,
                        joined,
                        participants = room.participants().len(),
                        state = %room.match_state(),
                        "entered room"
                    );
                    if let Some(previous) = self.current_room.replace(room.clone()) {
                        if !previous.is_same_room(&room_id) {
                            self.room_sinks.remove(previous.id());
                            self.message_sinks.remove(previous.id());
                        }
                    }
                    emit(
                        self.room_sinks.get(&room_id),
                        room_entry_event(joined, Status::Success, Some(room)),
                    );
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "rejecting room snapshot");
                    Status::InvalidData
                }
                None => {
                    tracing::warn!("success response without a room snapshot");
                    Status::InvalidData
                }
            }
        } else {
            status.into()
        };

        self.message_sinks.remove(&room_id);
        let sink = self.room_sinks.remove(&room_id);
        emit(sink.as_ref(), room_entry_event(joined, status, None));
    }

    fn on_room_closed(&mut self, msg: RoomClosed) {
        if !self.is_current_room(&msg.room_id) {
            return;
        }
        let status = Status::from(msg.status());
        tracing::info!(room_id = %msg.room_id, %status, "room closed");
        self.current_room = None;
        self.message_sinks.remove(&msg.room_id);
        let sink = self.room_sinks.remove(&msg.room_id);
        emit(
            sink.as_ref(),
            SessionEvent::RoomClosed {
                status,
                room_id: msg.room_id,
            },
        );
    }

    fn on_room_left(&mut self, msg: RoomLeft) {
        if !self.is_current_room(&msg.room_id) {
            return;
        }
        // Leaving a room the server already dropped us from still counts.
        let status = match msg.status() {
            StatusCode::Success | StatusCode::RoomNotJoined => Status::Success,
            other => other.into(),
        };
        tracing::info!(room_id = %msg.room_id, %status, "left room");
        self.current_room = None;
        self.message_sinks.remove(&msg.room_id);
        let sink = self.room_sinks.remove(&msg.room_id);
        emit(
            sink.as_ref(),
            SessionEvent::RoomLeft {
                status,
                room_id: msg.room_id,
            },
        );
    }

    fn on_peer_joined(&mut self, msg: PeerJoinedRoom) {
        let Some(info) = msg.participant else {
            return;
        };
        let Some(room) = self.current_room_mut(&msg.room_id) else {
            return;
        };
        let participant = Participant::from_info(&msg.room_id, &info);
        room.add_participant(participant.clone());
        let room = room.clone();
        tracing::debug!(room_id = %msg.room_id, participant_id = %participant.id, "peer joined");
        emit(
            self.room_sinks.get(&msg.room_id),
            SessionEvent::PeerJoined { room, participant },
        );
    }

    fn on_peer_left(&mut self, msg: PeerLeftRoom) {
        let Some(room) = self.current_room_mut(&msg.room_id) else {
            return;
        };
        room.remove_participant(&msg.participant_id);
        let room = room.clone();
        tracing::debug!(room_id = %msg.room_id, participant_id = %msg.participant_id, "peer left");
        emit(
            self.room_sinks.get(&msg.room_id),
            SessionEvent::PeerLeft {
                room,
                participant_id: msg.participant_id,
            },
        );
    }

    fn on_match_state_changed(&mut self, msg: MatchStateChanged) {
        let status = msg.status();
        let Some(room) = self.current_room_mut(&msg.room_id) else {
            return;
        };
        let (status, state) = if status == StatusCode::Success {
            // An unrecognized state leaves the room where it is.
            let state = MatchStateCode::try_from(msg.match_state)
                .map(MatchState::from)
                .unwrap_or(room.match_state());
            room.set_match_state(state);
            (Status::Success, state)
        } else {
            (Status::from(status), MatchState::Unknown)
        };
        let room = room.clone();
        tracing::info!(room_id = %msg.room_id, %status, %state, "match state changed");
        emit(
            self.room_sinks.get(&msg.room_id),
            SessionEvent::MatchStateChanged {
                status,
                room,
                state,
            },
        );
    }

    fn on_room_property_updated(&mut self, msg: RoomPropertyUpdated) {
        let status = msg.status();
        let Some(entry) = msg.property else {
            tracing::warn!(room_id = %msg.room_id, "property update without a property");
            return;
        };
        let local_player = self.identity.player_id();
        let Some(room) = self.current_room_mut(&msg.room_id) else {
            return;
        };
        let (status, participant_id) = if status == StatusCode::Success {
            room.apply_property(&entry);
            (Status::Success, msg.participant_id)
        } else {
            (Status::from(status), local_player)
        };
        let room = room.clone();
        emit(
            self.room_sinks.get(&msg.room_id),
            SessionEvent::RoomPropertyChanged {
                status,
                room,
                participant_id,
                key: entry.name,
            },
        );
    }

    fn on_participant_property_updated(&mut self, msg: ParticipantPropertyUpdated) {
        let status = msg.status();
        let Some(entry) = msg.property else {
            tracing::warn!(room_id = %msg.room_id, "property update without a property");
            return;
        };
        let local_player = self.identity.player_id();
        let Some(room) = self.current_room_mut(&msg.room_id) else {
            return;
        };
        let (status, participant_id) = if status == StatusCode::Success {
            if !room.apply_participant_property(&msg.participant_id, &entry) {
                tracing::debug!(
                    participant_id = %msg.participant_id,
                    "property update for an unknown participant"
                );
            }
            (Status::Success, msg.participant_id)
        } else {
            (Status::from(status), local_player)
        };
        let room = room.clone();
        emit(
            self.room_sinks.get(&msg.room_id),
            SessionEvent::ParticipantPropertyChanged {
                status,
                room,
                participant_id,
                key: entry.name,
            },
        );
    }

    fn on_room_message(&mut self, msg: RoomMessage) {
        if !self.is_current_room(&msg.room_id) {
            return;
        }
        emit(
            self.message_sinks.get(&msg.room_id),
            SessionEvent::MessageReceived(Message::from_wire(&msg)),
        );
    }

    fn on_ack(&mut self, ack: Ack) {
        let status = match ack.status() {
            StatusCode::InternalError => Status::InternalError,
            StatusCode::RoomNotJoined => Status::RoomNotJoined,
            StatusCode::PeerNotFound => Status::PeerNotFound,
            StatusCode::InvalidMessage => Status::InvalidMessage,
            _ => Status::Success,
        };
        let sink = self.sent_sinks.remove(&ack.msg_id);
        emit(
            sink.as_ref(),
            SessionEvent::MessageSent {
                status,
                msg_id: ack.msg_id,
            },
        );
    }
}

fn room_entry_event(joined: bool, status: Status, room: Option<Room>) -> SessionEvent {
    if joined {
        SessionEvent::RoomJoined { status, room }
    } else {
        SessionEvent::RoomCreated { status, room }
    }
}

/// Spawns the session actor and returns its queue.
pub(crate) fn spawn_engine(
    config: SessionConfig,
    identity: Box<dyn IdentityProvider>,
) -> mpsc::Sender<Command> {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));

    let engine = SessionEngine {
        config,
        identity,
        receiver: rx,
        queue: tx.downgrade(),
        state: ConnectionState::Disconnected,
        reliable: None,
        unreliable: None,
        connection_sink: None,
        retries: 0,
        generation: 0,
        session_id: None,
        session_info: None,
        clock: MatchClock::new(),
        send_window: SendWindow::new(),
        receive_window: ReceiveWindow::new(),
        staleness: Staleness::new(),
        current_room: None,
        pending_room: None,
        pings: HashMap::new(),
        room_sinks: HashMap::new(),
        message_sinks: HashMap::new(),
        sent_sinks: HashMap::new(),
    };

    tokio::spawn(engine.run());
    tx
}
