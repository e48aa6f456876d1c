//! A scripted stand-in for the realtime server.
//!
//! Tests drive the server side by hand: accept, read what the client sent,
//! write back exactly the envelopes the scenario needs.

#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use volley_protocol::{
    Connected, Envelope, FrameDecoder, ParticipantInfo, Payload, PayloadKind,
    RoomInfo, TypedMap, encode_frame,
};
use volley_session::{
    EventStream, Session, SessionConfig, SessionEvent, StaticIdentity,
    event_channel,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_config(port: u16) -> SessionConfig {
    SessionConfig {
        reconnect_delay_ms: 50,
        tcp_heartbeat_ms: 50,
        udp_heartbeat_ms: 50,
        connect_timeout_ms: 2_000,
        ..SessionConfig::new("127.0.0.1", port)
    }
}

pub fn identity() -> StaticIdentity {
    StaticIdentity::new("p1", "g1", "tok")
}

// =========================================================================
// Server side
// =========================================================================

pub struct MockServer {
    listener: TcpListener,
    pub port: u16,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn accept(&self) -> ServerConn {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        ServerConn {
            stream,
            buf: BytesMut::new(),
            decoder: FrameDecoder::new(),
            next_id: 0,
            last_from_client: 0,
        }
    }

    /// `true` if a client connects within `wait`.
    pub async fn accepts_within(&self, wait: Duration) -> bool {
        timeout(wait, self.listener.accept()).await.is_ok()
    }
}

/// One accepted client connection.
pub struct ServerConn {
    stream: TcpStream,
    buf: BytesMut,
    decoder: FrameDecoder,
    /// Last reliable id this server handed out.
    pub next_id: u32,
    /// Highest reliable id seen from the client.
    pub last_from_client: u32,
}

impl ServerConn {
    pub async fn recv(&mut self) -> Envelope {
        loop {
            if let Some(env) = self.decoder.decode(&mut self.buf).expect("valid frame") {
                if env.is_reliable && env.msg_id > self.last_from_client {
                    self.last_from_client = env.msg_id;
                }
                return env;
            }
            let n = timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("server read timed out")
                .expect("server read failed");
            assert!(n > 0, "client closed the stream");
        }
    }

    /// Reads until an envelope of `kind` arrives, discarding others.
    pub async fn recv_kind(&mut self, kind: PayloadKind) -> Envelope {
        loop {
            let env = self.recv().await;
            if env.kind() == Some(kind) {
                return env;
            }
        }
    }

    /// Waits for the client to close the stream. Frames and heartbeats
    /// before the close are discarded.
    pub async fn expect_closed(&mut self) {
        loop {
            let n = timeout(WAIT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("client never closed");
            match n {
                Ok(0) | Err(_) => return,
                Ok(_) => self.buf.clear(),
            }
        }
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        self.stream.write_all(&encode_frame(envelope)).await.unwrap();
    }

    /// An unsequenced server push.
    pub async fn push(&mut self, payload: impl Into<Payload>) {
        let env = Envelope::new(0, self.last_from_client, true, payload);
        self.send(&env).await;
    }

    /// The next reliable server message, acking everything seen so far.
    pub async fn reply(&mut self, payload: impl Into<Payload>) -> u32 {
        self.next_id += 1;
        let env = Envelope::new(self.next_id, self.last_from_client, true, payload);
        self.send(&env).await;
        self.next_id
    }

    /// Reads the client's `Connect` and answers `Connected`.
    pub async fn handshake(&mut self, session_id: &str, udp_port: u32) -> Envelope {
        let hello = self.recv_kind(PayloadKind::Connect).await;
        let connected = Connected {
            session_id: session_id.into(),
            mm_time: 1_000,
            info: TypedMap::new().with("region", "eu").to_wire(),
            udp_port,
        };
        self.push(connected).await;
        hello
    }
}

pub fn room_snapshot(room_id: &str, players: &[&str]) -> RoomInfo {
    RoomInfo {
        room_id: room_id.into(),
        participants: players
            .iter()
            .map(|id| ParticipantInfo {
                id: (*id).into(),
                properties: vec![],
            })
            .collect(),
        ..RoomInfo::default()
    }
}

// =========================================================================
// Client side
// =========================================================================

pub async fn next_event(events: &mut EventStream) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event arrived")
        .expect("event stream closed")
}

/// Asserts that nothing arrives on `events` for `wait`.
pub async fn assert_quiet(events: &mut EventStream, wait: Duration) {
    if let Ok(Some(event)) = timeout(wait, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// A session connected to `server` with session id `s1`, over TCP only.
pub async fn connected_session(
    server: &MockServer,
    config: SessionConfig,
) -> (Session, ServerConn, EventStream) {
    let session = Session::new(config, identity());
    let (sink, mut events) = event_channel();
    session.connect(sink).await.unwrap();

    let mut conn = server.accept().await;
    conn.handshake("s1", 0).await;
    match next_event(&mut events).await {
        SessionEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    (session, conn, events)
}
