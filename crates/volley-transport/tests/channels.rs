//! Integration tests for the transport channels.
//!
//! Each test plays the server side by hand on a localhost socket bound to
//! port 0, so tests never collide on ports and can run in parallel.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use volley_protocol::{
    Connect, Connected, ConnectionClosed, Datagram, Disconnect, Envelope,
    FrameDecoder, Payload, Ping, StatusCode, decode_datagram, encode_datagram,
    encode_frame, encode_heartbeat,
};
use volley_transport::{
    ChannelOptions, Inbound, ReliableChannel, UnreliableChannel,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_options() -> ChannelOptions {
    ChannelOptions {
        heartbeat_interval: Duration::from_millis(50),
        peer_timeout: Duration::from_secs(15),
        connect_timeout: Duration::from_secs(2),
    }
}

fn connect_envelope() -> Envelope {
    Envelope::new(
        0,
        0,
        true,
        Connect {
            player_id: "p1".into(),
            game_id: "g1".into(),
            access_token: "tok".into(),
            session_id: None,
        },
    )
}

async fn read_envelope(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
) -> Envelope {
    let mut decoder = FrameDecoder::new();
    loop {
        if let Some(env) = decoder.decode(buf).expect("valid frame") {
            return env;
        }
        let n = timeout(WAIT, stream.read_buf(buf))
            .await
            .expect("server read timed out")
            .expect("server read failed");
        assert!(n > 0, "client closed the stream");
    }
}

async fn next_inbound(rx: &mut mpsc::Receiver<Inbound>) -> Inbound {
    timeout(WAIT, rx.recv())
        .await
        .expect("no inbound envelope")
        .expect("sink closed")
}

fn failure_status(env: &Envelope) -> StatusCode {
    match &env.payload {
        Some(Payload::ConnectionFailed(f)) => f.status(),
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
}

// =========================================================================
// ReliableChannel
// =========================================================================

#[tokio::test]
async fn test_reliable_sends_initial_envelope_and_delivers_replies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );

    let (mut server, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let first = read_envelope(&mut server, &mut buf).await;
    assert_eq!(first, connect_envelope());

    let connected = Envelope::new(
        0,
        0,
        true,
        Connected {
            session_id: "s1".into(),
            mm_time: 1000,
            ..Connected::default()
        },
    );
    server.write_all(&encode_frame(&connected)).await.unwrap();

    let inbound = next_inbound(&mut rx).await;
    assert_eq!(inbound.from, channel.id());
    assert_eq!(inbound.envelope, connected);
}

#[tokio::test]
async fn test_reliable_send_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, _rx) = mpsc::channel(16);

    let channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (mut server, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    read_envelope(&mut server, &mut buf).await;

    let ping = Envelope::new(5, 0, false, Ping { id: 5, timestamp: 5 });
    assert!(channel.send(&ping).await);
    assert_eq!(read_envelope(&mut server, &mut buf).await, ping);
}

#[tokio::test]
async fn test_reliable_sends_heartbeat_byte_when_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, _rx) = mpsc::channel(16);

    let _channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (mut server, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    read_envelope(&mut server, &mut buf).await;

    // The Connect frame is consumed; the next bytes are heartbeats.
    let mut byte = [0xffu8; 1];
    if buf.is_empty() {
        timeout(WAIT, server.read_exact(&mut byte))
            .await
            .expect("no heartbeat")
            .unwrap();
    } else {
        byte[0] = buf[0];
    }
    assert_eq!(byte[0], 0);
}

#[tokio::test]
async fn test_reliable_peer_close_synthesizes_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (server, _) = listener.accept().await.unwrap();
    drop(server);

    let inbound = next_inbound(&mut rx).await;
    assert_eq!(inbound.from, channel.id());
    assert_eq!(inbound.envelope.msg_id, 0);
    assert_eq!(failure_status(&inbound.envelope), StatusCode::NetworkError);
}

#[tokio::test]
async fn test_reliable_refused_connection_synthesizes_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let (tx, mut rx) = mpsc::channel(16);

    let _channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );

    let inbound = next_inbound(&mut rx).await;
    assert_eq!(failure_status(&inbound.envelope), StatusCode::NetworkError);
}

#[tokio::test]
async fn test_reliable_garbage_synthesizes_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let _channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (mut server, _) = listener.accept().await.unwrap();
    // Length 2, then an invalid wire type.
    server.write_all(&[0x02, 0x0f, 0x00]).await.unwrap();

    let inbound = next_inbound(&mut rx).await;
    assert_eq!(failure_status(&inbound.envelope), StatusCode::ProtocolError);
}

#[tokio::test]
async fn test_reliable_server_close_stops_without_synthesized_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let _channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (mut server, _) = listener.accept().await.unwrap();
    let mut closed = ConnectionClosed::default();
    closed.set_status(StatusCode::SessionClosed);
    let closed = Envelope::new(0, 0, true, closed);
    server.write_all(&encode_frame(&closed)).await.unwrap();
    drop(server);

    assert_eq!(next_inbound(&mut rx).await.envelope, closed);
    // The loop stopped after the server's own close; nothing follows.
    let after = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(matches!(after, Ok(None) | Err(_)));
}

#[tokio::test]
async fn test_reliable_close_sends_final_envelope_silently() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let channel = ReliableChannel::open(
        "127.0.0.1",
        port,
        connect_envelope(),
        fast_options(),
        tx,
    );
    let (mut server, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    read_envelope(&mut server, &mut buf).await;

    let goodbye = Envelope::new(0, 0, true, Disconnect {});
    channel.close(Some(&goodbye)).await;

    assert_eq!(read_envelope(&mut server, &mut buf).await, goodbye);
    let after = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(matches!(after, Ok(None) | Err(_)));
}

// =========================================================================
// UnreliableChannel
// =========================================================================

#[tokio::test]
async fn test_unreliable_open_sends_heartbeat_and_delivers_envelopes() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    let (tx, mut rx) = mpsc::channel(16);

    let channel = UnreliableChannel::open("127.0.0.1", port, fast_options(), tx)
        .await
        .expect("udp should open");
    assert!(!channel.is_connected());

    let mut buf = [0u8; 64];
    let (n, client) = timeout(WAIT, server.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &encode_heartbeat());

    // Heartbeats mark the channel live but are not delivered.
    server.send_to(&encode_heartbeat(), client).await.unwrap();
    // Garbage is dropped without killing the loop.
    server.send_to(&[0x60, 0x0f, 0x00], client).await.unwrap();
    let ping = Envelope::new(77, 0, false, Ping { id: 77, timestamp: 77 });
    server.send_to(&encode_datagram(&ping), client).await.unwrap();

    let inbound = next_inbound(&mut rx).await;
    assert_eq!(inbound.from, channel.id());
    assert_eq!(inbound.envelope, ping);
    assert!(channel.is_connected());
}

#[tokio::test]
async fn test_unreliable_send_reaches_server() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    let (tx, _rx) = mpsc::channel(16);

    let channel = UnreliableChannel::open("127.0.0.1", port, fast_options(), tx)
        .await
        .unwrap();

    let ping = Envelope::new(9, 2, false, Ping { id: 9, timestamp: 9 });
    assert!(channel.send(&ping).await);

    let mut buf = [0u8; 512];
    loop {
        let (n, _) = timeout(WAIT, server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        match decode_datagram(&buf[..n]).unwrap() {
            Datagram::Heartbeat => continue,
            Datagram::Envelope(env) => {
                assert_eq!(env, ping);
                break;
            }
        }
    }
}
