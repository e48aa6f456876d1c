//! Integration tests for the facade: the prelude alone is enough to run a
//! client against a server.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use volley::prelude::*;
use volley::protocol::{
    Connected, Envelope, FrameDecoder, Payload, RoomInfo, RoomJoined, StatusCode,
    encode_frame,
};

const WAIT: Duration = Duration::from_secs(5);

async fn read_envelope(stream: &mut TcpStream, buf: &mut BytesMut) -> Envelope {
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

async fn next_event(events: &mut EventStream) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event arrived")
        .expect("event stream closed")
}

#[tokio::test]
async fn test_client_joins_room_through_prelude() -> Result<(), VolleyError> {
    volley::init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let config: SessionConfig = serde_json::from_str(&format!(
        r#"{{"host": "127.0.0.1", "port": {port}, "reconnect": false}}"#
    ))
    .unwrap();
    let session = Session::new(config, StaticIdentity::new("p1", "g1", "tok"));
    let (sink, mut events) = event_channel();
    session.connect(sink).await?;

    let (mut server, _) = listener.accept().await.unwrap();
    let mut buf = BytesMut::new();
    let hello = read_envelope(&mut server, &mut buf).await;
    assert!(matches!(hello.payload, Some(Payload::Connect(_))));

    let connected = Envelope::new(
        0,
        0,
        true,
        Connected {
            session_id: "s1".into(),
            mm_time: 1_000,
            ..Connected::default()
        },
    );
    server.write_all(&encode_frame(&connected)).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected { .. }
    ));

    let (room_sink, mut room_events) = event_channel();
    session
        .join_room("lobby", TypedMap::new().with("team", 2), RoomSinks::single(room_sink))
        .await?;
    let join = read_envelope(&mut server, &mut buf).await;
    assert_eq!((join.msg_id, join.is_reliable), (1, true));

    let joined = Envelope::new(
        1,
        1,
        true,
        RoomJoined {
            status: StatusCode::Success as i32,
            room: Some(RoomInfo {
                room_id: "lobby".into(),
                ..RoomInfo::default()
            }),
        },
    );
    server.write_all(&encode_frame(&joined)).await.unwrap();

    match next_event(&mut room_events).await {
        SessionEvent::RoomJoined {
            status: Status::Success,
            room: Some(room),
        } => {
            assert_eq!(room.id(), "lobby");
            assert_eq!(room.match_state(), MatchState::Pending);
        }
        other => panic!("expected RoomJoined, got {other:?}"),
    }
    assert_eq!(session.connection_state().await?, ConnectionState::Connected);

    session.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_client_contract_errors_convert_to_volley_error() {
    let session = Session::new(
        SessionConfig::default(),
        StaticIdentity::new("p1", "g1", "tok"),
    );

    async fn leave(session: &Session) -> Result<(), VolleyError> {
        session.leave_room().await?;
        Ok(())
    }

    let err = leave(&session).await.unwrap_err();
    assert!(matches!(
        err,
        VolleyError::Session(SessionError::RoomNotJoined)
    ));
    assert_eq!(err.to_string(), "no room is joined");
}
