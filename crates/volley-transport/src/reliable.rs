//! TCP channel carrying length-prefixed envelopes.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use volley_protocol::{Envelope, FrameDecoder, PayloadKind, encode_frame};

use crate::{ChannelOptions, ConnectionId, Inbound, InboundSink, TransportError};

/// Read buffer growth step.
const READ_CHUNK: usize = 4096;

/// Shared write half. Empty until the connection is established, and again
/// after it has been closed.
type Writer = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// The session's reliable connection to the server.
///
/// [`open`](Self::open) returns immediately; connecting happens in the
/// channel's task. Everything the task learns, including its own failure,
/// arrives at the sink as an [`Inbound`] envelope:
///
/// - envelopes read from the server, in order;
/// - a synthesized `ConnectionFailed` when the socket cannot be opened,
///   errors, hits EOF, or the peer goes silent for `peer_timeout`.
///
/// After the server sends `ConnectionFailed` or `ConnectionClosed` the task
/// stops without synthesizing anything else.
pub struct ReliableChannel {
    id: ConnectionId,
    writer: Writer,
    task: JoinHandle<()>,
}

impl ReliableChannel {
    /// Starts connecting to `host:port` and sends `initial` as the first
    /// frame once connected.
    pub fn open<S: InboundSink>(
        host: &str,
        port: u16,
        initial: Envelope,
        options: ChannelOptions,
        sink: S,
    ) -> Self {
        let id = ConnectionId::next();
        let writer: Writer = Arc::new(Mutex::new(None));
        let task = tokio::spawn(run(
            id,
            format!("{host}:{port}"),
            initial,
            options,
            Arc::clone(&writer),
            sink,
        ));
        Self { id, writer, task }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Writes and flushes one envelope.
    ///
    /// Returns `false` if the channel is not connected or the write failed.
    /// A failed write does not close the channel; the read loop notices a
    /// dead socket on its own.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            tracing::debug!(conn_id = %self.id, "send on unconnected channel");
            return false;
        };
        match write_frame(writer, &encode_frame(envelope)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "send failed");
                false
            }
        }
    }

    /// Stops the channel, best-effort sending `final_envelope` first.
    ///
    /// No `ConnectionFailed` is synthesized for a channel closed this way.
    pub async fn close(self, final_envelope: Option<&Envelope>) {
        self.task.abort();
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        if let Some(envelope) = final_envelope {
            let _ = write_frame(&mut writer, &encode_frame(envelope)).await;
        }
        let _ = writer.shutdown().await;
        tracing::debug!(conn_id = %self.id, "reliable channel closed");
    }
}

impl Drop for ReliableChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
) -> Result<(), TransportError> {
    writer
        .write_all(frame)
        .await
        .map_err(TransportError::SendFailed)?;
    writer.flush().await.map_err(TransportError::SendFailed)
}

// ---------------------------------------------------------------------------
// Channel task
// ---------------------------------------------------------------------------

async fn run<S: InboundSink>(
    id: ConnectionId,
    addr: String,
    initial: Envelope,
    options: ChannelOptions,
    writer: Writer,
    sink: S,
) {
    let Err(e) = drive(id, &addr, initial, options, &writer, &sink).await else {
        return;
    };
    tracing::warn!(conn_id = %id, %addr, error = %e, "reliable channel failed");
    writer.lock().await.take();
    sink.deliver(Inbound {
        from: id,
        envelope: Envelope::connection_failed(e.status()),
    })
    .await;
}

async fn drive<S: InboundSink>(
    id: ConnectionId,
    addr: &str,
    initial: Envelope,
    options: ChannelOptions,
    writer: &Writer,
    sink: &S,
) -> Result<(), TransportError> {
    tracing::info!(conn_id = %id, %addr, "opening reliable channel");
    let stream = timeout(options.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout(options.connect_timeout))?
        .map_err(TransportError::Connect)?;
    stream.set_nodelay(true).map_err(TransportError::Connect)?;

    let (reader, mut write_half) = stream.into_split();
    write_frame(&mut write_half, &encode_frame(&initial)).await?;
    *writer.lock().await = Some(write_half);
    tracing::debug!(conn_id = %id, "reliable channel connected");

    read_loop(id, reader, options, writer, sink).await
}

async fn read_loop<S: InboundSink>(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    options: ChannelOptions,
    writer: &Writer,
    sink: &S,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut decoder = FrameDecoder::new();
    let mut last_heard = Instant::now();

    loop {
        buf.reserve(READ_CHUNK);
        let read =
            timeout(options.heartbeat_interval, reader.read_buf(&mut buf)).await;

        let n = match read {
            Err(_) => {
                if last_heard.elapsed() >= options.peer_timeout {
                    return Err(TransportError::ConnectionClosed(format!(
                        "no data from peer for {:?}",
                        options.peer_timeout
                    )));
                }
                send_heartbeat(writer).await?;
                continue;
            }
            Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e)),
            Ok(Ok(0)) => {
                return Err(TransportError::ConnectionClosed(
                    "peer closed the stream".into(),
                ));
            }
            Ok(Ok(n)) => n,
        };
        last_heard = Instant::now();
        tracing::trace!(conn_id = %id, bytes = n, "read");

        while let Some(envelope) = decoder.decode(&mut buf)? {
            let terminal = matches!(
                envelope.kind(),
                Some(PayloadKind::ConnectionFailed | PayloadKind::ConnectionClosed)
            );
            if !sink.deliver(Inbound { from: id, envelope }).await {
                return Ok(());
            }
            if terminal {
                tracing::debug!(conn_id = %id, "server ended the connection");
                if let Some(mut w) = writer.lock().await.take() {
                    let _ = w.shutdown().await;
                }
                return Ok(());
            }
        }
    }
}

async fn send_heartbeat(writer: &Writer) -> Result<(), TransportError> {
    let mut guard = writer.lock().await;
    match guard.as_mut() {
        Some(w) => write_frame(w, &[0]).await,
        None => Err(TransportError::ConnectionClosed("writer gone".into())),
    }
}
