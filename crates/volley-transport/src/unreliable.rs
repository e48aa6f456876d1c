//! UDP channel, one envelope per datagram.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use volley_protocol::{
    Datagram, Envelope, decode_datagram, encode_datagram, encode_heartbeat,
};

use crate::{ChannelOptions, ConnectionId, Inbound, InboundSink, TransportError};

/// Largest datagram the receive loop accepts.
const RECV_BUFFER: usize = 8192;

/// Low-latency side channel to the server.
///
/// The channel counts as connected once the first datagram (usually the
/// server's heartbeat echo) arrives, and stops counting as connected after
/// a failed send. The session routes unreliable traffic here only while
/// [`is_connected`](Self::is_connected) holds.
///
/// Datagrams that fail to decode are dropped; unlike a stream, a bad
/// datagram cannot desynchronize the ones after it.
pub struct UnreliableChannel {
    id: ConnectionId,
    socket: Arc<UdpSocket>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl UnreliableChannel {
    /// Resolves `host`, connects a fresh UDP socket to `host:port`, sends
    /// the first heartbeat and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Any error means UDP is unavailable for this session; the caller keeps
    /// using the reliable channel alone.
    pub async fn open<S: InboundSink>(
        host: &str,
        port: u16,
        options: ChannelOptions,
        sink: S,
    ) -> Result<Self, TransportError> {
        let addr = resolve(host, port).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(TransportError::Connect)?;
        socket.connect(addr).await.map_err(TransportError::Connect)?;
        socket
            .send(&encode_heartbeat())
            .await
            .map_err(TransportError::SendFailed)?;

        let id = ConnectionId::next();
        let socket = Arc::new(socket);
        let connected = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(recv_loop(
            id,
            Arc::clone(&socket),
            Arc::clone(&connected),
            options,
            sink,
        ));
        tracing::info!(conn_id = %id, %addr, "unreliable channel opened");

        Ok(Self {
            id,
            socket,
            connected,
            task,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends one envelope. Returns `false` on failure and marks the channel
    /// as not connected.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        match self.socket.send(&encode_datagram(envelope)).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(conn_id = %self.id, error = %e, "datagram send failed");
                self.connected.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Stops the receive loop and releases the socket.
    pub fn close(self) {
        self.task.abort();
        tracing::debug!(conn_id = %self.id, "unreliable channel closed");
    }
}

impl Drop for UnreliableChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| TransportError::Resolve(host.to_owned()))?
        .next()
        .ok_or_else(|| TransportError::Resolve(host.to_owned()))
}

async fn recv_loop<S: InboundSink>(
    id: ConnectionId,
    socket: Arc<UdpSocket>,
    connected: Arc<AtomicBool>,
    options: ChannelOptions,
    sink: S,
) {
    let heartbeat = encode_heartbeat();
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        let n = match timeout(options.heartbeat_interval, socket.recv(&mut buf)).await {
            Err(_) => {
                let _ = socket.send(&heartbeat).await;
                continue;
            }
            Ok(Err(e)) => {
                // ICMP errors from an earlier send surface here; the
                // socket itself is still usable.
                tracing::debug!(conn_id = %id, error = %e, "datagram receive failed");
                continue;
            }
            Ok(Ok(n)) => n,
        };
        connected.store(true, Ordering::Release);

        match decode_datagram(&buf[..n]) {
            Ok(Datagram::Heartbeat) => {}
            Ok(Datagram::Envelope(envelope)) => {
                if !sink.deliver(Inbound { from: id, envelope }).await {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(conn_id = %id, error = %e, "dropping malformed datagram");
            }
        }
    }
}
