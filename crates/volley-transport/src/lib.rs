//! Client transport channels for Volley.
//!
//! A session talks to the server over two channels:
//!
//! - [`ReliableChannel`]: one TCP stream carrying length-prefixed envelopes.
//!   Owns the session; its failure is the session's failure.
//! - [`UnreliableChannel`]: one connected UDP socket, one envelope per
//!   datagram. Optional and best-effort.
//!
//! Neither channel interprets what it receives. Each runs a read loop in
//! its own task and hands envelopes to an [`InboundSink`] (in practice the
//! session actor's queue), tagged with the channel's [`ConnectionId`] so
//! the receiver can ignore channels it has already replaced.

mod error;
mod reliable;
mod unreliable;

pub use error::TransportError;
pub use reliable::ReliableChannel;
pub use unreliable::UnreliableChannel;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use volley_protocol::Envelope;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An envelope received on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub from: ConnectionId,
    pub envelope: Envelope,
}

/// Destination for everything a channel's read loop receives.
pub trait InboundSink: Clone + Send + Sync + 'static {
    /// Delivers one envelope. Returns `false` once the receiver is gone,
    /// which stops the read loop.
    fn deliver(&self, inbound: Inbound) -> impl Future<Output = bool> + Send;
}

impl InboundSink for mpsc::Sender<Inbound> {
    async fn deliver(&self, inbound: Inbound) -> bool {
        self.send(inbound).await.is_ok()
    }
}

impl InboundSink for mpsc::UnboundedSender<Inbound> {
    async fn deliver(&self, inbound: Inbound) -> bool {
        self.send(inbound).is_ok()
    }
}

/// Timing knobs shared by both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Idle time after which a heartbeat is sent.
    pub heartbeat_interval: Duration,
    /// Silence from the peer after which the reliable channel gives up.
    pub peer_timeout: Duration,
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(200),
            peer_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
