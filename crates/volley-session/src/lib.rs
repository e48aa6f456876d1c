//! Client session engine for Volley.
//!
//! A [`Session`] owns one logical connection to a realtime server and
//! everything that rides on it:
//!
//! 1. **Connection lifecycle**: connect, automatic reconnect within a retry
//!    budget, server redirects, resumption of the same session id.
//! 2. **Reliable messaging**: every reliable envelope is numbered, kept
//!    until the server acknowledges it, and replayed after a reconnect
//!    ([`SendWindow`]). Inbound reliable envelopes are delivered exactly
//!    once and in order ([`ReceiveWindow`]).
//! 3. **Unreliable messaging**: stamped with match time; older values per
//!    stream are dropped ([`Staleness`]).
//! 4. **Clock sync**: a shared match clock driven by server pings
//!    ([`MatchClock`]).
//! 5. **Room replication**: the joined [`Room`](volley_room::Room) is kept
//!    in step with confirmed server events.
//!
//! # How it fits in the stack
//!
//! ```text
//! Application  ← drains SessionEvents from its EventStreams
//!     ↕
//! Session Layer (this crate)  ← one actor task per session
//!     ↕
//! Transport Layer (below)  ← TCP and UDP channels
//! ```

mod clock;
mod config;
mod engine;
mod error;
mod event;
mod identity;
mod session;
mod window;

pub use clock::MatchClock;
pub use config::SessionConfig;
pub use error::SessionError;
pub use event::{EventSink, EventStream, RoomSinks, SessionEvent, event_channel};
pub use identity::{IdentityProvider, StaticIdentity};
pub use session::{ConnectionState, Session};
pub use window::{ReceiveWindow, SendWindow, Staleness, StreamKey};
