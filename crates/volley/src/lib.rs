//! # Volley
//!
//! Client engine for realtime multiplayer rooms.
//!
//! A [`Session`] keeps one logical connection to a room server alive across
//! network failures, sends reliable traffic over TCP and latency-sensitive
//! traffic over UDP, and mirrors the joined room locally. The application
//! talks to it through async calls and reads results as
//! [`SessionEvent`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use volley::prelude::*;
//!
//! # async fn run() -> Result<(), VolleyError> {
//! volley::init_tracing();
//!
//! let session = Session::new(
//!     SessionConfig::new("rt.example.com", 4000),
//!     StaticIdentity::new("player-1", "my-game", "token"),
//! );
//! let (sink, mut events) = event_channel();
//! session.connect(sink).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Connected { .. } = event {
//!         let (room_sink, _room_events) = event_channel();
//!         session
//!             .join_room("lobby", TypedMap::new(), RoomSinks::single(room_sink))
//!             .await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The layer crates are re-exported for anything the prelude leaves out.

mod error;
mod logging;

pub use error::VolleyError;
pub use logging::init_tracing;

pub use volley_protocol as protocol;
pub use volley_room as room;
pub use volley_session as session;
pub use volley_transport as transport;

pub use volley_session::{Session, SessionConfig, SessionEvent};

/// Everything a typical client needs.
pub mod prelude {
    pub use crate::VolleyError;
    pub use volley_protocol::{Status, TypedMap, Value};
    pub use volley_room::{MatchState, Message, Participant, Room, RoomConfig};
    pub use volley_session::{
        ConnectionState, EventSink, EventStream, IdentityProvider, RoomSinks,
        Session, SessionConfig, SessionError, SessionEvent, StaticIdentity,
        event_channel,
    };
}
