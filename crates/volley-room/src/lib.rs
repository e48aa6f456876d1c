//! Room and participant model for Volley.
//!
//! A session is in at most one room at a time. This crate holds the
//! client-side replica of that room; the session crate keeps it in sync
//! with server events.
//!
//! # Key types
//!
//! - [`Room`]: the joined room with its config, properties and participants
//! - [`Participant`]: one member and their properties
//! - [`MatchState`]: the match lifecycle state machine
//! - [`RoomConfig`]: settings for a room this client creates
//! - [`Message`]: an application message received in the room

mod config;
mod error;
mod room;

pub use config::{MatchState, RoomConfig};
pub use error::RoomError;
pub use room::{Message, Participant, Room};
