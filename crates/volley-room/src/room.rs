//! The client's view of the room it has joined.
//!
//! A [`Room`] is a replica of server state. It is built wholesale from the
//! snapshot in a create/join response and afterwards changed only by the
//! session, one confirmed server event at a time. Applications receive
//! clones in session events; mutating a clone has no effect on the server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use volley_protocol::{MapEntry, ParticipantInfo, RoomInfo, RoomMessage, TypedMap, Value};

use crate::{MatchState, RoomError};

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A member of a room, this client included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub room_id: String,
    pub properties: TypedMap,
}

impl Participant {
    pub fn from_info(room_id: &str, info: &ParticipantInfo) -> Self {
        Self {
            id: info.id.clone(),
            room_id: room_id.to_owned(),
            properties: TypedMap::from_wire(&info.properties),
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    id: String,
    match_state: MatchState,
    config: TypedMap,
    properties: TypedMap,
    participants: BTreeMap<String, Participant>,
}

impl Room {
    /// An empty room in the `Pending` state.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            match_state: MatchState::Pending,
            config: TypedMap::new(),
            properties: TypedMap::new(),
            participants: BTreeMap::new(),
        }
    }

    /// Builds a room from the snapshot in a `RoomCreated`/`RoomJoined`
    /// response. An unrecognized match state reads as `Pending`.
    pub fn from_snapshot(info: &RoomInfo) -> Result<Self, RoomError> {
        if info.room_id.is_empty() {
            return Err(RoomError::InvalidSnapshot("empty room id".into()));
        }
        let participants = info
            .participants
            .iter()
            .map(|p| (p.id.clone(), Participant::from_info(&info.room_id, p)))
            .collect();
        Ok(Self {
            id: info.room_id.clone(),
            match_state: info.match_state().into(),
            config: TypedMap::from_wire(&info.config),
            properties: TypedMap::from_wire(&info.properties),
            participants,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_same_room(&self, id: &str) -> bool {
        self.id == id
    }

    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    pub fn config(&self) -> &TypedMap {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn properties(&self) -> &TypedMap {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn participants(&self) -> &BTreeMap<String, Participant> {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    // -- Mutators, driven by confirmed server events --

    /// `Unknown` is a reporting value only and is ignored here.
    pub fn set_match_state(&mut self, state: MatchState) {
        if state != MatchState::Unknown {
            self.match_state = state;
        }
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.participants.insert(participant.id.clone(), participant);
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Applies a property entry; a void entry removes the key.
    pub fn apply_property(&mut self, entry: &MapEntry) {
        self.properties
            .put(entry.name.clone(), Value::from_entry(entry));
    }

    /// Applies a participant property entry. Returns `false` if the
    /// participant is not in the room.
    pub fn apply_participant_property(
        &mut self,
        participant_id: &str,
        entry: &MapEntry,
    ) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(p) => {
                p.properties
                    .put(entry.name.clone(), Value::from_entry(entry));
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An application message received from another participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub room_id: String,
    pub sender_id: String,
    pub tag: u32,
    pub payload: TypedMap,
}

impl Message {
    pub fn from_wire(msg: &RoomMessage) -> Self {
        Self {
            room_id: msg.room_id.clone(),
            sender_id: msg.from_id.clone(),
            tag: msg.tag,
            payload: TypedMap::from_wire(&msg.payload),
        }
    }
}
