//! Room configuration and the match state machine.

use serde::{Deserialize, Serialize};
use volley_protocol::{MatchStateCode, TypedMap};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings for a room this client creates.
///
/// Every field is optional; unset fields are left out of the wire map and
/// the server applies its own defaults. The config is fixed once the room
/// exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Maximum participants allowed in the room.
    pub max_participants: Option<i32>,

    /// Participants required before the match can start.
    pub min_participants: Option<i32>,

    /// Server tick period in milliseconds.
    pub tick_time: Option<i32>,

    /// Start the match as soon as `min_participants` are present.
    pub auto_start: Option<bool>,

    /// Stop the match when participants drop below `min_participants`.
    pub auto_stop: Option<bool>,
}

impl RoomConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_participants(mut self, n: i32) -> Self {
        self.max_participants = Some(n);
        self
    }

    pub fn min_participants(mut self, n: i32) -> Self {
        self.min_participants = Some(n);
        self
    }

    pub fn tick_time(mut self, millis: i32) -> Self {
        self.tick_time = Some(millis);
        self
    }

    pub fn auto_start(mut self, enabled: bool) -> Self {
        self.auto_start = Some(enabled);
        self
    }

    pub fn auto_stop(mut self, enabled: bool) -> Self {
        self.auto_stop = Some(enabled);
        self
    }

    /// The map sent in `CreateRoom`, using the server's key names.
    pub fn to_map(&self) -> TypedMap {
        let mut map = TypedMap::new();
        if let Some(n) = self.max_participants {
            map.insert("max_players", n);
        }
        if let Some(n) = self.min_participants {
            map.insert("min_players", n);
        }
        if let Some(t) = self.tick_time {
            map.insert("tick_time", t);
        }
        if let Some(b) = self.auto_start {
            map.insert("auto_start", b);
        }
        if let Some(b) = self.auto_stop {
            map.insert("auto_stop", b);
        }
        map
    }
}

// ---------------------------------------------------------------------------
// MatchState
// ---------------------------------------------------------------------------

/// The match lifecycle of a room.
///
/// The server owns the state; the client requests transitions and applies
/// them only once the server confirms.
///
/// ```text
/// Pending → Ready → Running → Finished
///    ↑                           │
///    └────────── reset ──────────┘
/// ```
///
/// - **Pending**: waiting for participants.
/// - **Ready**: enough participants; the match can start.
/// - **Running**: the match is in progress.
/// - **Finished**: the match ended; a reset returns to `Pending`.
/// - **Unknown**: reported alongside a failed transition. A room never
///   stores it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchState {
    #[default]
    Pending,
    Ready,
    Running,
    Finished,
    Unknown,
}

impl MatchState {
    /// The state a successful forward transition leads to.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Ready),
            Self::Ready => Some(Self::Running),
            Self::Running => Some(Self::Finished),
            Self::Finished | Self::Unknown => None,
        }
    }

    /// Returns `true` while the match is in progress.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl From<MatchStateCode> for MatchState {
    fn from(code: MatchStateCode) -> Self {
        match code {
            MatchStateCode::Pending => Self::Pending,
            MatchStateCode::Ready => Self::Ready,
            MatchStateCode::Running => Self::Running,
            MatchStateCode::Finished => Self::Finished,
        }
    }
}

impl std::fmt::Display for MatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::Finished => write!(f, "Finished"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_protocol::Value;

    #[test]
    fn test_match_state_next_follows_strict_order() {
        assert_eq!(MatchState::Pending.next(), Some(MatchState::Ready));
        assert_eq!(MatchState::Ready.next(), Some(MatchState::Running));
        assert_eq!(MatchState::Running.next(), Some(MatchState::Finished));
        assert_eq!(MatchState::Finished.next(), None);
        assert_eq!(MatchState::Unknown.next(), None);
    }

    #[test]
    fn test_match_state_from_wire_code() {
        assert_eq!(MatchState::from(MatchStateCode::Running), MatchState::Running);
        assert_eq!(
            MatchState::from(MatchStateCode::default()),
            MatchState::Pending
        );
    }

    #[test]
    fn test_match_state_display() {
        assert_eq!(MatchState::Finished.to_string(), "Finished");
    }

    #[test]
    fn test_room_config_empty_produces_empty_map() {
        assert!(RoomConfig::new().to_map().is_empty());
    }

    #[test]
    fn test_room_config_uses_server_key_names() {
        let map = RoomConfig::new()
            .max_participants(4)
            .min_participants(2)
            .tick_time(50)
            .auto_start(true)
            .auto_stop(false)
            .to_map();

        assert_eq!(map.get("max_players"), Some(&Value::I32(4)));
        assert_eq!(map.get("min_players"), Some(&Value::I32(2)));
        assert_eq!(map.get("tick_time"), Some(&Value::I32(50)));
        assert_eq!(map.get("auto_start"), Some(&Value::Bool(true)));
        assert_eq!(map.get("auto_stop"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_room_config_deserializes_partial_json() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"max_participants": 6}"#).unwrap();
        assert_eq!(config, RoomConfig::new().max_participants(6));
    }
}
