//! Sequencing state for reliable and unreliable traffic.
//!
//! # Reliable messages
//!
//! Each side numbers its reliable envelopes 1, 2, 3, ... and piggybacks on
//! every envelope it sends the highest id it has processed contiguously
//! from the other side (`ack_id`). Acks are cumulative: `ack_id = N`
//! confirms every id up to and including N.
//!
//! ```text
//! SendWindow     unacked: {4, 5, 6}   last_sent = 6
//!                    ack_id = 5 arrives → unacked: {6}
//!
//! ReceiveWindow  last_received = 3
//!                    4 → deliver 4
//!                    6 → buffer
//!                    5 → deliver 5, then 6 from the buffer
//!                    5 → duplicate, drop
//! ```
//!
//! Unacked envelopes are kept so they can be replayed verbatim (with a
//! fresh `ack_id`) after a reconnect.
//!
//! # Unreliable messages
//!
//! Unreliable envelopes are stamped with match time instead of a sequence
//! number. [`Staleness`] keeps the highest id seen per [`StreamKey`] and
//! drops anything not newer.

use std::collections::{BTreeMap, HashMap};

use volley_protocol::{Envelope, Payload, PayloadKind};

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SendWindow {
    unacked: BTreeMap<u32, Envelope>,
    last_sent: u32,
    last_acked: u32,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next reliable envelope must carry.
    pub fn next_id(&self) -> u32 {
        self.last_sent.wrapping_add(1)
    }

    /// Records a sent envelope. Its `msg_id` becomes `last_sent`.
    pub fn push(&mut self, envelope: Envelope) {
        self.last_sent = envelope.msg_id;
        self.unacked.insert(envelope.msg_id, envelope);
    }

    /// Drops every envelope with id `<= ack_id`. Returns how many were
    /// removed.
    pub fn ack(&mut self, ack_id: u32) -> usize {
        let before = self.unacked.len();
        match ack_id.checked_add(1) {
            Some(first_kept) => self.unacked = self.unacked.split_off(&first_kept),
            None => self.unacked.clear(),
        }
        self.last_acked = self.last_acked.max(ack_id);
        before - self.unacked.len()
    }

    /// Copies of every unacked envelope in id order, restamped with
    /// `ack_id`.
    pub fn replay(&self, ack_id: u32) -> Vec<Envelope> {
        self.unacked
            .values()
            .map(|envelope| Envelope {
                ack_id,
                ..envelope.clone()
            })
            .collect()
    }

    pub fn contains(&self, msg_id: u32) -> bool {
        self.unacked.contains_key(&msg_id)
    }

    pub fn len(&self) -> usize {
        self.unacked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }

    pub fn last_sent(&self) -> u32 {
        self.last_sent
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ReceiveWindow {
    pending: BTreeMap<u32, Envelope>,
    last_received: u32,
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id delivered contiguously. Sent back as `ack_id`.
    pub fn last_received(&self) -> u32 {
        self.last_received
    }

    /// Number of envelopes waiting for a gap to close.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one reliable envelope and returns those now deliverable, in
    /// order. Empty for a duplicate or an envelope that is ahead of a gap.
    pub fn accept(&mut self, envelope: Envelope) -> Vec<Envelope> {
        let msg_id = envelope.msg_id;
        if msg_id <= self.last_received {
            tracing::debug!(
                msg_id,
                last_received = self.last_received,
                "dropping duplicate reliable message"
            );
            return Vec::new();
        }
        if msg_id > self.last_received.saturating_add(1) {
            tracing::debug!(
                msg_id,
                last_received = self.last_received,
                "queueing out-of-order reliable message"
            );
            self.pending.insert(msg_id, envelope);
            return Vec::new();
        }

        self.last_received = msg_id;
        let mut ready = vec![envelope];
        while let Some(next) = self.pending.remove(&self.last_received.saturating_add(1)) {
            self.last_received = next.msg_id;
            ready.push(next);
        }
        tracing::debug!(
            msg_id,
            delivered = ready.len(),
            last_received = self.last_received,
            "delivering reliable messages"
        );
        ready
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// Independent ordering domain for unreliable traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// Protocol messages, one stream per payload kind.
    Protocol(PayloadKind),
    /// Room messages from one sender on one non-zero tag.
    Room { sender: String, tag: u32 },
}

impl StreamKey {
    /// The stream an unreliable envelope belongs to, or `None` if it is
    /// delivered unfiltered (room messages on tag 0).
    pub fn of(envelope: &Envelope) -> Option<Self> {
        match envelope.payload.as_ref()? {
            Payload::RoomMessage(msg) if msg.tag == 0 => None,
            Payload::RoomMessage(msg) => Some(Self::Room {
                sender: msg.from_id.clone(),
                tag: msg.tag,
            }),
            payload => Some(Self::Protocol(payload.kind())),
        }
    }
}

#[derive(Debug, Default)]
pub struct Staleness {
    last_seen: HashMap<StreamKey, u32>,
}

impl Staleness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `msg_id` is newer than anything seen on `key`,
    /// and records it.
    pub fn admit(&mut self, key: StreamKey, msg_id: u32) -> bool {
        match self.last_seen.get(&key) {
            Some(&last) if msg_id <= last => false,
            _ => {
                self.last_seen.insert(key, msg_id);
                true
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use volley_protocol::{ClockSync, Ping, RoomMessage};

    use super::*;

    fn reliable(msg_id: u32) -> Envelope {
        Envelope::new(msg_id, 0, true, ClockSync { latency: msg_id })
    }

    fn ids(envelopes: &[Envelope]) -> Vec<u32> {
        envelopes.iter().map(|e| e.msg_id).collect()
    }

    fn room_message(from: &str, tag: u32) -> Envelope {
        Envelope::new(
            1,
            0,
            false,
            RoomMessage {
                from_id: from.into(),
                tag,
                ..RoomMessage::default()
            },
        )
    }

    // -- SendWindow --

    #[test]
    fn test_send_window_ack_prunes_cumulatively() {
        let mut window = SendWindow::new();
        for id in 1..=5 {
            window.push(reliable(id));
        }
        assert_eq!(window.ack(3), 3);
        assert!(!window.contains(1));
        assert!(!window.contains(3));
        assert!(window.contains(4));
        assert_eq!(window.last_acked(), 3);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_send_window_stale_ack_is_noop() {
        let mut window = SendWindow::new();
        for id in 1..=4 {
            window.push(reliable(id));
        }
        window.ack(3);
        assert_eq!(window.ack(1), 0);
        assert_eq!(window.last_acked(), 3);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_send_window_ack_max_clears_everything() {
        let mut window = SendWindow::new();
        window.push(reliable(1));
        window.ack(u32::MAX);
        assert!(window.is_empty());
    }

    #[test]
    fn test_send_window_replay_refreshes_ack_id() {
        let mut window = SendWindow::new();
        window.push(reliable(1));
        window.push(reliable(2));
        let replayed = window.replay(17);
        assert_eq!(ids(&replayed), vec![1, 2]);
        assert!(replayed.iter().all(|e| e.ack_id == 17));
        // Stored copies are untouched.
        assert_eq!(window.replay(0)[0].ack_id, 0);
    }

    #[test]
    fn test_send_window_next_id_follows_last_sent() {
        let mut window = SendWindow::new();
        assert_eq!(window.next_id(), 1);
        window.push(reliable(1));
        assert_eq!(window.next_id(), 2);
        assert_eq!(window.last_sent(), 1);
        window.clear();
        assert_eq!(window.next_id(), 1);
    }

    // -- ReceiveWindow --

    #[test]
    fn test_receive_window_reorders_and_drops_duplicate() {
        let mut window = ReceiveWindow::new();
        let mut delivered = Vec::new();
        for id in [1, 3, 2, 5, 4, 2] {
            delivered.extend(ids(&window.accept(reliable(id))));
        }
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
        assert_eq!(window.last_received(), 5);
        assert_eq!(window.buffered(), 0);
    }

    #[test]
    fn test_receive_window_holds_gap() {
        let mut window = ReceiveWindow::new();
        assert!(window.accept(reliable(2)).is_empty());
        assert!(window.accept(reliable(3)).is_empty());
        assert_eq!(window.buffered(), 2);
        assert_eq!(window.last_received(), 0);

        assert_eq!(ids(&window.accept(reliable(1))), vec![1, 2, 3]);
    }

    #[test]
    fn test_receive_window_any_permutation_delivers_prefix_in_order() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let mut arrivals: Vec<u32> = (1..=12).collect();
            // Re-deliver a few ids to exercise duplicate handling.
            arrivals.extend([3, 7, 12]);
            arrivals.shuffle(&mut rng);

            let mut window = ReceiveWindow::new();
            let mut delivered = Vec::new();
            for id in arrivals {
                delivered.extend(ids(&window.accept(reliable(id))));
            }
            assert_eq!(delivered, (1..=12).collect::<Vec<_>>());
        }
    }

    // -- Staleness --

    #[test]
    fn test_staleness_delivers_only_newer_ids() {
        let mut staleness = Staleness::new();
        let key = StreamKey::Room {
            sender: "bob".into(),
            tag: 1,
        };
        let delivered: Vec<u32> = [5, 3, 9, 9, 7]
            .into_iter()
            .filter(|&id| staleness.admit(key.clone(), id))
            .collect();
        assert_eq!(delivered, vec![5, 9]);
    }

    #[test]
    fn test_staleness_tracks_streams_independently() {
        let mut staleness = Staleness::new();
        let bob = StreamKey::Room {
            sender: "bob".into(),
            tag: 1,
        };
        let carol = StreamKey::Room {
            sender: "carol".into(),
            tag: 1,
        };
        let bob_other_tag = StreamKey::Room {
            sender: "bob".into(),
            tag: 2,
        };
        assert!(staleness.admit(bob.clone(), 10));
        assert!(staleness.admit(carol, 5));
        assert!(staleness.admit(bob_other_tag, 5));
        assert!(!staleness.admit(bob, 5));
    }

    #[test]
    fn test_stream_key_tag_zero_bypasses_filtering() {
        assert_eq!(StreamKey::of(&room_message("bob", 0)), None);
        assert_eq!(
            StreamKey::of(&room_message("bob", 4)),
            Some(StreamKey::Room {
                sender: "bob".into(),
                tag: 4
            })
        );
    }

    #[test]
    fn test_stream_key_protocol_messages_keyed_by_kind() {
        let ping = Envelope::new(9, 0, false, Ping { id: 9, timestamp: 9 });
        assert_eq!(
            StreamKey::of(&ping),
            Some(StreamKey::Protocol(PayloadKind::Ping))
        );
    }
}
