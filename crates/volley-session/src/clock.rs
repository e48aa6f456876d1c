//! Match time: the server's millisecond clock, tracked locally.
//!
//! The server stamps `Connected` and its own pings with its current match
//! time. The client records that value together with the local instant it
//! arrived and extrapolates from there:
//!
//! ```text
//! now = anchor_match + (local_now - anchor_local)
//! ```
//!
//! A `ClockSync{latency}` from the server says the last anchor arrived
//! `latency` ms after it was stamped. Advancing the match side of the
//! anchor by that amount is the same as moving the local side back, and
//! cannot underflow an `Instant`.
//!
//! Match time is a wrapping `u32`, like every id derived from it.

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct MatchClock {
    anchor_local: Instant,
    anchor_match: u32,
    latency: u32,
}

impl MatchClock {
    /// A clock reading zero now.
    pub fn new() -> Self {
        Self {
            anchor_local: Instant::now(),
            anchor_match: 0,
            latency: 0,
        }
    }

    /// Re-anchors to `match_time` as of this instant.
    pub fn anchor(&mut self, match_time: u32) {
        self.anchor_local = Instant::now();
        self.anchor_match = match_time;
    }

    /// Corrects the current anchor for one-way latency.
    pub fn apply_latency(&mut self, latency: u32) {
        self.latency = latency;
        self.anchor_match = self.anchor_match.wrapping_add(latency);
    }

    /// The last latency reported by the server.
    pub fn latency(&self) -> u32 {
        self.latency
    }

    pub fn now(&self) -> u32 {
        let elapsed = self.anchor_local.elapsed().as_millis() as u32;
        self.anchor_match.wrapping_add(elapsed)
    }
}

impl Default for MatchClock {
    fn default() -> Self {
        Self::new()
    }
}
