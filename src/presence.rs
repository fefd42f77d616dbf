//! Presence Tracker - approximate count of active UI sessions
//!
//! Best-effort metric only. Entries expire after [`STALE_AFTER`] without a
//! touch. Sweeps pop a min-heap of last-seen times, so the cost is
//! proportional to the number of expired entries; heap entries made obsolete
//! by a later touch or a leave are discarded as they surface.

use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Join,
    #[default]
    Ping,
    Leave,
    /// Anything else refreshes like a ping.
    #[serde(other)]
    Other,
}

#[derive(Default)]
struct PresenceState {
    last_seen: HashMap<String, Instant>,
    expiry: BinaryHeap<Reverse<(Instant, String)>>,
}

impl PresenceState {
    fn sweep(&mut self, now: Instant, window: Duration) {
        while let Some(Reverse((seen, _))) = self.expiry.peek() {
            if now.saturating_duration_since(*seen) <= window {
                break;
            }
            let Some(Reverse((seen, session_id))) = self.expiry.pop() else {
                break;
            };
            // Only drop the session if this heap entry is its latest touch.
            if self.last_seen.get(&session_id) == Some(&seen) {
                self.last_seen.remove(&session_id);
            }
        }
    }
}

/// Shared map of session id to last-seen time, guarded by one mutex so that
/// purge and insert within a request never interleave.
pub struct PresenceTracker {
    window: Duration,
    state: Mutex<PresenceState>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(STALE_AFTER)
    }
}

impl PresenceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(PresenceState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PresenceState> {
        // A panic mid-update leaves at worst a stale entry; keep serving.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `action` for `session_id` and returns the fresh count.
    pub fn touch(&self, session_id: &str, action: PresenceAction) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        state.sweep(now, self.window);
        match action {
            PresenceAction::Leave => {
                state.last_seen.remove(session_id);
            }
            PresenceAction::Join | PresenceAction::Ping | PresenceAction::Other => {
                state.last_seen.insert(session_id.to_string(), now);
                state.expiry.push(Reverse((now, session_id.to_string())));
            }
        }
        state.last_seen.len()
    }

    /// Purges stale entries, then counts what is left.
    pub fn count(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        state.sweep(now, self.window);
        state.last_seen.len()
    }

    /// Explicit TTL sweep; returns how many sessions were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.last_seen.len();
        state.sweep(now, self.window);
        before - state.last_seen.len()
    }
}
