use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::BackendError;

/// Who is typing in one room, fed by typing events off the change feed.
///
/// Entries are stamped with local arrival time rather than the sender's
/// clock, so skewed peers can't pin an indicator on. Expiry is computed
/// lazily at query time; no timers mutate state, so nothing forces extra
/// renders.
pub struct TypingTracker {
    entries: HashMap<Uuid, Instant>,
    liveness: Duration,
}

impl TypingTracker {
    pub fn new(liveness: Duration) -> Self {
        Self { entries: HashMap::new(), liveness }
    }

    pub fn observe(&mut self, user_id: Uuid, is_typing: bool, now: Instant) {
        if is_typing {
            self.entries.insert(user_id, now);
        } else {
            self.entries.remove(&user_id);
        }
    }

    /// Users with a typing entry newer than the liveness window. An entry
    /// whose explicit stop event got lost falls out on its own.
    pub fn typing_users(&self, now: Instant) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|&(_, &seen)| now.duration_since(seen) <= self.liveness)
            .map(|(&user, _)| user)
            .collect()
    }

    /// Occasional housekeeping so a busy room's map doesn't accumulate
    /// stale entries forever.
    pub fn prune(&mut self, now: Instant) {
        let liveness = self.liveness;
        self.entries.retain(|_, &mut seen| now.duration_since(seen) <= liveness);
    }
}

/// Leading-edge throttle: the first call passes, repeats inside the
/// interval are swallowed. Keystroke bursts become one write per quiet
/// period.
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Outbound side: publishes this client's typing state for one room.
pub struct TypingPublisher {
    backend: Arc<dyn Backend>,
    room_id: Uuid,
    throttle: Mutex<Throttle>,
}

impl TypingPublisher {
    pub fn new(backend: Arc<dyn Backend>, room_id: Uuid, debounce: Duration) -> Self {
        Self { backend, room_id, throttle: Mutex::new(Throttle::new(debounce)) }
    }

    /// Publish typing state. `true` is throttled per the quiet period;
    /// `false` (sent when a message actually goes out) always writes
    /// immediately so the indicator clears promptly.
    pub async fn set_typing(&self, user_id: Uuid, is_typing: bool) -> Result<(), BackendError> {
        if is_typing {
            let allowed = self
                .throttle
                .lock()
                .map(|mut t| t.allow(Instant::now()))
                .unwrap_or(true);
            if !allowed {
                debug!(room = %self.room_id, "typing write coalesced");
                return Ok(());
            }
        } else if let Ok(mut t) = self.throttle.lock() {
            t.reset();
        }
        self.backend.set_typing(self.room_id, user_id, is_typing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_coalesces_bursts() {
        let mut throttle = Throttle::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(throttle.allow(start));
        assert!(!throttle.allow(start + Duration::from_millis(100)));
        assert!(!throttle.allow(start + Duration::from_millis(499)));
        assert!(throttle.allow(start + Duration::from_millis(500)));
    }

    #[test]
    fn throttle_reset_reopens_immediately() {
        let mut throttle = Throttle::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(throttle.allow(start));
        throttle.reset();
        assert!(throttle.allow(start + Duration::from_millis(1)));
    }

    #[test]
    fn stale_entries_expire_lazily() {
        let mut tracker = TypingTracker::new(Duration::from_secs(3));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Instant::now();

        tracker.observe(alice, true, start);
        tracker.observe(bob, true, start + Duration::from_secs(2));

        let now = start + Duration::from_secs(4);
        // Alice's entry aged out without any stop event; Bob's is live.
        assert_eq!(tracker.typing_users(now), vec![bob]);
    }

    #[test]
    fn explicit_stop_clears_entry() {
        let mut tracker = TypingTracker::new(Duration::from_secs(3));
        let alice = Uuid::new_v4();
        let start = Instant::now();

        tracker.observe(alice, true, start);
        tracker.observe(alice, false, start + Duration::from_millis(10));
        assert!(tracker.typing_users(start + Duration::from_millis(20)).is_empty());
    }

    #[test]
    fn prune_drops_expired_entries() {
        let mut tracker = TypingTracker::new(Duration::from_secs(3));
        let alice = Uuid::new_v4();
        let start = Instant::now();

        tracker.observe(alice, true, start);
        tracker.prune(start + Duration::from_secs(10));
        assert!(tracker.typing_users(start + Duration::from_secs(10)).is_empty());
    }
}
