use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// How long a typing indicator lives without a refresh.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);

/// Heap entries beyond this multiple of live entries trigger a compaction.
const HEAP_SLACK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypingKey {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug)]
struct TypingEntry {
    started_at: Instant,
    expires_at: Instant,
    generation: u64,
}

/// Ephemeral typing state for every (conversation, user) pair.
///
/// Deadlines live in one min-heap that a sweeper polls; there is no timer per
/// pair. A refresh pushes a new heap entry with a fresh generation and leaves
/// the old one behind. Stale entries are skipped when they surface.
pub struct TypingTracker {
    ttl: Duration,
    entries: HashMap<TypingKey, TypingEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, u64, TypingKey)>>,
    next_generation: u64,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_generation: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start or refresh typing. Returns true only on the idle -> typing transition.
    pub fn start(&mut self, key: TypingKey, now: Instant) -> bool {
        let generation = self.next_generation;
        self.next_generation += 1;
        let expires_at = now + self.ttl;

        let started = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                entry.generation = generation;
                false
            }
            None => {
                self.entries.insert(
                    key,
                    TypingEntry {
                        started_at: now,
                        expires_at,
                        generation,
                    },
                );
                true
            }
        };

        self.deadlines.push(Reverse((expires_at, generation, key)));
        self.compact_if_bloated();
        started
    }

    /// Returns true if the pair was typing.
    pub fn stop(&mut self, key: TypingKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Drop every pair whose deadline is at or before `now`, returning them.
    pub fn expire(&mut self, now: Instant) -> Vec<TypingKey> {
        let mut expired = Vec::new();

        while let Some(Reverse((deadline, generation, key))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();

            let current = self
                .entries
                .get(&key)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                self.entries.remove(&key);
                expired.push(key);
            }
        }

        expired
    }

    /// Stop everything a user is typing, e.g. on disconnect.
    pub fn stop_user(&mut self, user_id: Uuid) -> Vec<TypingKey> {
        let keys: Vec<TypingKey> = self
            .entries
            .keys()
            .filter(|k| k.user_id == user_id)
            .copied()
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    pub fn is_typing(&self, key: TypingKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Users currently typing in a conversation, oldest first.
    pub fn typing_in(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let mut users: Vec<(Instant, Uuid)> = self
            .entries
            .iter()
            .filter(|(k, _)| k.conversation_id == conversation_id)
            .map(|(k, e)| (e.started_at, k.user_id))
            .collect();
        users.sort();
        users.into_iter().map(|(_, u)| u).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn compact_if_bloated(&mut self) {
        if self.deadlines.len() <= HEAP_SLACK * self.entries.len() + 64 {
            return;
        }
        self.deadlines = self
            .entries
            .iter()
            .map(|(key, e)| Reverse((e.expires_at, e.generation, *key)))
            .collect();
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TypingKey {
        TypingKey {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn only_first_start_transitions() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();

        assert!(tracker.start(k, t0));
        assert!(!tracker.start(k, t0 + Duration::from_millis(500)));
        assert!(tracker.is_typing(k));
    }

    #[test]
    fn expires_exactly_once_after_ttl() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();
        tracker.start(k, t0);

        assert!(tracker.expire(t0 + Duration::from_millis(2999)).is_empty());
        assert_eq!(tracker.expire(t0 + Duration::from_millis(3000)), vec![k]);
        assert!(tracker.expire(t0 + Duration::from_secs(10)).is_empty());
        assert!(!tracker.is_typing(k));
    }

    #[test]
    fn refresh_pushes_deadline_out() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();
        tracker.start(k, t0);
        tracker.start(k, t0 + Duration::from_secs(2));

        // The first deadline is stale now.
        assert!(tracker.expire(t0 + Duration::from_secs(3)).is_empty());
        assert!(tracker.is_typing(k));
        assert_eq!(tracker.expire(t0 + Duration::from_secs(5)), vec![k]);
    }

    #[test]
    fn explicit_stop_cancels_pending_expiry() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();
        tracker.start(k, t0);

        assert!(tracker.stop(k));
        assert!(!tracker.stop(k));
        assert!(tracker.expire(t0 + Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn restart_after_stop_is_a_new_cycle() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();
        tracker.start(k, t0);
        tracker.stop(k);

        assert!(tracker.start(k, t0 + Duration::from_secs(1)));
        // Old heap entry from the first cycle must not end the second one early.
        assert!(tracker.expire(t0 + Duration::from_secs(3)).is_empty());
        assert_eq!(tracker.expire(t0 + Duration::from_secs(4)), vec![k]);
    }

    #[test]
    fn stop_user_clears_every_conversation() {
        let mut tracker = TypingTracker::default();
        let user = Uuid::new_v4();
        let t0 = Instant::now();
        let a = TypingKey { conversation_id: Uuid::new_v4(), user_id: user };
        let b = TypingKey { conversation_id: Uuid::new_v4(), user_id: user };
        let other = key();
        tracker.start(a, t0);
        tracker.start(b, t0);
        tracker.start(other, t0);

        let mut stopped = tracker.stop_user(user);
        stopped.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(stopped, expected);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.expire(t0 + Duration::from_secs(3)), vec![other]);
    }

    #[test]
    fn heap_stays_bounded_under_refresh_storm() {
        let mut tracker = TypingTracker::default();
        let k = key();
        let t0 = Instant::now();
        for i in 0..10_000u64 {
            tracker.start(k, t0 + Duration::from_millis(i));
        }
        assert!(tracker.deadlines.len() <= HEAP_SLACK + 65);
        assert_eq!(tracker.expire(t0 + Duration::from_secs(20)), vec![k]);
    }
}
