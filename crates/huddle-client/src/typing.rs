use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use huddle_types::events::ServerEvent;

/// Default lifetime of a typing indicator when no stop event arrives.
const DEFAULT_TTL: Duration = Duration::from_secs(3);

/// Transient typing state, separate from the message sequence. Entries expire
/// on a deadline because the hub does not guarantee a stop event is ever sent
/// (e.g. the typist's socket dropped mid-keystroke).
#[derive(Debug)]
pub struct TypingTracker {
    ttl: Duration,
    entries: HashMap<(Uuid, Uuid), TypingEntry>,
}

#[derive(Debug)]
struct TypingEntry {
    user_name: String,
    deadline: Instant,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Apply a typing event. Non-typing events are ignored.
    pub fn apply_event(&mut self, event: &ServerEvent, now: Instant) {
        match event {
            ServerEvent::UserTyping {
                user_id,
                user_name,
                chat_room_id,
            } => {
                self.entries.insert(
                    (*chat_room_id, *user_id),
                    TypingEntry {
                        user_name: user_name.clone(),
                        deadline: now + self.ttl,
                    },
                );
            }
            ServerEvent::UserStoppedTyping {
                user_id,
                chat_room_id,
                ..
            } => {
                self.entries.remove(&(*chat_room_id, *user_id));
            }
            _ => {}
        }
    }

    /// Users currently typing in a room, pruning everything expired.
    pub fn typing_in(&mut self, room_id: Uuid, now: Instant) -> Vec<(Uuid, String)> {
        self.entries.retain(|_, entry| entry.deadline > now);

        let mut typing: Vec<(Uuid, String)> = self
            .entries
            .iter()
            .filter(|((room, _), _)| *room == room_id)
            .map(|((_, user), entry)| (*user, entry.user_name.clone()))
            .collect();
        typing.sort_by(|a, b| a.1.cmp(&b.1));
        typing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing(room: Uuid, user: Uuid, name: &str) -> ServerEvent {
        ServerEvent::UserTyping {
            user_id: user,
            user_name: name.into(),
            chat_room_id: room,
        }
    }

    #[test]
    fn indicator_expires_without_stop_event() {
        let mut tracker = TypingTracker::with_ttl(Duration::from_secs(3));
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.apply_event(&typing(room, user, "ana"), t0);
        assert_eq!(tracker.typing_in(room, t0 + Duration::from_secs(2)).len(), 1);
        assert!(tracker.typing_in(room, t0 + Duration::from_secs(4)).is_empty());
    }

    #[test]
    fn stop_event_clears_immediately() {
        let mut tracker = TypingTracker::with_ttl(Duration::from_secs(3));
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.apply_event(&typing(room, user, "ana"), t0);
        tracker.apply_event(
            &ServerEvent::UserStoppedTyping {
                user_id: user,
                user_name: "ana".into(),
                chat_room_id: room,
            },
            t0,
        );
        assert!(tracker.typing_in(room, t0).is_empty());
    }

    #[test]
    fn repeated_typing_extends_the_deadline() {
        let mut tracker = TypingTracker::with_ttl(Duration::from_secs(3));
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.apply_event(&typing(room, user, "ana"), t0);
        tracker.apply_event(&typing(room, user, "ana"), t0 + Duration::from_secs(2));
        assert_eq!(tracker.typing_in(room, t0 + Duration::from_secs(4)).len(), 1);
    }

    #[test]
    fn rooms_are_tracked_independently() {
        let mut tracker = TypingTracker::with_ttl(Duration::from_secs(3));
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
        let user = Uuid::new_v4();
        let t0 = Instant::now();

        tracker.apply_event(&typing(r1, user, "ana"), t0);
        assert_eq!(tracker.typing_in(r1, t0).len(), 1);
        assert!(tracker.typing_in(r2, t0).is_empty());
    }
}
