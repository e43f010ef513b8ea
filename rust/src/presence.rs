//! Per-contact ephemeral state: typing (a pulse with a TTL) and presence (a level).
//!
//! The tracker never owns a clock or a timer. `typing_start` hands back a [`TypingTimer`]
//! describing when the indicator must be cleared; whoever drives the event loop arms it and
//! reports back through [`PresenceTracker::expire`]. Generations make stale timers inert.

use std::collections::HashMap;

use crate::phone::contact_key;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingTimer {
    pub phone: String,
    pub generation: u64,
    pub fires_at: i64,
}

#[derive(Clone, Debug)]
struct TypingRecord {
    is_typing: bool,
    last_event_at: i64,
    generation: u64,
}

#[derive(Debug)]
pub struct PresenceTracker {
    ttl_ms: i64,
    typing: HashMap<String, TypingRecord>,
    online: HashMap<String, bool>,
    next_generation: u64,
}

impl PresenceTracker {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: ttl_ms as i64,
            typing: HashMap::new(),
            online: HashMap::new(),
            next_generation: 0,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Returns the timer to arm, or `None` when the event is a replay or older than what
    /// was already seen for this phone.
    pub fn typing_start(&mut self, phone: &str, at: i64) -> Option<TypingTimer> {
        let key = contact_key(&self.typing, phone);
        if let Some(rec) = self.typing.get(&key) {
            if at <= rec.last_event_at {
                return None;
            }
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.typing.insert(
            key.clone(),
            TypingRecord {
                is_typing: true,
                last_event_at: at,
                generation,
            },
        );
        Some(TypingTimer {
            phone: key,
            generation,
            fires_at: at + self.ttl_ms,
        })
    }

    /// `true` when the phone was typing. The last seen `at` is kept so a replayed start
    /// cannot revive the indicator.
    pub fn typing_stop(&mut self, phone: &str) -> bool {
        let key = contact_key(&self.typing, phone);
        match self.typing.get_mut(&key) {
            Some(rec) if rec.is_typing => {
                rec.is_typing = false;
                true
            }
            _ => false,
        }
    }

    /// Timer callback. Only the generation that armed the timer may clear the indicator.
    pub fn expire(&mut self, phone: &str, generation: u64) -> bool {
        match self.typing.get_mut(phone) {
            Some(rec) if rec.is_typing && rec.generation == generation => {
                rec.is_typing = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_typing(&self, phone: &str, now: i64) -> bool {
        let key = contact_key(&self.typing, phone);
        self.typing
            .get(&key)
            .is_some_and(|rec| rec.is_typing && now - rec.last_event_at < self.ttl_ms)
    }

    pub fn set_online(&mut self, phone: &str, online: bool) -> bool {
        let key = contact_key(&self.online, phone);
        self.online.insert(key, online) != Some(online)
    }

    pub fn is_online(&self, phone: &str) -> bool {
        let key = contact_key(&self.online, phone);
        self.online.get(&key).copied().unwrap_or(false)
    }

    /// Drops the typing record for a phone. Returns the key so the caller can cancel its
    /// timer.
    pub fn clear_phone(&mut self, phone: &str) -> Option<String> {
        let key = contact_key(&self.typing, phone);
        self.typing.remove(&key).map(|_| key)
    }

    pub fn clear_typing(&mut self) -> Vec<String> {
        self.typing.drain().map(|(k, _)| k).collect()
    }
}
