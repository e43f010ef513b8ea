//! Optimistic outbound messages awaiting server confirmation.
//!
//! Every echo gets a negative local id, so it orders below any server id at the same
//! timestamp. An echo leaves the book when a confirmed outbound message for its conversation
//! is observed: the one whose id the send ack reported, otherwise the oldest unacknowledged
//! pending echo (FIFO). Failed echoes stay until retried or discarded.

use std::collections::HashMap;

use crate::bounded::BoundedSet;
use crate::model::{Direction, Message, MessageStatus};
use crate::phone::contact_key;

const OBSERVED_CAP: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EchoState {
    Pending,
    Confirmed { id: i64 },
    Failed { reason: String },
}

/// What the server answered to `send_message`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendAck {
    pub id: i64,
    pub status: MessageStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEcho {
    pub local_id: i64,
    pub phone: String,
    pub content: String,
    pub lead_id: Option<i64>,
    pub created_at: i64,
    pub state: EchoState,
    pub ack: Option<SendAck>,
}

impl PendingEcho {
    pub fn is_unmatched(&self) -> bool {
        !matches!(self.state, EchoState::Confirmed { .. })
    }

    /// Synthetic message shown in place of the not-yet-confirmed one.
    pub fn to_message(&self) -> Message {
        let status = match (&self.state, &self.ack) {
            (EchoState::Failed { .. }, _) => MessageStatus::Failed,
            (_, Some(ack)) => ack.status,
            _ => MessageStatus::Pending,
        };
        Message {
            id: self.local_id,
            phone: self.phone.clone(),
            direction: Direction::Outbound,
            content: self.content.clone(),
            status,
            media: None,
            quoted_message_id: None,
            sender_name: None,
            created_at: self.created_at,
            read_at: None,
            reactions: vec![],
        }
    }
}

#[derive(Debug)]
pub struct EchoBook {
    skew_ms: i64,
    next_local_id: i64,
    last_created_at: i64,
    by_phone: HashMap<String, Vec<PendingEcho>>,
    // Recently confirmed outbound ids per conversation; re-observing one never retires a
    // second echo.
    observed: BoundedSet<(String, i64)>,
}

impl EchoBook {
    pub fn new(skew_ms: u64) -> Self {
        Self {
            skew_ms: skew_ms as i64,
            next_local_id: -1,
            last_created_at: 0,
            by_phone: HashMap::new(),
            observed: BoundedSet::new(OBSERVED_CAP),
        }
    }

    /// Creates a pending echo. Timestamps are kept strictly increasing so rapid sends never
    /// tie with each other.
    pub fn create(
        &mut self,
        phone: &str,
        content: String,
        lead_id: Option<i64>,
        now: i64,
    ) -> PendingEcho {
        let key = contact_key(&self.by_phone, phone);
        let local_id = self.next_local_id;
        self.next_local_id -= 1;
        let created_at = now.max(self.last_created_at + 1);
        self.last_created_at = created_at;

        let echo = PendingEcho {
            local_id,
            phone: key.clone(),
            content,
            lead_id,
            created_at,
            state: EchoState::Pending,
            ack: None,
        };
        self.by_phone.entry(key).or_default().push(echo.clone());
        echo
    }

    /// Feeds one confirmed message. Returns the echo it retired, if any.
    pub fn observe_confirmed(&mut self, message: &Message) -> Option<PendingEcho> {
        if message.direction != Direction::Outbound || message.id <= 0 {
            return None;
        }
        let key = contact_key(&self.by_phone, &message.phone);
        if !self.observed.insert((key.clone(), message.id)) {
            return None;
        }
        let skew_ms = self.skew_ms;
        let echoes = self.by_phone.get_mut(&key)?;

        let idx = echoes
            .iter()
            .position(|e| e.ack.as_ref().is_some_and(|a| a.id == message.id))
            .or_else(|| {
                echoes.iter().position(|e| {
                    e.state == EchoState::Pending
                        && e.ack.is_none()
                        && message.created_at >= e.created_at - skew_ms
                })
            })?;
        let mut retired = echoes.remove(idx);
        retired.state = EchoState::Confirmed { id: message.id };
        if echoes.is_empty() {
            self.by_phone.remove(&key);
        }
        Some(retired)
    }

    /// Records the send ack. When the acked id was already observed the echo is retired on
    /// the spot and returned.
    pub fn acknowledge(&mut self, local_id: i64, ack: SendAck) -> Option<PendingEcho> {
        let (key, idx) = self.locate(local_id)?;
        let already_observed = self.observed.contains(&(key.clone(), ack.id));
        let echoes = self.by_phone.get_mut(&key)?;
        if already_observed {
            let mut retired = echoes.remove(idx);
            retired.state = EchoState::Confirmed { id: ack.id };
            if echoes.is_empty() {
                self.by_phone.remove(&key);
            }
            return Some(retired);
        }
        echoes[idx].ack = Some(ack);
        None
    }

    pub fn fail(&mut self, local_id: i64, reason: String) -> bool {
        match self.get_mut(local_id) {
            Some(echo) if echo.state == EchoState::Pending => {
                echo.state = EchoState::Failed { reason };
                true
            }
            _ => false,
        }
    }

    /// Failed -> Pending. Returns the echo to resubmit.
    pub fn retry(&mut self, local_id: i64) -> Option<PendingEcho> {
        let echo = self.get_mut(local_id)?;
        if !matches!(echo.state, EchoState::Failed { .. }) {
            return None;
        }
        echo.state = EchoState::Pending;
        echo.ack = None;
        Some(echo.clone())
    }

    /// Only failed echoes can be discarded.
    pub fn discard(&mut self, local_id: i64) -> bool {
        let Some((key, idx)) = self.locate(local_id) else {
            return false;
        };
        let Some(echoes) = self.by_phone.get_mut(&key) else {
            return false;
        };
        if !matches!(echoes[idx].state, EchoState::Failed { .. }) {
            return false;
        }
        echoes.remove(idx);
        if echoes.is_empty() {
            self.by_phone.remove(&key);
        }
        true
    }

    pub fn get(&self, local_id: i64) -> Option<&PendingEcho> {
        self.by_phone
            .values()
            .flat_map(|v| v.iter())
            .find(|e| e.local_id == local_id)
    }

    /// Unmatched echoes for one conversation, oldest first.
    pub fn for_phone(&self, phone: &str) -> &[PendingEcho] {
        let key = contact_key(&self.by_phone, phone);
        self.by_phone.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn locate(&self, local_id: i64) -> Option<(String, usize)> {
        self.by_phone.iter().find_map(|(k, v)| {
            v.iter()
                .position(|e| e.local_id == local_id)
                .map(|idx| (k.clone(), idx))
        })
    }

    fn get_mut(&mut self, local_id: i64) -> Option<&mut PendingEcho> {
        self.by_phone
            .values_mut()
            .flat_map(|v| v.iter_mut())
            .find(|e| e.local_id == local_id)
    }
}
