use std::collections::HashSet;

use crate::model::{Direction, Message, MessageStatus};
use crate::phone::phones_match;

/// Issues mark-as-read once per unread inbound message of the open conversation.
///
/// The submitted set belongs to the open conversation and is dropped when it changes.
#[derive(Debug, Default)]
pub struct ReadReceipts {
    phone: Option<String>,
    submitted: HashSet<i64>,
}

impl ReadReceipts {
    pub fn open(&mut self, phone: &str) {
        if self.phone.as_deref().is_some_and(|p| phones_match(p, phone)) {
            return;
        }
        self.phone = Some(phone.to_string());
        self.submitted.clear();
    }

    pub fn close(&mut self) {
        self.phone = None;
        self.submitted.clear();
    }

    /// Ids to submit now. Each returned id is recorded, so it is never returned again while
    /// the conversation stays open.
    pub fn collect<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) -> Vec<i64> {
        if self.phone.is_none() {
            return vec![];
        }
        let mut out = vec![];
        for m in messages {
            if m.direction == Direction::Inbound
                && m.status != MessageStatus::Read
                && m.id > 0
                && self.submitted.insert(m.id)
            {
                out.push(m.id);
            }
        }
        out
    }

    pub fn submitted_len(&self) -> usize {
        self.submitted.len()
    }
}
