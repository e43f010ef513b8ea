//! The merge of fetched history, status overrides and pending echoes into one ordered view.
//!
//! `merge` is a pure function: same inputs, same output, and feeding it a history that
//! already contains a message (from a refetch and from a live event) yields that message
//! once. Callers rebuild the view from scratch on every change instead of patching it.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::echo::PendingEcho;
use crate::model::{Message, StatusPatch};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimelineEntry {
    DayBoundary { date: NaiveDate },
    Message { message: Message, local: bool },
}

impl TimelineEntry {
    pub fn message(&self) -> Option<&Message> {
        match self {
            TimelineEntry::Message { message, .. } => Some(message),
            TimelineEntry::DayBoundary { .. } => None,
        }
    }
}

pub fn merge(
    history: &[Message],
    overrides: &HashMap<i64, StatusPatch>,
    echoes: &[PendingEcho],
    offset: FixedOffset,
) -> Vec<TimelineEntry> {
    // Duplicate ids collapse to the copy furthest along its status path.
    let mut confirmed: BTreeMap<i64, Message> = BTreeMap::new();
    for m in history {
        match confirmed.get(&m.id) {
            Some(existing) if existing.status.rank() >= m.status.rank() => {}
            _ => {
                confirmed.insert(m.id, m.clone());
            }
        }
    }
    for (id, patch) in overrides {
        if let Some(m) = confirmed.get_mut(id) {
            patch.apply_to(m);
        }
    }

    let confirmed_ids: HashSet<i64> = confirmed.keys().copied().collect();
    let mut rows: Vec<(Message, bool)> = confirmed.into_values().map(|m| (m, false)).collect();
    rows.extend(
        echoes
            .iter()
            .filter(|e| e.is_unmatched())
            .filter(|e| !e.ack.as_ref().is_some_and(|a| confirmed_ids.contains(&a.id)))
            .map(|e| (e.to_message(), true)),
    );
    rows.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut out = Vec::with_capacity(rows.len() + 4);
    let mut last_day: Option<NaiveDate> = None;
    for (message, local) in rows {
        let day = calendar_day(message.created_at, offset);
        if let (Some(prev), Some(day)) = (last_day, day) {
            if prev != day {
                out.push(TimelineEntry::DayBoundary { date: day });
            }
        }
        if day.is_some() {
            last_day = day;
        }
        out.push(TimelineEntry::Message { message, local });
    }
    out
}

pub fn calendar_day(millis: i64, offset: FixedOffset) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.with_timezone(&offset).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{EchoBook, SendAck};
    use crate::model::{Direction, MessageStatus};

    const X: &str = "5511999990000";
    // 2024-03-01T10:00:00Z
    const T10: i64 = 1_709_287_200_000;
    const MIN: i64 = 60_000;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn msg(id: i64, at: i64, direction: Direction, content: &str) -> Message {
        Message {
            id,
            phone: X.into(),
            direction,
            content: content.into(),
            status: MessageStatus::Sent,
            media: None,
            quoted_message_id: None,
            sender_name: None,
            created_at: at,
            read_at: None,
            reactions: vec![],
        }
    }

    fn ids(view: &[TimelineEntry]) -> Vec<i64> {
        view.iter().filter_map(|e| e.message().map(|m| m.id)).collect()
    }

    #[test]
    fn live_message_lands_after_history() {
        let history = vec![
            msg(1, T10, Direction::Inbound, "A"),
            msg(2, T10 + MIN, Direction::Inbound, "B"),
            msg(3, T10 + 2 * MIN, Direction::Inbound, "C"),
        ];
        let view = merge(&history, &HashMap::new(), &[], utc());
        assert_eq!(ids(&view), vec![1, 2, 3]);
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn duplicate_ids_collapse_to_most_advanced_status() {
        let mut read = msg(2, T10, Direction::Outbound, "B");
        read.status = MessageStatus::Read;
        let history = vec![read, msg(2, T10, Direction::Outbound, "B"), msg(1, T10, Direction::Inbound, "A")];
        let view = merge(&history, &HashMap::new(), &[], utc());
        assert_eq!(ids(&view), vec![1, 2]);
        assert_eq!(view[1].message().unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn overrides_patch_matching_ids_only() {
        let history = vec![msg(2, T10, Direction::Outbound, "B")];
        let mut overrides = HashMap::new();
        overrides.insert(
            2,
            StatusPatch {
                status: MessageStatus::Read,
                read_at: Some(T10 + MIN),
            },
        );
        overrides.insert(
            99,
            StatusPatch {
                status: MessageStatus::Read,
                read_at: None,
            },
        );
        let view = merge(&history, &overrides, &[], utc());
        assert_eq!(ids(&view), vec![2]);
        let m = view[0].message().unwrap();
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(m.read_at, Some(T10 + MIN));
    }

    #[test]
    fn echo_sorts_before_same_timestamp_confirmed_message() {
        let mut book = EchoBook::new(120_000);
        let echo = book.create(X, "pending".into(), None, T10);
        let history = vec![msg(7, T10, Direction::Inbound, "theirs")];
        let view = merge(&history, &HashMap::new(), book.for_phone(X), utc());
        assert_eq!(ids(&view), vec![echo.local_id, 7]);
        assert!(matches!(view[0], TimelineEntry::Message { local: true, .. }));
    }

    #[test]
    fn acked_echo_hidden_once_its_message_is_present() {
        let mut book = EchoBook::new(120_000);
        let echo = book.create(X, "Hello".into(), None, T10);
        book.acknowledge(
            echo.local_id,
            SendAck {
                id: 50,
                status: MessageStatus::Sent,
            },
        );
        let before = merge(&[], &HashMap::new(), book.for_phone(X), utc());
        assert_eq!(ids(&before), vec![echo.local_id]);
        assert_eq!(before[0].message().unwrap().status, MessageStatus::Sent);

        let history = vec![msg(50, T10 + 3 * MIN, Direction::Outbound, "Hello")];
        let after = merge(&history, &HashMap::new(), book.for_phone(X), utc());
        assert_eq!(ids(&after), vec![50]);
    }

    #[test]
    fn day_boundaries_between_days_only() {
        let day = 24 * 60 * MIN;
        let history = vec![
            msg(1, T10, Direction::Inbound, "a"),
            msg(2, T10 + MIN, Direction::Inbound, "b"),
            msg(3, T10 + day, Direction::Inbound, "c"),
        ];
        let view = merge(&history, &HashMap::new(), &[], utc());
        assert_eq!(view.len(), 4);
        assert!(matches!(view[0], TimelineEntry::Message { .. }));
        assert_eq!(
            view[2],
            TimelineEntry::DayBoundary {
                date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
            }
        );
    }

    #[test]
    fn day_boundary_respects_utc_offset() {
        // 02:30Z and 03:30Z are different days at UTC-3.
        let a = T10 - 7 * 60 * MIN - 30 * MIN;
        let b = a + 60 * MIN;
        let history = vec![msg(1, a, Direction::Inbound, "a"), msg(2, b, Direction::Inbound, "b")];
        assert_eq!(merge(&history, &HashMap::new(), &[], utc()).len(), 2);
        let brt = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(merge(&history, &HashMap::new(), &[], brt).len(), 3);
    }

    #[test]
    fn merge_is_idempotent_and_input_order_independent() {
        let mut book = EchoBook::new(120_000);
        book.create(X, "mine".into(), None, T10 + 30_000);
        let a = msg(1, T10, Direction::Inbound, "A");
        let b = msg(2, T10 + MIN, Direction::Outbound, "B");
        let forward = merge(&[a.clone(), b.clone()], &HashMap::new(), book.for_phone(X), utc());
        let again = merge(&[a.clone(), b.clone()], &HashMap::new(), book.for_phone(X), utc());
        let reversed = merge(&[b.clone(), a.clone(), b], &HashMap::new(), book.for_phone(X), utc());
        assert_eq!(forward, again);
        assert_eq!(forward, reversed);
        assert_eq!(ids(&forward), vec![1, -1, 2]);
    }
}
