//! Raw reaction records and their per-message summaries.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::bounded::BoundedSet;
use crate::model::Reaction;
use crate::phone::{normalize_phone, phones_match};
use crate::state::ReactionSummary;

const TOMBSTONE_CAP: usize = 4096;

/// Groups raw reactions by `(message_id, emoji)`. Each `(message_id, phone, emoji)` triple
/// contributes once no matter how many raw records carry it. Output is ordered by message id,
/// then by first appearance of the emoji on that message.
pub fn aggregate(raw: &[Reaction], self_phone: Option<&str>) -> Vec<ReactionSummary> {
    let mut sorted: Vec<&Reaction> = raw.iter().collect();
    sorted.sort_by_key(|r| (r.message_id, r.created_at, r.id));

    let mut seen: HashSet<(i64, String, &str)> = HashSet::new();
    let mut grouped: BTreeMap<i64, Vec<ReactionSummary>> = BTreeMap::new();
    for r in sorted {
        let phone = normalize_phone(&r.phone);
        if !seen.insert((r.message_id, phone.clone(), r.emoji.as_str())) {
            continue;
        }
        let per_message = grouped.entry(r.message_id).or_default();
        let idx = match per_message.iter().position(|s| s.emoji == r.emoji) {
            Some(idx) => idx,
            None => {
                per_message.push(ReactionSummary {
                    message_id: r.message_id,
                    emoji: r.emoji.clone(),
                    count: 0,
                    phones: vec![],
                    reacted_by_me: false,
                });
                per_message.len() - 1
            }
        };
        let summary = &mut per_message[idx];
        summary.count += 1;
        if self_phone.is_some_and(|me| phones_match(me, &phone)) {
            summary.reacted_by_me = true;
        }
        summary.phones.push(phone);
    }
    grouped.into_values().flatten().collect()
}

/// Raw reaction list fed by fetched history and by push events.
///
/// Removals leave a tombstone so a refetch that has not caught up yet cannot bring a removed
/// reaction back.
#[derive(Debug)]
pub struct ReactionBook {
    by_id: HashMap<i64, Reaction>,
    removed: BoundedSet<i64>,
}

impl Default for ReactionBook {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            removed: BoundedSet::new(TOMBSTONE_CAP),
        }
    }
}

impl ReactionBook {
    /// `false` when the id is already known (replayed add) or was removed earlier.
    pub fn add(&mut self, reaction: Reaction) -> bool {
        if self.removed.contains(&reaction.id) || self.by_id.contains_key(&reaction.id) {
            return false;
        }
        self.by_id.insert(reaction.id, reaction);
        true
    }

    /// Removes the reaction and any duplicate record of the same `(message, phone, emoji)`
    /// triple, since they all stand for one reaction. `false` when the id is unknown.
    pub fn remove(&mut self, reaction_id: i64) -> bool {
        let Some(gone) = self.by_id.remove(&reaction_id) else {
            return false;
        };
        self.removed.insert(reaction_id);
        let duplicates: Vec<i64> = self
            .by_id
            .values()
            .filter(|r| {
                r.message_id == gone.message_id
                    && r.emoji == gone.emoji
                    && phones_match(&r.phone, &gone.phone)
            })
            .map(|r| r.id)
            .collect();
        for id in duplicates {
            self.by_id.remove(&id);
            self.removed.insert(id);
        }
        true
    }

    /// Seeds from reactions embedded in fetched messages.
    pub fn absorb_fetched<'a>(&mut self, reactions: impl IntoIterator<Item = &'a Reaction>) {
        for r in reactions {
            self.add(r.clone());
        }
    }

    pub fn summaries(&self, self_phone: Option<&str>) -> HashMap<i64, Vec<ReactionSummary>> {
        let raw: Vec<Reaction> = self.by_id.values().cloned().collect();
        let mut out: HashMap<i64, Vec<ReactionSummary>> = HashMap::new();
        for s in aggregate(&raw, self_phone) {
            out.entry(s.message_id).or_default().push(s);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: &str = "5511900000000";
    const ANA: &str = "5511911111111";
    const BIA: &str = "5511922222222";

    fn reaction(id: i64, message_id: i64, phone: &str, emoji: &str) -> Reaction {
        Reaction {
            id,
            message_id,
            phone: phone.into(),
            emoji: emoji.into(),
            created_at: id * 10,
        }
    }

    #[test]
    fn identical_triples_count_once() {
        let raw = vec![
            reaction(1, 7, ANA, "👍"),
            reaction(2, 7, ANA, "👍"),
            reaction(3, 7, "+55 11 91111-1111", "👍"),
        ];
        let out = aggregate(&raw, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].count, 1);
        assert_eq!(out[0].phones, vec![ANA.to_string()]);
    }

    #[test]
    fn groups_by_message_and_emoji() {
        let raw = vec![
            reaction(1, 7, ANA, "👍"),
            reaction(2, 7, BIA, "👍"),
            reaction(3, 7, ME, "❤️"),
            reaction(4, 8, BIA, "👍"),
        ];
        let out = aggregate(&raw, Some(ME));
        assert_eq!(out.len(), 3);
        assert_eq!((out[0].message_id, out[0].emoji.as_str(), out[0].count), (7, "👍", 2));
        assert!(!out[0].reacted_by_me);
        assert_eq!((out[1].message_id, out[1].emoji.as_str()), (7, "❤️"));
        assert!(out[1].reacted_by_me);
        assert_eq!((out[2].message_id, out[2].count), (8, 1));
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let mut book = ReactionBook::default();
        assert!(book.add(reaction(1, 7, ANA, "👍")));
        assert!(!book.add(reaction(1, 7, ANA, "👍")));
        assert!(book.add(reaction(2, 7, BIA, "👍")));
        assert_eq!(book.summaries(None)[&7][0].count, 2);

        assert!(book.remove(1));
        assert!(!book.remove(1));
        assert!(!book.remove(99));
        assert_eq!(book.summaries(None)[&7][0].count, 1);
    }

    #[test]
    fn empty_summary_is_dropped() {
        let mut book = ReactionBook::default();
        book.add(reaction(1, 7, ANA, "👍"));
        book.remove(1);
        assert!(!book.summaries(None).contains_key(&7));
        assert!(book.is_empty());
    }

    #[test]
    fn removing_one_record_drops_its_duplicates() {
        let mut book = ReactionBook::default();
        book.add(reaction(1, 7, ANA, "👍"));
        book.add(reaction(2, 7, ANA, "👍"));
        assert_eq!(book.summaries(None)[&7][0].count, 1);
        assert!(book.remove(2));
        assert!(book.summaries(None).is_empty());
        assert!(!book.remove(1));
    }

    #[test]
    fn stale_fetch_does_not_resurrect_removed_reaction() {
        let mut book = ReactionBook::default();
        let r = reaction(1, 7, ANA, "👍");
        book.add(r.clone());
        book.remove(1);
        book.absorb_fetched([&r]);
        assert!(book.is_empty());
    }

    #[test]
    fn tombstones_stay_bounded() {
        let mut book = ReactionBook::default();
        let total = TOMBSTONE_CAP as i64 + 100;
        for id in 1..=total {
            book.add(reaction(id, id, ANA, "👍"));
            assert!(book.remove(id));
        }
        assert!(book.is_empty());
        assert_eq!(book.removed.len(), TOMBSTONE_CAP);
        // The newest removals are still remembered.
        assert!(!book.add(reaction(total, total, ANA, "👍")));
    }
}
