//! Insertion-ordered set that forgets its oldest entries past a fixed capacity.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

#[derive(Debug)]
pub(crate) struct BoundedSet<T> {
    cap: usize,
    items: HashSet<T>,
    order: VecDeque<T>,
}

impl<T: Eq + Hash + Clone> BoundedSet<T> {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// `false` when the value was already present.
    pub(crate) fn insert(&mut self, value: T) -> bool {
        if !self.items.insert(value.clone()) {
            return false;
        }
        self.order.push_back(value);
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.items.remove(&old);
            }
        }
        true
    }

    pub(crate) fn contains(&self, value: &T) -> bool {
        self.items.contains(value)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_forgotten_first() {
        let mut set = BoundedSet::new(3);
        for id in 1..=5 {
            assert!(set.insert(id));
        }
        assert_eq!(set.len(), 3);
        assert!(!set.contains(&1));
        assert!(!set.contains(&2));
        assert!(set.contains(&5));
        assert!(!set.insert(5));
        assert_eq!(set.len(), 3);
    }
}
