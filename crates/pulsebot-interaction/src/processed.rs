//! Bounded set of already-handled candidate IDs.

use std::collections::{HashSet, VecDeque};

/// Default number of IDs remembered.
pub const PROCESSED_CAPACITY: usize = 1000;

/// Insertion-ordered set with a hard capacity.
///
/// Inserting into a full set evicts the earliest-inserted ID, so the set
/// always holds the most recent `capacity` distinct IDs.
#[derive(Debug, Clone)]
pub struct ProcessedItems {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl Default for ProcessedItems {
    fn default() -> Self {
        Self::with_capacity(PROCESSED_CAPACITY)
    }
}

impl ProcessedItems {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuild from a persisted list, oldest first. Only the newest
    /// `capacity` entries are kept.
    pub fn from_ordered<I>(ids: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut items = Self::with_capacity(capacity);
        for id in ids {
            items.insert(id);
        }
        items
    }

    /// Returns `false` if the ID was already present (its position is kept).
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.members.contains(&id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.members.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// IDs oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.order.iter().cloned().collect()
    }
}
