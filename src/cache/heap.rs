//! Indexed binary min-heap of expiration instants.
//!
//! Each key occupies exactly one slot and the heap tracks every key's slot, so an entry whose
//! expiry changes can be re-sifted from where it sits with [`ExpiryHeap::fix_at`] instead of
//! being searched for.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<K> {
    key: K,
    expires_at: DateTime<Utc>,
}

/// Min-heap keyed by expiration; the root is always the soonest-expiring key.
#[derive(Debug, Clone)]
pub struct ExpiryHeap<K> {
    slots: Vec<Slot<K>>,
    positions: HashMap<K, usize>,
}

impl<K> Default for ExpiryHeap<K> {
    fn default() -> Self {
        Self { slots: Vec::new(), positions: HashMap::new() }
    }
}

impl<K> ExpiryHeap<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot currently holding `key`.
    pub fn position(&self, key: &K) -> Option<usize> {
        self.positions.get(key).copied()
    }

    /// Soonest-expiring key without removing it.
    pub fn peek_min(&self) -> Option<(&K, DateTime<Utc>)> {
        self.slots.first().map(|slot| (&slot.key, slot.expires_at))
    }

    /// Insert a key that is not yet in the heap; returns its final slot.
    ///
    /// A key that is already present is re-prioritised in place instead.
    pub fn push(&mut self, key: K, expires_at: DateTime<Utc>) -> usize {
        if let Some(index) = self.position(&key) {
            return self.fix_at(index, expires_at);
        }
        let index = self.slots.len();
        self.positions.insert(key.clone(), index);
        self.slots.push(Slot { key, expires_at });
        self.sift_up(index)
    }

    /// Remove and return the soonest-expiring key.
    pub fn pop_min(&mut self) -> Option<(K, DateTime<Utc>)> {
        if self.slots.is_empty() {
            return None;
        }
        let last = self.slots.len() - 1;
        self.swap(0, last);
        let slot = self.slots.pop()?;
        self.positions.remove(&slot.key);
        if !self.slots.is_empty() {
            self.sift_down(0);
        }
        Some((slot.key, slot.expires_at))
    }

    /// Change the expiry of the key at `index` and restore heap order; returns its new slot.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn fix_at(&mut self, index: usize, expires_at: DateTime<Utc>) -> usize {
        self.slots[index].expires_at = expires_at;
        let index = self.sift_up(index);
        self.sift_down(index)
    }

    fn sift_up(&mut self, mut index: usize) -> usize {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.slots[index].expires_at >= self.slots[parent].expires_at {
                break;
            }
            self.swap(index, parent);
            index = parent;
        }
        index
    }

    fn sift_down(&mut self, mut index: usize) -> usize {
        let len = self.slots.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.slots[left].expires_at < self.slots[smallest].expires_at {
                smallest = left;
            }
            if right < len && self.slots[right].expires_at < self.slots[smallest].expires_at {
                smallest = right;
            }
            if smallest == index {
                return index;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        self.positions.insert(self.slots[a].key.clone(), a);
        self.positions.insert(self.slots[b].key.clone(), b);
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert_eq!(self.slots.len(), self.positions.len());
        for (index, slot) in self.slots.iter().enumerate() {
            assert_eq!(self.positions.get(&slot.key), Some(&index));
            if index > 0 {
                let parent = (index - 1) / 2;
                assert!(self.slots[parent].expires_at <= slot.expires_at);
            }
        }
    }
}
