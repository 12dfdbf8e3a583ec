//! The expiry heap: a binary min-heap of expiration deadlines.
//!
//! Each heap entry points at a keyspace item by key, and every item with
//! a deadline stores its current slot in `heap_index`. The back-pointer
//! makes removal of an arbitrary item O(log n) without scanning, at the
//! cost that every sift, swap, and pop must update the `heap_index` of
//! each entry it moves. All heap operations therefore take the item map
//! so the pointers stay consistent inside a single critical section.

use ahash::AHashMap;

use crate::keyspace::Item;

pub(crate) type Items = AHashMap<String, Item>;

/// One heap slot: the owning key plus a copy of its deadline, so
/// ordering comparisons never touch the map.
#[derive(Debug, Clone)]
pub(crate) struct HeapEntry {
    pub(crate) key: String,
    pub(crate) expires_at: i64,
}

/// Min-heap over item deadlines. The root is always the earliest
/// deadline among items that expire at all.
#[derive(Debug, Default)]
pub struct ExpiryHeap {
    entries: Vec<HeapEntry>,
}

impl ExpiryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[HeapEntry] {
        &self.entries
    }

    /// Inserts an entry for `key` and records the slot in the item.
    pub(crate) fn push(&mut self, key: &str, expires_at: i64, items: &mut Items) {
        let idx = self.entries.len();
        self.entries.push(HeapEntry {
            key: key.to_owned(),
            expires_at,
        });
        set_index(items, key, Some(idx));
        self.sift_up(idx, items);
    }

    /// Removes the entry at `idx`, clearing the back-pointer of the
    /// removed item (if it is still in the map) and repairing the slot
    /// of whichever entry moved into its place.
    pub(crate) fn remove(&mut self, idx: usize, items: &mut Items) -> Option<HeapEntry> {
        if idx >= self.entries.len() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(idx, last);
        let removed = self.entries.pop().expect("heap entry present after bounds check");
        set_index(items, &removed.key, None);

        if idx < self.entries.len() {
            set_index(items, &self.entries[idx].key, Some(idx));
            self.sift_down(idx, items);
            self.sift_up(idx, items);
        }
        Some(removed)
    }

    /// Pops the root if its deadline is at or before `now`. Returns the
    /// key of the popped entry.
    pub(crate) fn pop_due(&mut self, now: i64, items: &mut Items) -> Option<String> {
        let root = self.entries.first()?;
        if root.expires_at > now {
            return None;
        }
        self.remove(0, items).map(|entry| entry.key)
    }

    fn sift_up(&mut self, mut idx: usize, items: &mut Items) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].expires_at < self.entries[parent].expires_at {
                self.swap_entries(idx, parent, items);
                idx = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut idx: usize, items: &mut Items) {
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < self.entries.len()
                && self.entries[left].expires_at < self.entries[smallest].expires_at
            {
                smallest = left;
            }
            if right < self.entries.len()
                && self.entries[right].expires_at < self.entries[smallest].expires_at
            {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.swap_entries(idx, smallest, items);
            idx = smallest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize, items: &mut Items) {
        self.entries.swap(a, b);
        set_index(items, &self.entries[a].key, Some(a));
        set_index(items, &self.entries[b].key, Some(b));
    }
}

fn set_index(items: &mut Items, key: &str, idx: Option<usize>) {
    if let Some(item) = items.get_mut(key) {
        item.heap_index = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Value, ValueKind};

    fn item(expires_at: i64) -> Item {
        Item {
            value: Value::String("v".into()),
            kind: ValueKind::String,
            expires_at,
            heap_index: None,
        }
    }

    fn setup(deadlines: &[(&str, i64)]) -> (ExpiryHeap, Items) {
        let mut heap = ExpiryHeap::new();
        let mut items = Items::default();
        for (key, at) in deadlines {
            items.insert((*key).to_owned(), item(*at));
            heap.push(key, *at, &mut items);
        }
        (heap, items)
    }

    fn assert_consistent(heap: &ExpiryHeap, items: &Items) {
        // every entry's back-pointer matches its slot
        for (idx, entry) in heap.entries().iter().enumerate() {
            let item = items.get(&entry.key).expect("heap entry has an item");
            assert_eq!(item.heap_index, Some(idx), "back-pointer for {}", entry.key);
            assert_eq!(item.expires_at, entry.expires_at);
        }
        // min-heap property
        for idx in 1..heap.len() {
            let parent = (idx - 1) / 2;
            assert!(
                heap.entries()[parent].expires_at <= heap.entries()[idx].expires_at,
                "heap property violated at {idx}"
            );
        }
    }

    #[test]
    fn root_is_minimum() {
        let (heap, items) = setup(&[("a", 50), ("b", 10), ("c", 30)]);
        assert_eq!(heap.entries()[0].key, "b");
        assert_consistent(&heap, &items);
    }

    #[test]
    fn pop_due_in_deadline_order() {
        let (mut heap, mut items) = setup(&[("a", 50), ("b", 10), ("c", 30)]);
        assert_eq!(heap.pop_due(100, &mut items), Some("b".into()));
        assert_eq!(heap.pop_due(100, &mut items), Some("c".into()));
        assert_eq!(heap.pop_due(100, &mut items), Some("a".into()));
        assert_eq!(heap.pop_due(100, &mut items), None);
    }

    #[test]
    fn pop_due_respects_now() {
        let (mut heap, mut items) = setup(&[("a", 50), ("b", 10)]);
        assert_eq!(heap.pop_due(20, &mut items), Some("b".into()));
        assert_eq!(heap.pop_due(20, &mut items), None);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn remove_middle_repairs_pointers() {
        let (mut heap, mut items) = setup(&[("a", 10), ("b", 20), ("c", 30), ("d", 40), ("e", 25)]);
        let idx = items["c"].heap_index.unwrap();
        let removed = heap.remove(idx, &mut items).unwrap();
        assert_eq!(removed.key, "c");
        items.remove("c");
        assert_eq!(heap.len(), 4);
        assert_consistent(&heap, &items);
    }

    #[test]
    fn remove_last_entry() {
        let (mut heap, mut items) = setup(&[("a", 10), ("b", 20)]);
        let idx = items["b"].heap_index.unwrap();
        heap.remove(idx, &mut items).unwrap();
        items.remove("b");
        assert_consistent(&heap, &items);
    }

    #[test]
    fn randomized_push_remove_stays_consistent() {
        // deterministic xorshift so failures reproduce
        let mut state: u64 = 0x9E3779B97F4A7C15;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut heap = ExpiryHeap::new();
        let mut items = Items::default();
        let mut alive: Vec<String> = Vec::new();

        for round in 0..2_000 {
            let roll = rand() % 100;
            if roll < 60 || alive.is_empty() {
                let key = format!("key{round}");
                let at = (rand() % 10_000) as i64 + 1;
                items.insert(key.clone(), item(at));
                heap.push(&key, at, &mut items);
                alive.push(key);
            } else {
                let pick = (rand() as usize) % alive.len();
                let key = alive.swap_remove(pick);
                let idx = items[&key].heap_index.unwrap();
                heap.remove(idx, &mut items);
                items.remove(&key);
            }

            if round % 100 == 0 {
                assert_consistent(&heap, &items);
            }
        }
        assert_consistent(&heap, &items);
        assert_eq!(heap.len(), alive.len());
    }
}
