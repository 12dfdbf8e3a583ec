//! The keyspace: the process-wide typed key-value store.
//!
//! A `Keyspace` owns a flat `AHashMap<String, Item>` plus the expiry
//! heap. Expired keys are rejected lazily on access and removed
//! proactively by the sweeper. Every mutation emits a journal record
//! through the attached [`LogHook`] while the caller still holds the
//! exclusive lock, so record order always matches mutation order.
//!
//! The keyspace itself cannot fail: journal emission is a non-blocking
//! send and durability errors never propagate to callers.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::compress::Compression;
use crate::durability::{self, LogHook};
use crate::expiry::ExpiryHeap;
use crate::time;
use crate::types::{Value, ValueKind};

/// The unit stored under a key.
#[derive(Debug, Clone)]
pub struct Item {
    pub(crate) value: Value,
    /// Redundant discriminant kept for fast formatting and encoding.
    pub(crate) kind: ValueKind,
    /// Absolute deadline in nanoseconds; 0 means no expiry.
    pub(crate) expires_at: i64,
    /// Slot of this item's entry in the expiry heap, maintained only
    /// for items with a deadline.
    pub(crate) heap_index: Option<usize>,
}

impl Item {
    pub(crate) fn is_expired(&self) -> bool {
        time::is_expired(self.expires_at)
    }
}

/// The core key-value store. Callers serialize access through a single
/// readers-writer lock; nothing in here locks internally.
pub struct Keyspace {
    items: AHashMap<String, Item>,
    heap: ExpiryHeap,
    journal: Option<LogHook>,
    compression: Compression,
}

impl Keyspace {
    /// Creates an empty keyspace with the identity compression policy
    /// and no journal attached.
    pub fn new() -> Self {
        Self::with_compression(Compression::default())
    }

    pub fn with_compression(compression: Compression) -> Self {
        Self {
            items: AHashMap::new(),
            heap: ExpiryHeap::new(),
            journal: None,
            compression,
        }
    }

    /// Attaches the durability journal. Mutations from this point on
    /// emit log records.
    pub fn set_journal(&mut self, hook: LogHook) {
        self.journal = Some(hook);
    }

    /// Unconditional replace. A prior item's heap entry is removed, the
    /// new item installed, and a set record emitted with the verb
    /// matching the value type.
    pub fn set(&mut self, key: &str, value: Value, ttl_nanos: i64) {
        let record = self
            .journal
            .as_ref()
            .map(|_| durability::set_record(key, &value, ttl_nanos, false));
        let value = self.compression.compress(value);
        self.install(key, value, time::expires_at_from_ttl(ttl_nanos));
        self.emit(record);
    }

    /// Atomic set-if-absent. Returns `true` iff the key was absent or
    /// held an already-expired item; otherwise nothing changes.
    pub fn set_if_absent(&mut self, key: &str, value: Value, ttl_nanos: i64) -> bool {
        if let Some(item) = self.items.get(key) {
            if !item.is_expired() {
                return false;
            }
        }
        let record = self
            .journal
            .as_ref()
            .map(|_| durability::set_record(key, &value, ttl_nanos, true));
        let value = self.compression.compress(value);
        self.install(key, value, time::expires_at_from_ttl(ttl_nanos));
        self.emit(record);
        true
    }

    /// Returns the value iff the item exists and is not expired.
    /// Expired items are left in place for the sweeper.
    pub fn get(&self, key: &str) -> Option<Value> {
        let item = self.items.get(key)?;
        if item.is_expired() {
            return None;
        }
        Some(self.compression.decompress(item.value.clone()))
    }

    /// Multi-key lookup with the same visibility rules as [`Self::get`];
    /// misses and expired items are simply absent from the result.
    pub fn get_many(&self, keys: &[String]) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for key in keys {
            if let Some(value) = self.get(key) {
                out.insert(key.clone(), value);
            }
        }
        out
    }

    /// Removes a key. Returns `true` iff a map entry existed (an
    /// expired-but-unswept item still counts as deleted). Emits a
    /// delete record when something was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        let Some(item) = self.items.get(key) else {
            return false;
        };
        if let Some(idx) = item.heap_index {
            self.heap.remove(idx, &mut self.items);
        }
        self.items.remove(key);
        let record = self
            .journal
            .as_ref()
            .map(|_| durability::delete_record(key));
        self.emit(record);
        true
    }

    /// Clears everything. Returns the pre-clear item count. Not
    /// journaled; the caller triggers a snapshot instead so recovery
    /// sees the post-flush state.
    pub fn flush_all(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        self.heap.clear();
        count
    }

    /// Pops expired heap entries and removes their items. Returns the
    /// number of items removed.
    pub fn sweep(&mut self) -> usize {
        let now = time::now_nanos();
        let mut removed = 0;
        while let Some(key) = self.heap.pop_due(now, &mut self.items) {
            self.items.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Snapshot of the current non-expired keys and their type tags.
    /// Ordering is not guaranteed.
    pub fn list_keys(&self) -> Vec<(String, ValueKind)> {
        self.items
            .iter()
            .filter(|(_, item)| !item.is_expired())
            .map(|(key, item)| (key.clone(), item.kind))
            .collect()
    }

    /// Number of map entries, expired-but-unswept items included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over live entries as `(key, value, expires_at)`.
    /// Used by the snapshot writer, which skips expired items at write
    /// time by construction.
    pub fn iter_live(&self) -> impl Iterator<Item = (&str, &Value, i64)> {
        self.items.iter().filter_map(|(key, item)| {
            if item.is_expired() {
                return None;
            }
            Some((key.as_str(), &item.value, item.expires_at))
        })
    }

    /// Installs an entry with an absolute deadline and no journal
    /// emission. Recovery-only: replaying the journal through the
    /// normal mutation path would re-log every record.
    pub fn restore(&mut self, key: String, value: Value, expires_at: i64) {
        let old_idx = self.items.get(&key).and_then(|item| item.heap_index);
        if let Some(idx) = old_idx {
            self.heap.remove(idx, &mut self.items);
        }
        let kind = value.kind();
        self.items.insert(
            key.clone(),
            Item {
                value,
                kind,
                expires_at,
                heap_index: None,
            },
        );
        if expires_at != time::NO_EXPIRY {
            self.heap.push(&key, expires_at, &mut self.items);
        }
    }

    /// Removes a key without journal emission. Recovery-only
    /// counterpart of [`Self::delete`].
    pub fn forget(&mut self, key: &str) -> bool {
        let Some(item) = self.items.get(key) else {
            return false;
        };
        if let Some(idx) = item.heap_index {
            self.heap.remove(idx, &mut self.items);
        }
        self.items.remove(key);
        true
    }

    fn install(&mut self, key: &str, value: Value, expires_at: i64) {
        let old_idx = self.items.get(key).and_then(|item| item.heap_index);
        if let Some(idx) = old_idx {
            self.heap.remove(idx, &mut self.items);
        }
        let kind = value.kind();
        self.items.insert(
            key.to_owned(),
            Item {
                value,
                kind,
                expires_at,
                heap_index: None,
            },
        );
        if expires_at != time::NO_EXPIRY {
            self.heap.push(key, expires_at, &mut self.items);
        }
    }

    fn emit(&self, record: Option<antcache_persistence::LogRecord>) {
        if let (Some(hook), Some(record)) = (self.journal.as_ref(), record) {
            hook.emit(record);
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    const SECOND: i64 = 1_000_000_000;

    fn s(v: &str) -> Value {
        Value::String(v.into())
    }

    fn assert_heap_consistent(ks: &Keyspace) {
        let mut expiring = 0;
        for (key, item) in &ks.items {
            if item.expires_at != time::NO_EXPIRY {
                expiring += 1;
                let idx = item
                    .heap_index
                    .unwrap_or_else(|| panic!("{key} expires but has no heap slot"));
                let entry = &ks.heap.entries()[idx];
                assert_eq!(&entry.key, key);
                assert_eq!(entry.expires_at, item.expires_at);
            } else {
                assert_eq!(item.heap_index, None, "{key} has no expiry but sits in heap");
            }
        }
        assert_eq!(ks.heap.len(), expiring);
        for idx in 1..ks.heap.len() {
            let parent = (idx - 1) / 2;
            assert!(ks.heap.entries()[parent].expires_at <= ks.heap.entries()[idx].expires_at);
        }
    }

    #[test]
    fn set_and_get_string() {
        let mut ks = Keyspace::new();
        ks.set("greet", s("hello world"), 0);
        assert_eq!(ks.get("greet"), Some(s("hello world")));
        assert_eq!(ks.get("missing"), None);
    }

    #[test]
    fn set_replaces_value_and_type() {
        let mut ks = Keyspace::new();
        ks.set("k", s("v"), 0);
        ks.set("k", Value::Array(vec!["a".into(), "b".into()]), 0);
        assert_eq!(ks.get("k"), Some(Value::Array(vec!["a".into(), "b".into()])));
        assert_eq!(ks.len(), 1);
        assert_heap_consistent(&ks);
    }

    #[test]
    fn overwriting_expiring_item_removes_heap_entry() {
        let mut ks = Keyspace::new();
        ks.set("k", s("v1"), 60 * SECOND);
        assert_eq!(ks.heap.len(), 1);
        ks.set("k", s("v2"), 0);
        assert_eq!(ks.heap.len(), 0);
        assert_heap_consistent(&ks);
    }

    #[test]
    fn expired_item_invisible_to_get() {
        let mut ks = Keyspace::new();
        ks.set("tmp", s("v"), 10_000_000); // 10ms
        assert!(ks.get("tmp").is_some());
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ks.get("tmp"), None);
        // lazy rejection leaves the entry for the sweeper
        assert_eq!(ks.len(), 1);
    }

    #[test]
    fn sweep_removes_due_items_only() {
        let mut ks = Keyspace::new();
        ks.set("dead", s("x"), 5_000_000);
        ks.set("alive", s("y"), 60 * SECOND);
        ks.set("forever", s("z"), 0);
        thread::sleep(Duration::from_millis(20));

        assert_eq!(ks.sweep(), 1);
        assert_eq!(ks.len(), 2);
        assert!(ks.get("alive").is_some());
        assert!(ks.get("forever").is_some());
        assert_heap_consistent(&ks);
    }

    #[test]
    fn set_if_absent_refuses_live_key() {
        let mut ks = Keyspace::new();
        assert!(ks.set_if_absent("lock", s("owner1"), 0));
        assert!(!ks.set_if_absent("lock", s("owner2"), 0));
        assert_eq!(ks.get("lock"), Some(s("owner1")));
    }

    #[test]
    fn set_if_absent_treats_expired_as_absent() {
        let mut ks = Keyspace::new();
        ks.set("lock", s("stale"), 5_000_000);
        thread::sleep(Duration::from_millis(20));
        assert!(ks.set_if_absent("lock", s("fresh"), 0));
        assert_eq!(ks.get("lock"), Some(s("fresh")));
        assert_heap_consistent(&ks);
    }

    #[test]
    fn delete_existing_and_missing() {
        let mut ks = Keyspace::new();
        ks.set("k", s("v"), 60 * SECOND);
        assert!(ks.delete("k"));
        assert!(!ks.delete("k"));
        assert_eq!(ks.heap.len(), 0);
        assert_heap_consistent(&ks);
    }

    #[test]
    fn delete_expired_but_present_counts() {
        let mut ks = Keyspace::new();
        ks.set("tmp", s("v"), 5_000_000);
        thread::sleep(Duration::from_millis(20));
        // still in the map, so DEL reports it
        assert!(ks.delete("tmp"));
    }

    #[test]
    fn get_many_skips_misses_and_expired() {
        let mut ks = Keyspace::new();
        ks.set("a", s("1"), 0);
        ks.set("b", s("2"), 5_000_000);
        thread::sleep(Duration::from_millis(20));

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = ks.get_many(&keys);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("a"), Some(&s("1")));
    }

    #[test]
    fn flush_all_resets_everything() {
        let mut ks = Keyspace::new();
        ks.set("a", s("1"), 0);
        ks.set("b", s("2"), 60 * SECOND);
        assert_eq!(ks.flush_all(), 2);
        assert!(ks.is_empty());
        assert_eq!(ks.heap.len(), 0);
        assert_eq!(ks.flush_all(), 0);
    }

    #[test]
    fn list_keys_reports_types_and_skips_expired() {
        let mut ks = Keyspace::new();
        ks.set("str", s("x"), 0);
        ks.set("arr", Value::Array(vec!["a".into()]), 0);
        ks.set("dead", s("y"), 5_000_000);
        thread::sleep(Duration::from_millis(20));

        let mut keys = ks.list_keys();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ("arr".to_string(), ValueKind::Array),
                ("str".to_string(), ValueKind::String),
            ]
        );
    }

    #[test]
    fn iter_live_matches_visibility() {
        let mut ks = Keyspace::new();
        ks.set("live", s("1"), 60 * SECOND);
        ks.set("dead", s("2"), 5_000_000);
        ks.set("forever", s("3"), 0);
        thread::sleep(Duration::from_millis(20));

        let live: Vec<&str> = ks.iter_live().map(|(k, _, _)| k).collect();
        assert_eq!(live.len(), 2);
        assert!(!live.contains(&"dead"));
    }

    #[test]
    fn restore_and_forget_do_not_require_journal() {
        let mut ks = Keyspace::new();
        ks.restore("k".into(), s("v"), time::now_nanos() + 60 * SECOND);
        assert!(ks.get("k").is_some());
        assert_heap_consistent(&ks);
        assert!(ks.forget("k"));
        assert!(ks.is_empty());
        assert_eq!(ks.heap.len(), 0);
    }

    #[test]
    fn restore_drops_in_the_past_deadline_items_on_read() {
        let mut ks = Keyspace::new();
        ks.restore("old".into(), s("v"), 1);
        assert_eq!(ks.get("old"), None);
    }

    #[test]
    fn randomized_operations_keep_heap_consistent() {
        let mut state: u64 = 0x1234_5678_9ABC_DEF0;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut ks = Keyspace::new();
        for round in 0..3_000 {
            let key = format!("k{}", rand() % 64);
            match rand() % 10 {
                0..=3 => {
                    // far-future TTL so nothing expires mid-test
                    let ttl = (rand() % 1_000) as i64 * SECOND + SECOND;
                    ks.set(&key, s("v"), ttl);
                }
                4..=5 => {
                    ks.set(&key, s("v"), 0);
                }
                6 => {
                    let ttl = (rand() % 1_000) as i64 * SECOND + SECOND;
                    ks.set_if_absent(&key, s("nx"), ttl);
                }
                7..=8 => {
                    ks.delete(&key);
                }
                _ => {
                    ks.sweep();
                }
            }
            if round % 250 == 0 {
                assert_heap_consistent(&ks);
            }
        }
        assert_heap_consistent(&ks);
    }
}
