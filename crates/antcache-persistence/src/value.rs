//! The value representation shared by the snapshot and journal formats.

use std::collections::BTreeMap;

/// A typed value as it appears on disk.
///
/// Mirrors the keyspace's value sum without depending on the storage
/// crate; conversion happens at the durability boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistedValue {
    /// Opaque string payload.
    String(String),
    /// Ordered sequence of strings.
    Array(Vec<String>),
    /// String-to-string mapping. `BTreeMap` keeps the on-disk encoding
    /// deterministic; field order is not observable to clients.
    Object(BTreeMap<String, String>),
}

impl PersistedValue {
    /// An empty string value, used as the placeholder payload on
    /// delete records.
    pub fn empty() -> Self {
        PersistedValue::String(String::new())
    }
}
