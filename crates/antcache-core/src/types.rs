//! Data type representations for stored values.
//!
//! Values are a tagged sum of the three supported shapes. The type is
//! encoded explicitly on the wire and on disk; nothing infers a type
//! from the shape of the data at decode time.

use std::collections::BTreeMap;

/// A stored value in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Opaque string payload.
    String(String),
    /// Ordered sequence of strings.
    Array(Vec<String>),
    /// String-to-string mapping. Keys are unique; insertion order is
    /// not observable to clients, so the map is kept sorted for
    /// deterministic encoding.
    Object(BTreeMap<String, String>),
}

impl Value {
    /// The type tag for this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }
}

/// The discriminant identifying a value as string, array, or object.
///
/// Stored redundantly next to the value for cheap formatting and
/// snapshot encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    String,
    Array,
    Object,
}

impl ValueKind {
    /// The client-facing name of this type, as shown by KEYS.
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Value::String("x".into()).kind(), ValueKind::String);
        assert_eq!(Value::Array(vec![]).kind(), ValueKind::Array);
        assert_eq!(Value::Object(BTreeMap::new()).kind(), ValueKind::Object);
    }

    #[test]
    fn type_names() {
        assert_eq!(ValueKind::String.type_name(), "string");
        assert_eq!(ValueKind::Array.type_name(), "array");
        assert_eq!(ValueKind::Object.type_name(), "object");
    }
}
