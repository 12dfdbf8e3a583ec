//! Reply formatting.
//!
//! Single-key GET replies are bare: the raw string, or a compact JSON
//! literal for arrays and objects. Multi-key GET replies are one
//! pretty-printed JSON object mapping key to value, omitting misses.
//! The asymmetry is deliberate and clients depend on it.

use std::collections::BTreeMap;

use antcache_core::{Value, ValueKind};

pub const OK: &str = "OK\n";
pub const NOT_FOUND: &str = "NOT_FOUND\n";

/// Converts a stored value into its JSON representation.
fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Array(elems) => serde_json::Value::Array(
            elems
                .iter()
                .map(|e| serde_json::Value::String(e.clone()))
                .collect(),
        ),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        ),
    }
}

/// Formats a single-key GET hit.
pub fn format_single_get(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s}\n"),
        other => {
            let json = serde_json::to_string(&to_json(other))
                .unwrap_or_else(|_| "null".to_string());
            format!("{json}\n")
        }
    }
}

/// Formats a multi-key GET result. An empty result is `NOT_FOUND`.
pub fn format_multi_get(results: &BTreeMap<String, Value>) -> String {
    if results.is_empty() {
        return NOT_FOUND.to_string();
    }
    let object: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(k, v)| (k.clone(), to_json(v)))
        .collect();
    let json = serde_json::to_string_pretty(&serde_json::Value::Object(object))
        .unwrap_or_else(|_| "{}".to_string());
    format!("{json}\n")
}

/// Formats the DEL reply: the number of keys deleted.
pub fn format_del_count(count: usize) -> String {
    format!("{count}\n")
}

/// Formats the NX-family reply.
pub fn format_nx(stored: bool) -> &'static str {
    if stored {
        "1\n"
    } else {
        "0\n"
    }
}

/// Formats the KEYS listing: one `<key> (<type>)` line per key.
pub fn format_keys(keys: &[(String, ValueKind)]) -> String {
    if keys.is_empty() {
        return "No keys found\n".to_string();
    }
    let mut out = String::new();
    for (key, kind) in keys {
        out.push_str(key);
        out.push_str(" (");
        out.push_str(kind.type_name());
        out.push_str(")\n");
    }
    out
}

/// Formats the FLUSHALL reply.
pub fn format_flush(count: usize) -> String {
    format!("OK {count} keys deleted\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_is_raw() {
        assert_eq!(format_single_get(&Value::String("hello world".into())), "hello world\n");
    }

    #[test]
    fn array_is_compact_json() {
        let value = Value::Array(vec!["a b".into(), "c\nd".into(), "e".into()]);
        assert_eq!(format_single_get(&value), "[\"a b\",\"c\\nd\",\"e\"]\n");
    }

    #[test]
    fn object_is_compact_json_sorted() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Alice".to_string());
        fields.insert("age".to_string(), "30".to_string());
        let value = Value::Object(fields);
        assert_eq!(
            format_single_get(&value),
            "{\"age\":\"30\",\"name\":\"Alice\"}\n"
        );
    }

    #[test]
    fn multi_get_is_pretty_json() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), Value::String("1".into()));
        results.insert("b".to_string(), Value::Array(vec!["x".into()]));
        let out = format_multi_get(&results);
        assert!(out.starts_with("{\n"));
        assert!(out.contains("  \"a\": \"1\""));
        assert!(out.ends_with("}\n"));
        // it must still be valid JSON
        let parsed: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed["a"], "1");
    }

    #[test]
    fn empty_multi_get_is_not_found() {
        assert_eq!(format_multi_get(&BTreeMap::new()), NOT_FOUND);
    }

    #[test]
    fn keys_listing() {
        let keys = vec![
            ("greet".to_string(), ValueKind::String),
            ("lst".to_string(), ValueKind::Array),
        ];
        assert_eq!(format_keys(&keys), "greet (string)\nlst (array)\n");
        assert_eq!(format_keys(&[]), "No keys found\n");
    }

    #[test]
    fn flush_and_del_counts() {
        assert_eq!(format_flush(3), "OK 3 keys deleted\n");
        assert_eq!(format_del_count(2), "2\n");
        assert_eq!(format_nx(true), "1\n");
        assert_eq!(format_nx(false), "0\n");
    }
}
