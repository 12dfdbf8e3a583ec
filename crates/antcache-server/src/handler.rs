//! Command execution against the shared keyspace.
//!
//! This is the single function both dispatch strategies call. Every
//! command runs while holding the keyspace lock (shared for reads,
//! exclusive for mutations); replies are formatted after the lock is
//! released. AUTH never reaches here — the connection loop owns the
//! per-connection authenticated flag.

use std::sync::{Arc, RwLock};

use antcache_core::{DurabilityEngine, Keyspace, Value};
use antcache_protocol::{reply, Command};

/// Everything a connection needs to serve commands.
pub struct Shared {
    pub keyspace: Arc<RwLock<Keyspace>>,
    pub auth: crate::auth::AuthProbe,
    pub engine: Arc<DurabilityEngine>,
}

/// Converts a TTL duration to the keyspace's nanosecond convention
/// (0 = no expiry).
fn ttl_nanos(ttl: std::time::Duration) -> i64 {
    i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX)
}

/// Executes one parsed command and returns the reply line(s).
pub fn execute(cmd: Command, ctx: &Shared) -> String {
    match cmd {
        Command::Set { key, value, ttl, nx } => {
            store(ctx, &key, Value::String(value), ttl, nx)
        }
        Command::SetArray { key, values, ttl, nx } => {
            store(ctx, &key, Value::Array(values), ttl, nx)
        }
        Command::SetObject { key, fields, ttl, nx } => {
            store(ctx, &key, Value::Object(fields), ttl, nx)
        }

        Command::Get { keys } => {
            let ks = ctx.keyspace.read().expect("keyspace lock poisoned");
            if keys.len() == 1 {
                match ks.get(&keys[0]) {
                    Some(value) => reply::format_single_get(&value),
                    None => reply::NOT_FOUND.to_string(),
                }
            } else {
                reply::format_multi_get(&ks.get_many(&keys))
            }
        }

        Command::Del { keys } => {
            let mut ks = ctx.keyspace.write().expect("keyspace lock poisoned");
            let deleted = keys.iter().filter(|key| ks.delete(key)).count();
            reply::format_del_count(deleted)
        }

        Command::Keys => {
            let ks = ctx.keyspace.read().expect("keyspace lock poisoned");
            reply::format_keys(&ks.list_keys())
        }

        Command::FlushAll => {
            let count = {
                let mut ks = ctx.keyspace.write().expect("keyspace lock poisoned");
                ks.flush_all()
            };
            // the flush itself is not journaled; a fresh snapshot
            // becomes the recovery truth
            ctx.engine.trigger_snapshot();
            reply::format_flush(count)
        }

        // handled by the connection loop before execution
        Command::Auth { .. } => "ERROR authentication handled per connection\n".to_string(),
    }
}

fn store(ctx: &Shared, key: &str, value: Value, ttl: std::time::Duration, nx: bool) -> String {
    let mut ks = ctx.keyspace.write().expect("keyspace lock poisoned");
    if nx {
        reply::format_nx(ks.set_if_absent(key, value, ttl_nanos(ttl))).to_string()
    } else {
        ks.set(key, value, ttl_nanos(ttl));
        reply::OK.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthProbe;

    fn ctx() -> Shared {
        Shared {
            keyspace: Arc::new(RwLock::new(Keyspace::new())),
            auth: AuthProbe::disabled(),
            engine: Arc::new(DurabilityEngine::disabled()),
        }
    }

    fn run(ctx: &Shared, line: &str) -> String {
        execute(Command::parse(line).unwrap(), ctx)
    }

    #[test]
    fn set_then_get_string() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "SET greet hello world"), "OK\n");
        assert_eq!(run(&ctx, "GET greet"), "hello world\n");
    }

    #[test]
    fn get_missing_is_not_found() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "GET nope"), "NOT_FOUND\n");
    }

    #[test]
    fn setx_round_trips_as_json() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "SETX u name Alice age 30"), "OK\n");
        assert_eq!(run(&ctx, "GET u"), "{\"age\":\"30\",\"name\":\"Alice\"}\n");
    }

    #[test]
    fn sets_round_trips_as_json_array() {
        let ctx = ctx();
        assert_eq!(run(&ctx, r#"SETS lst "a b" "c\nd" e"#), "OK\n");
        assert_eq!(run(&ctx, "GET lst"), "[\"a b\",\"c\\nd\",\"e\"]\n");
    }

    #[test]
    fn nx_family_refusal() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "SETNX lock owner1"), "1\n");
        assert_eq!(run(&ctx, "SETNX lock owner2"), "0\n");
        assert_eq!(run(&ctx, "GET lock"), "owner1\n");
    }

    #[test]
    fn del_counts_multiple_keys() {
        let ctx = ctx();
        run(&ctx, "SET a 1");
        run(&ctx, "SET b 2");
        assert_eq!(run(&ctx, "DEL a b missing"), "2\n");
        assert_eq!(run(&ctx, "GET a"), "NOT_FOUND\n");
    }

    #[test]
    fn multi_key_get_shape() {
        let ctx = ctx();
        run(&ctx, "SET a 1");
        run(&ctx, "SET b 2");
        let out = run(&ctx, "GET a b missing");
        let parsed: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(parsed["a"], "1");
        assert_eq!(parsed["b"], "2");
        assert!(parsed.get("missing").is_none());
    }

    #[test]
    fn multi_key_get_all_missing_is_not_found() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "GET x y"), "NOT_FOUND\n");
    }

    #[test]
    fn keys_and_flushall() {
        let ctx = ctx();
        assert_eq!(run(&ctx, "KEYS"), "No keys found\n");
        run(&ctx, "SET s v");
        run(&ctx, "SETS l a b");
        let listing = run(&ctx, "KEYS");
        assert!(listing.contains("s (string)\n"));
        assert!(listing.contains("l (array)\n"));
        assert_eq!(run(&ctx, "FLUSHALL"), "OK 2 keys deleted\n");
        assert_eq!(run(&ctx, "KEYS"), "No keys found\n");
    }

    #[test]
    fn type_replacement_is_full_replace() {
        let ctx = ctx();
        run(&ctx, "SET k plain");
        run(&ctx, "SETS k a b");
        assert_eq!(run(&ctx, "GET k"), "[\"a\",\"b\"]\n");
    }
}
