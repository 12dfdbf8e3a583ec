//! antcache-core: the storage engine.
//!
//! Owns the keyspace, typed values, the expiry heap with its background
//! sweeper, and the durability engine that journals mutations and writes
//! periodic snapshots. Connection handling and the wire protocol live in
//! their own crates; everything here is reached through a single shared
//! readers-writer lock around the [`Keyspace`].

pub mod compress;
pub mod durability;
pub mod expiry;
pub mod keyspace;
pub mod sweeper;
pub mod time;
pub mod types;

pub use compress::{Compression, CompressionConfig};
pub use durability::{
    DurabilityConfig, DurabilityEngine, EngineState, LogHook, RecoverySummary,
};
pub use keyspace::Keyspace;
pub use sweeper::Sweeper;
pub use types::{Value, ValueKind};
