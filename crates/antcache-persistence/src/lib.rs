//! antcache-persistence: durability layer.
//!
//! Handles the compressed binary snapshot (ATD), the append-only textual
//! command journal (ACL) with rotation and compaction, and file-level
//! crash recovery.

pub mod compaction;
pub mod format;
pub mod journal;
pub mod recovery;
pub mod snapshot;
pub mod value;

pub use format::FormatError;
pub use journal::{JournalWriter, LogRecord, Verb};
pub use snapshot::{SnapEntry, SnapshotReader, SnapshotWriter};
pub use value::PersistedValue;
