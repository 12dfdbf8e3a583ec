//! File-level crash recovery: reading snapshots and journals back.
//!
//! The recovery sequence (driven by the durability engine) is:
//! 1. Load the snapshot if one exists.
//! 2. Replay the journal on top of it.
//! 3. Skip entries whose TTL elapsed during downtime.
//!
//! Missing files are not errors. A corrupt snapshot body or journal line
//! is logged and skipped; only a snapshot header mismatch is fatal,
//! which the caller decides via [`FormatError::is_header_mismatch`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use crate::format::FormatError;
use crate::journal::LogRecord;
use crate::snapshot::{SnapEntry, SnapshotReader};

/// Reads every entry from a snapshot file.
///
/// Returns an empty list when the file doesn't exist. Entries are
/// returned as stored; the caller filters out already-expired ones.
pub fn read_snapshot(path: &Path) -> Result<Vec<SnapEntry>, FormatError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = SnapshotReader::open(path)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.read_entry()? {
        entries.push(entry);
    }
    Ok(entries)
}

/// Reads every record from a journal file, in order.
///
/// Returns an empty list when the file doesn't exist. Malformed lines
/// are logged and skipped so one torn write can't discard the rest of
/// the log.
pub fn read_journal(path: &Path) -> Result<Vec<LogRecord>, FormatError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match LogRecord::parse_line(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    "skipping malformed journal line: {e}"
                );
            }
        }
    }
    Ok(records)
}
