//! Journal compaction: merging rotated journal files back into one.
//!
//! Every record from the active file and its rotated siblings is folded
//! into a single per-key decision: a delete is terminal and wins over
//! any set regardless of timestamps, otherwise the record with the
//! newest timestamp survives. Survivors are written to `<path>.merged`,
//! the rotated inputs are deleted, and the merged file is atomically
//! renamed over the active path.
//!
//! Running compaction on already-compacted input is a fixed point: with
//! no rotated siblings the pass is a no-op.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::format::FormatError;
use crate::journal::LogRecord;

/// Returns the rotated siblings of `path`: files in the same directory
/// named `<file_name>.<suffix>`, excluding the `.merged` scratch file.
pub fn rotated_siblings(path: &Path) -> Result<Vec<PathBuf>, FormatError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let base = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => format!("{name}."),
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&base) && !name.ends_with(".merged") {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Merges the active journal and all rotated siblings into a single
/// reduced file at the active path. Returns the number of surviving
/// records, or `None` when there was nothing to merge.
pub fn compact(path: &Path) -> Result<Option<usize>, FormatError> {
    let rotated = rotated_siblings(path)?;
    if rotated.is_empty() {
        return Ok(None);
    }

    let mut inputs: Vec<&Path> = Vec::with_capacity(rotated.len() + 1);
    inputs.push(path);
    inputs.extend(rotated.iter().map(PathBuf::as_path));

    // fold every record into a per-key decision
    let mut survivors: HashMap<String, LogRecord> = HashMap::new();
    let mut total = 0usize;
    for input in &inputs {
        total += fold_file(input, &mut survivors)?;
    }

    // write the reduced log; keys are sorted so repeated compactions of
    // the same state produce identical files
    let merged_path = PathBuf::from(format!("{}.merged", path.display()));
    {
        let file = File::create(&merged_path)?;
        let mut writer = BufWriter::new(file);
        let mut keys: Vec<&String> = survivors.keys().collect();
        keys.sort();
        for key in keys {
            writer.write_all(survivors[key].encode_line().as_bytes())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    for input in &rotated {
        if let Err(e) = fs::remove_file(input) {
            warn!(path = %input.display(), "failed to remove rotated journal: {e}");
        }
    }
    fs::rename(&merged_path, path)?;

    info!(
        records_in = total,
        records_out = survivors.len(),
        "journal compacted"
    );
    Ok(Some(survivors.len()))
}

/// Parses one journal file into the survivor map. Malformed lines are
/// skipped with a warning. Returns the number of parsed records.
fn fold_file(path: &Path, survivors: &mut HashMap<String, LogRecord>) -> Result<usize, FormatError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = match LogRecord::parse_line(line) {
            Ok(rec) => rec,
            Err(e) => {
                debug!(
                    path = %path.display(),
                    line = line_no + 1,
                    "skipping malformed journal line: {e}"
                );
                continue;
            }
        };
        count += 1;
        fold_record(survivors, record);
    }
    Ok(count)
}

/// Applies the merge rule for one record.
fn fold_record(survivors: &mut HashMap<String, LogRecord>, record: LogRecord) {
    match survivors.get(&record.key) {
        None => {
            survivors.insert(record.key.clone(), record);
        }
        Some(existing) => {
            if record.verb.is_delete() {
                // delete is terminal and beats any timestamp
                survivors.insert(record.key.clone(), record);
            } else if existing.verb.is_delete() {
                // the key is already dead; later sets don't resurrect it
            } else if record.timestamp_nanos > existing.timestamp_nanos {
                survivors.insert(record.key.clone(), record);
            }
        }
    }
}
