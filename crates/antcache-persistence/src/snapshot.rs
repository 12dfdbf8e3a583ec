//! ATD snapshot files: a compressed binary dump of the live keyspace.
//!
//! Writes go to a `.tmp` sibling first and are atomically renamed on
//! completion, so a partial or crashed snapshot never corrupts the
//! existing file. The whole stream is wrapped in a gzip container.
//!
//! File layout (inside the gzip stream, all integers big-endian):
//! ```text
//! [magic "ANTC": 4B][version: 1B][created_unix_secs: 8B]
//! [item record]*
//! [end marker: 0xFF]
//! ```
//!
//! Each item record:
//! ```text
//! [0x01][key_len: 2B][key][value block][expires_at_nanos: 8B]
//! ```
//!
//! Value blocks are tagged: string (0x01) carries a 4-byte length,
//! array (0x02) a 2-byte element count of 2-byte-length elements, and
//! object (0x03) a 2-byte entry count of 2-byte-length field/value pairs.
//! `expires_at_nanos` of 0 means no expiry.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::format::{self, FormatError};
use crate::value::PersistedValue;

/// A single entry in a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapEntry {
    pub key: String,
    pub value: PersistedValue,
    /// Absolute expiry deadline in nanoseconds; 0 means no expiry.
    pub expires_at: i64,
}

/// Returns `path` with `.tmp` appended (not substituted), so
/// `cache.atd` becomes `cache.atd.tmp`.
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Writes a complete snapshot to disk.
///
/// The file won't appear at the final path until [`SnapshotWriter::finish`]
/// runs successfully; an unfinished writer removes its temp file on drop.
pub struct SnapshotWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    encoder: Option<GzEncoder<BufWriter<File>>>,
    count: u64,
    finished: bool,
}

impl SnapshotWriter {
    /// Creates a snapshot writer targeting `path`, creating parent
    /// directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, FormatError> {
        let final_path = path.into();
        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = tmp_path_for(&final_path);
        let file = File::create(&tmp_path)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());

        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        format::write_header(&mut encoder, created)?;

        Ok(Self {
            final_path,
            tmp_path,
            encoder: Some(encoder),
            count: 0,
            finished: false,
        })
    }

    /// Writes a single item record.
    pub fn write_entry(&mut self, entry: &SnapEntry) -> Result<(), FormatError> {
        let w = self.encoder.as_mut().expect("writer already finished");

        format::write_u8(w, format::RECORD_ITEM)?;
        format::write_short_bytes(w, entry.key.as_bytes())?;
        match &entry.value {
            PersistedValue::String(s) => {
                format::write_u8(w, format::TYPE_STRING)?;
                format::write_long_bytes(w, s.as_bytes())?;
            }
            PersistedValue::Array(elems) => {
                format::write_u8(w, format::TYPE_ARRAY)?;
                let count = u16::try_from(elems.len()).map_err(|_| {
                    FormatError::InvalidData(format!("array length {} exceeds u16", elems.len()))
                })?;
                format::write_u16(w, count)?;
                for elem in elems {
                    format::write_short_bytes(w, elem.as_bytes())?;
                }
            }
            PersistedValue::Object(fields) => {
                format::write_u8(w, format::TYPE_OBJECT)?;
                let count = u16::try_from(fields.len()).map_err(|_| {
                    FormatError::InvalidData(format!("object size {} exceeds u16", fields.len()))
                })?;
                format::write_u16(w, count)?;
                for (field, value) in fields {
                    format::write_short_bytes(w, field.as_bytes())?;
                    format::write_short_bytes(w, value.as_bytes())?;
                }
            }
        }
        format::write_i64(w, entry.expires_at)?;

        self.count += 1;
        Ok(())
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> u64 {
        self.count
    }

    /// Finalizes the snapshot: writes the end marker, flushes the gzip
    /// stream, fsyncs, and atomically renames the temp file into place.
    pub fn finish(mut self) -> Result<u64, FormatError> {
        let mut encoder = self.encoder.take().expect("writer already finished");
        format::write_u8(&mut encoder, format::RECORD_END)?;

        let mut inner = encoder.finish()?;
        inner.flush()?;
        let file = inner.into_inner().map_err(|e| FormatError::Io(e.into_error()))?;
        file.sync_all()?;

        fs::rename(&self.tmp_path, &self.final_path)?;
        self.finished = true;
        Ok(self.count)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.finished {
            // best-effort cleanup of an incomplete temp file
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Reads entries from a snapshot file.
#[derive(Debug)]
pub struct SnapshotReader {
    decoder: GzDecoder<BufReader<File>>,
    /// Unix-seconds creation timestamp from the header.
    pub created_unix_secs: i64,
    done: bool,
}

impl SnapshotReader {
    /// Opens a snapshot and validates its header.
    ///
    /// Header-mismatch errors ([`FormatError::is_header_mismatch`]) are
    /// fatal to startup; everything else is recoverable corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::open(path.as_ref())?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let created_unix_secs = format::read_header(&mut decoder)?;
        Ok(Self {
            decoder,
            created_unix_secs,
            done: false,
        })
    }

    /// Reads the next item record. Returns `None` after the end marker
    /// (or at a clean end of stream).
    pub fn read_entry(&mut self) -> Result<Option<SnapEntry>, FormatError> {
        if self.done {
            return Ok(None);
        }

        let tag = match format::read_u8(&mut self.decoder) {
            Ok(t) => t,
            Err(FormatError::UnexpectedEof) => {
                self.done = true;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        match tag {
            format::RECORD_END => {
                self.done = true;
                Ok(None)
            }
            format::RECORD_ITEM => self.read_item().map(Some),
            other => Err(FormatError::UnknownTag(other)),
        }
    }

    fn read_item(&mut self) -> Result<SnapEntry, FormatError> {
        let r = &mut self.decoder;
        let key = format::read_short_string(r, "key")?;

        let type_tag = format::read_u8(r)?;
        let value = match type_tag {
            format::TYPE_STRING => PersistedValue::String(format::read_long_string(r, "value")?),
            format::TYPE_ARRAY => {
                let count = format::read_u16(r)? as usize;
                let mut elems = Vec::with_capacity(count);
                for _ in 0..count {
                    elems.push(format::read_short_string(r, "array element")?);
                }
                PersistedValue::Array(elems)
            }
            format::TYPE_OBJECT => {
                let count = format::read_u16(r)? as usize;
                let mut fields = BTreeMap::new();
                for _ in 0..count {
                    let field = format::read_short_string(r, "object field")?;
                    let value = format::read_short_string(r, "object value")?;
                    fields.insert(field, value);
                }
                PersistedValue::Object(fields)
            }
            other => return Err(FormatError::UnknownTag(other)),
        };

        let expires_at = format::read_i64(r)?;
        Ok(SnapEntry {
            key,
            value,
            expires_at,
        })
    }
}
