//! Binary format helpers for the ATD snapshot file.
//!
//! Provides big-endian encoding primitives, the magic/version header,
//! and the record and value type tags. All multi-byte integers are
//! stored in big-endian.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Magic bytes at the start of every snapshot: "ANTC".
pub const ATD_MAGIC: u32 = 0x414E_5443;

/// Current snapshot format version.
pub const ATD_VERSION: u8 = 0x01;

/// Record tag for a stored item.
pub const RECORD_ITEM: u8 = 0x01;

/// Record tag marking the end of the snapshot stream.
pub const RECORD_END: u8 = 0xFF;

/// Value type tags inside an item record.
pub const TYPE_STRING: u8 = 0x01;
pub const TYPE_ARRAY: u8 = 0x02;
pub const TYPE_OBJECT: u8 = 0x03;

/// Maximum length we'll allocate for a length-prefixed string value.
/// A corrupt or malicious length prefix must not cause a multi-gigabyte
/// allocation.
pub const MAX_STRING_LEN: usize = 512 * 1024 * 1024;

/// Errors that can occur when reading or writing persistence formats.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of file")]
    UnexpectedEof,

    #[error("invalid magic number: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown record tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FormatError {
    /// `true` for header-validation failures that must abort startup
    /// rather than fall back to an empty keyspace.
    pub fn is_header_mismatch(&self) -> bool {
        matches!(
            self,
            FormatError::InvalidMagic(_) | FormatError::UnsupportedVersion(_)
        )
    }
}

// ---------------------------------------------------------------------------
// write helpers
// ---------------------------------------------------------------------------

/// Writes a `u8`.
pub fn write_u8(w: &mut impl Write, val: u8) -> io::Result<()> {
    w.write_all(&[val])
}

/// Writes a `u16` in big-endian.
pub fn write_u16(w: &mut impl Write, val: u16) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

/// Writes a `u32` in big-endian.
pub fn write_u32(w: &mut impl Write, val: u32) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

/// Writes an `i64` in big-endian.
pub fn write_i64(w: &mut impl Write, val: i64) -> io::Result<()> {
    w.write_all(&val.to_be_bytes())
}

/// Writes a short length-prefixed field: `[len: u16][data]`.
///
/// Used for keys, array elements, and object fields, all of which carry
/// 16-bit length prefixes in the snapshot format.
pub fn write_short_bytes(w: &mut impl Write, data: &[u8]) -> Result<(), FormatError> {
    let len = u16::try_from(data.len()).map_err(|_| {
        FormatError::InvalidData(format!("field length {} exceeds u16::MAX", data.len()))
    })?;
    write_u16(w, len)?;
    w.write_all(data)?;
    Ok(())
}

/// Writes a long length-prefixed field: `[len: u32][data]`.
///
/// Used for string values, which carry 32-bit length prefixes.
pub fn write_long_bytes(w: &mut impl Write, data: &[u8]) -> Result<(), FormatError> {
    let len = u32::try_from(data.len()).map_err(|_| {
        FormatError::InvalidData(format!("value length {} exceeds u32::MAX", data.len()))
    })?;
    write_u32(w, len)?;
    w.write_all(data)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// read helpers
// ---------------------------------------------------------------------------

/// Reads a `u8`.
pub fn read_u8(r: &mut impl Read) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf)?;
    Ok(buf[0])
}

/// Reads a `u16` in big-endian.
pub fn read_u16(r: &mut impl Read) -> Result<u16, FormatError> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Reads a `u32` in big-endian.
pub fn read_u32(r: &mut impl Read) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Reads an `i64` in big-endian.
pub fn read_i64(r: &mut impl Read) -> Result<i64, FormatError> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(i64::from_be_bytes(buf))
}

/// Reads a `[len: u16][data]` field and decodes it as UTF-8.
pub fn read_short_string(r: &mut impl Read, field: &str) -> Result<String, FormatError> {
    let len = read_u16(r)? as usize;
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| FormatError::InvalidData(format!("{field} is not valid utf-8")))
}

/// Reads a `[len: u32][data]` field and decodes it as UTF-8.
///
/// Rejects lengths above [`MAX_STRING_LEN`] so corrupt data can't force
/// an unbounded allocation.
pub fn read_long_string(r: &mut impl Read, field: &str) -> Result<String, FormatError> {
    let len = read_u32(r)? as usize;
    if len > MAX_STRING_LEN {
        return Err(FormatError::InvalidData(format!(
            "{field} length {len} exceeds maximum of {MAX_STRING_LEN}"
        )));
    }
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| FormatError::InvalidData(format!("{field} is not valid utf-8")))
}

/// Reads exactly `buf.len()` bytes, returning `UnexpectedEof` on short read.
fn read_exact(r: &mut impl Read, buf: &mut [u8]) -> Result<(), FormatError> {
    r.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::UnexpectedEof
        } else {
            FormatError::Io(e)
        }
    })
}

/// Writes the snapshot header: magic + version + creation timestamp
/// (Unix seconds).
pub fn write_header(w: &mut impl Write, created_unix_secs: i64) -> io::Result<()> {
    write_u32(w, ATD_MAGIC)?;
    write_u8(w, ATD_VERSION)?;
    write_i64(w, created_unix_secs)
}

/// Reads and validates the snapshot header. Returns the creation
/// timestamp. Rejects unknown magic bytes and versions.
pub fn read_header(r: &mut impl Read) -> Result<i64, FormatError> {
    let magic = read_u32(r)?;
    if magic != ATD_MAGIC {
        return Err(FormatError::InvalidMagic(magic));
    }
    let version = read_u8(r)?;
    if version != ATD_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    read_i64(r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn u16_round_trip() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 12345).unwrap();
        assert_eq!(buf, [0x30, 0x39]);
        assert_eq!(read_u16(&mut Cursor::new(&buf)).unwrap(), 12345);
    }

    #[test]
    fn u32_round_trip() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0xDEAD_BEEF).unwrap();
        assert_eq!(read_u32(&mut Cursor::new(&buf)).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn i64_round_trip() {
        for val in [-1, 0, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            write_i64(&mut buf, val).unwrap();
            assert_eq!(read_i64(&mut Cursor::new(&buf)).unwrap(), val);
        }
    }

    #[test]
    fn short_bytes_round_trip() {
        let mut buf = Vec::new();
        write_short_bytes(&mut buf, b"hello").unwrap();
        assert_eq!(
            read_short_string(&mut Cursor::new(&buf), "field").unwrap(),
            "hello"
        );
    }

    #[test]
    fn long_bytes_round_trip() {
        let mut buf = Vec::new();
        write_long_bytes(&mut buf, b"a longer value").unwrap();
        assert_eq!(
            read_long_string(&mut Cursor::new(&buf), "value").unwrap(),
            "a longer value"
        );
    }

    #[test]
    fn header_round_trip() {
        let mut buf = Vec::new();
        write_header(&mut buf, 1_700_000_000).unwrap();
        assert_eq!(read_header(&mut Cursor::new(&buf)).unwrap(), 1_700_000_000);
    }

    #[test]
    fn header_magic_is_antc() {
        let mut buf = Vec::new();
        write_header(&mut buf, 0).unwrap();
        assert_eq!(&buf[..4], b"ANTC");
    }

    #[test]
    fn header_wrong_magic() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0x12345678).unwrap();
        write_u8(&mut buf, ATD_VERSION).unwrap();
        write_i64(&mut buf, 0).unwrap();
        let err = read_header(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::InvalidMagic(0x12345678)));
        assert!(err.is_header_mismatch());
    }

    #[test]
    fn header_wrong_version() {
        let mut buf = Vec::new();
        write_u32(&mut buf, ATD_MAGIC).unwrap();
        write_u8(&mut buf, 99).unwrap();
        write_i64(&mut buf, 0).unwrap();
        let err = read_header(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion(99)));
        assert!(err.is_header_mismatch());
    }

    #[test]
    fn truncated_input_returns_eof() {
        let buf = [0u8; 2];
        let err = read_u32(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedEof));
        assert!(!err.is_header_mismatch());
    }

    #[test]
    fn oversized_long_field_rejected() {
        let mut buf = Vec::new();
        write_u32(&mut buf, (MAX_STRING_LEN as u32) + 1).unwrap();
        let err = read_long_string(&mut Cursor::new(&buf), "value").unwrap_err();
        assert!(matches!(err, FormatError::InvalidData(_)));
    }
}
