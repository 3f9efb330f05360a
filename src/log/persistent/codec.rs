//! Framing codec for persisted action records.
//!
//! Every entry is serialized with:
//! - JSON for the record body (same serde form as the wire format)
//! - a length prefix for framing
//! - a CRC32 checksum for corruption detection
//! - a version byte for forward compatibility

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying conceptsync log files.
pub const MAGIC: [u8; 4] = *b"CSYN";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 13;

/// Entries above this size are treated as corruption.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// Serializes a value to a framed, checksummed entry.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "entry too large to frame"))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads one entry, verifying version, size bound and checksum.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Write the file header: magic, version and the last sequence assigned
/// before the file was (re)written.
pub fn write_header(writer: &mut impl Write, floor: u64) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    writer.write_all(&floor.to_le_bytes())?;
    Ok(())
}

/// Read and validate the file header, returning the stored sequence floor.
pub fn read_header(reader: &mut impl Read) -> IoResult<u64> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported file version: {}", version[0]),
        ));
    }
    let mut floor = [0u8; 8];
    reader.read_exact(&mut floor)?;
    Ok(u64::from_le_bytes(floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_rejects_flipped_byte() {
        let mut bytes = encode(&serde_json::json!({"meal": "m1"})).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        let err = decode::<serde_json::Value>(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf, 42).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(&buf)).unwrap(), 42);

        buf[0] = b'X';
        assert!(read_header(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_truncated_entry_is_unexpected_eof() {
        let bytes = encode(&serde_json::json!({"meal": "m1"})).unwrap();
        let torn = &bytes[..bytes.len() - 2];
        let err = decode::<serde_json::Value>(&mut Cursor::new(torn)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }
}
