//! Binary layout of the persisted metadata cache.
//!
//! ```text
//! magic      4 bytes  "VXMC"
//! version    u32
//! count      u32
//! count x {
//!     key_len    u32, key bytes (UTF-8)
//!     size       u64
//!     mtime      i64 (100 ns ticks)
//!     body_len   u32, bincode-encoded PackageRecord
//! }
//! ```
//!
//! All integers are little-endian.

use anyhow::{Context, Result, bail};
use std::io::{Cursor, Read};

use super::CacheEntry;
use crate::package::PackageRecord;

pub const MAGIC: [u8; 4] = *b"VXMC";
pub const FORMAT_VERSION: u32 = 1;

/// Encode entries, sorted by key and then signature. A key may repeat with
/// different signatures.
pub fn encode(entries: &[(String, CacheEntry)]) -> Result<Vec<u8>> {
    let mut sorted: Vec<&(String, CacheEntry)> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.0, a.1.size, a.1.mtime_ticks).cmp(&(&b.0, b.1.size, b.1.mtime_ticks))
    });

    let mut out = Vec::with_capacity(16 + entries.len() * 256);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&len_u32(sorted.len())?.to_le_bytes());

    for (key, entry) in sorted {
        out.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&entry.size.to_le_bytes());
        out.extend_from_slice(&entry.mtime_ticks.to_le_bytes());
        let body = bincode::serialize(&entry.record)
            .with_context(|| format!("Failed to serialize cache record {}", key))?;
        out.extend_from_slice(&len_u32(body.len())?.to_le_bytes());
        out.extend_from_slice(&body);
    }

    Ok(out)
}

/// Decode a cache file. Any structural problem is an error; callers treat
/// errors as an empty cache.
pub fn decode(data: &[u8]) -> Result<Vec<(String, CacheEntry)>> {
    let mut reader = Cursor::new(data);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .context("Cache file too short")?;
    if magic != MAGIC {
        bail!(
            "Invalid cache file: bad magic number (expected {:?}, got {:?})",
            MAGIC,
            magic
        );
    }

    let version = read_u32(&mut reader)?;
    if version != FORMAT_VERSION {
        bail!(
            "Unsupported cache format version {} (expected {})",
            version,
            FORMAT_VERSION
        );
    }

    let count = read_u32(&mut reader)? as usize;
    // Each entry needs at least 24 bytes; reject counts the data cannot hold.
    let remaining = data.len().saturating_sub(reader.position() as usize);
    if count > remaining / 24 {
        bail!("Cache file truncated: {} entries declared", count);
    }

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let key = read_bytes(&mut reader)
            .with_context(|| format!("Failed to read key of entry {}", index))?;
        let key = String::from_utf8(key).context("Cache key is not valid UTF-8")?;
        let size = read_u64(&mut reader)?;
        let mtime_ticks = read_u64(&mut reader)? as i64;
        let body = read_bytes(&mut reader)
            .with_context(|| format!("Failed to read record of {}", key))?;
        let record: PackageRecord = bincode::deserialize(&body)
            .with_context(|| format!("Failed to deserialize cache record {}", key))?;
        entries.push((
            key,
            CacheEntry {
                size,
                mtime_ticks,
                record,
            },
        ));
    }

    Ok(entries)
}

fn len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).context("Length exceeds cache format limits")
}

fn read_u32(reader: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).context("Unexpected end of cache file")?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).context("Unexpected end of cache file")?;
    Ok(u64::from_le_bytes(buf))
}

fn read_bytes(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = read_u32(reader)? as usize;
    let remaining = reader.get_ref().len() - reader.position() as usize;
    if len > remaining {
        bail!("Unexpected end of cache file");
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
