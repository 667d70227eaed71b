//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Variable-length strings are length-prefixed (u16, big-endian) so that keys
//! of one source never interleave with keys of another source that shares a
//! string prefix. Numbers are big-endian so RocksDB iterates them in order.

use crate::records::EventKey;
use anyhow::{Context, Result};

/// Append a u16 length-prefixed string.
fn push_str(key: &mut Vec<u8>, s: &str) {
    let len = u16::try_from(s.len()).unwrap_or(u16::MAX);
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(&s.as_bytes()[..len as usize]);
}

/// Read a u16 length-prefixed string starting at `pos`; returns the string and the next offset.
fn read_str(key: &[u8], pos: usize) -> Result<(String, usize)> {
    let len_bytes = key
        .get(pos..pos + 2)
        .context("Key truncated before string length")?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let start = pos + 2;
    let bytes = key
        .get(start..start + len)
        .context("Key truncated inside string")?;
    let s = String::from_utf8(bytes.to_vec()).context("Key string is not UTF-8")?;
    Ok((s, start + len))
}

fn read_u64(key: &[u8], pos: usize) -> Result<u64> {
    let bytes = key.get(pos..pos + 8).context("Key truncated inside u64")?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(buf))
}

/// Encode a cursor key.
///
/// Format: byte 'C' (0x43) + source_id (length-prefixed)
pub fn encode_cursor_key(source_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + source_id.len());
    key.push(b'C');
    push_str(&mut key, source_id);
    key
}

/// Decode a cursor key back into its source id.
pub fn decode_cursor_key(key: &[u8]) -> Result<String> {
    if key.first() != Some(&b'C') {
        anyhow::bail!("Not a cursor key");
    }
    let (source_id, end) = read_str(key, 1)?;
    if end != key.len() {
        anyhow::bail!("Trailing bytes after cursor key");
    }
    Ok(source_id)
}

/// Encode a raw event key.
///
/// Format: byte 'E' (0x45) + source_id (length-prefixed)
///       + transaction_hash (length-prefixed) + log_index (8 bytes, big-endian)
pub fn encode_event_key(key: &EventKey) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(1 + 2 + key.source_id.len() + 2 + key.transaction_hash.len() + 8);
    out.push(b'E');
    push_str(&mut out, &key.source_id);
    push_str(&mut out, &key.transaction_hash);
    out.extend_from_slice(&key.log_index.to_be_bytes());
    out
}

/// Decode a raw event key.
pub fn decode_event_key(key: &[u8]) -> Result<EventKey> {
    if key.first() != Some(&b'E') {
        anyhow::bail!("Not an event key");
    }
    let (source_id, pos) = read_str(key, 1)?;
    let (transaction_hash, pos) = read_str(key, pos)?;
    let log_index = read_u64(key, pos)?;
    if pos + 8 != key.len() {
        anyhow::bail!("Trailing bytes after event key");
    }
    Ok(EventKey {
        source_id,
        transaction_hash,
        log_index,
    })
}

/// Encode the block-ordered index prefix of a source.
///
/// Format: byte 'B' (0x42) + source_id (length-prefixed)
pub fn encode_block_index_prefix(source_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + source_id.len());
    key.push(b'B');
    push_str(&mut key, source_id);
    key
}

/// Encode the first possible block index key at `block` for a source.
pub fn encode_block_index_start(source_id: &str, block: u64) -> Vec<u8> {
    let mut key = encode_block_index_prefix(source_id);
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Encode a block index key.
///
/// Format: prefix + block_number (8 bytes) + log_index (8 bytes)
///       + transaction_hash (length-prefixed)
pub fn encode_block_index_key(block: u64, key: &EventKey) -> Vec<u8> {
    let mut out = encode_block_index_start(&key.source_id, block);
    out.extend_from_slice(&key.log_index.to_be_bytes());
    push_str(&mut out, &key.transaction_hash);
    out
}

/// Decode a block index key into (block_number, event key).
pub fn decode_block_index_key(key: &[u8]) -> Result<(u64, EventKey)> {
    if key.first() != Some(&b'B') {
        anyhow::bail!("Not a block index key");
    }
    let (source_id, pos) = read_str(key, 1)?;
    let block = read_u64(key, pos)?;
    let log_index = read_u64(key, pos + 8)?;
    let (transaction_hash, end) = read_str(key, pos + 16)?;
    if end != key.len() {
        anyhow::bail!("Trailing bytes after block index key");
    }
    Ok((
        block,
        EventKey {
            source_id,
            transaction_hash,
            log_index,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: &str, tx: &str, log_index: u64) -> EventKey {
        EventKey {
            source_id: source.to_string(),
            transaction_hash: tx.to_string(),
            log_index,
        }
    }

    #[test]
    fn test_cursor_key_encoding() {
        let k = encode_cursor_key("MPE");
        assert_eq!(k[0], b'C');
        assert_eq!(&k[1..3], &3u16.to_be_bytes());
        assert_eq!(&k[3..], b"MPE");
        assert_eq!(decode_cursor_key(&k).unwrap(), "MPE");
    }

    #[test]
    fn test_event_key_decodes_back() {
        let original = key("REGISTRY", "deadbeef", 7);
        let encoded = encode_event_key(&original);
        assert_eq!(encoded[0], b'E');
        assert_eq!(decode_event_key(&encoded).unwrap(), original);
    }

    #[test]
    fn test_block_index_orders_by_block_then_log_index() {
        let a = encode_block_index_key(9, &key("MPE", "ff", 5));
        let b = encode_block_index_key(10, &key("MPE", "00", 0));
        let c = encode_block_index_key(10, &key("MPE", "00", 1));
        assert!(a < b);
        assert!(b < c);
        let (block, decoded) = decode_block_index_key(&c).unwrap();
        assert_eq!(block, 10);
        assert_eq!(decoded, key("MPE", "00", 1));
    }

    #[test]
    fn test_sources_sharing_a_prefix_do_not_overlap() {
        let short = encode_block_index_prefix("Converter");
        let long = encode_block_index_key(0, &key("ConverterAGIX", "aa", 0));
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let encoded = encode_event_key(&key("MPE", "aa", 1));
        assert!(decode_event_key(&encoded[..encoded.len() - 1]).is_err());
        assert!(decode_cursor_key(b"Cx").is_err());
    }
}
