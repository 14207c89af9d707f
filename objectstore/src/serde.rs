//! Byte layout of the catalog, records and index entries.
//!
//! Every storage key starts with a version byte and a record tag, followed by
//! terminated name segments and, for records and index entries, encoded keys:
//!
//! ```text
//! catalog   | 0x01 | 0x10 | db\0 |
//! generator | 0x01 | 0x20 | db\0 | store\0 |
//! record    | 0x01 | 0x30 | db\0 | store\0 | key |
//! index     | 0x01 | 0x40 | db\0 | store\0 | index\0 | value | key |
//! ```
//!
//! Keys are written as a type byte and a payload that sorts byte-wise in key
//! order: `0x10` + sortable big-endian f64 for numbers, `0x20` + escaped,
//! `0x00`-terminated UTF-8 for strings. Both forms are self-delimiting, so a
//! key's encoding is never a prefix of another key's encoding.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::key::Key;

/// Key format version.
pub(crate) const KEY_VERSION: u8 = 0x01;

const CATALOG_TAG: u8 = 0x10;
const GENERATOR_TAG: u8 = 0x20;
const RECORD_TAG: u8 = 0x30;
const INDEX_TAG: u8 = 0x40;

const NUMBER_TYPE: u8 = 0x10;
const STRING_TYPE: u8 = 0x20;

const TERMINATOR_BYTE: u8 = 0x00;
const ESCAPE_BYTE: u8 = 0x01;

/// Writes `data` with `0x00 -> 0x01 0x01` and `0x01 -> 0x01 0x02` escaping,
/// followed by a `0x00` terminator.
fn put_terminated(buf: &mut BytesMut, data: &[u8]) {
    for &byte in data {
        match byte {
            TERMINATOR_BYTE => buf.put_slice(&[ESCAPE_BYTE, 0x01]),
            ESCAPE_BYTE => buf.put_slice(&[ESCAPE_BYTE, 0x02]),
            _ => buf.put_u8(byte),
        }
    }
    buf.put_u8(TERMINATOR_BYTE);
}

/// Reads one terminated segment, advancing `buf` past the terminator.
fn take_terminated(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            TERMINATOR_BYTE => {
                *buf = &buf[i + 1..];
                return Ok(out);
            }
            ESCAPE_BYTE => {
                match buf.get(i + 1) {
                    Some(0x01) => out.push(TERMINATOR_BYTE),
                    Some(0x02) => out.push(ESCAPE_BYTE),
                    Some(other) => {
                        return Err(Error::Encoding(format!(
                            "invalid escape sequence: 0x01 0x{:02x}",
                            other
                        )));
                    }
                    None => {
                        return Err(Error::Encoding(
                            "truncated escape sequence in terminated bytes".to_string(),
                        ));
                    }
                }
                i += 2;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    Err(Error::Encoding(
        "unterminated bytes sequence (missing 0x00 terminator)".to_string(),
    ))
}

/// Maps an f64 to a u64 whose big-endian bytes sort in numeric order.
fn sortable_f64(value: f64) -> u64 {
    // -0.0 and 0.0 are the same key
    let value = if value == 0.0 { 0.0 } else { value };
    let bits = value.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits ^ 0x8000_0000_0000_0000
    }
}

fn unsortable_f64(sortable: u64) -> f64 {
    let bits = if sortable & 0x8000_0000_0000_0000 != 0 {
        sortable ^ 0x8000_0000_0000_0000
    } else {
        !sortable
    };
    f64::from_bits(bits)
}

fn put_key(buf: &mut BytesMut, key: &Key) {
    match key {
        Key::Number(n) => {
            buf.put_u8(NUMBER_TYPE);
            buf.put_u64(sortable_f64(*n));
        }
        Key::String(s) => {
            buf.put_u8(STRING_TYPE);
            put_terminated(buf, s.as_bytes());
        }
    }
}

/// Encodes a key on its own, as stored in index entry values.
pub(crate) fn encode_key(key: &Key) -> Bytes {
    let mut buf = BytesMut::new();
    put_key(&mut buf, key);
    buf.freeze()
}

/// Decodes one key from the front of `buf`, advancing past it.
pub(crate) fn decode_key(buf: &mut &[u8]) -> Result<Key> {
    let (&tag, rest) = buf
        .split_first()
        .ok_or_else(|| Error::Encoding("key too short: missing type byte".to_string()))?;
    *buf = rest;
    match tag {
        NUMBER_TYPE => {
            if buf.len() < 8 {
                return Err(Error::Encoding(format!(
                    "number key too short: expected 8 bytes, got {}",
                    buf.len()
                )));
            }
            let (raw, rest) = buf.split_at(8);
            *buf = rest;
            let mut be = [0u8; 8];
            be.copy_from_slice(raw);
            Ok(Key::Number(unsortable_f64(u64::from_be_bytes(be))))
        }
        STRING_TYPE => {
            let raw = take_terminated(buf)?;
            String::from_utf8(raw)
                .map(Key::String)
                .map_err(|e| Error::Encoding(format!("string key is not UTF-8: {}", e)))
        }
        other => Err(Error::Encoding(format!(
            "invalid key type: expected 0x{:02x} or 0x{:02x}, got 0x{:02x}",
            NUMBER_TYPE, STRING_TYPE, other
        ))),
    }
}

fn prefixed(tag: u8, segments: &[&str]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(KEY_VERSION);
    buf.put_u8(tag);
    for segment in segments {
        put_terminated(&mut buf, segment.as_bytes());
    }
    buf
}

pub(crate) fn catalog_key(database: &str) -> Bytes {
    prefixed(CATALOG_TAG, &[database]).freeze()
}

pub(crate) fn generator_key(database: &str, store: &str) -> Bytes {
    prefixed(GENERATOR_TAG, &[database, store]).freeze()
}

/// Prefix shared by every record of one store.
pub(crate) fn record_prefix(database: &str, store: &str) -> Bytes {
    prefixed(RECORD_TAG, &[database, store]).freeze()
}

pub(crate) fn record_key(database: &str, store: &str, key: &Key) -> Bytes {
    let mut buf = prefixed(RECORD_TAG, &[database, store]);
    put_key(&mut buf, key);
    buf.freeze()
}

/// Prefix shared by every entry of one index that carries `value`.
pub(crate) fn index_value_prefix(database: &str, store: &str, index: &str, value: &Key) -> Bytes {
    let mut buf = prefixed(INDEX_TAG, &[database, store, index]);
    put_key(&mut buf, value);
    buf.freeze()
}

pub(crate) fn index_entry_key(
    database: &str,
    store: &str,
    index: &str,
    value: &Key,
    primary: &Key,
) -> Bytes {
    let mut buf = prefixed(INDEX_TAG, &[database, store, index]);
    put_key(&mut buf, value);
    put_key(&mut buf, primary);
    buf.freeze()
}
