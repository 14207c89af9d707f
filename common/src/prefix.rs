//! Prefix ranges over the storage key space.
//!
//! Every scan in the workspace walks the keys that share a prefix: the
//! records of one object store, the entries of one index or the stores of
//! one database. [`PrefixRange`] turns such a prefix into the bounds a
//! sorted map or a storage backend can seek with.

use std::ops::{Bound, RangeBounds};

use bytes::Bytes;

/// The range of keys starting with a given prefix.
///
/// The start is the prefix itself, inclusive. The end is the first key
/// greater than every prefixed key, exclusive, and is unbounded when no such
/// key exists. An empty prefix covers the whole key space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefixRange {
    start: Bound<Bytes>,
    end: Bound<Bytes>,
}

impl PrefixRange {
    pub fn new(prefix: Bytes) -> Self {
        if prefix.is_empty() {
            return Self {
                start: Bound::Unbounded,
                end: Bound::Unbounded,
            };
        }
        let end = match successor(&prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        Self {
            start: Bound::Included(prefix),
            end,
        }
    }
}

impl RangeBounds<Bytes> for PrefixRange {
    fn start_bound(&self) -> Bound<&Bytes> {
        self.start.as_ref()
    }

    fn end_bound(&self) -> Bound<&Bytes> {
        self.end.as_ref()
    }
}

/// Drops trailing `0xFF` bytes and bumps the last remaining one. `None` when
/// the prefix is all `0xFF`.
fn successor(prefix: &[u8]) -> Option<Bytes> {
    let last = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut end = prefix[..=last].to_vec();
    end[last] += 1;
    Some(Bytes::from(end))
}
