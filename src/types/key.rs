//! Key ordering and successor helpers.
//!
//! Keys are opaque byte strings ordered by unsigned lexicographic
//! comparison. Ranges are half-open, so an inclusive upper bound has to be
//! turned into an exclusive one with [`successor`] (one key) or
//! [`prefix_successor`] (every key sharing a prefix).

use std::cmp::Ordering;

/// Compare two keys byte-wise as unsigned values.
///
/// A key that is a strict prefix of another sorts first.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    // `[u8]`'s `Ord` is exactly unsigned lexicographic order.
    a.cmp(b)
}

/// Return the smallest key strictly greater than `key`.
///
/// This is always `key` followed by a single `0x00` byte, so it is defined
/// for every input, the empty key and all-`0xFF` keys included.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}

/// Return the smallest key greater than every key that starts with `prefix`.
///
/// Returns `None` when no such key exists (the empty prefix, or a prefix
/// made only of `0xFF` bytes); callers treat that as an unbounded side.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let last = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut bound = prefix[..=last].to_vec();
    bound[last] += 1;
    Some(bound)
}
