//! Range cursor for chunked iteration.
//!
//! A [`RangeCursor`] walks the entries of a half-open key range in
//! ascending order. It does no work until the first pull. It then resolves
//! both bounds to ranks, positions itself at the first rank, and refills a
//! bounded chunk of at most `capacity` accepted entries at a time by
//! scanning forward along the leaf chain.
//!
//! With [`RangeFlags::DELETE`] each refill removes the entries it accepted,
//! after the scan has finished, through the tree's ordinary delete path.
//! Deletions are immediate and are not undone if the cursor is dropped
//! before it is exhausted.

use std::collections::VecDeque;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::btree::filter::{AcceptAll, EntryFilter};
use crate::btree::BTree;
use crate::error::{IndexError, Result};
use crate::types::{NodeId, RangeFlags};

/// How a cursor reaches its tree
pub(crate) enum TreeAccess<'a> {
    /// Plain shared borrow
    Shared(&'a BTree),
    /// Plain mutable borrow (deletion allowed)
    Exclusive(&'a mut BTree),
    /// Read lock held for the cursor's lifetime
    ReadGuard(RwLockReadGuard<'a, BTree>),
    /// Write lock held for the cursor's lifetime (deletion allowed)
    WriteGuard(RwLockWriteGuard<'a, BTree>),
}

impl TreeAccess<'_> {
    fn tree(&self) -> &BTree {
        match self {
            TreeAccess::Shared(tree) => tree,
            TreeAccess::Exclusive(tree) => tree,
            TreeAccess::ReadGuard(guard) => guard,
            TreeAccess::WriteGuard(guard) => guard,
        }
    }

    fn tree_mut(&mut self) -> Option<&mut BTree> {
        match self {
            TreeAccess::Exclusive(tree) => Some(&mut **tree),
            TreeAccess::WriteGuard(guard) => Some(&mut **guard),
            TreeAccess::Shared(_) | TreeAccess::ReadGuard(_) => None,
        }
    }

    fn is_writable(&self) -> bool {
        matches!(self, TreeAccess::Exclusive(_) | TreeAccess::WriteGuard(_))
    }
}

/// An entry produced by a cursor.
///
/// The key is present when the cursor was opened with `KEYS`, the value
/// (after the filter's resolver) when it was opened with `VALS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
}

impl Entry {
    /// The key, if keys were requested
    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// The resolved value, if values were requested
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Split into key and value
    pub fn into_parts(self) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        (self.key, self.value)
    }

    /// The key-value pair, if both were requested
    pub fn into_pair(self) -> Option<(Vec<u8>, Vec<u8>)> {
        Some((self.key?, self.value?))
    }
}

/// Where the next refill starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Nothing resolved yet
    NotStarted,
    /// `rank` is the rank of the next unscanned entry. `hint` caches its
    /// leaf and slot while no deletion has moved entries around. `at_end`
    /// records that the last scan already reached the range boundary.
    Positioned {
        rank: u64,
        hint: Option<(NodeId, usize)>,
        at_end: bool,
    },
    /// Terminal
    Exhausted,
}

/// Result of one forward scan
struct Scan {
    chunk: Vec<Entry>,
    doomed: Vec<Vec<u8>>,
    scanned: u64,
    resume: Option<(NodeId, usize)>,
    at_end: bool,
}

/// A cursor over a half-open key range
pub struct RangeCursor<'a> {
    access: TreeAccess<'a>,
    from: Option<Vec<u8>>,
    to: Option<Vec<u8>>,
    capacity: usize,
    flags: RangeFlags,
    filter: Box<dyn EntryFilter + 'a>,
    state: CursorState,
    /// Buffered entries not yet handed out
    chunk: VecDeque<Entry>,
    /// Entry returned by the last `next`
    current: Option<Entry>,
    refills: u64,
    deleted: u64,
}

impl<'a> RangeCursor<'a> {
    /// Create a cursor, validating its parameters.
    ///
    /// Nothing is read from the tree here.
    pub(crate) fn new(
        access: TreeAccess<'a>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        capacity: i32,
        flags: RangeFlags,
        filter: Option<Box<dyn EntryFilter + 'a>>,
    ) -> Result<Self> {
        if capacity < 0 {
            return Err(IndexError::invalid_argument(format!(
                "capacity must not be negative (got {})",
                capacity
            )));
        }
        flags.validate()?;
        if flags.deletes() && !access.is_writable() {
            return Err(IndexError::UnsupportedFlags {
                bits: flags.bits(),
                reason: "DELETE requires exclusive access to the tree",
            });
        }

        let capacity = match capacity {
            0 => access.tree().config().default_capacity,
            n => n as usize,
        };
        let filter = filter.unwrap_or_else(|| Box::new(AcceptAll));
        Ok(Self::build(access, from, to, capacity, flags, filter))
    }

    /// Cursor with the default capacity, `KEYS | VALS`, and no filter
    pub(crate) fn with_defaults(access: TreeAccess<'a>, from: Option<&[u8]>, to: Option<&[u8]>) -> Self {
        let capacity = access.tree().config().default_capacity;
        let flags = RangeFlags::KEYS | RangeFlags::VALS;
        Self::build(access, from, to, capacity, flags, Box::new(AcceptAll))
    }

    fn build(
        access: TreeAccess<'a>,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        capacity: usize,
        flags: RangeFlags,
        filter: Box<dyn EntryFilter + 'a>,
    ) -> Self {
        Self {
            access,
            from: from.map(<[u8]>::to_vec),
            to: to.map(<[u8]>::to_vec),
            capacity,
            flags,
            filter,
            state: CursorState::NotStarted,
            chunk: VecDeque::new(),
            current: None,
            refills: 0,
            deleted: 0,
        }
    }

    /// Flags the cursor was opened with
    pub fn flags(&self) -> RangeFlags {
        self.flags
    }

    /// Entries buffered per refill
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rank of the next unscanned entry, once positioned
    pub fn position(&self) -> Option<u64> {
        match self.state {
            CursorState::Positioned { rank, .. } => Some(rank),
            CursorState::NotStarted | CursorState::Exhausted => None,
        }
    }

    /// Number of forward scans performed so far
    pub fn refills(&self) -> u64 {
        self.refills
    }

    /// Number of entries this cursor has removed from the tree
    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    /// Whether the cursor has reached its terminal state
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted && self.chunk.is_empty()
    }

    /// Whether the range boundary has been seen and every buffered entry
    /// handed out. Unlike [`has_next`](Self::has_next) this never refills.
    pub fn reached_end(&self) -> bool {
        self.chunk.is_empty()
            && matches!(
                self.state,
                CursorState::Exhausted | CursorState::Positioned { at_end: true, .. }
            )
    }

    /// Whether another entry is available, refilling the chunk if needed
    pub fn has_next(&mut self) -> Result<bool> {
        while self.chunk.is_empty() {
            if self.state == CursorState::Exhausted {
                return Ok(false);
            }
            self.refill()?;
        }
        Ok(true)
    }

    /// Advance to the next entry.
    ///
    /// Fails with `NoSuchElement` once the range is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&Entry> {
        let entry = self.advance()?;
        Ok(self.current.insert(entry))
    }

    /// Key of the entry returned by the last `next`
    pub fn key(&self) -> Result<&[u8]> {
        if !self.flags.keys() {
            return Err(IndexError::invalid_operation("keys were not requested for this cursor"));
        }
        self.current_entry()?
            .key()
            .ok_or_else(|| IndexError::invalid_operation("current entry has no key"))
    }

    /// Value of the entry returned by the last `next`
    pub fn value(&self) -> Result<&[u8]> {
        if !self.flags.values() {
            return Err(IndexError::invalid_operation("values were not requested for this cursor"));
        }
        self.current_entry()?
            .value()
            .ok_or_else(|| IndexError::invalid_operation("current entry has no value"))
    }

    /// Consume the cursor as an iterator of owned entries
    pub fn into_entries(self) -> Entries<'a> {
        Entries { cursor: self }
    }

    fn current_entry(&self) -> Result<&Entry> {
        self.current
            .as_ref()
            .ok_or_else(|| IndexError::invalid_operation("next has not been called"))
    }

    fn advance(&mut self) -> Result<Entry> {
        if !self.has_next()? {
            return Err(IndexError::NoSuchElement);
        }
        self.chunk.pop_front().ok_or(IndexError::NoSuchElement)
    }

    /// Run one forward scan and apply its deletions.
    ///
    /// A failed refill leaves the cursor exhausted, even when part of its
    /// delete batch was already applied.
    fn refill(&mut self) -> Result<()> {
        self.try_refill().map_err(|e| {
            self.state = CursorState::Exhausted;
            self.chunk.clear();
            e
        })
    }

    fn try_refill(&mut self) -> Result<()> {
        let (rank, hint) = match self.state {
            CursorState::Exhausted => return Ok(()),
            CursorState::Positioned { at_end: true, .. } => {
                self.state = CursorState::Exhausted;
                return Ok(());
            }
            CursorState::Positioned { rank, hint, .. } => (rank, hint),
            CursorState::NotStarted => {
                let tree = self.access.tree();
                let (from_rank, to_rank) = tree.resolve_range(self.from.as_deref(), self.to.as_deref())?;
                if to_rank <= from_rank {
                    trace!(from_rank, to_rank, "empty range");
                    self.state = CursorState::Exhausted;
                    return Ok(());
                }
                (from_rank, None)
            }
        };

        let scan = self.scan(rank, hint)?;
        self.refills += 1;

        let mut removed = 0u64;
        if !scan.doomed.is_empty() {
            let tree = self
                .access
                .tree_mut()
                .ok_or_else(|| IndexError::invalid_operation("cursor cannot delete through a shared borrow"))?;
            for key in &scan.doomed {
                if tree.delete(key)?.is_none() {
                    return Err(IndexError::invariant(format!(
                        "scanned key {:?} vanished before it could be deleted",
                        String::from_utf8_lossy(key)
                    )));
                }
                removed += 1;
                self.deleted += 1;
            }
        }

        trace!(
            rank,
            scanned = scan.scanned,
            collected = scan.chunk.len(),
            deleted = removed,
            at_end = scan.at_end,
            "refilled range cursor"
        );

        self.state = if scan.chunk.is_empty() && scan.at_end {
            CursorState::Exhausted
        } else {
            CursorState::Positioned {
                rank: rank + scan.scanned - removed,
                // Deletions may have merged or rebalanced leaves.
                hint: if removed == 0 { scan.resume } else { None },
                at_end: scan.at_end,
            }
        };
        self.chunk.extend(scan.chunk);
        Ok(())
    }

    /// Collect up to `capacity` accepted entries starting at `rank`
    fn scan(&self, rank: u64, hint: Option<(NodeId, usize)>) -> Result<Scan> {
        let tree = self.access.tree();
        let mut scan = Scan {
            chunk: Vec::with_capacity(self.capacity.min(1024)),
            doomed: Vec::new(),
            scanned: 0,
            resume: None,
            at_end: false,
        };

        let (mut leaf_id, mut slot) = match hint {
            Some(position) => position,
            None => match tree.locate(rank)? {
                Some(position) => position,
                None => {
                    scan.at_end = true;
                    return Ok(scan);
                }
            },
        };

        loop {
            let leaf = tree.leaf(leaf_id)?;
            if slot >= leaf.len() {
                match leaf.next() {
                    Some(next) => {
                        leaf_id = next;
                        slot = 0;
                        continue;
                    }
                    None => {
                        scan.at_end = true;
                        break;
                    }
                }
            }

            let key = leaf.key(slot);
            if self.to.as_deref().is_some_and(|to| key >= to) {
                scan.at_end = true;
                break;
            }
            if scan.chunk.len() >= self.capacity {
                // The chunk is full and the next entry is still in range.
                break;
            }

            let value = leaf.value(slot);
            scan.scanned += 1;
            slot += 1;

            if !self.filter.accept(key, value) {
                continue;
            }
            if self.flags.deletes() {
                scan.doomed.push(key.to_vec());
            }
            scan.chunk.push(Entry {
                key: self.flags.keys().then(|| key.to_vec()),
                value: self.flags.values().then(|| self.filter.resolve(key, value)),
            });
        }

        scan.resume = Some((leaf_id, slot));
        Ok(scan)
    }
}

/// Iterator adapter over a [`RangeCursor`]
pub struct Entries<'a> {
    cursor: RangeCursor<'a>,
}

impl<'a> Entries<'a> {
    /// The underlying cursor
    pub fn cursor(&self) -> &RangeCursor<'a> {
        &self.cursor
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.has_next() {
            Ok(true) => Some(self.cursor.advance()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::filter::FnFilter;
    use crate::types::BTreeConfig;

    const ALL: RangeFlags = RangeFlags::ALL;

    fn scenario_tree() -> Result<BTree> {
        let mut btree = BTree::with_config(BTreeConfig::new(2, 2));
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
            btree.put(k.as_bytes(), v.as_bytes())?;
        }
        Ok(btree)
    }

    fn numbered_tree(n: usize) -> Result<BTree> {
        let mut btree = BTree::with_config(BTreeConfig::new(4, 3));
        for i in 0..n {
            btree.put(format!("k{:04}", i).as_bytes(), format!("{}", i).as_bytes())?;
        }
        Ok(btree)
    }

    fn drain(cursor: RangeCursor<'_>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        cursor
            .into_entries()
            .map(|entry| Ok(entry?.into_pair().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_scenario_range() -> Result<()> {
        let btree = scenario_tree()?;
        let mut cursor = btree.range_iterator(Some(b"b"), Some(b"d"));

        assert!(cursor.has_next()?);
        assert_eq!(cursor.next()?.key(), Some(b"b".as_slice()));
        assert_eq!(cursor.value()?, b"2");
        assert_eq!(cursor.next()?.value(), Some(b"3".as_slice()));
        assert_eq!(cursor.key()?, b"c");
        assert!(!cursor.has_next()?);
        assert!(matches!(cursor.next(), Err(IndexError::NoSuchElement)));
        assert!(cursor.is_exhausted());
        Ok(())
    }

    #[test]
    fn test_capacity_one_refills() -> Result<()> {
        let btree = scenario_tree()?;
        let mut cursor = btree.range_iterator_with(None, None, 1, RangeFlags::KEYS | RangeFlags::VALS, None)?;

        let mut keys = Vec::new();
        while cursor.has_next()? {
            keys.push(cursor.next()?.key().map(<[u8]>::to_vec).unwrap_or_default());
        }

        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec()]);
        assert_eq!(cursor.refills(), 5);
        Ok(())
    }

    #[test]
    fn test_reached_end_without_refill() -> Result<()> {
        let btree = scenario_tree()?;
        let mut cursor = btree.range_iterator_with(None, None, 2, RangeFlags::KEYS, None)?;

        cursor.next()?;
        cursor.next()?;
        assert!(!cursor.reached_end());
        for _ in 0..3 {
            cursor.next()?;
        }
        assert!(cursor.reached_end());
        assert_eq!(cursor.refills(), 3);
        Ok(())
    }

    #[test]
    fn test_lazy_until_first_pull() -> Result<()> {
        let mut btree = scenario_tree()?;
        btree.corrupt_first_count(1)?;

        // Opening does not descend, so the corruption is only seen on the first pull.
        let mut cursor = btree.range_iterator(Some(b"a"), None);
        assert_eq!(cursor.position(), None);
        assert!(matches!(cursor.has_next(), Err(IndexError::StructuralInvariantViolation(_))));
        Ok(())
    }

    #[test]
    fn test_failed_delete_exhausts_cursor() -> Result<()> {
        let mut btree = numbered_tree(20)?;
        // Keys under the first child now route to its sibling, so deleting them fails.
        btree.corrupt_first_separator(b"")?;
        let before = btree.len();

        let mut cursor = btree.range_iterator_mut(None, None, 4, RangeFlags::DELETE, None)?;
        assert!(matches!(cursor.has_next(), Err(IndexError::StructuralInvariantViolation(_))));
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.position(), None);

        // No retry from the stale position
        assert!(!cursor.has_next()?);
        assert!(matches!(cursor.next(), Err(IndexError::NoSuchElement)));
        assert_eq!(cursor.refills(), 1);
        assert_eq!(cursor.deleted(), 0);
        drop(cursor);

        assert_eq!(btree.len(), before);
        Ok(())
    }

    #[test]
    fn test_empty_and_reversed_ranges() -> Result<()> {
        let btree = scenario_tree()?;

        let mut cursor = btree.range_iterator(Some(b"d"), Some(b"b"));
        assert!(!cursor.has_next()?);
        assert_eq!(cursor.refills(), 0);

        let mut cursor = btree.range_iterator(Some(b"c"), Some(b"c"));
        assert!(!cursor.has_next()?);
        assert_eq!(cursor.refills(), 0);

        let mut cursor = btree.range_iterator(Some(b"z"), None);
        assert!(!cursor.has_next()?);

        let empty = BTree::new();
        assert!(!empty.entry_iterator().has_next()?);
        Ok(())
    }

    #[test]
    fn test_invalid_parameters() -> Result<()> {
        let mut btree = scenario_tree()?;

        assert!(matches!(
            btree.range_iterator_with(None, None, -1, RangeFlags::KEYS, None),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            btree.range_iterator_with(None, None, 0, RangeFlags::from_bits_retain(0x10), None),
            Err(IndexError::UnsupportedFlags { bits: 0x10, .. })
        ));
        assert!(matches!(
            btree.range_iterator_with(None, None, 0, RangeFlags::DELETE, None),
            Err(IndexError::UnsupportedFlags { .. })
        ));

        // A refused deleting cursor leaves the tree alone.
        assert!(btree.range_iterator_mut(None, None, -5, RangeFlags::DELETE, None).is_err());
        assert_eq!(btree.len(), 5);
        Ok(())
    }

    #[test]
    fn test_accessor_requires_flags() -> Result<()> {
        let btree = scenario_tree()?;
        let mut cursor = btree.range_iterator_with(None, None, 0, RangeFlags::KEYS, None)?;

        assert!(matches!(cursor.key(), Err(IndexError::InvalidOperation(_))));
        let entry = cursor.next()?;
        assert_eq!(entry.value(), None);
        assert_eq!(cursor.key()?, b"a");
        assert!(matches!(cursor.value(), Err(IndexError::InvalidOperation(_))));
        Ok(())
    }

    #[test]
    fn test_filter_and_resolver() -> Result<()> {
        let btree = numbered_tree(50)?;
        let filter = FnFilter::new()
            .with_accept(|_, value| value.last().is_some_and(|d| *d == b'7'))
            .with_resolve(|_, value| [b"#".as_slice(), value].concat());

        let cursor = btree.range_iterator_with(None, None, 2, RangeFlags::KEYS | RangeFlags::VALS, Some(filter.boxed()))?;
        let values: Vec<Vec<u8>> = drain(cursor)?.into_iter().map(|(_, v)| v).collect();

        assert_eq!(
            values,
            vec![b"#7".to_vec(), b"#17".to_vec(), b"#27".to_vec(), b"#37".to_vec(), b"#47".to_vec()]
        );
        Ok(())
    }

    #[test]
    fn test_delete_range() -> Result<()> {
        let mut btree = numbered_tree(100)?;
        let from = b"k0020".to_vec();
        let to = b"k0070".to_vec();

        let cursor = btree.range_iterator_mut(Some(&from), Some(&to), 7, ALL, None)?;
        let removed = drain(cursor)?;

        assert_eq!(removed.len(), 50);
        assert_eq!(removed.first().map(|(k, _)| k.clone()), Some(from.clone()));
        assert_eq!(btree.len(), 50);
        assert_eq!(btree.range_count(Some(&from), Some(&to))?, 0);
        assert_eq!(btree.get(b"k0019")?, Some(b"19".to_vec()));
        assert_eq!(btree.get(b"k0070")?, Some(b"70".to_vec()));
        btree.check_invariants()
    }

    #[test]
    fn test_delete_with_filter_only_removes_accepted() -> Result<()> {
        let mut btree = numbered_tree(60)?;
        let even = FnFilter::new().with_accept(|_, value| value.last().is_some_and(|d| d % 2 == 0));

        let cursor = btree.range_iterator_mut(None, None, 4, RangeFlags::DELETE, Some(even.boxed()))?;
        let visited = cursor.into_entries().count();

        assert_eq!(visited, 30);
        assert_eq!(btree.len(), 30);
        for i in 0..60 {
            let present = btree.contains(format!("k{:04}", i).as_bytes())?;
            assert_eq!(present, i % 2 == 1, "key {}", i);
        }
        btree.check_invariants()
    }

    #[test]
    fn test_reject_all_deletes_nothing() -> Result<()> {
        let mut btree = numbered_tree(40)?;
        let none = FnFilter::new().with_accept(|_, _| false);

        let mut cursor = btree.range_iterator_mut(None, None, 3, ALL, Some(none.boxed()))?;
        assert!(!cursor.has_next()?);
        assert_eq!(cursor.deleted(), 0);
        drop(cursor);

        assert_eq!(btree.len(), 40);
        Ok(())
    }

    #[test]
    fn test_abandoned_delete_cursor_keeps_deletions() -> Result<()> {
        let mut btree = numbered_tree(30)?;

        let mut cursor = btree.range_iterator_mut(None, None, 5, RangeFlags::KEYS | RangeFlags::DELETE, None)?;
        cursor.next()?;
        assert_eq!(cursor.deleted(), 5);
        drop(cursor);

        // The whole first chunk is gone even though only one entry was read.
        assert_eq!(btree.len(), 25);
        assert_eq!(btree.key_at(0)?, Some(b"k0005".to_vec()));
        btree.check_invariants()
    }

    #[test]
    fn test_position_tracks_rank() -> Result<()> {
        let btree = numbered_tree(20)?;
        let mut cursor = btree.range_iterator_with(Some(b"k0005"), None, 4, RangeFlags::KEYS, None)?;

        cursor.next()?;
        assert_eq!(cursor.position(), Some(9));
        for _ in 0..4 {
            cursor.next()?;
        }
        assert_eq!(cursor.position(), Some(13));
        Ok(())
    }
}
