//! B+Tree core implementation.
//!
//! This module provides the main BTree struct with operations for:
//! - get / put / delete: point access with split, borrow and merge
//! - index_of / locate: rank resolution in both directions
//! - range_count: exact interval size from two rank resolutions
//! - range_iterator: chunked cursors (see [`RangeCursor`])
//!
//! Every interior node records the entry count beneath each child. All
//! structural mutations restore those counts before returning, which is
//! what keeps `index_of` and `range_count` logarithmic and exact.

use tracing::{debug, trace};

use crate::btree::cursor::{RangeCursor, TreeAccess};
use crate::btree::filter::EntryFilter;
use crate::error::{IndexError, Result};
use crate::node::{InteriorNode, LeafNode, Node, NodeArena};
use crate::types::{BTreeConfig, NodeId, RangeFlags};
use crate::TreeNode;

/// Outcome of inserting into a subtree
struct InsertOutcome {
    /// Value replaced by the insert, if the key was already present
    previous: Option<Vec<u8>>,
    /// Separator and new right sibling, if the subtree root split
    split: Option<(Vec<u8>, NodeId)>,
}

/// State gathered while validating the tree
#[derive(Default)]
struct InvariantWalk {
    leaves: Vec<NodeId>,
    leaf_depth: Option<usize>,
}

/// An in-memory order-statistic B+Tree over byte keys
#[derive(Debug, Clone)]
pub struct BTree {
    /// Storage for every node
    arena: NodeArena,
    /// Root node (a leaf while the tree fits in one node)
    root: NodeId,
    /// Number of entries
    len: u64,
    /// Current height of the tree
    height: usize,
    /// Node limits and cursor defaults
    config: BTreeConfig,
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BTree {
    /// Create an empty tree with the default configuration
    pub fn new() -> Self {
        Self::with_config(BTreeConfig::default())
    }

    /// Create an empty tree with custom node limits
    pub fn with_config(config: BTreeConfig) -> Self {
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::Leaf(LeafNode::new()));
        Self {
            arena,
            root,
            len: 0,
            height: 1,
            config: config.normalized(),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    /// Get the height of the tree
    pub fn height(&self) -> usize {
        self.height
    }

    /// Get the root node ID
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of entries
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the tree holds no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = self.arena.alloc(Node::Leaf(LeafNode::new()));
        self.len = 0;
        self.height = 1;
    }

    /// Borrow a node
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.arena.get(id)
    }

    /// Borrow a node that must be a leaf
    pub(crate) fn leaf(&self, id: NodeId) -> Result<&LeafNode> {
        self.arena
            .get(id)?
            .as_leaf()
            .ok_or_else(|| IndexError::invariant(format!("node {} is not a leaf", id)))
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafNode> {
        self.arena
            .get_mut(id)?
            .as_leaf_mut()
            .ok_or_else(|| IndexError::invariant(format!("node {} is not a leaf", id)))
    }

    fn interior(&self, id: NodeId) -> Result<&InteriorNode> {
        self.arena
            .get(id)?
            .as_interior()
            .ok_or_else(|| IndexError::invariant(format!("node {} is not an interior node", id)))
    }

    fn interior_mut(&mut self, id: NodeId) -> Result<&mut InteriorNode> {
        self.arena
            .get_mut(id)?
            .as_interior_mut()
            .ok_or_else(|| IndexError::invariant(format!("node {} is not an interior node", id)))
    }

    /// Look up a key and return its value
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let leaf = self.leaf(self.find_leaf(key)?)?;
        Ok(leaf.search(key).ok().map(|index| leaf.value(index).to_vec()))
    }

    /// Check if a key exists
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        let leaf = self.leaf(self.find_leaf(key)?)?;
        Ok(leaf.search(key).is_ok())
    }

    /// Descend to the leaf whose key range covers `key`
    fn find_leaf(&self, key: &[u8]) -> Result<NodeId> {
        let mut current = self.root;
        loop {
            match self.arena.get(current)? {
                Node::Leaf(_) => return Ok(current),
                Node::Interior(interior) => current = interior.child(interior.find_child(key)),
            }
        }
    }

    /// Debug search - traces the path through the tree
    pub fn debug_get(&self, key: &[u8]) -> Result<Vec<String>> {
        let mut trace = Vec::new();
        trace.push(format!("Searching for key: {:?}", String::from_utf8_lossy(key)));
        trace.push(format!(
            "Root node: {}, Height: {}, Entries: {}",
            self.root, self.height, self.len
        ));

        let mut current = self.root;
        let mut offset = 0u64;
        loop {
            match self.arena.get(current)? {
                Node::Interior(interior) => {
                    trace.push(format!(
                        "  Node {}: interior, keys={}, entries={}",
                        current,
                        interior.key_count(),
                        interior.subtree_count()
                    ));
                    for (i, child) in interior.children().iter().enumerate() {
                        let lower = if i == 0 {
                            "-inf".to_string()
                        } else {
                            String::from_utf8_lossy(interior.key(i - 1)).to_string()
                        };
                        trace.push(format!(
                            "    Child {}: node={}, count={} (keys >= {})",
                            i,
                            child,
                            interior.count(i),
                            lower
                        ));
                    }
                    let index = interior.find_child(key);
                    offset += interior.offset_before(index);
                    trace.push(format!(
                        "  -> Descending to child {} (node {}), rank offset {}",
                        index,
                        interior.child(index),
                        offset
                    ));
                    current = interior.child(index);
                }
                Node::Leaf(leaf) => {
                    trace.push(format!("  Node {}: leaf, entries={}", current, leaf.len()));
                    for (i, k) in leaf.keys().iter().enumerate() {
                        trace.push(format!("    Entry {}: key={}", i, String::from_utf8_lossy(k)));
                    }
                    match leaf.search(key) {
                        Ok(index) => trace.push(format!(
                            "  FOUND at index {} (rank {})",
                            index,
                            offset + index as u64
                        )),
                        Err(index) => trace.push(format!(
                            "  NOT FOUND, insertion rank {}",
                            offset + index as u64
                        )),
                    }
                    return Ok(trace);
                }
            }
        }
    }

    /// Insert or update a key-value pair
    ///
    /// Returns the previous value if the key was already present.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let outcome = self.insert_recursive(self.root, key, value)?;
        if outcome.previous.is_none() {
            self.len += 1;
        }

        // Handle root split
        if let Some((separator, right_id)) = outcome.split {
            self.split_root(separator, right_id)?;
        }

        Ok(outcome.previous)
    }

    /// Recursive insert
    fn insert_recursive(&mut self, node_id: NodeId, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let child_index = match self.arena.get(node_id)? {
            Node::Leaf(_) => return self.insert_into_leaf(node_id, key, value),
            Node::Interior(interior) => interior.find_child(key),
        };
        let child_id = self.interior(node_id)?.child(child_index);

        let outcome = self.insert_recursive(child_id, key, value)?;

        let split = match outcome.split {
            None => {
                if outcome.previous.is_none() {
                    self.interior_mut(node_id)?.increment(child_index);
                }
                None
            }
            Some((separator, right_id)) => {
                // Counts of both halves are recomputed from the children.
                let left_count = self.arena.get(child_id)?.subtree_count();
                let right_count = self.arena.get(right_id)?.subtree_count();
                let max_keys = self.config.max_interior_keys;

                let node = self.interior_mut(node_id)?;
                node.set_count(child_index, left_count);
                node.insert_after(child_index, separator, right_id, right_count);

                if node.key_count() > max_keys {
                    Some(self.split_interior(node_id)?)
                } else {
                    None
                }
            }
        };

        Ok(InsertOutcome {
            previous: outcome.previous,
            split,
        })
    }

    /// Insert into a leaf, splitting it when it overflows
    fn insert_into_leaf(&mut self, leaf_id: NodeId, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let max_keys = self.config.max_leaf_keys;
        let leaf = self.leaf_mut(leaf_id)?;

        match leaf.search(key) {
            Ok(index) => {
                // Update existing
                let previous = leaf.replace_value(index, value.to_vec());
                return Ok(InsertOutcome {
                    previous: Some(previous),
                    split: None,
                });
            }
            Err(index) => leaf.insert(index, key.to_vec(), value.to_vec()),
        }

        let split = if leaf.len() > max_keys {
            Some(self.split_leaf(leaf_id)?)
        } else {
            None
        };

        Ok(InsertOutcome { previous: None, split })
    }

    /// Split a leaf and link the new right sibling into the leaf chain
    fn split_leaf(&mut self, leaf_id: NodeId) -> Result<(Vec<u8>, NodeId)> {
        let leaf = self.leaf_mut(leaf_id)?;
        let mut right = leaf.split();
        right.set_next(leaf.next());

        let separator = right
            .first_key()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| IndexError::invariant(format!("split of leaf {} left an empty sibling", leaf_id)))?;

        let right_id = self.arena.alloc(Node::Leaf(right));
        self.leaf_mut(leaf_id)?.set_next(Some(right_id));

        debug!(leaf = %leaf_id, right = %right_id, "split leaf");
        Ok((separator, right_id))
    }

    /// Split an interior node around its middle separator
    fn split_interior(&mut self, node_id: NodeId) -> Result<(Vec<u8>, NodeId)> {
        let (separator, right) = self.interior_mut(node_id)?.split();
        let right_id = self.arena.alloc(Node::Interior(right));

        debug!(node = %node_id, right = %right_id, "split interior node");
        Ok((separator, right_id))
    }

    /// Split the root, creating a new root
    fn split_root(&mut self, separator: Vec<u8>, right_id: NodeId) -> Result<()> {
        let left_id = self.root;
        let left_count = self.arena.get(left_id)?.subtree_count();
        let right_count = self.arena.get(right_id)?.subtree_count();

        let root = InteriorNode::with_children(left_id, left_count, separator, right_id, right_count);
        self.root = self.arena.alloc(Node::Interior(root));
        self.height += 1;

        debug!(root = %self.root, height = self.height, "grew root");
        Ok(())
    }

    /// Delete a key from the tree
    ///
    /// Returns the removed value if the key was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let removed = self.delete_recursive(self.root, key)?;

        if removed.is_some() {
            self.len = self
                .len
                .checked_sub(1)
                .ok_or_else(|| IndexError::invariant("entry count underflow on delete"))?;
            self.collapse_root()?;
        }

        Ok(removed)
    }

    /// Recursive delete
    fn delete_recursive(&mut self, node_id: NodeId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let child_index = match self.arena.get_mut(node_id)? {
            Node::Leaf(leaf) => return Ok(leaf.search(key).ok().map(|index| leaf.remove(index).1)),
            Node::Interior(interior) => interior.find_child(key),
        };
        let child_id = self.interior(node_id)?.child(child_index);

        let removed = self.delete_recursive(child_id, key)?;
        if removed.is_none() {
            return Ok(None);
        }

        self.interior_mut(node_id)?
            .decrement(child_index)
            .ok_or_else(|| {
                IndexError::invariant(format!(
                    "child {} of node {} recorded no entries but lost one",
                    child_index, node_id
                ))
            })?;

        if self.is_underfull(child_id)? {
            self.rebalance_child(node_id, child_index)?;
        }

        Ok(removed)
    }

    fn is_underfull(&self, node_id: NodeId) -> Result<bool> {
        Ok(match self.arena.get(node_id)? {
            Node::Leaf(leaf) => leaf.len() < self.config.min_leaf_keys(),
            Node::Interior(interior) => interior.key_count() < self.config.min_interior_keys(),
        })
    }

    fn can_lend(&self, node_id: NodeId) -> Result<bool> {
        Ok(match self.arena.get(node_id)? {
            Node::Leaf(leaf) => leaf.len() > self.config.min_leaf_keys(),
            Node::Interior(interior) => interior.key_count() > self.config.min_interior_keys(),
        })
    }

    /// Restore the minimum fill of the child at `index` of `parent_id`
    fn rebalance_child(&mut self, parent_id: NodeId, index: usize) -> Result<()> {
        let parent = self.interior(parent_id)?;
        let left = index.checked_sub(1).map(|i| parent.child(i));
        let right = (index + 1 < parent.child_count()).then(|| parent.child(index + 1));

        if let Some(left_id) = left {
            if self.can_lend(left_id)? {
                return self.borrow_from_left(parent_id, index);
            }
        }
        if let Some(right_id) = right {
            if self.can_lend(right_id)? {
                return self.borrow_from_right(parent_id, index);
            }
        }

        match (left, right) {
            (Some(_), _) => self.merge_children(parent_id, index - 1),
            (None, Some(_)) => self.merge_children(parent_id, index),
            // Only child: the root collapse takes care of it.
            (None, None) => Ok(()),
        }
    }

    /// Move the last entry (or child) of the left sibling into the child at `index`
    fn borrow_from_left(&mut self, parent_id: NodeId, index: usize) -> Result<()> {
        let (left_id, child_id, separator) = {
            let parent = self.interior(parent_id)?;
            (parent.child(index - 1), parent.child(index), parent.key(index - 1).to_vec())
        };

        let new_separator = match self.arena.pair_mut(left_id, child_id)? {
            (Node::Leaf(left), Node::Leaf(child)) => {
                let (key, value) = left
                    .pop_back()
                    .ok_or_else(|| IndexError::invariant(format!("leaf {} has nothing to lend", left_id)))?;
                let separator = key.clone();
                child.push_front(key, value);
                separator
            }
            (Node::Interior(left), Node::Interior(child)) => {
                let (key, grandchild, count) = left
                    .pop_back()
                    .ok_or_else(|| IndexError::invariant(format!("node {} has nothing to lend", left_id)))?;
                child.push_front(grandchild, count, separator);
                key
            }
            _ => return Err(Self::sibling_mismatch(left_id, child_id)),
        };

        self.interior_mut(parent_id)?.set_key(index - 1, new_separator);
        self.refresh_counts(parent_id, &[index - 1, index])
    }

    /// Move the first entry (or child) of the right sibling into the child at `index`
    fn borrow_from_right(&mut self, parent_id: NodeId, index: usize) -> Result<()> {
        let (child_id, right_id, separator) = {
            let parent = self.interior(parent_id)?;
            (parent.child(index), parent.child(index + 1), parent.key(index).to_vec())
        };

        let new_separator = match self.arena.pair_mut(child_id, right_id)? {
            (Node::Leaf(child), Node::Leaf(right)) => {
                let (key, value) = right
                    .pop_front()
                    .ok_or_else(|| IndexError::invariant(format!("leaf {} has nothing to lend", right_id)))?;
                child.push_back(key, value);
                right
                    .first_key()
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| IndexError::invariant(format!("leaf {} lent its last entry", right_id)))?
            }
            (Node::Interior(child), Node::Interior(right)) => {
                let (key, grandchild, count) = right
                    .pop_front()
                    .ok_or_else(|| IndexError::invariant(format!("node {} has nothing to lend", right_id)))?;
                child.push_back(separator, grandchild, count);
                key
            }
            _ => return Err(Self::sibling_mismatch(child_id, right_id)),
        };

        self.interior_mut(parent_id)?.set_key(index, new_separator);
        self.refresh_counts(parent_id, &[index, index + 1])
    }

    /// Merge the child right of separator `index` into the child left of it
    fn merge_children(&mut self, parent_id: NodeId, index: usize) -> Result<()> {
        let (separator, right_id, _) = self.interior_mut(parent_id)?.remove_after(index);
        let left_id = self.interior(parent_id)?.child(index);
        let right = self.arena.take(right_id)?;

        match (self.arena.get_mut(left_id)?, right) {
            (Node::Leaf(left), Node::Leaf(right)) => left.merge(right),
            (Node::Interior(left), Node::Interior(right)) => left.merge(separator, right),
            _ => return Err(Self::sibling_mismatch(left_id, right_id)),
        }

        debug!(left = %left_id, right = %right_id, parent = %parent_id, "merged siblings");
        self.refresh_counts(parent_id, &[index])
    }

    /// Recompute the recorded counts of the given children from the children themselves
    fn refresh_counts(&mut self, parent_id: NodeId, indices: &[usize]) -> Result<()> {
        let mut counts = Vec::with_capacity(indices.len());
        {
            let parent = self.interior(parent_id)?;
            for &index in indices {
                counts.push((index, self.arena.get(parent.child(index))?.subtree_count()));
            }
        }

        let parent = self.interior_mut(parent_id)?;
        for (index, count) in counts {
            parent.set_count(index, count);
        }
        Ok(())
    }

    /// Replace a single-child interior root by its child
    fn collapse_root(&mut self) -> Result<()> {
        loop {
            let only_child = match self.arena.get(self.root)? {
                Node::Interior(root) if root.child_count() == 1 => root.child(0),
                _ => return Ok(()),
            };

            self.arena.take(self.root)?;
            self.root = only_child;
            self.height -= 1;
            debug!(root = %self.root, height = self.height, "collapsed root");
        }
    }

    fn sibling_mismatch(a: NodeId, b: NodeId) -> IndexError {
        IndexError::invariant(format!("siblings {} and {} are not the same kind of node", a, b))
    }

    /// Resolve the rank of `key`.
    ///
    /// Returns the zero-based rank if the key is present. Otherwise returns
    /// `-(insertion_rank) - 1`, as a sorted-array binary search would, so the
    /// number of smaller keys is recovered with `-(result) - 1`.
    ///
    /// Each node's entry count is checked against the count recorded by its
    /// parent on the way down; a mismatch aborts the call.
    pub fn index_of(&self, key: &[u8]) -> Result<i64> {
        let mut current = self.root;
        let mut expected = self.len;
        let mut offset = 0u64;

        loop {
            let node = self.arena.get(current)?;
            let actual = node.subtree_count();
            if actual != expected {
                return Err(IndexError::invariant(format!(
                    "node {} holds {} entries but {} were recorded",
                    current, actual, expected
                )));
            }

            match node {
                Node::Interior(interior) => {
                    let index = interior.find_child(key);
                    offset += interior.offset_before(index);
                    expected = interior.count(index);
                    current = interior.child(index);
                }
                Node::Leaf(leaf) => {
                    return Ok(match leaf.search(key) {
                        Ok(index) => (offset + index as u64) as i64,
                        Err(index) => -((offset + index as u64) as i64) - 1,
                    });
                }
            }
        }
    }

    /// Find the leaf and slot holding the entry of rank `rank`.
    ///
    /// Returns `None` when `rank >= len()`.
    pub fn locate(&self, rank: u64) -> Result<Option<(NodeId, usize)>> {
        if rank >= self.len {
            return Ok(None);
        }

        let mut current = self.root;
        let mut remaining = rank;
        loop {
            match self.arena.get(current)? {
                Node::Interior(interior) => {
                    let mut next = None;
                    for (index, &count) in interior.counts().iter().enumerate() {
                        if remaining < count {
                            next = Some(interior.child(index));
                            break;
                        }
                        remaining -= count;
                    }
                    let parent = current;
                    current = next.ok_or_else(|| {
                        IndexError::invariant(format!(
                            "rank {} is beyond the entries recorded under node {}",
                            rank, parent
                        ))
                    })?;
                }
                Node::Leaf(leaf) => {
                    let slot = remaining as usize;
                    if slot >= leaf.len() {
                        return Err(IndexError::invariant(format!(
                            "leaf {} holds {} entries, rank {} needs slot {}",
                            current,
                            leaf.len(),
                            rank,
                            slot
                        )));
                    }
                    return Ok(Some((current, slot)));
                }
            }
        }
    }

    /// Key of the entry at `rank`
    pub fn key_at(&self, rank: u64) -> Result<Option<Vec<u8>>> {
        match self.locate(rank)? {
            Some((leaf_id, slot)) => Ok(Some(self.leaf(leaf_id)?.key(slot).to_vec())),
            None => Ok(None),
        }
    }

    /// Value of the entry at `rank`
    pub fn value_at(&self, rank: u64) -> Result<Option<Vec<u8>>> {
        match self.locate(rank)? {
            Some((leaf_id, slot)) => Ok(Some(self.leaf(leaf_id)?.value(slot).to_vec())),
            None => Ok(None),
        }
    }

    /// Number of entries in the half-open range `[from, to)`.
    ///
    /// `None` leaves a side unbounded. Neither bound has to be present in the
    /// tree, and a range whose `to` sorts at or before `from` counts 0. Costs
    /// two descents regardless of how many entries the range spans.
    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        let (from_rank, to_rank) = self.resolve_range(from, to)?;
        Ok(to_rank.saturating_sub(from_rank))
    }

    /// Resolve both bounds of a range to ranks
    pub(crate) fn resolve_range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<(u64, u64)> {
        Ok((self.resolve_bound(from, 0)?, self.resolve_bound(to, self.len)?))
    }

    fn resolve_bound(&self, key: Option<&[u8]>, unbounded: u64) -> Result<u64> {
        let Some(key) = key else {
            return Ok(unbounded);
        };

        let index = self.index_of(key)?;
        let rank = if index < 0 { (-(index + 1)) as u64 } else { index as u64 };
        if rank > self.len {
            return Err(IndexError::invariant(format!(
                "bound resolved to rank {} in a tree of {} entries",
                rank, self.len
            )));
        }
        Ok(rank)
    }

    /// Cursor over `[from, to)` yielding keys and values with the default capacity
    pub fn range_iterator<'a>(&'a self, from: Option<&[u8]>, to: Option<&[u8]>) -> RangeCursor<'a> {
        RangeCursor::with_defaults(TreeAccess::Shared(self), from, to)
    }

    /// Cursor over every entry
    pub fn entry_iterator(&self) -> RangeCursor<'_> {
        self.range_iterator(None, None)
    }

    /// Cursor over `[from, to)` with explicit capacity, flags and filter.
    ///
    /// The tree is only borrowed for reading, so [`RangeFlags::DELETE`] is
    /// refused with `UnsupportedFlags`; use [`range_iterator_mut`](Self::range_iterator_mut).
    pub fn range_iterator_with<'a>(
        &'a self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        capacity: i32,
        flags: RangeFlags,
        filter: Option<Box<dyn EntryFilter + 'a>>,
    ) -> Result<RangeCursor<'a>> {
        RangeCursor::new(TreeAccess::Shared(self), from, to, capacity, flags, filter)
    }

    /// Cursor over `[from, to)` that may delete the entries it visits.
    ///
    /// Deletions take effect refill by refill and are not rolled back if the
    /// cursor is dropped before it is exhausted.
    pub fn range_iterator_mut<'a>(
        &'a mut self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        capacity: i32,
        flags: RangeFlags,
        filter: Option<Box<dyn EntryFilter + 'a>>,
    ) -> Result<RangeCursor<'a>> {
        RangeCursor::new(TreeAccess::Exclusive(self), from, to, capacity, flags, filter)
    }

    /// Scan a range of keys
    ///
    /// Returns all key-value pairs where from <= key < to.
    pub fn scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.range_iterator(from, to)
            .into_entries()
            .map(|entry| {
                entry?
                    .into_pair()
                    .ok_or_else(|| IndexError::invalid_operation("scan cursor did not materialize keys and values"))
            })
            .collect()
    }

    /// Validate every structural invariant of the tree.
    ///
    /// Checks subtree counts, key order and bounds, minimum fill, uniform leaf
    /// depth and the leaf chain.
    pub fn check_invariants(&self) -> Result<()> {
        let mut walk = InvariantWalk::default();
        let total = self.check_node(&mut walk, self.root, None, None, 1)?;
        if total != self.len {
            return Err(IndexError::invariant(format!(
                "tree holds {} entries but records {}",
                total, self.len
            )));
        }
        if walk.leaf_depth != Some(self.height) {
            return Err(IndexError::invariant(format!(
                "leaves sit at depth {:?} but the height is {}",
                walk.leaf_depth, self.height
            )));
        }

        // The forward links must visit exactly the leaves, in key order.
        let mut chain = Vec::with_capacity(walk.leaves.len());
        let mut next = walk.leaves.first().copied();
        while let Some(leaf_id) = next {
            if chain.len() >= walk.leaves.len() {
                return Err(IndexError::invariant("leaf chain is longer than the tree"));
            }
            chain.push(leaf_id);
            next = self.leaf(leaf_id)?.next();
        }
        if chain != walk.leaves {
            return Err(IndexError::invariant("leaf chain does not follow key order"));
        }

        trace!(entries = total, nodes = self.arena.len(), "invariants hold");
        Ok(())
    }

    fn check_node(
        &self,
        walk: &mut InvariantWalk,
        node_id: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
    ) -> Result<u64> {
        let is_root = node_id == self.root;
        let in_bounds = |key: &[u8]| lower.map_or(true, |l| key >= l) && upper.map_or(true, |u| key < u);
        let separator_in_bounds =
            |key: &[u8]| lower.map_or(true, |l| key >= l) && upper.map_or(true, |u| key <= u);
        let ascending = |keys: &[Vec<u8>]| keys.windows(2).all(|pair| pair[0] < pair[1]);

        match self.arena.get(node_id)? {
            Node::Leaf(leaf) => {
                if !ascending(leaf.keys()) || !leaf.keys().iter().all(|k| in_bounds(k.as_slice())) {
                    return Err(IndexError::invariant(format!("leaf {} keys are out of order or bounds", node_id)));
                }
                if !is_root && leaf.len() < self.config.min_leaf_keys() {
                    return Err(IndexError::invariant(format!("leaf {} is underfull", node_id)));
                }
                match walk.leaf_depth {
                    Some(d) if d != depth => {
                        return Err(IndexError::invariant(format!("leaf {} sits at depth {} not {}", node_id, depth, d)));
                    }
                    _ => walk.leaf_depth = Some(depth),
                }
                walk.leaves.push(node_id);
                Ok(leaf.len() as u64)
            }
            Node::Interior(interior) => {
                if interior.child_count() != interior.key_count() + 1
                    || interior.counts().len() != interior.child_count()
                {
                    return Err(IndexError::invariant(format!("node {} has mismatched arrays", node_id)));
                }
                let min_keys = if is_root { 1 } else { self.config.min_interior_keys() };
                if interior.key_count() < min_keys {
                    return Err(IndexError::invariant(format!("node {} is underfull", node_id)));
                }
                if !ascending(interior.keys()) || !interior.keys().iter().all(|k| separator_in_bounds(k.as_slice())) {
                    return Err(IndexError::invariant(format!("node {} separators are out of order or bounds", node_id)));
                }

                let last = interior.child_count() - 1;
                let mut total = 0u64;
                for index in 0..=last {
                    let child_lower = if index == 0 { lower } else { Some(interior.key(index - 1)) };
                    let child_upper = if index == last { upper } else { Some(interior.key(index)) };
                    let actual = self.check_node(walk, interior.child(index), child_lower, child_upper, depth + 1)?;
                    if actual != interior.count(index) {
                        return Err(IndexError::invariant(format!(
                            "node {} records {} entries under child {} which holds {}",
                            node_id,
                            interior.count(index),
                            index,
                            actual
                        )));
                    }
                    total += actual;
                }
                Ok(total)
            }
        }
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&self) -> Result<TreeNode> {
        self.export_node(self.root)
    }

    fn export_node(&self, node_id: NodeId) -> Result<TreeNode> {
        let lossy = |bytes: &Vec<u8>| String::from_utf8_lossy(bytes).to_string();

        match self.arena.get(node_id)? {
            Node::Leaf(leaf) => Ok(TreeNode {
                node_id: node_id.value(),
                is_leaf: true,
                keys: leaf.keys().iter().map(lossy).collect(),
                values: leaf.values().iter().map(lossy).collect(),
                counts: Vec::new(),
                children: Vec::new(),
            }),
            Node::Interior(interior) => {
                let children = interior
                    .children()
                    .iter()
                    .map(|&child| self.export_node(child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(TreeNode {
                    node_id: node_id.value(),
                    is_leaf: false,
                    keys: interior.keys().iter().map(lossy).collect(),
                    values: Vec::new(),
                    counts: interior.counts().to_vec(),
                    children,
                })
            }
        }
    }

    /// Corrupt the recorded count of the root's first child (tests only)
    #[cfg(test)]
    pub(crate) fn corrupt_first_count(&mut self, delta: u64) -> Result<()> {
        let root = self.root;
        let interior = self.interior_mut(root)?;
        let count = interior.count(0);
        interior.set_count(0, count + delta);
        Ok(())
    }

    /// Overwrite the root's first separator (tests only)
    #[cfg(test)]
    pub(crate) fn corrupt_first_separator(&mut self, key: &[u8]) -> Result<()> {
        let root = self.root;
        self.interior_mut(root)?.set_key(0, key.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn create_test_btree() -> BTree {
        BTree::with_config(BTreeConfig::new(4, 3))
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{:04}", i).into_bytes()
    }

    #[test]
    fn test_btree_empty() -> Result<()> {
        let btree = create_test_btree();
        assert_eq!(btree.get(b"key")?, None);
        assert_eq!(btree.len(), 0);
        assert_eq!(btree.index_of(b"key")?, -1);
        assert_eq!(btree.range_count(None, None)?, 0);
        btree.check_invariants()
    }

    #[test]
    fn test_btree_single_insert() -> Result<()> {
        let mut btree = create_test_btree();

        assert_eq!(btree.put(b"hello", b"world")?, None);
        assert_eq!(btree.get(b"hello")?, Some(b"world".to_vec()));
        assert_eq!(btree.get(b"other")?, None);
        assert_eq!(btree.len(), 1);

        Ok(())
    }

    #[test]
    fn test_btree_update() -> Result<()> {
        let mut btree = create_test_btree();

        btree.put(b"key", b"value1")?;
        assert_eq!(btree.put(b"key", b"value2")?, Some(b"value1".to_vec()));
        assert_eq!(btree.get(b"key")?, Some(b"value2".to_vec()));
        assert_eq!(btree.len(), 1);

        Ok(())
    }

    #[test]
    fn test_btree_delete() -> Result<()> {
        let mut btree = create_test_btree();

        btree.put(b"key", b"value")?;
        assert_eq!(btree.delete(b"key")?, Some(b"value".to_vec()));
        assert_eq!(btree.get(b"key")?, None);
        assert_eq!(btree.delete(b"key")?, None); // Already deleted
        assert!(btree.is_empty());

        Ok(())
    }

    #[test]
    fn test_btree_many_inserts_split() -> Result<()> {
        let mut btree = create_test_btree();

        // Insert enough keys to cause splits
        for i in 0..100 {
            btree.put(&key(i), format!("value{}", i).as_bytes())?;
        }
        btree.check_invariants()?;
        assert!(btree.height() > 2);
        assert_eq!(btree.len(), 100);

        for i in 0..100 {
            let expected = format!("value{}", i).into_bytes();
            assert_eq!(btree.get(&key(i))?, Some(expected), "Failed for key {:?}", key(i));
        }

        Ok(())
    }

    #[test]
    fn test_btree_delete_rebalances() -> Result<()> {
        let mut btree = create_test_btree();
        for i in 0..200 {
            btree.put(&key(i), b"v")?;
        }
        let grown = btree.height();

        for i in (0..200).step_by(2) {
            assert!(btree.delete(&key(i))?.is_some());
            btree.check_invariants()?;
        }
        for i in (1..200).step_by(2).rev() {
            assert!(btree.delete(&key(i))?.is_some());
            btree.check_invariants()?;
        }

        assert!(btree.is_empty());
        assert_eq!(btree.height(), 1);
        assert_eq!(btree.node_count(), 1);
        assert!(grown > 1);
        Ok(())
    }

    #[test]
    fn test_index_of() -> Result<()> {
        let mut btree = create_test_btree();
        for i in (0..60).map(|i| i * 2) {
            btree.put(&key(i), b"v")?;
        }

        for rank in 0..60usize {
            assert_eq!(btree.index_of(&key(rank * 2))?, rank as i64);
            // Odd keys are absent; they would be inserted after `rank + 1` entries.
            assert_eq!(btree.index_of(&key(rank * 2 + 1))?, -(rank as i64 + 1) - 1);
        }
        assert_eq!(btree.index_of(b"a")?, -1);
        assert_eq!(btree.index_of(b"z")?, -61);
        Ok(())
    }

    #[test]
    fn test_locate_inverts_index_of() -> Result<()> {
        let mut btree = create_test_btree();
        for i in 0..75 {
            btree.put(&key(i), format!("{}", i).as_bytes())?;
        }

        for rank in 0..75u64 {
            let k = btree.key_at(rank)?.expect("rank in range");
            assert_eq!(btree.index_of(&k)?, rank as i64);
            assert_eq!(btree.value_at(rank)?, Some(rank.to_string().into_bytes()));
        }
        assert_eq!(btree.locate(75)?, None);
        assert_eq!(btree.key_at(1000)?, None);
        Ok(())
    }

    #[test]
    fn test_range_count_scenario() -> Result<()> {
        let mut btree = create_test_btree();
        for (k, v) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
            btree.put(k.as_bytes(), v.as_bytes())?;
        }

        assert_eq!(btree.range_count(Some(b"b"), Some(b"d"))?, 2);
        assert_eq!(btree.range_count(None, Some(b"c"))?, 2);
        assert_eq!(btree.range_count(Some(b"z"), None)?, 0);
        assert_eq!(btree.range_count(None, None)?, 5);
        // Bounds that are not keys
        assert_eq!(btree.range_count(Some(b"bb"), Some(b"dd"))?, 2);
        // Reversed bounds are an empty range
        assert_eq!(btree.range_count(Some(b"d"), Some(b"b"))?, 0);
        assert_eq!(btree.range_count(Some(b"c"), Some(b"c"))?, 0);
        Ok(())
    }

    #[test]
    fn test_btree_scan() -> Result<()> {
        let mut btree = create_test_btree();

        btree.put(b"a", b"1")?;
        btree.put(b"b", b"2")?;
        btree.put(b"c", b"3")?;
        btree.put(b"d", b"4")?;

        // Full scan
        let all = btree.scan(None, None)?;
        assert_eq!(all.len(), 4);

        // Range scan
        let range = btree.scan(Some(b"b"), Some(b"d"))?;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, b"b".to_vec());
        assert_eq!(range[1].0, b"c".to_vec());

        Ok(())
    }

    #[test]
    fn test_corrupt_counts_detected() -> Result<()> {
        let mut btree = create_test_btree();
        for i in 0..20 {
            btree.put(&key(i), b"v")?;
        }
        btree.corrupt_first_count(3)?;

        assert!(matches!(btree.check_invariants(), Err(IndexError::StructuralInvariantViolation(_))));
        assert!(matches!(btree.index_of(&key(0)), Err(IndexError::StructuralInvariantViolation(_))));
        assert!(btree.range_count(Some(&key(1)), None).is_err());
        Ok(())
    }

    #[test]
    fn test_debug_get_trace() -> Result<()> {
        let mut btree = create_test_btree();
        for i in 0..10 {
            btree.put(&key(i), b"v")?;
        }

        let trace = btree.debug_get(&key(7))?;
        assert!(trace.iter().any(|line| line.contains("FOUND at index") && line.contains("rank 7")));
        let trace = btree.debug_get(b"zzz")?;
        assert!(trace.last().is_some_and(|line| line.contains("insertion rank 10")));
        Ok(())
    }

    #[test]
    fn test_export_tree_counts() -> Result<()> {
        let mut btree = create_test_btree();
        for i in 0..30 {
            btree.put(&key(i), b"v")?;
        }

        let tree = btree.export_tree()?;
        assert!(!tree.is_leaf);
        assert_eq!(tree.counts.iter().sum::<u64>(), 30);
        assert_eq!(tree.children.len(), tree.counts.len());
        Ok(())
    }

    #[test]
    fn test_random_operations_match_model() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut btree = BTree::with_config(BTreeConfig::new(3, 2));
        let mut model = BTreeMap::new();

        for step in 0..3000 {
            let k = key(rng.gen_range(0..400));
            if rng.gen_bool(0.6) {
                let v = format!("v{}", step).into_bytes();
                assert_eq!(btree.put(&k, &v)?, model.insert(k, v));
            } else {
                assert_eq!(btree.delete(&k)?, model.remove(&k));
            }

            if step % 100 == 0 {
                btree.check_invariants()?;
            }
        }

        btree.check_invariants()?;
        assert_eq!(btree.len(), model.len() as u64);
        for (rank, (k, v)) in model.iter().enumerate() {
            assert_eq!(btree.index_of(k)?, rank as i64);
            assert_eq!(btree.get(k)?.as_ref(), Some(v));
        }

        let from = key(100);
        let to = key(250);
        let expected = model.range(from.clone()..to.clone()).count() as u64;
        assert_eq!(btree.range_count(Some(&from), Some(&to))?, expected);
        Ok(())
    }
}
