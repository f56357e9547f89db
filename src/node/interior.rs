//! Interior nodes: separator keys, child handles and per-child entry counts.
//!
//! Child `i` holds keys `< keys[i]`; child `i + 1` holds keys `>= keys[i]`.
//! `counts[i]` is the number of entries stored beneath `children[i]`, which
//! is what makes rank queries logarithmic.

use crate::types::NodeId;

/// An interior node with subtree-count augmentation
#[derive(Debug, Clone, Default)]
pub struct InteriorNode {
    keys: Vec<Vec<u8>>,
    children: Vec<NodeId>,
    counts: Vec<u64>,
}

impl InteriorNode {
    /// Create a two-child node, as produced by a root split
    pub fn with_children(
        left: NodeId,
        left_count: u64,
        separator: Vec<u8>,
        right: NodeId,
        right_count: u64,
    ) -> Self {
        Self {
            keys: vec![separator],
            children: vec![left, right],
            counts: vec![left_count, right_count],
        }
    }

    /// Number of separator keys
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of children
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Separator key at `index`
    pub fn key(&self, index: usize) -> &[u8] {
        &self.keys[index]
    }

    /// All separator keys
    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    /// Child handle at `index`
    pub fn child(&self, index: usize) -> NodeId {
        self.children[index]
    }

    /// All child handles
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Entry count beneath the child at `index`
    pub fn count(&self, index: usize) -> u64 {
        self.counts[index]
    }

    /// All per-child entry counts
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Entries beneath this node
    pub fn subtree_count(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Entries beneath the children before `index`
    pub fn offset_before(&self, index: usize) -> u64 {
        self.counts[..index].iter().sum()
    }

    /// Index of the child whose subtree may contain `key`
    pub fn find_child(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|sep| sep.as_slice() <= key)
    }

    /// Overwrite the recorded count of the child at `index`
    pub fn set_count(&mut self, index: usize, count: u64) {
        self.counts[index] = count;
    }

    /// Record one more entry beneath the child at `index`
    pub fn increment(&mut self, index: usize) {
        self.counts[index] += 1;
    }

    /// Record one fewer entry beneath the child at `index`.
    ///
    /// Returns `None` if the recorded count is already zero.
    pub fn decrement(&mut self, index: usize) -> Option<u64> {
        let count = self.counts[index].checked_sub(1)?;
        self.counts[index] = count;
        Some(count)
    }

    /// Replace the separator at `index`
    pub fn set_key(&mut self, index: usize, key: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.keys[index], key)
    }

    /// Insert `child` directly after the child at `index`, separated by `separator`
    pub fn insert_after(&mut self, index: usize, separator: Vec<u8>, child: NodeId, count: u64) {
        self.keys.insert(index, separator);
        self.children.insert(index + 1, child);
        self.counts.insert(index + 1, count);
    }

    /// Remove separator `index` together with the child to its right
    pub fn remove_after(&mut self, index: usize) -> (Vec<u8>, NodeId, u64) {
        (
            self.keys.remove(index),
            self.children.remove(index + 1),
            self.counts.remove(index + 1),
        )
    }

    /// Split around the middle separator.
    ///
    /// Returns the separator promoted to the parent and the new right node.
    pub fn split(&mut self) -> (Vec<u8>, InteriorNode) {
        let mid = self.keys.len() / 2;
        let right = InteriorNode {
            keys: self.keys.split_off(mid + 1),
            children: self.children.split_off(mid + 1),
            counts: self.counts.split_off(mid + 1),
        };
        // `split_off(mid + 1)` leaves the promoted separator last.
        let separator = self.keys.pop().unwrap_or_default();
        (separator, right)
    }

    /// Detach the first child and the separator after it (borrow from the right)
    pub fn pop_front(&mut self) -> Option<(Vec<u8>, NodeId, u64)> {
        if self.keys.is_empty() {
            return None;
        }
        Some((self.keys.remove(0), self.children.remove(0), self.counts.remove(0)))
    }

    /// Detach the last child and the separator before it (borrow from the left)
    pub fn pop_back(&mut self) -> Option<(Vec<u8>, NodeId, u64)> {
        if self.keys.is_empty() {
            return None;
        }
        let key = self.keys.pop()?;
        let child = self.children.pop()?;
        let count = self.counts.pop()?;
        Some((key, child, count))
    }

    /// Prepend a child that sorts before every existing child
    pub fn push_front(&mut self, child: NodeId, count: u64, separator: Vec<u8>) {
        self.keys.insert(0, separator);
        self.children.insert(0, child);
        self.counts.insert(0, count);
    }

    /// Append a child that sorts after every existing child
    pub fn push_back(&mut self, separator: Vec<u8>, child: NodeId, count: u64) {
        self.keys.push(separator);
        self.children.push(child);
        self.counts.push(count);
    }

    /// Absorb the right sibling, pulling `separator` down from the parent
    pub fn merge(&mut self, separator: Vec<u8>, right: InteriorNode) {
        self.keys.push(separator);
        self.keys.extend(right.keys);
        self.children.extend(right.children);
        self.counts.extend(right.counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InteriorNode {
        // children: [< "f"] ["f", "m") ["m", "t") [>= "t"]
        let mut node = InteriorNode::with_children(NodeId::new(1), 3, b"f".to_vec(), NodeId::new(2), 4);
        node.insert_after(1, b"m".to_vec(), NodeId::new(3), 2);
        node.insert_after(2, b"t".to_vec(), NodeId::new(4), 5);
        node
    }

    #[test]
    fn test_find_child() {
        let node = sample();
        assert_eq!(node.find_child(b"a"), 0);
        assert_eq!(node.find_child(b"f"), 1);
        assert_eq!(node.find_child(b"g"), 1);
        assert_eq!(node.find_child(b"m"), 2);
        assert_eq!(node.find_child(b"z"), 3);
    }

    #[test]
    fn test_counts() {
        let mut node = sample();
        assert_eq!(node.subtree_count(), 14);
        assert_eq!(node.offset_before(0), 0);
        assert_eq!(node.offset_before(2), 7);

        node.increment(0);
        assert_eq!(node.count(0), 4);
        assert_eq!(node.decrement(2), Some(1));
        node.set_count(2, 0);
        assert_eq!(node.decrement(2), None);
    }

    #[test]
    fn test_split() {
        let mut node = sample();
        node.insert_after(3, b"x".to_vec(), NodeId::new(5), 1);
        // keys: f m t x -> promote t
        let (separator, right) = node.split();
        assert_eq!(separator, b"t".to_vec());
        assert_eq!(node.keys(), &[b"f".to_vec(), b"m".to_vec()]);
        assert_eq!(node.children(), &[NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
        assert_eq!(right.keys(), &[b"x".to_vec()]);
        assert_eq!(right.children(), &[NodeId::new(4), NodeId::new(5)]);
        assert_eq!(node.subtree_count() + right.subtree_count(), 15);
    }

    #[test]
    fn test_merge_restores_split() {
        let mut node = sample();
        let (separator, right) = node.split();
        node.merge(separator, right);
        assert_eq!(node.key_count(), 3);
        assert_eq!(node.child_count(), 4);
        assert_eq!(node.subtree_count(), 14);
    }
}
