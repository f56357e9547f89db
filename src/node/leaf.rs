//! Leaf nodes: sorted entries plus a forward link to the next leaf.

use crate::types::NodeId;

/// A leaf holding sorted keys, their values, and the next leaf in key order
#[derive(Debug, Clone, Default)]
pub struct LeafNode {
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
    /// Next leaf in key order (non-owning; `None` for the last leaf)
    next: Option<NodeId>,
}

impl LeafNode {
    /// Create a new empty leaf
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the leaf holds no entries
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key at `index`
    pub fn key(&self, index: usize) -> &[u8] {
        &self.keys[index]
    }

    /// Value at `index`
    pub fn value(&self, index: usize) -> &[u8] {
        &self.values[index]
    }

    /// All keys, ascending
    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    /// All values, in key order
    pub fn values(&self) -> &[Vec<u8>] {
        &self.values
    }

    /// Smallest key in the leaf
    pub fn first_key(&self) -> Option<&[u8]> {
        self.keys.first().map(Vec::as_slice)
    }

    /// Next leaf in key order
    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    /// Relink the next leaf
    pub fn set_next(&mut self, next: Option<NodeId>) {
        self.next = next;
    }

    /// Binary search for `key`.
    ///
    /// `Ok(i)` if present at `i`, `Err(i)` with the insertion point otherwise.
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.keys.binary_search_by(|k| k.as_slice().cmp(key))
    }

    /// Insert an entry at `index` (which must keep the keys sorted)
    pub fn insert(&mut self, index: usize, key: Vec<u8>, value: Vec<u8>) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    /// Replace the value at `index`, returning the old one
    pub fn replace_value(&mut self, index: usize, value: Vec<u8>) -> Vec<u8> {
        std::mem::replace(&mut self.values[index], value)
    }

    /// Remove the entry at `index`
    pub fn remove(&mut self, index: usize) -> (Vec<u8>, Vec<u8>) {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Move the upper half of the entries into a new right sibling.
    ///
    /// The caller links the sibling into the leaf chain.
    pub fn split(&mut self) -> LeafNode {
        let mid = self.keys.len() / 2;
        LeafNode {
            keys: self.keys.split_off(mid),
            values: self.values.split_off(mid),
            next: None,
        }
    }

    /// Remove the smallest entry
    pub fn pop_front(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.keys.is_empty() {
            return None;
        }
        Some(self.remove(0))
    }

    /// Remove the largest entry
    pub fn pop_back(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        let key = self.keys.pop()?;
        let value = self.values.pop()?;
        Some((key, value))
    }

    /// Prepend an entry smaller than every key in the leaf
    pub fn push_front(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.insert(0, key, value);
    }

    /// Append an entry larger than every key in the leaf
    pub fn push_back(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.keys.push(key);
        self.values.push(value);
    }

    /// Absorb the entries of the right sibling, taking over its forward link
    pub fn merge(&mut self, right: LeafNode) {
        self.keys.extend(right.keys);
        self.values.extend(right.values);
        self.next = right.next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[&str]) -> LeafNode {
        let mut leaf = LeafNode::new();
        for key in keys {
            let pos = leaf.search(key.as_bytes()).unwrap_err();
            leaf.insert(pos, key.as_bytes().to_vec(), key.to_uppercase().into_bytes());
        }
        leaf
    }

    #[test]
    fn test_search_and_insert() {
        let leaf = leaf_with(&["c", "a", "b"]);
        assert_eq!(leaf.keys(), &[b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(leaf.search(b"b"), Ok(1));
        assert_eq!(leaf.search(b"bb"), Err(2));
        assert_eq!(leaf.value(2), b"C");
    }

    #[test]
    fn test_split_and_merge() {
        let mut left = leaf_with(&["a", "b", "c", "d", "e"]);
        left.set_next(Some(NodeId::new(9)));

        let right = left.split();
        assert_eq!(left.len(), 2);
        assert_eq!(right.len(), 3);
        assert_eq!(right.first_key(), Some(b"c".as_slice()));
        assert_eq!(right.next(), None);

        let mut right = right;
        right.set_next(Some(NodeId::new(9)));
        left.merge(right);
        assert_eq!(left.len(), 5);
        assert_eq!(left.next(), Some(NodeId::new(9)));
    }

    #[test]
    fn test_borrow_helpers() {
        let mut leaf = leaf_with(&["b", "c"]);
        leaf.push_front(b"a".to_vec(), b"A".to_vec());
        leaf.push_back(b"d".to_vec(), b"D".to_vec());
        assert_eq!(leaf.pop_front(), Some((b"a".to_vec(), b"A".to_vec())));
        assert_eq!(leaf.pop_back(), Some((b"d".to_vec(), b"D".to_vec())));
        assert_eq!(leaf.len(), 2);
    }
}
