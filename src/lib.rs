//! # BTree Range Engine
//!
//! An in-memory order-statistic B+Tree over byte-string keys, built for
//! range queries on sorted key-value data.
//!
//! ## Architecture
//!
//! - **Types** (`types`): node handles, range flags, key ordering helpers
//!   and node limits
//! - **Node Layer** (`node`): leaf and interior records in a slot arena
//! - **B-Tree Layer** (`btree`): the tree itself, entry filters and the
//!   chunked range cursor
//!
//! Every interior node records how many entries sit beneath each child.
//! That makes `index_of` (rank of a key) and `range_count` logarithmic, and
//! lets a cursor resume by rank after deleting the entries it visited.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use btree_range::{Index, Config, RangeFlags};
//!
//! let index = Index::open(Config::new());
//! index.put(b"apple", b"1")?;
//! index.put(b"banana", b"2")?;
//!
//! // Number of keys in [a, b)
//! let n = index.range_count(Some(b"a"), Some(b"b"))?;
//!
//! // Chunked cursor: 64 entries per refill, keys and values
//! let mut cursor = index.range_iterator_with(None, None, 64, RangeFlags::KEYS | RangeFlags::VALS, None)?;
//! while cursor.has_next()? {
//!     let entry = cursor.next()?;
//!     println!("{:?} -> {:?}", entry.key(), entry.value());
//! }
//! ```

pub mod btree;
pub mod error;
pub mod node;
pub mod types;

pub use error::{IndexError, Result};
pub use types::{compare_keys, prefix_successor, successor, BTreeConfig, NodeId, RangeFlags};

// Re-export main public API
pub use btree::{AcceptAll, BTree, Entries, Entry, EntryFilter, FnFilter, RangeCursor};

use btree::TreeAccess;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Index configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Node limits and cursor defaults
    pub btree_config: BTreeConfig,
}

impl Config {
    /// Create a configuration with default node limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set B-tree configuration
    pub fn btree_config(mut self, config: BTreeConfig) -> Self {
        self.btree_config = config;
        self
    }

    /// Set the capacity used by cursors opened with capacity 0
    pub fn default_capacity(mut self, capacity: usize) -> Self {
        self.btree_config = self.btree_config.default_capacity(capacity);
        self
    }
}

/// Node type for visualization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    /// Arena handle of the node
    pub node_id: u32,
    /// Whether this is a leaf node
    pub is_leaf: bool,
    /// Keys in this node (separators for interior nodes)
    pub keys: Vec<String>,
    /// Values (only for leaf nodes)
    pub values: Vec<String>,
    /// Entries beneath each child (only for interior nodes)
    pub counts: Vec<u64>,
    /// Child nodes (only for interior nodes)
    pub children: Vec<TreeNode>,
}

/// Shared handle to a tree
///
/// Readers take the read lock, mutators the write lock. Cursors hold their
/// lock until dropped: a read lock normally, the write lock when they
/// delete. Calling a mutator on the same thread while a cursor is alive
/// deadlocks.
#[derive(Clone)]
pub struct Index {
    btree: Arc<RwLock<BTree>>,
}

impl Default for Index {
    fn default() -> Self {
        Self::open(Config::default())
    }
}

impl Index {
    /// Create an empty index
    pub fn open(config: Config) -> Self {
        Self {
            btree: Arc::new(RwLock::new(BTree::with_config(config.btree_config))),
        }
    }

    /// Get the current B-tree configuration
    pub fn btree_config(&self) -> BTreeConfig {
        self.btree.read().config().clone()
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.btree.read().get(key)
    }

    /// Insert or update a key-value pair, returning the replaced value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.btree.write().put(key, value)
    }

    /// Delete a key, returning its value if it was present
    pub fn delete(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.btree.write().delete(key)
    }

    /// Check if a key exists
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.btree.read().contains(key)
    }

    /// Number of entries
    pub fn len(&self) -> u64 {
        self.btree.read().len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rank of `key`, or `-(insertion_rank) - 1` when absent
    pub fn index_of(&self, key: &[u8]) -> Result<i64> {
        self.btree.read().index_of(key)
    }

    /// Number of entries in `[from, to)`
    pub fn range_count(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<u64> {
        self.btree.read().range_count(from, to)
    }

    /// Key of the entry at `rank`
    pub fn key_at(&self, rank: u64) -> Result<Option<Vec<u8>>> {
        self.btree.read().key_at(rank)
    }

    /// Value of the entry at `rank`
    pub fn value_at(&self, rank: u64) -> Result<Option<Vec<u8>>> {
        self.btree.read().value_at(rank)
    }

    /// Collect every key-value pair in sorted order
    pub fn iter(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.btree.read().scan(None, None)
    }

    /// Collect the key-value pairs in `[start, end)`
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.btree.read().scan(start, end)
    }

    /// Cursor over `[from, to)` with default settings, holding the read lock
    pub fn range_iterator(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> RangeCursor<'_> {
        RangeCursor::with_defaults(TreeAccess::ReadGuard(self.btree.read()), from, to)
    }

    /// Cursor over `[from, to)` with explicit capacity, flags and filter.
    ///
    /// Holds the write lock when `flags` contains [`RangeFlags::DELETE`],
    /// the read lock otherwise.
    pub fn range_iterator_with<'a>(
        &'a self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        capacity: i32,
        flags: RangeFlags,
        filter: Option<Box<dyn EntryFilter + 'a>>,
    ) -> Result<RangeCursor<'a>> {
        let access = if flags.deletes() {
            TreeAccess::WriteGuard(self.btree.write())
        } else {
            TreeAccess::ReadGuard(self.btree.read())
        };
        RangeCursor::new(access, from, to, capacity, flags, filter)
    }

    /// Debug trace a key lookup
    pub fn debug_get(&self, key: &[u8]) -> Result<Vec<String>> {
        self.btree.read().debug_get(key)
    }

    /// Validate the tree structure
    pub fn check_invariants(&self) -> Result<()> {
        self.btree.read().check_invariants()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.btree.write().clear();
    }

    /// Get statistics about the index
    pub fn stats(&self) -> IndexStats {
        let btree = self.btree.read();
        IndexStats {
            len: btree.len(),
            height: btree.height(),
            node_count: btree.node_count(),
            btree_config: btree.config().clone(),
        }
    }

    /// Export the tree structure for visualization
    pub fn export_tree(&self) -> Result<TreeNode> {
        self.btree.read().export_tree()
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Number of entries
    pub len: u64,
    /// Height of the B-tree
    pub height: usize,
    /// Number of live nodes
    pub node_count: usize,
    /// Node limits in effect
    pub btree_config: BTreeConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn small_index() -> Index {
        Index::open(Config::new().btree_config(BTreeConfig::new(4, 3)))
    }

    #[test]
    fn test_basic_operations() -> Result<()> {
        let index = small_index();

        // Test put and get
        assert_eq!(index.put(b"key1", b"value1")?, None);
        assert_eq!(index.get(b"key1")?, Some(b"value1".to_vec()));

        // Test update
        assert_eq!(index.put(b"key1", b"value2")?, Some(b"value1".to_vec()));
        assert_eq!(index.get(b"key1")?, Some(b"value2".to_vec()));

        // Test delete
        assert_eq!(index.delete(b"key1")?, Some(b"value2".to_vec()));
        assert_eq!(index.get(b"key1")?, None);

        // Test non-existent key
        assert_eq!(index.get(b"nonexistent")?, None);
        assert_eq!(index.delete(b"nonexistent")?, None);
        assert!(index.is_empty());

        Ok(())
    }

    #[test]
    fn test_range_scan() -> Result<()> {
        let index = small_index();

        // Insert some data
        index.put(b"apple", b"1")?;
        index.put(b"banana", b"2")?;
        index.put(b"cherry", b"3")?;
        index.put(b"date", b"4")?;

        // Full scan
        let all = index.iter()?;
        assert_eq!(all.len(), 4);

        // Range scan
        let range = index.range(Some(b"banana"), Some(b"date"))?;
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].0, b"banana".to_vec());
        assert_eq!(range[1].0, b"cherry".to_vec());
        assert_eq!(index.range_count(Some(b"banana"), Some(b"date"))?, 2);
        assert_eq!(index.index_of(b"cherry")?, 2);
        assert_eq!(index.key_at(3)?, Some(b"date".to_vec()));

        Ok(())
    }

    #[test]
    fn test_deleting_cursor_takes_write_lock() -> Result<()> {
        let index = small_index();
        for i in 0..40 {
            index.put(format!("k{:02}", i).as_bytes(), b"v")?;
        }

        {
            let cursor = index.range_iterator_with(Some(b"k10"), Some(b"k30"), 3, RangeFlags::DELETE, None)?;
            assert_eq!(cursor.into_entries().count(), 20);
        }

        assert_eq!(index.len(), 20);
        assert_eq!(index.range_count(Some(b"k10"), Some(b"k30"))?, 0);
        index.check_invariants()
    }

    #[test]
    fn test_cursor_validation_through_index() {
        let index = small_index();
        assert!(matches!(
            index.range_iterator_with(None, None, -1, RangeFlags::KEYS, None),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            index.range_iterator_with(None, None, 0, RangeFlags::from_bits_retain(0x80), None),
            Err(IndexError::UnsupportedFlags { .. })
        ));
    }

    #[test]
    fn test_concurrent_readers() -> Result<()> {
        let index = small_index();
        for i in 0..200 {
            index.put(format!("key{:04}", i).as_bytes(), b"v")?;
        }

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let index = index.clone();
                thread::spawn(move || -> Result<u64> {
                    let from = format!("key{:04}", t * 50);
                    let to = format!("key{:04}", t * 50 + 50);
                    let counted = index.range_count(Some(from.as_bytes()), Some(to.as_bytes()))?;
                    let walked = index.range_iterator(Some(from.as_bytes()), Some(to.as_bytes())).into_entries().count();
                    assert_eq!(counted, walked as u64);
                    Ok(counted)
                })
            })
            .collect();

        for handle in handles {
            let counted = handle.join().map_err(|_| IndexError::invalid_operation("reader panicked"))??;
            assert_eq!(counted, 50);
        }
        Ok(())
    }

    #[test]
    fn test_stats_and_export() -> Result<()> {
        let index = small_index();
        for i in 0..25 {
            index.put(format!("key{:02}", i).as_bytes(), b"v")?;
        }

        let stats = index.stats();
        assert_eq!(stats.len, 25);
        assert!(stats.height > 1);
        assert_eq!(stats.btree_config.max_leaf_keys, 4);

        let tree = index.export_tree()?;
        let json = serde_json::to_string(&tree).map_err(|e| IndexError::invalid_operation(e.to_string()))?;
        assert!(json.contains("\"nodeId\""));
        assert!(json.contains("\"counts\""));
        let back: TreeNode = serde_json::from_str(&json).map_err(|e| IndexError::invalid_operation(e.to_string()))?;
        assert_eq!(back, tree);

        index.clear();
        assert_eq!(index.stats().len, 0);
        Ok(())
    }
}
