//! Common types used throughout the range engine.

mod flags;
mod key;
mod node_id;

pub use flags::RangeFlags;
pub use key::{compare_keys, prefix_successor, successor};
pub use node_id::NodeId;

use serde::{Deserialize, Serialize};

/// Minimum number of keys a node may be configured to hold
pub const MIN_KEYS: usize = 2;

/// Default maximum keys per leaf node (for visualization-friendly defaults)
pub const DEFAULT_MAX_LEAF_KEYS: usize = 4;

/// Default maximum keys per interior node (for visualization-friendly defaults)
pub const DEFAULT_MAX_INTERIOR_KEYS: usize = 3;

/// Entries buffered per cursor refill when the caller passes a capacity of 0
pub const DEFAULT_CAPACITY: usize = 100;

/// BTree configuration for customizable node limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BTreeConfig {
    /// Maximum keys per leaf node
    pub max_leaf_keys: usize,
    /// Maximum separator keys per interior node
    pub max_interior_keys: usize,
    /// Chunk size used by cursors opened with capacity 0
    pub default_capacity: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            max_leaf_keys: DEFAULT_MAX_LEAF_KEYS,
            max_interior_keys: DEFAULT_MAX_INTERIOR_KEYS,
            default_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl BTreeConfig {
    /// Create a new config with custom limits
    pub fn new(max_leaf_keys: usize, max_interior_keys: usize) -> Self {
        Self {
            max_leaf_keys: max_leaf_keys.max(MIN_KEYS),
            max_interior_keys: max_interior_keys.max(MIN_KEYS),
            default_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Create a config with wide nodes for large trees
    pub fn high_capacity() -> Self {
        Self {
            max_leaf_keys: 128,
            max_interior_keys: 128,
            default_capacity: 1000,
        }
    }

    /// Set the default cursor chunk size
    pub fn default_capacity(mut self, capacity: usize) -> Self {
        self.default_capacity = capacity.max(1);
        self
    }

    /// Clamp limits that may have been deserialized or set directly
    pub fn normalized(mut self) -> Self {
        self.max_leaf_keys = self.max_leaf_keys.max(MIN_KEYS);
        self.max_interior_keys = self.max_interior_keys.max(MIN_KEYS);
        self.default_capacity = self.default_capacity.max(1);
        self
    }

    /// Fewest keys a non-root leaf may hold
    pub fn min_leaf_keys(&self) -> usize {
        (self.max_leaf_keys / 2).max(1)
    }

    /// Fewest separator keys a non-root interior node may hold
    pub fn min_interior_keys(&self) -> usize {
        (self.max_interior_keys / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_clamps_limits() {
        let config = BTreeConfig::new(0, 1);
        assert_eq!(config.max_leaf_keys, MIN_KEYS);
        assert_eq!(config.max_interior_keys, MIN_KEYS);
        assert_eq!(config.min_leaf_keys(), 1);
        assert_eq!(config.min_interior_keys(), 1);
    }

    #[test]
    fn test_config_minimums() {
        let config = BTreeConfig::default();
        assert_eq!(config.min_leaf_keys(), 2);
        assert_eq!(config.min_interior_keys(), 1);
        assert_eq!(config.default_capacity, DEFAULT_CAPACITY);

        let wide = BTreeConfig::high_capacity();
        assert_eq!(wide.min_leaf_keys(), 64);
    }

    #[test]
    fn test_config_serde_camel_case() {
        let json = serde_json::to_string(&BTreeConfig::default()).unwrap();
        assert!(json.contains("maxLeafKeys"));
        assert!(json.contains("defaultCapacity"));

        let parsed: BTreeConfig =
            serde_json::from_str(r#"{"maxLeafKeys":0,"maxInteriorKeys":5,"defaultCapacity":0}"#)
                .unwrap();
        let parsed = parsed.normalized();
        assert_eq!(parsed.max_leaf_keys, MIN_KEYS);
        assert_eq!(parsed.max_interior_keys, 5);
        assert_eq!(parsed.default_capacity, 1);
    }
}
