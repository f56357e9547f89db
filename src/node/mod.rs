//! Node layer: the in-memory records the B+Tree is built from.
//!
//! - Leaves store sorted entries and a forward link to the next leaf, so a
//!   range scan crosses leaf boundaries without going back to the root.
//! - Interior nodes store separators, child handles and, per child, the
//!   number of entries beneath it.
//! - All nodes live in a [`NodeArena`] and are addressed by `NodeId`.

mod arena;
mod interior;
mod leaf;

pub use arena::NodeArena;
pub use interior::InteriorNode;
pub use leaf::LeafNode;

/// A B+Tree node
#[derive(Debug, Clone)]
pub enum Node {
    /// Entries plus forward link
    Leaf(LeafNode),
    /// Separators, children and per-child entry counts
    Interior(InteriorNode),
}

impl Node {
    /// Check if this is a leaf node
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Number of keys stored directly in this node
    pub fn key_count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Interior(interior) => interior.key_count(),
        }
    }

    /// Number of entries beneath this node
    pub fn subtree_count(&self) -> u64 {
        match self {
            Node::Leaf(leaf) => leaf.len() as u64,
            Node::Interior(interior) => interior.subtree_count(),
        }
    }

    /// The leaf record, if this is a leaf
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Interior(_) => None,
        }
    }

    /// The leaf record mutably, if this is a leaf
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Interior(_) => None,
        }
    }

    /// The interior record, if this is an interior node
    pub fn as_interior(&self) -> Option<&InteriorNode> {
        match self {
            Node::Interior(interior) => Some(interior),
            Node::Leaf(_) => None,
        }
    }

    /// The interior record mutably, if this is an interior node
    pub fn as_interior_mut(&mut self) -> Option<&mut InteriorNode> {
        match self {
            Node::Interior(interior) => Some(interior),
            Node::Leaf(_) => None,
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::Leaf(LeafNode::new())
    }
}
