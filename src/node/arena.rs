//! Slot arena owning every node of a tree.
//!
//! Nodes refer to each other by [`NodeId`] instead of by pointer, so parent
//! links, child links and the leaf chain are plain indices. Freed slots are
//! recycled through a free list.

use crate::error::{IndexError, Result};
use crate::node::Node;
use crate::types::NodeId;

/// Arena of tree nodes addressed by [`NodeId`]
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl NodeArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no node is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a node, reusing a freed slot when one is available
    pub fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(node);
            return id;
        }
        self.slots.push(Some(node));
        NodeId::new((self.slots.len() - 1) as u32)
    }

    /// Borrow a live node
    pub fn get(&self, id: NodeId) -> Result<&Node> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(IndexError::NodeNotFound(id))
    }

    /// Mutably borrow a live node
    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(IndexError::NodeNotFound(id))
    }

    /// Mutably borrow two distinct live nodes at once
    pub fn pair_mut(&mut self, a: NodeId, b: NodeId) -> Result<(&mut Node, &mut Node)> {
        let (ai, bi) = (a.index(), b.index());
        if ai == bi {
            return Err(IndexError::invalid_operation(format!(
                "node {} cannot be borrowed twice",
                a
            )));
        }
        if ai.max(bi) >= self.slots.len() {
            return Err(IndexError::NodeNotFound(if ai > bi { a } else { b }));
        }

        let (first, second) = if ai < bi {
            let (low, high) = self.slots.split_at_mut(bi);
            (&mut low[ai], &mut high[0])
        } else {
            let (low, high) = self.slots.split_at_mut(ai);
            (&mut high[0], &mut low[bi])
        };

        match (first.as_mut(), second.as_mut()) {
            (Some(first), Some(second)) => Ok((first, second)),
            (None, _) => Err(IndexError::NodeNotFound(a)),
            (_, None) => Err(IndexError::NodeNotFound(b)),
        }
    }

    /// Remove a node, returning it and freeing its slot
    pub fn take(&mut self, id: NodeId) -> Result<Node> {
        let node = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(IndexError::NodeNotFound(id))?;
        self.free.push(id);
        Ok(node)
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::LeafNode;

    #[test]
    fn test_alloc_and_reuse() -> Result<()> {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::Leaf(LeafNode::new()));
        let b = arena.alloc(Node::Leaf(LeafNode::new()));
        assert_eq!(arena.len(), 2);

        arena.take(a)?;
        assert_eq!(arena.len(), 1);
        assert!(matches!(arena.get(a), Err(IndexError::NodeNotFound(id)) if id == a));

        // Freed slot is handed out again.
        let c = arena.alloc(Node::Leaf(LeafNode::new()));
        assert_eq!(c, a);
        assert!(arena.get(b).is_ok());
        Ok(())
    }

    #[test]
    fn test_pair_mut() -> Result<()> {
        let mut arena = NodeArena::new();
        let a = arena.alloc(Node::Leaf(LeafNode::new()));
        let b = arena.alloc(Node::Leaf(LeafNode::new()));

        {
            let (left, right) = arena.pair_mut(b, a)?;
            if let (Node::Leaf(left), Node::Leaf(right)) = (left, right) {
                left.push_back(b"x".to_vec(), b"1".to_vec());
                right.set_next(Some(b));
            }
        }
        assert_eq!(arena.get(b)?.key_count(), 1);
        assert!(arena.pair_mut(a, a).is_err());
        assert!(arena.pair_mut(a, NodeId::new(10)).is_err());
        Ok(())
    }

    #[test]
    fn test_missing_node() {
        let mut arena = NodeArena::new();
        assert!(arena.get(NodeId::new(0)).is_err());
        assert!(arena.take(NodeId::INVALID).is_err());
    }
}
