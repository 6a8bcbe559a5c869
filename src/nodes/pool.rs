//! # Round-robin node pool.
//!
//! [`NodePool`] holds an ordered set of nodes and hands out the next one for
//! placement. Selection is deterministic round-robin: no load or health
//! awareness.
//!
//! ```text
//! nodes = [A, B, C]
//! next() × 7 → A, B, C, A, B, C, A
//! ```
//!
//! The cursor is atomic so one pool can be shared (`Arc<NodePool>`) by every
//! service placed on it. An empty pool is a configuration error: `next()`
//! returns [`ServiceError::EmptyPool`] instead of inventing a node.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::error::ServiceError;

use super::node::NodeRef;

/// Ordered set of execution nodes with a round-robin cursor.
pub struct NodePool {
    name: String,
    nodes: Vec<NodeRef>,
    cursor: AtomicUsize,
}

impl NodePool {
    pub fn new(name: impl Into<String>, nodes: Vec<NodeRef>) -> Self {
        Self {
            name: name.into(),
            nodes,
            cursor: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in pool order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Returns the node at the cursor without advancing it.
    pub fn peek(&self) -> Result<NodeRef, ServiceError> {
        if self.nodes.is_empty() {
            return Err(ServiceError::EmptyPool {
                pool: self.name.clone(),
            });
        }
        let idx = self.cursor.load(AtomicOrdering::Relaxed) % self.nodes.len();
        Ok(self.nodes[idx].clone())
    }

    /// Returns the node at the cursor and advances it, wrapping to the start.
    pub fn next(&self) -> Result<NodeRef, ServiceError> {
        if self.nodes.is_empty() {
            return Err(ServiceError::EmptyPool {
                pool: self.name.clone(),
            });
        }
        let idx = self.cursor.fetch_add(1, AtomicOrdering::Relaxed) % self.nodes.len();
        Ok(self.nodes[idx].clone())
    }

    /// Finds a node by name.
    pub fn lookup(&self, name: &str) -> Result<NodeRef, ServiceError> {
        self.nodes
            .iter()
            .find(|n| n.name() == name)
            .cloned()
            .ok_or_else(|| ServiceError::NodeNotFound {
                pool: self.name.clone(),
                name: name.to_string(),
            })
    }
}

/// Two pools are equal when they have the same name and the same nodes in the same order.
///
/// The cursor position is not part of equality.
impl PartialEq for NodePool {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.node_names() == other.node_names()
    }
}

impl Eq for NodePool {}

impl fmt::Debug for NodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePool")
            .field("name", &self.name)
            .field("nodes", &self.node_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::LocalNode;

    fn pool(names: &[&str]) -> NodePool {
        NodePool::new("p", names.iter().map(|n| LocalNode::arc(*n)).collect())
    }

    #[test]
    fn next_cycles_round_robin() {
        let p = pool(&["A", "B", "C"]);
        let picked: Vec<String> = (0..7).map(|_| p.next().unwrap().name().to_string()).collect();
        assert_eq!(picked, vec!["A", "B", "C", "A", "B", "C", "A"]);
    }

    #[test]
    fn empty_pool_is_an_error() {
        let p = pool(&[]);
        assert_eq!(p.next().unwrap_err().as_label(), "node_pool_empty");
        assert_eq!(p.peek().unwrap_err().as_label(), "node_pool_empty");
    }

    #[test]
    fn peek_does_not_advance() {
        let p = pool(&["A", "B"]);
        assert_eq!(p.peek().unwrap().name(), "A");
        assert_eq!(p.peek().unwrap().name(), "A");
        assert_eq!(p.next().unwrap().name(), "A");
        assert_eq!(p.peek().unwrap().name(), "B");
    }

    #[test]
    fn lookup_by_name() {
        let p = pool(&["A", "B"]);
        assert_eq!(p.lookup("B").unwrap().name(), "B");
        assert!(matches!(
            p.lookup("Z"),
            Err(ServiceError::NodeNotFound { name, .. }) if name == "Z"
        ));
    }

    #[test]
    fn equality_ignores_cursor() {
        let a = pool(&["A", "B"]);
        let b = pool(&["A", "B"]);
        a.next().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, pool(&["B", "A"]));
    }
}
