//! Execution nodes and placement.
//!
//! - [`Node`] execution target trait; [`NodeRef`] shared handle
//! - [`LocalNode`] runs actions as local shell processes
//! - [`NodePool`] ordered nodes with round-robin selection

mod node;
mod pool;

pub use node::{LocalNode, Node, NodeRef};
pub use pool::NodePool;
