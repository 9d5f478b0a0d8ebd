//! Stable ID newtypes for constraint-graph entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `VarId` cannot be accidentally used where a `MethodId` is
//! expected. Variables and methods live in the same node arena, so both
//! bridge to petgraph's `NodeIndex<u32>`; constraints are not graph nodes
//! and carry counter-allocated ids.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable variable identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Stable method identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

/// Constraint identity within the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridges between the node-backed ids and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for VarId {
    fn from(idx: NodeIndex<u32>) -> Self {
        VarId(idx.index() as u32)
    }
}

impl From<VarId> for NodeIndex<u32> {
    fn from(id: VarId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<NodeIndex<u32>> for MethodId {
    fn from(idx: NodeIndex<u32>) -> Self {
        MethodId(idx.index() as u32)
    }
}

impl From<MethodId> for NodeIndex<u32> {
    fn from(id: MethodId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}
