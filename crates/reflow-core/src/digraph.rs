//! Directed-graph utility underneath the constraint graph.
//!
//! A thin arena over `StableGraph` holding two kinds of nodes -- variables
//! and methods -- with the traversal primitives the planner leans on:
//! walk downstream/upstream of a node set, optionally collecting only
//! nodes of one kind while still traversing through the other.

use indexmap::IndexSet;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

/// Kind tag for arena nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Variable,
    Method,
}

pub use petgraph::graph::NodeIndex;

/// Two-kind directed node store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Digraph {
    inner: StableGraph<NodeKind, (), Directed, u32>,
}

impl Digraph {
    pub fn new() -> Self {
        Digraph::default()
    }

    /// Adds a node of the given kind, returning its stable index.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeIndex<u32> {
        self.inner.add_node(kind)
    }

    /// Removes a node and all its incident edges.
    pub fn remove_node(&mut self, node: NodeIndex<u32>) {
        self.inner.remove_node(node);
    }

    /// Adds a directed edge `from -> to`.
    pub fn add_edge(&mut self, from: NodeIndex<u32>, to: NodeIndex<u32>) {
        self.inner.add_edge(from, to, ());
    }

    /// Removes the edge `from -> to` if present.
    pub fn remove_edge(&mut self, from: NodeIndex<u32>, to: NodeIndex<u32>) {
        if let Some(edge) = self.inner.find_edge(from, to) {
            self.inner.remove_edge(edge);
        }
    }

    /// Kind of a node, if it exists.
    pub fn kind(&self, node: NodeIndex<u32>) -> Option<NodeKind> {
        self.inner.node_weight(node).copied()
    }

    pub fn contains(&self, node: NodeIndex<u32>) -> bool {
        self.inner.contains_node(node)
    }

    /// Immediate neighbors in the given direction.
    pub fn neighbors(
        &self,
        node: NodeIndex<u32>,
        dir: Direction,
    ) -> impl Iterator<Item = NodeIndex<u32>> + '_ {
        self.inner.edges_directed(node, dir).map(move |e| match dir {
            Direction::Outgoing => e.target(),
            Direction::Incoming => e.source(),
        })
    }

    /// Number of edges incident to `node` in the given direction.
    pub fn degree(&self, node: NodeIndex<u32>, dir: Direction) -> usize {
        self.inner.edges_directed(node, dir).count()
    }

    /// All nodes reachable from `starts` in the given direction, excluding
    /// the starts themselves unless re-reached through an edge. When
    /// `restrict` is set, only nodes of that kind are collected; traversal
    /// still passes through nodes of the other kind.
    pub fn reach(
        &self,
        starts: impl IntoIterator<Item = NodeIndex<u32>>,
        dir: Direction,
        restrict: Option<NodeKind>,
    ) -> IndexSet<NodeIndex<u32>> {
        let mut visited: IndexSet<NodeIndex<u32>> = IndexSet::new();
        let mut collected: IndexSet<NodeIndex<u32>> = IndexSet::new();
        let mut stack: Vec<NodeIndex<u32>> = Vec::new();

        for start in starts {
            if self.inner.contains_node(start) && visited.insert(start) {
                stack.push(start);
            }
        }
        // Starts are seeded as visited but not collected.
        while let Some(node) = stack.pop() {
            for next in self.neighbors(node, dir) {
                if visited.insert(next) {
                    stack.push(next);
                }
                if restrict.is_none_or(|k| self.kind(next) == Some(k)) {
                    collected.insert(next);
                }
            }
        }
        collected
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds var -> m1 -> mid -> m2 -> out, a two-method chain.
    fn chain() -> (Digraph, Vec<NodeIndex<u32>>) {
        let mut g = Digraph::new();
        let var = g.add_node(NodeKind::Variable);
        let m1 = g.add_node(NodeKind::Method);
        let mid = g.add_node(NodeKind::Variable);
        let m2 = g.add_node(NodeKind::Method);
        let out = g.add_node(NodeKind::Variable);
        g.add_edge(var, m1);
        g.add_edge(m1, mid);
        g.add_edge(mid, m2);
        g.add_edge(m2, out);
        (g, vec![var, m1, mid, m2, out])
    }

    #[test]
    fn downstream_reaches_everything_after() {
        let (g, n) = chain();
        let down = g.reach([n[0]], Direction::Outgoing, None);
        assert_eq!(down.len(), 4);
        assert!(!down.contains(&n[0]));
    }

    #[test]
    fn upstream_restricted_to_variables() {
        let (g, n) = chain();
        let up = g.reach([n[4]], Direction::Incoming, Some(NodeKind::Variable));
        // Only the two upstream variables, not the methods in between.
        assert_eq!(up.len(), 2);
        assert!(up.contains(&n[0]));
        assert!(up.contains(&n[2]));
    }

    #[test]
    fn reach_from_multiple_starts_dedups() {
        let (g, n) = chain();
        let down = g.reach([n[0], n[2]], Direction::Outgoing, Some(NodeKind::Method));
        assert_eq!(down.len(), 2);
    }

    #[test]
    fn removal_disconnects() {
        let (mut g, n) = chain();
        g.remove_node(n[3]);
        let down = g.reach([n[0]], Direction::Outgoing, None);
        assert!(!down.contains(&n[4]));
    }

    #[test]
    fn cycle_terminates_and_reaches_start() {
        let mut g = Digraph::new();
        let a = g.add_node(NodeKind::Variable);
        let m = g.add_node(NodeKind::Method);
        g.add_edge(a, m);
        g.add_edge(m, a);
        let down = g.reach([a], Direction::Outgoing, None);
        // Start is collectable when re-reached through the cycle.
        assert!(down.contains(&a));
        assert!(down.contains(&m));
    }
}
