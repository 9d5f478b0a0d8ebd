//! The solution graph: which method currently satisfies each constraint.
//!
//! A derived view over the constraint graph recording at most one selected
//! method per constraint and at most one writing method per variable.
//! Invariants: single writer per variable, and no cycles over selected
//! methods' output->input edges (prior inputs excluded).

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use reflow_core::{ConstraintGraph, ConstraintId, CoreError, MethodId, VarId};

/// Selected-method assignment, the planner's output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionGraph {
    selected: IndexMap<ConstraintId, MethodId>,
    writer: IndexMap<VarId, MethodId>,
}

impl SolutionGraph {
    pub fn new() -> Self {
        SolutionGraph::default()
    }

    /// The method selected for `constraint`, if any.
    pub fn selected(&self, constraint: ConstraintId) -> Option<MethodId> {
        self.selected.get(&constraint).copied()
    }

    /// The method currently writing `var`, if any.
    pub fn writer_of(&self, var: VarId) -> Option<MethodId> {
        self.writer.get(&var).copied()
    }

    /// True if `method` is some constraint's current selection.
    pub fn is_selected(&self, method: MethodId) -> bool {
        self.selected.values().any(|m| *m == method)
    }

    /// Enumerates (constraint, selected method) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ConstraintId, MethodId)> + '_ {
        self.selected.iter().map(|(c, m)| (*c, *m))
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selects `method` for `constraint`, displacing any previous selection
    /// and claiming the method's outputs.
    pub fn select(
        &mut self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
        method: MethodId,
    ) -> Result<(), CoreError> {
        self.deselect(cgraph, constraint)?;
        let rec = cgraph.method(method)?;
        self.selected.insert(constraint, method);
        for out in &rec.outputs {
            self.writer.insert(*out, method);
        }
        Ok(())
    }

    /// Withdraws the selection for `constraint`, releasing its outputs.
    pub fn deselect(
        &mut self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
    ) -> Result<(), CoreError> {
        if let Some(prev) = self.selected.shift_remove(&constraint) {
            let rec = cgraph.method(prev)?;
            for out in &rec.outputs {
                self.writer.shift_remove(out);
            }
        }
        Ok(())
    }

    /// Drops any selection referring to entities no longer in the graph.
    /// Used after `remove_*` calls on the constraint graph.
    pub fn prune(&mut self, cgraph: &ConstraintGraph) {
        let stale: Vec<ConstraintId> = self
            .selected
            .iter()
            .filter(|(c, m)| cgraph.constraint(**c).is_err() || cgraph.method(**m).is_err())
            .map(|(c, _)| *c)
            .collect();
        for c in stale {
            if let Some(prev) = self.selected.shift_remove(&c) {
                self.writer.retain(|_, m| *m != prev);
            }
        }
    }

    /// Variables upstream of `starts` through selected methods: walk from
    /// each variable to its writer, then to that method's non-prior inputs.
    /// The starts themselves are included.
    pub fn upstream_variables(
        &self,
        cgraph: &ConstraintGraph,
        starts: impl IntoIterator<Item = VarId>,
    ) -> IndexSet<VarId> {
        let mut seen: IndexSet<VarId> = starts.into_iter().collect();
        let mut stack: Vec<VarId> = seen.iter().copied().collect();
        while let Some(v) = stack.pop() {
            let Some(writer) = self.writer_of(v) else {
                continue;
            };
            let Ok(rec) = cgraph.method(writer) else {
                continue;
            };
            for input in &rec.inputs {
                if !input.prior && seen.insert(input.var) {
                    stack.push(input.var);
                }
            }
        }
        seen
    }

    /// Constraints downstream of `starts`: every constraint touching a
    /// variable reachable forward through selected methods (the starts
    /// included).
    pub fn downstream_constraints(
        &self,
        cgraph: &ConstraintGraph,
        starts: impl IntoIterator<Item = VarId>,
    ) -> IndexSet<ConstraintId> {
        let mut seen: IndexSet<VarId> = starts.into_iter().collect();
        let mut stack: Vec<VarId> = seen.iter().copied().collect();
        while let Some(v) = stack.pop() {
            for reader in cgraph.readers_of(v) {
                if !self.is_selected(reader) {
                    continue;
                }
                let Ok(rec) = cgraph.method(reader) else {
                    continue;
                };
                for out in &rec.outputs {
                    if seen.insert(*out) {
                        stack.push(*out);
                    }
                }
            }
        }
        let mut constraints = IndexSet::new();
        for v in &seen {
            constraints.extend(cgraph.constraints_touching(*v));
        }
        constraints
    }

    /// Verifies acyclicity over selected methods (prior inputs excluded).
    /// Used by tests and debug assertions; a correct plan never fails this.
    pub fn verify_acyclic(&self, cgraph: &ConstraintGraph) -> bool {
        // Kahn over the selected-method subgraph.
        let methods: Vec<MethodId> = self.selected.values().copied().collect();
        let mut indegree: IndexMap<MethodId, usize> = methods.iter().map(|m| (*m, 0)).collect();
        let mut edges: IndexMap<MethodId, Vec<MethodId>> = IndexMap::new();
        for m in &methods {
            let Ok(rec) = cgraph.method(*m) else {
                return false;
            };
            for input in &rec.inputs {
                if input.prior {
                    continue;
                }
                if let Some(up) = self.writer_of(input.var) {
                    edges.entry(up).or_default().push(*m);
                    if let Some(d) = indegree.get_mut(m) {
                        *d += 1;
                    }
                }
            }
        }
        let mut ready: Vec<MethodId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(m, _)| *m)
            .collect();
        let mut emitted = 0;
        while let Some(m) = ready.pop() {
            emitted += 1;
            for next in edges.get(&m).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push(*next);
                    }
                }
            }
        }
        emitted == methods.len()
    }
}
