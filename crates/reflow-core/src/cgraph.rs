//! ConstraintGraph: the hypergraph of variables, methods, and constraints.
//!
//! Variables are plain nodes in the underlying [`Digraph`]; a method is a
//! node tagged with its owning constraint, wired non-prior-input-variable
//! `->` method `->` output-variable. Prior inputs (inputs that may legally
//! alias an output) are recorded on the method but create no edge: they
//! read the previous phase's value and cannot form a structural cycle.
//!
//! All mutations go through `ConstraintGraph` methods so adjacency, the
//! per-constraint records, and the per-variable method index stay
//! consistent. Read-only accessors are provided for planner/evaluator
//! traversals.

use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::digraph::{Digraph, NodeKind};
use crate::error::CoreError;
use crate::id::{ConstraintId, MethodId, VarId};

/// One declared method input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInput {
    pub var: VarId,
    /// A prior input may equal one of the method's own outputs; the
    /// evaluator serves it the phase-start value instead of recursing.
    pub prior: bool,
}

impl MethodInput {
    pub fn new(var: VarId) -> Self {
        MethodInput { var, prior: false }
    }

    pub fn prior(var: VarId) -> Self {
        MethodInput { var, prior: true }
    }
}

/// Structural record of one method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodRec {
    pub id: MethodId,
    pub constraint: ConstraintId,
    pub inputs: SmallVec<[MethodInput; 4]>,
    pub outputs: SmallVec<[VarId; 2]>,
}

impl MethodRec {
    /// True if `var` is declared as a prior input.
    pub fn is_prior_input(&self, var: VarId) -> bool {
        self.inputs.iter().any(|i| i.var == var && i.prior)
    }
}

/// Structural record of one constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintRec {
    pub id: ConstraintId,
    pub methods: SmallVec<[MethodId; 4]>,
    /// Union of all variables the constraint's methods touch, prior
    /// inputs included.
    pub variables: IndexSet<VarId>,
}

/// The constraint hypergraph.
#[derive(Debug, Clone, Default)]
pub struct ConstraintGraph {
    graph: Digraph,
    variables: IndexSet<VarId>,
    methods: IndexMap<MethodId, MethodRec>,
    constraints: IndexMap<ConstraintId, ConstraintRec>,
    /// All methods touching a variable (inputs, prior inputs, outputs).
    var_methods: HashMap<VarId, IndexSet<MethodId>>,
    next_constraint: u32,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        ConstraintGraph::default()
    }

    // -----------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------

    /// Adds a fresh variable node.
    pub fn add_variable(&mut self) -> VarId {
        let id = VarId::from(self.graph.add_node(NodeKind::Variable));
        self.variables.insert(id);
        self.var_methods.insert(id, IndexSet::new());
        id
    }

    /// Registers a fresh, empty constraint.
    pub fn add_constraint(&mut self) -> ConstraintId {
        let id = ConstraintId(self.next_constraint);
        self.next_constraint += 1;
        self.constraints.insert(
            id,
            ConstraintRec {
                id,
                methods: SmallVec::new(),
                variables: IndexSet::new(),
            },
        );
        id
    }

    /// Adds a method to `constraint`.
    ///
    /// Validation (structural-error policy: callers log and skip on `Err`):
    /// all referenced variables must exist, outputs must be distinct and
    /// non-empty, and no non-prior input may also be an output.
    pub fn add_method(
        &mut self,
        constraint: ConstraintId,
        inputs: &[MethodInput],
        outputs: &[VarId],
    ) -> Result<MethodId, CoreError> {
        if !self.constraints.contains_key(&constraint) {
            return Err(CoreError::ConstraintNotFound { id: constraint });
        }
        for input in inputs {
            if !self.variables.contains(&input.var) {
                return Err(CoreError::VariableNotFound { id: input.var });
            }
        }
        if outputs.is_empty() {
            return Err(CoreError::NoOutputs { constraint });
        }
        for (i, out) in outputs.iter().enumerate() {
            if !self.variables.contains(out) {
                return Err(CoreError::VariableNotFound { id: *out });
            }
            if outputs[..i].contains(out) {
                return Err(CoreError::DuplicateOutput {
                    constraint,
                    var: *out,
                });
            }
        }
        for input in inputs {
            if !input.prior && outputs.contains(&input.var) {
                return Err(CoreError::OutputAsInput {
                    constraint,
                    var: input.var,
                });
            }
        }

        let id = MethodId::from(self.graph.add_node(NodeKind::Method));
        for input in inputs {
            if !input.prior {
                self.graph.add_edge(input.var.into(), id.into());
            }
        }
        for out in outputs {
            self.graph.add_edge(id.into(), (*out).into());
        }

        let rec = MethodRec {
            id,
            constraint,
            inputs: inputs.iter().copied().collect(),
            outputs: outputs.iter().copied().collect(),
        };
        let crec = self
            .constraints
            .get_mut(&constraint)
            .ok_or(CoreError::ConstraintNotFound { id: constraint })?;
        crec.methods.push(id);
        for input in inputs {
            crec.variables.insert(input.var);
        }
        for out in outputs {
            crec.variables.insert(*out);
        }
        for var in rec.inputs.iter().map(|i| i.var).chain(rec.outputs.iter().copied()) {
            self.var_methods.entry(var).or_default().insert(id);
        }
        self.methods.insert(id, rec);
        Ok(id)
    }

    /// Removes a method, rebuilding its constraint's variable union from
    /// the remaining methods.
    pub fn remove_method(&mut self, id: MethodId) -> Result<(), CoreError> {
        let rec = self
            .methods
            .swap_remove(&id)
            .ok_or(CoreError::MethodNotFound { id })?;
        self.graph.remove_node(id.into());
        for var in rec.inputs.iter().map(|i| i.var).chain(rec.outputs.iter().copied()) {
            if let Some(set) = self.var_methods.get_mut(&var) {
                set.shift_remove(&id);
            }
        }
        if let Some(crec) = self.constraints.get_mut(&rec.constraint) {
            crec.methods.retain(|m| *m != id);
            let methods = &self.methods;
            crec.variables = crec
                .methods
                .iter()
                .filter_map(|m| methods.get(m))
                .flat_map(|m| {
                    m.inputs
                        .iter()
                        .map(|i| i.var)
                        .chain(m.outputs.iter().copied())
                })
                .collect();
        }
        Ok(())
    }

    /// Removes a constraint and all its methods.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<(), CoreError> {
        let rec = self
            .constraints
            .get(&id)
            .ok_or(CoreError::ConstraintNotFound { id })?;
        let methods: Vec<MethodId> = rec.methods.to_vec();
        for m in methods {
            self.remove_method(m)?;
        }
        self.constraints.shift_remove(&id);
        Ok(())
    }

    /// Removes a variable. Fails while any method still references it.
    pub fn remove_variable(&mut self, id: VarId) -> Result<(), CoreError> {
        if !self.variables.contains(&id) {
            return Err(CoreError::VariableNotFound { id });
        }
        let count = self.var_methods.get(&id).map_or(0, |s| s.len());
        if count > 0 {
            return Err(CoreError::VariableInUse { id, count });
        }
        self.variables.shift_remove(&id);
        self.var_methods.remove(&id);
        self.graph.remove_node(id.into());
        Ok(())
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn has_variable(&self, id: VarId) -> bool {
        self.variables.contains(&id)
    }

    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.variables.iter().copied()
    }

    pub fn method(&self, id: MethodId) -> Result<&MethodRec, CoreError> {
        self.methods.get(&id).ok_or(CoreError::MethodNotFound { id })
    }

    pub fn constraint(&self, id: ConstraintId) -> Result<&ConstraintRec, CoreError> {
        self.constraints
            .get(&id)
            .ok_or(CoreError::ConstraintNotFound { id })
    }

    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintRec> {
        self.constraints.values()
    }

    /// All methods touching `var` (as input, prior input, or output).
    pub fn methods_touching(&self, var: VarId) -> impl Iterator<Item = MethodId> + '_ {
        self.var_methods
            .get(&var)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// All constraints touching `var`.
    pub fn constraints_touching(&self, var: VarId) -> IndexSet<ConstraintId> {
        self.methods_touching(var)
            .filter_map(|m| self.methods.get(&m))
            .map(|m| m.constraint)
            .collect()
    }

    /// Methods reading `var` through a non-prior input edge.
    pub fn readers_of(&self, var: VarId) -> impl Iterator<Item = MethodId> + '_ {
        self.graph
            .neighbors(var.into(), Direction::Outgoing)
            .map(MethodId::from)
    }

    /// The underlying directed graph, for scoped walks.
    pub fn graph(&self) -> &Digraph {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One constraint {x, y, z} with sum/diff methods, as in a
    /// width + gap = total relation.
    fn triangle() -> (ConstraintGraph, [VarId; 3], ConstraintId) {
        let mut g = ConstraintGraph::new();
        let x = g.add_variable();
        let y = g.add_variable();
        let z = g.add_variable();
        let c = g.add_constraint();
        g.add_method(c, &[MethodInput::new(x), MethodInput::new(y)], &[z])
            .unwrap();
        g.add_method(c, &[MethodInput::new(z), MethodInput::new(x)], &[y])
            .unwrap();
        g.add_method(c, &[MethodInput::new(z), MethodInput::new(y)], &[x])
            .unwrap();
        (g, [x, y, z], c)
    }

    #[test]
    fn constraint_variable_union() {
        let (g, [x, y, z], c) = triangle();
        let rec = g.constraint(c).unwrap();
        assert_eq!(rec.methods.len(), 3);
        for v in [x, y, z] {
            assert!(rec.variables.contains(&v));
        }
    }

    #[test]
    fn touching_queries() {
        let (g, [x, _, _], c) = triangle();
        assert_eq!(g.methods_touching(x).count(), 3);
        assert_eq!(g.constraints_touching(x).len(), 1);
        assert!(g.constraints_touching(x).contains(&c));
    }

    #[test]
    fn duplicate_output_rejected() {
        let mut g = ConstraintGraph::new();
        let x = g.add_variable();
        let y = g.add_variable();
        let c = g.add_constraint();
        let err = g.add_method(c, &[MethodInput::new(x)], &[y, y]);
        assert!(matches!(err, Err(CoreError::DuplicateOutput { .. })));
        // The malformed method left no residue.
        assert_eq!(g.methods_touching(y).count(), 0);
    }

    #[test]
    fn non_prior_input_as_output_rejected() {
        let mut g = ConstraintGraph::new();
        let x = g.add_variable();
        let c = g.add_constraint();
        let err = g.add_method(c, &[MethodInput::new(x)], &[x]);
        assert!(matches!(err, Err(CoreError::OutputAsInput { .. })));
    }

    #[test]
    fn prior_input_may_alias_output() {
        let mut g = ConstraintGraph::new();
        let x = g.add_variable();
        let c = g.add_constraint();
        let m = g.add_method(c, &[MethodInput::prior(x)], &[x]).unwrap();
        assert!(g.method(m).unwrap().is_prior_input(x));
        // Prior input contributes no reader edge.
        assert_eq!(g.readers_of(x).count(), 0);
    }

    #[test]
    fn remove_variable_in_use_fails() {
        let (mut g, [x, _, _], _) = triangle();
        assert!(matches!(
            g.remove_variable(x),
            Err(CoreError::VariableInUse { count: 3, .. })
        ));
    }

    #[test]
    fn remove_constraint_frees_variables() {
        let (mut g, [x, y, z], c) = triangle();
        g.remove_constraint(c).unwrap();
        for v in [x, y, z] {
            g.remove_variable(v).unwrap();
        }
        assert_eq!(g.variables().count(), 0);
    }

    #[test]
    fn remove_method_rebuilds_union() {
        let mut g = ConstraintGraph::new();
        let x = g.add_variable();
        let y = g.add_variable();
        let z = g.add_variable();
        let c = g.add_constraint();
        let m1 = g.add_method(c, &[MethodInput::new(x)], &[y]).unwrap();
        g.add_method(c, &[MethodInput::new(y)], &[z]).unwrap();
        g.remove_method(m1).unwrap();
        let rec = g.constraint(c).unwrap();
        assert!(!rec.variables.contains(&x));
        assert!(rec.variables.contains(&y));
        assert!(rec.variables.contains(&z));
    }
}
