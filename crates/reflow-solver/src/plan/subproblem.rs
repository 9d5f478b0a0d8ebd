//! Scoped planning scratch for one enforcement attempt.
//!
//! All per-attempt bookkeeping (unresolved counts, free-variable queue,
//! determined-by claims, retractable heap) lives here instead of on the
//! core variable/method records, so an abandoned attempt leaves no residue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use indexmap::IndexSet;
use smallvec::SmallVec;

use reflow_core::{ConstraintGraph, ConstraintId, CoreError, MethodId, Strength, StrengthTable, VarId};

/// Sub-hypergraph upstream of one target constraint, with the mutable
/// state of the free-variable propagation over it.
#[derive(Debug)]
pub struct Subproblem {
    pub target: ConstraintId,
    /// All constraints in scope (target + enforced upstream, transitively).
    pub constraints: IndexSet<ConstraintId>,
    /// Constraints not yet (re-)selected or retracted this attempt.
    pub unresolved: IndexSet<ConstraintId>,
    /// Constraints given up on this attempt, in retraction order.
    pub retracted: Vec<ConstraintId>,
    /// Count of unresolved constraints touching each scoped variable.
    num_constraints: HashMap<VarId, usize>,
    /// Outputs claimed by methods selected this attempt.
    determined_by: HashMap<VarId, MethodId>,
    /// Scoped constraints touching each scoped variable.
    touching: HashMap<VarId, SmallVec<[ConstraintId; 4]>>,
    free: VecDeque<VarId>,
    /// Min-heap of (optional rank, constraint) strictly weaker than the
    /// target. Entries are dropped lazily once resolved or retracted.
    retractable: BinaryHeap<Reverse<(u32, ConstraintId)>>,
}

impl Subproblem {
    /// Scopes the attempt: the target plus, to a fixpoint, every constraint
    /// whose selected method in `previous` writes a variable of a scoped
    /// constraint.
    pub fn scope(
        cgraph: &ConstraintGraph,
        strengths: &StrengthTable,
        previous: &super::solution::SolutionGraph,
        target: ConstraintId,
    ) -> Result<Subproblem, CoreError> {
        let mut constraints: IndexSet<ConstraintId> = IndexSet::new();
        let mut vars: IndexSet<VarId> = IndexSet::new();
        let mut pending: Vec<ConstraintId> = vec![target];
        while let Some(c) = pending.pop() {
            if !constraints.insert(c) {
                continue;
            }
            for v in &cgraph.constraint(c)?.variables {
                if vars.insert(*v) {
                    if let Some(writer) = previous.writer_of(*v) {
                        pending.push(cgraph.method(writer)?.constraint);
                    }
                }
            }
        }

        let mut touching: HashMap<VarId, SmallVec<[ConstraintId; 4]>> = HashMap::new();
        for c in &constraints {
            for v in &cgraph.constraint(*c)?.variables {
                touching.entry(*v).or_default().push(*c);
            }
        }
        let num_constraints: HashMap<VarId, usize> =
            touching.iter().map(|(v, cs)| (*v, cs.len())).collect();
        let free: VecDeque<VarId> = num_constraints
            .iter()
            .filter(|(_, n)| **n == 1)
            .map(|(v, _)| *v)
            .collect();

        let mut retractable = BinaryHeap::new();
        for c in &constraints {
            if let Strength::Optional(rank) = strengths.strength_of(*c) {
                if strengths.weaker(*c, target) {
                    retractable.push(Reverse((rank, *c)));
                }
            }
        }

        Ok(Subproblem {
            target,
            unresolved: constraints.clone(),
            constraints,
            retracted: Vec::new(),
            num_constraints,
            determined_by: HashMap::new(),
            touching,
            free,
            retractable,
        })
    }

    /// True when every scoped constraint has been selected or retracted.
    pub fn done(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// A variable is free when exactly one unresolved constraint touches it
    /// and no method selected this attempt writes it.
    pub fn is_free(&self, var: VarId) -> bool {
        self.num_constraints.get(&var).copied() == Some(1)
            && !self.determined_by.contains_key(&var)
    }

    /// Pops the next free variable together with its sole unresolved
    /// constraint. Stale queue entries are skipped.
    pub fn next_free(&mut self) -> Option<(VarId, ConstraintId)> {
        while let Some(v) = self.free.pop_front() {
            if !self.is_free(v) {
                continue;
            }
            let constraint = self
                .touching
                .get(&v)
                .and_then(|cs| cs.iter().find(|c| self.unresolved.contains(*c)))
                .copied();
            if let Some(c) = constraint {
                return Some((v, c));
            }
        }
        None
    }

    /// The best candidate method of `constraint`: every output free, and
    /// among those the fewest outputs (remaining ties fall to declaration
    /// order).
    pub fn candidate(
        &self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
    ) -> Result<Option<MethodId>, CoreError> {
        let mut best: Option<(usize, MethodId)> = None;
        for m in &cgraph.constraint(constraint)?.methods {
            let rec = cgraph.method(*m)?;
            if !rec.outputs.iter().all(|o| self.is_free(*o)) {
                continue;
            }
            let n = rec.outputs.len();
            if best.is_none_or(|(bn, _)| n < bn) {
                best = Some((n, *m));
            }
        }
        Ok(best.map(|(_, m)| m))
    }

    /// Marks `constraint` selected with `method`, claiming its outputs and
    /// releasing the constraint's hold on its variables.
    pub fn resolve(
        &mut self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
        method: MethodId,
    ) -> Result<(), CoreError> {
        for out in &cgraph.method(method)?.outputs {
            self.determined_by.insert(*out, method);
        }
        self.release(cgraph, constraint)
    }

    /// Gives up enforcing `constraint` this attempt; its variables rejoin
    /// the free pool.
    pub fn retract(
        &mut self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
    ) -> Result<(), CoreError> {
        self.retracted.push(constraint);
        self.release(cgraph, constraint)
    }

    /// Pops the weakest still-unresolved retractable constraint.
    pub fn pop_retractable(&mut self) -> Option<ConstraintId> {
        while let Some(Reverse((_, c))) = self.retractable.pop() {
            if self.unresolved.contains(&c) {
                return Some(c);
            }
        }
        None
    }

    /// Variables whose pre-attempt writer disappeared: previously written
    /// (per `previous`), now written by no selected method.
    pub fn undetermined_vars(
        &self,
        previous: &super::solution::SolutionGraph,
        current: &super::solution::SolutionGraph,
    ) -> Vec<VarId> {
        self.touching
            .keys()
            .filter(|v| previous.writer_of(**v).is_some() && current.writer_of(**v).is_none())
            .copied()
            .collect()
    }

    fn release(
        &mut self,
        cgraph: &ConstraintGraph,
        constraint: ConstraintId,
    ) -> Result<(), CoreError> {
        self.unresolved.shift_remove(&constraint);
        for v in &cgraph.constraint(constraint)?.variables {
            if let Some(n) = self.num_constraints.get_mut(v) {
                *n = n.saturating_sub(1);
                if *n == 1 {
                    self.free.push_back(*v);
                }
            }
        }
        Ok(())
    }
}
