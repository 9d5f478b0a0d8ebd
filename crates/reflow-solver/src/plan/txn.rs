//! Transaction log for one enforcement attempt.
//!
//! Each attempt records every constraint it touches together with the
//! selection that constraint had before the attempt. Commit discards the
//! log; rollback replays it in reverse, restoring the previous solution
//! graph exactly.

use std::collections::HashSet;

use reflow_core::{ConstraintGraph, ConstraintId, CoreError, MethodId};

use super::solution::SolutionGraph;

/// Undo log of (constraint, previous selection) pairs.
#[derive(Debug, Default)]
pub struct Txn {
    log: Vec<(ConstraintId, Option<MethodId>)>,
    touched: HashSet<ConstraintId>,
}

impl Txn {
    pub fn new() -> Self {
        Txn::default()
    }

    /// Records the pre-attempt selection of `constraint`. Only the first
    /// record per constraint counts; later ones are attempt-internal.
    pub fn record(&mut self, constraint: ConstraintId, previous: Option<MethodId>) {
        if self.touched.insert(constraint) {
            self.log.push((constraint, previous));
        }
    }

    /// Discards the log, keeping the solution graph as mutated.
    pub fn commit(self) {}

    /// Replays the log in reverse, restoring every touched constraint to
    /// its pre-attempt selection.
    pub fn rollback(
        self,
        cgraph: &ConstraintGraph,
        solution: &mut SolutionGraph,
    ) -> Result<(), CoreError> {
        for (constraint, previous) in self.log.into_iter().rev() {
            match previous {
                Some(method) => solution.select(cgraph, constraint, method)?,
                None => solution.deselect(cgraph, constraint)?,
            }
        }
        Ok(())
    }
}
