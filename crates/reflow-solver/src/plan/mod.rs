//! The incremental planner.
//!
//! Given a prioritized set of constraints to (re-)enforce and the previous
//! solution graph, selects at most one method per constraint such that the
//! result is acyclic and single-writer, satisfies every Required constraint,
//! and satisfies as many Optional constraints as possible, strongest first.
//!
//! Each enforcement attempt is scoped to the sub-hypergraph upstream of its
//! target (walking the existing solution graph backward), which is what
//! makes repeated edits cheap: the rest of the network is never touched.

pub mod solution;
mod subproblem;
mod txn;

pub use solution::SolutionGraph;

use std::collections::BinaryHeap;

use indexmap::IndexSet;
use thiserror::Error;

use reflow_core::{ConstraintGraph, ConstraintId, CoreError, MethodId, StrengthTable, VarId};

use subproblem::Subproblem;
use txn::Txn;

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A Required constraint stayed unsatisfied after every retractable
    /// weaker constraint was exhausted.
    #[error("required constraint {constraint} cannot be satisfied")]
    RequiredUnsatisfiable { constraint: ConstraintId },

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result of a successful planning pass.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub solution: SolutionGraph,
    /// Optional constraints that could not be enforced. Not an error:
    /// they simply hold no method until the hierarchy shifts again.
    pub unenforced: Vec<ConstraintId>,
}

/// Outcome of one scoped enforcement attempt.
enum Attempt {
    Committed {
        method: MethodId,
        retracted: Vec<ConstraintId>,
        undetermined: Vec<VarId>,
    },
    Failed,
}

/// Plans starting from `previous`, enforcing `to_enforce` strongest first.
///
/// On `Err`, `previous` is still the valid solution: every provisional
/// edit of the failing attempt has been rolled back before returning.
pub fn plan(
    cgraph: &ConstraintGraph,
    strengths: &StrengthTable,
    previous: &SolutionGraph,
    to_enforce: &[ConstraintId],
) -> Result<PlanOutcome, PlanError> {
    let mut solution = previous.clone();
    let mut queue: BinaryHeap<(reflow_core::Strength, ConstraintId)> = to_enforce
        .iter()
        .map(|c| (strengths.strength_of(*c), *c))
        .collect();
    let mut unenforced = Vec::new();

    while let Some((strength, target)) = queue.pop() {
        if solution.selected(target).is_some() {
            // Already enforced, either before this pass or by an earlier
            // attempt's re-selection.
            continue;
        }
        match enforce_one(cgraph, strengths, &mut solution, target)? {
            Attempt::Committed {
                method,
                retracted,
                undetermined,
            } => {
                debug_assert!(solution.verify_acyclic(cgraph));
                let Some(strongest) = retracted
                    .iter()
                    .copied()
                    .max_by(|a, b| strengths.compare(*a, *b))
                else {
                    continue;
                };
                // The retracted constraints get another attempt: a
                // different subproblem region may still satisfy them.
                // They are strictly weaker than this target, so the
                // strength chain decreases and the loop terminates.
                for c in retracted {
                    queue.push((strengths.strength_of(c), c));
                }
                // Anything downstream of the new outputs or of a variable
                // left undetermined, and weaker than the strongest
                // retracted constraint, may now be satisfiable differently.
                let mut starts: IndexSet<VarId> =
                    cgraph.method(method)?.outputs.iter().copied().collect();
                starts.extend(undetermined);
                for c in solution.downstream_constraints(cgraph, starts) {
                    if solution.selected(c).is_none() && strengths.weaker(c, strongest) {
                        queue.push((strengths.strength_of(c), c));
                    }
                }
            }
            Attempt::Failed => {
                if strength.is_required() {
                    return Err(PlanError::RequiredUnsatisfiable { constraint: target });
                }
                tracing::debug!(constraint = target.0, "optional constraint left unenforced");
                unenforced.push(target);
            }
        }
    }
    // A constraint can fail more than once, and a later attempt may have
    // re-enforced something reported earlier.
    let mut seen: IndexSet<ConstraintId> = IndexSet::new();
    unenforced.retain(|c| solution.selected(*c).is_none() && seen.insert(*c));
    Ok(PlanOutcome {
        solution,
        unenforced,
    })
}

/// One scoped attempt: free-variable propagation with retraction of
/// strictly weaker constraints, committed or rolled back atomically.
fn enforce_one(
    cgraph: &ConstraintGraph,
    strengths: &StrengthTable,
    solution: &mut SolutionGraph,
    target: ConstraintId,
) -> Result<Attempt, PlanError> {
    let pre = solution.clone();
    let mut sub = Subproblem::scope(cgraph, strengths, &pre, target)?;

    // Withdraw every scoped selection provisionally; the txn can put each
    // one back exactly as it was.
    let mut txn = Txn::new();
    for c in &sub.constraints {
        txn.record(*c, solution.selected(*c));
    }
    for c in sub.constraints.clone() {
        solution.deselect(cgraph, c)?;
    }

    loop {
        while let Some((_, constraint)) = sub.next_free() {
            if let Some(method) = sub.candidate(cgraph, constraint)? {
                solution.select(cgraph, constraint, method)?;
                sub.resolve(cgraph, constraint, method)?;
            }
        }
        if sub.done() {
            let Some(method) = solution.selected(target) else {
                // Unreachable while retraction excludes the target, but a
                // rollback beats a wrong commit.
                txn.rollback(cgraph, solution)?;
                return Ok(Attempt::Failed);
            };
            let undetermined = sub.undetermined_vars(&pre, solution);
            let retracted = std::mem::take(&mut sub.retracted);
            txn.commit();
            return Ok(Attempt::Committed {
                method,
                retracted,
                undetermined,
            });
        }
        match sub.pop_retractable() {
            Some(weakest) => {
                tracing::debug!(
                    constraint = weakest.0,
                    target = target.0,
                    "retracting to make room"
                );
                sub.retract(cgraph, weakest)?;
            }
            None => {
                txn.rollback(cgraph, solution)?;
                return Ok(Attempt::Failed);
            }
        }
    }
}
