//! The outward-facing surface of a constraint network.
//!
//! `Network` owns the constraint graph, the strength hierarchy, the
//! current solution and the evaluator, and queues external intents --
//! edits and asynchronous settlements -- so that each `update()` call is
//! one atomic plan-then-evaluate step.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};

use reflow_core::{
    ConstraintGraph, ConstraintId, CoreError, MethodId, MethodInput, StrengthTable, Value, VarId,
};

use crate::eval::{EvalEnv, Evaluator, MethodBody, MethodOutput, UpdateReport, VarHealth};
use crate::ladder::Blame;
use crate::plan::{plan, PlanError, SolutionGraph};

/// A change notification for one variable.
#[derive(Debug, Clone)]
pub enum VarEvent {
    /// The value changed this update.
    Changed(Value),
    /// The variable's writer deferred; the old value is still shown.
    Pending,
    /// A deferred result settled successfully (fires whether or not the
    /// value differs from what was already shown).
    Settled(Value),
    /// The variable is in a failed state.
    Error(Blame),
}

type EventFn = Rc<dyn Fn(&VarEvent)>;

/// Handle returned by [`Network::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    var: VarId,
    token: u64,
}

/// A multi-way dataflow constraint network.
pub struct Network {
    cgraph: ConstraintGraph,
    strengths: StrengthTable,
    solution: SolutionGraph,
    eval: Evaluator,
    bodies: HashMap<MethodId, MethodBody>,
    /// Stay method -> the variable it keeps.
    stay_writer: HashMap<MethodId, VarId>,
    /// Variable -> its stay constraint.
    stay_constraint: HashMap<VarId, ConstraintId>,
    /// Constraints that currently hold no method and should be offered to
    /// the planner again: newly added ones plus those the last plan left
    /// unenforced.
    unenforced: IndexSet<ConstraintId>,
    /// Edits queued by `set()`, drained by the next `update()`.
    pending_edits: Vec<(VarId, Value)>,
    /// Variables whose ladders advanced asynchronously, fed by per-ladder
    /// settle hooks.
    settlements: Rc<RefCell<IndexSet<VarId>>>,
    subscribers: HashMap<VarId, IndexMap<u64, EventFn>>,
    next_token: u64,
}

impl Default for Network {
    fn default() -> Self {
        Network::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Network {
            cgraph: ConstraintGraph::new(),
            strengths: StrengthTable::new(),
            solution: SolutionGraph::new(),
            eval: Evaluator::new(),
            bodies: HashMap::new(),
            stay_writer: HashMap::new(),
            stay_constraint: HashMap::new(),
            unenforced: IndexSet::new(),
            pending_edits: Vec::new(),
            settlements: Rc::new(RefCell::new(IndexSet::new())),
            subscribers: HashMap::new(),
            next_token: 0,
        }
    }

    // -----------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------

    /// Adds a variable with its initial value.
    ///
    /// Every variable gets a weakest-strength stay constraint whose single
    /// method re-asserts the current value through a prior self-read, so
    /// an otherwise unconstrained variable holds steady.
    pub fn add_variable(&mut self, initial: Value) -> Result<VarId, CoreError> {
        let var = self.cgraph.add_variable();
        let ladder = self.eval.add_variable(var, initial);
        let queue = Rc::clone(&self.settlements);
        ladder.on_settle(move || {
            queue.borrow_mut().insert(var);
        });

        let stay = self.cgraph.add_constraint();
        let method = self
            .cgraph
            .add_method(stay, &[MethodInput::prior(var)], &[var])?;
        self.bodies.insert(
            method,
            Rc::new(move |ctx| Ok(MethodOutput::single(ctx.get(var)?))),
        );
        self.strengths.insert_weakest(stay);
        self.stay_writer.insert(method, var);
        self.stay_constraint.insert(var, stay);
        self.unenforced.insert(stay);
        Ok(var)
    }

    /// Adds an empty Required constraint; attach methods with
    /// [`Network::add_method`]. The constraint is not queued for
    /// enforcement until it has a method, so an `update()` in between
    /// cannot fail on it.
    pub fn add_constraint(&mut self) -> ConstraintId {
        self.cgraph.add_constraint()
    }

    /// Adds an empty Optional constraint at the weakest strength.
    pub fn add_optional(&mut self) -> ConstraintId {
        let id = self.cgraph.add_constraint();
        self.strengths.insert_weakest(id);
        id
    }

    /// Adds one method alternative to a constraint.
    pub fn add_method(
        &mut self,
        constraint: ConstraintId,
        inputs: &[MethodInput],
        outputs: &[VarId],
        body: MethodBody,
    ) -> Result<MethodId, CoreError> {
        let id = self.cgraph.add_method(constraint, inputs, outputs)?;
        self.bodies.insert(id, body);
        // A new alternative can make an unenforced constraint plannable.
        if self.solution.selected(constraint).is_none() {
            self.unenforced.insert(constraint);
        }
        Ok(id)
    }

    /// Removes a constraint and all its methods.
    pub fn remove_constraint(&mut self, constraint: ConstraintId) -> Result<(), CoreError> {
        let methods: Vec<MethodId> = self
            .cgraph
            .constraint(constraint)?
            .methods
            .iter()
            .copied()
            .collect();
        // Variables the removed methods wrote lose their writer; their
        // stays need the planner's attention again.
        let mut orphaned: IndexSet<VarId> = IndexSet::new();
        for m in &methods {
            if self.solution.is_selected(*m) {
                orphaned.extend(self.cgraph.method(*m)?.outputs.iter().copied());
            }
        }
        self.cgraph.remove_constraint(constraint)?;
        for m in methods {
            self.bodies.remove(&m);
            self.eval.remove_method(m);
        }
        let _ = self.strengths.remove_optional(constraint);
        self.unenforced.shift_remove(&constraint);
        self.solution.prune(&self.cgraph);
        for var in orphaned {
            if let Some(stay) = self.stay_constraint.get(&var) {
                if self.solution.selected(*stay).is_none() {
                    self.unenforced.insert(*stay);
                }
            }
        }
        // Constraints retracted in favor of the removed one may fit now.
        // Method-less ones stay out of the queue until they are plannable.
        let requeue: Vec<ConstraintId> = self
            .cgraph
            .constraints()
            .filter(|rec| !rec.methods.is_empty())
            .map(|rec| rec.id)
            .collect();
        for c in requeue {
            if self.solution.selected(c).is_none() {
                self.unenforced.insert(c);
            }
        }
        Ok(())
    }

    /// Removes a variable. Fails while any non-stay constraint still
    /// touches it.
    pub fn remove_variable(&mut self, var: VarId) -> Result<(), CoreError> {
        let stay = self
            .stay_constraint
            .get(&var)
            .copied()
            .ok_or(CoreError::VariableNotFound { id: var })?;
        // Refuse before tearing anything down: the stay is the only
        // constraint allowed to remain.
        let in_use = self.cgraph.constraints_touching(var).len() > 1;
        if in_use {
            return Err(CoreError::VariableInUse {
                id: var,
                count: self.cgraph.constraints_touching(var).len() - 1,
            });
        }
        self.remove_constraint(stay)?;
        self.cgraph.remove_variable(var)?;
        self.eval.remove_variable(var);
        self.stay_constraint.remove(&var);
        self.stay_writer.retain(|_, v| *v != var);
        self.subscribers.remove(&var);
        self.settlements.borrow_mut().shift_remove(&var);
        self.pending_edits.retain(|(v, _)| *v != var);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------

    /// Queues an edit and promotes the variable's stay constraint to the
    /// strongest optional, so the edited value wins over older edits.
    pub fn set(&mut self, var: VarId, value: Value) -> Result<(), CoreError> {
        let stay = self
            .stay_constraint
            .get(&var)
            .copied()
            .ok_or(CoreError::VariableNotFound { id: var })?;
        self.strengths.set_max_strength(stay)?;
        if self.solution.selected(stay).is_none() {
            self.unenforced.insert(stay);
        }
        self.pending_edits.push((var, value));
        Ok(())
    }

    /// Strength-hierarchy passthroughs.
    pub fn set_optionals(&mut self, order: Vec<ConstraintId>) {
        self.strengths.set_optionals(order);
    }

    pub fn set_max_strength(&mut self, constraint: ConstraintId) -> Result<(), CoreError> {
        self.strengths.set_max_strength(constraint)
    }

    pub fn set_min_strength(&mut self, constraint: ConstraintId) -> Result<(), CoreError> {
        self.strengths.set_min_strength(constraint)
    }

    pub fn remove_optional(&mut self, constraint: ConstraintId) -> Result<(), CoreError> {
        self.strengths.remove_optional(constraint)
    }

    // -----------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------

    /// Runs one plan-then-evaluate step over the queued intents.
    ///
    /// On planning failure the previous solution graph stays in force and
    /// this update's edits are dropped; queued settlements are retained
    /// for the next attempt.
    pub fn update(&mut self) -> Result<UpdateReport, PlanError> {
        let edits = std::mem::take(&mut self.pending_edits);
        let settlements: Vec<VarId> = self.settlements.borrow_mut().drain(..).collect();

        let to_enforce: Vec<ConstraintId> = self.unenforced.iter().copied().collect();
        let outcome = match plan(&self.cgraph, &self.strengths, &self.solution, &to_enforce) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "planning failed; keeping previous solution");
                self.settlements.borrow_mut().extend(settlements);
                return Err(err);
            }
        };
        let new_methods: Vec<MethodId> = outcome
            .solution
            .iter()
            .filter(|(c, m)| self.solution.selected(*c) != Some(*m))
            .map(|(_, m)| m)
            .collect();
        self.unenforced = outcome.unenforced.into_iter().collect();
        self.solution = outcome.solution;

        let env = EvalEnv {
            cgraph: &self.cgraph,
            solution: &self.solution,
            bodies: &self.bodies,
            stay_writer: &self.stay_writer,
        };
        let report = self.eval.update(&env, &edits, &new_methods, &settlements);

        self.publish(&report, &settlements);
        Ok(report)
    }

    fn publish(&self, report: &UpdateReport, settlements: &[VarId]) {
        for var in &report.changed {
            if let Some(value) = self.eval.value(*var) {
                self.emit(*var, &VarEvent::Changed(value.clone()));
            }
        }
        for var in &report.pending {
            self.emit(*var, &VarEvent::Pending);
        }
        for var in &report.failed {
            if let Some(VarHealth::Failed(blame)) = self.eval.health(*var) {
                self.emit(*var, &VarEvent::Error(blame.clone()));
            }
        }
        for var in settlements {
            if let (Some(VarHealth::Fresh), Some(value)) =
                (self.eval.health(*var), self.eval.value(*var))
            {
                self.emit(*var, &VarEvent::Settled(value.clone()));
            }
        }
    }

    fn emit(&self, var: VarId, event: &VarEvent) {
        let Some(subs) = self.subscribers.get(&var) else {
            return;
        };
        let callbacks: Vec<EventFn> = subs.values().cloned().collect();
        for cb in callbacks {
            cb(event);
        }
    }

    // -----------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------

    pub fn subscribe(&mut self, var: VarId, callback: impl Fn(&VarEvent) + 'static) -> SubscriptionId {
        let token = self.next_token;
        self.next_token += 1;
        self.subscribers
            .entry(var)
            .or_default()
            .insert(token, Rc::new(callback));
        SubscriptionId { var, token }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(subs) = self.subscribers.get_mut(&id.var) {
            subs.shift_remove(&id.token);
        }
    }

    pub fn value(&self, var: VarId) -> Option<&Value> {
        self.eval.value(var)
    }

    pub fn health(&self, var: VarId) -> Option<&VarHealth> {
        self.eval.health(var)
    }

    pub fn cgraph(&self) -> &ConstraintGraph {
        &self.cgraph
    }

    pub fn solution(&self) -> &SolutionGraph {
        &self.solution
    }

    pub fn strengths(&self) -> &StrengthTable {
        &self.strengths
    }

    /// Constraints the last plan left without a method.
    pub fn unenforced(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.unenforced.iter().copied()
    }
}
