//! The lazy evaluator.
//!
//! Executes exactly the stale methods of the solution graph after an edit,
//! in dependency order, each at most once per phase. A single monotonic
//! phase counter gates all work: every variable and method caches the
//! phase in which it was last examined/changed/executed, which both
//! memoizes within a phase and breaks recursion.
//!
//! Writes are staged: a method's outputs are all written before any
//! dependent is notified, so a consumer of two outputs of the same
//! upstream method never observes a mix of old and new values.

pub mod context;
mod error;

pub use context::{Emit, EvalEnv, ExecCtx, MethodBody, MethodOutput};
pub use error::EvalError;

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use reflow_core::{MethodId, Value, VarId};

use crate::ladder::{Blame, Ladder, Outcome};
use crate::plan::SolutionGraph;

/// Health of a variable's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum VarHealth {
    /// The value is a settled, successful result.
    Fresh,
    /// The variable's writer handed back a deferred result that has not
    /// settled yet; the previous value is still the authoritative one.
    Pending,
    /// The variable's writer (or something upstream of it) failed.
    Failed(Blame),
}

type EqFn = Rc<dyn Fn(&Value, &Value) -> bool>;

struct VarState {
    value: Value,
    eq: EqFn,
    ladder: Ladder,
    last_examined: u64,
    last_changed: u64,
    health: VarHealth,
    /// Methods whose most recent execution read this variable.
    readers: IndexSet<MethodId>,
    /// Set once a prior self-read has been observed.
    self_read: bool,
}

#[derive(Debug, Default)]
struct MethodState {
    last_examined: u64,
    last_executed: u64,
    /// Phase in which this method became new to the solution; it then
    /// executes unconditionally.
    forced: u64,
    /// Inputs recorded during the most recent execution.
    inputs_used: SmallVec<[VarId; 4]>,
}

/// What one evaluation phase did.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Number of method bodies executed.
    pub executed: usize,
    /// Variables whose value actually changed (per their equality
    /// predicate), in write order.
    pub changed: Vec<VarId>,
    /// Variables whose writer deferred; their ladders hold a pending slot.
    pub pending: Vec<VarId>,
    /// Variables left in a failed state this phase.
    pub failed: Vec<VarId>,
    /// Contained errors: method failures, double writes, arity mismatches.
    pub errors: Vec<EvalError>,
}

/// The phase-stamped lazy evaluator.
pub struct Evaluator {
    phase: u64,
    in_update: bool,
    vars: HashMap<VarId, VarState>,
    methods: HashMap<MethodId, MethodState>,
    executed: usize,
    changed: IndexSet<VarId>,
    pending: IndexSet<VarId>,
    failed: IndexSet<VarId>,
    errors: Vec<EvalError>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            phase: 0,
            in_update: false,
            vars: HashMap::new(),
            methods: HashMap::new(),
            executed: 0,
            changed: IndexSet::new(),
            pending: IndexSet::new(),
            failed: IndexSet::new(),
            errors: Vec::new(),
        }
    }

    /// Registers a variable with its initial value, returning a handle to
    /// its ladder.
    pub fn add_variable(&mut self, var: VarId, initial: Value) -> Ladder {
        let ladder = Ladder::new(initial.clone());
        self.vars.insert(
            var,
            VarState {
                value: initial,
                eq: Rc::new(|a: &Value, b: &Value| a == b),
                ladder: ladder.clone(),
                last_examined: 0,
                last_changed: 0,
                health: VarHealth::Fresh,
                readers: IndexSet::new(),
                self_read: false,
            },
        );
        ladder
    }

    /// Replaces a variable's equality predicate (defaults to `Value::eq`).
    pub fn set_equality(&mut self, var: VarId, eq: EqFn) {
        if let Some(st) = self.vars.get_mut(&var) {
            st.eq = eq;
        }
    }

    pub fn remove_variable(&mut self, var: VarId) {
        self.vars.remove(&var);
    }

    pub fn remove_method(&mut self, method: MethodId) {
        self.methods.remove(&method);
        for st in self.vars.values_mut() {
            st.readers.shift_remove(&method);
        }
    }

    pub fn phase(&self) -> u64 {
        self.phase
    }

    pub fn value(&self, var: VarId) -> Option<&Value> {
        self.vars.get(&var).map(|st| &st.value)
    }

    pub fn health(&self, var: VarId) -> Option<&VarHealth> {
        self.vars.get(&var).map(|st| &st.health)
    }

    pub fn ladder(&self, var: VarId) -> Option<Ladder> {
        self.vars.get(&var).map(|st| st.ladder.clone())
    }

    /// True once the variable has been read as a prior input of its own
    /// writer.
    pub fn had_self_read(&self, var: VarId) -> bool {
        self.vars.get(&var).is_some_and(|st| st.self_read)
    }

    /// Runs one evaluation phase.
    ///
    /// `edits` are queued external writes; each applies only if its
    /// variable is a genuine source (written by no method, or only by its
    /// own stay method). `new_methods` are the methods newly selected by
    /// the planner; they execute unconditionally. `settlements` are
    /// variables whose ladders advanced asynchronously since the last
    /// phase; their authoritative outcomes are folded in and propagated.
    ///
    /// # Panics
    ///
    /// Re-entrant invocation is a programmer error and panics.
    pub fn update(
        &mut self,
        env: &EvalEnv<'_>,
        edits: &[(VarId, Value)],
        new_methods: &[MethodId],
        settlements: &[VarId],
    ) -> UpdateReport {
        assert!(
            !self.in_update,
            "evaluator update() re-entered while a phase is in progress"
        );
        self.in_update = true;
        self.phase += 1;
        self.executed = 0;
        self.changed.clear();
        self.pending.clear();
        self.failed.clear();
        self.errors.clear();

        for m in new_methods {
            self.methods.entry(*m).or_default().forced = self.phase;
        }

        // Edits first: a fresh edit outranks anything a settlement would
        // deliver for the same variable in this phase.
        for (var, value) in edits {
            if self.is_source(env, *var) {
                if let Err(e) = self.set_source(env, *var, value.clone()) {
                    tracing::error!(error = %e, "edit propagation failed");
                    self.errors.push(e);
                }
            } else {
                tracing::debug!(var = var.0, "edit dropped: variable is written by a method");
            }
        }
        // Stage every settlement outcome before notifying any reader, so
        // a method with several settling inputs sees them all at once.
        let mut repropagate: SmallVec<[VarId; 4]> = SmallVec::new();
        for var in settlements {
            match self.fold_settlement(*var) {
                Ok(true) => repropagate.push(*var),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "settlement delivery failed");
                    self.errors.push(e);
                }
            }
        }
        for var in repropagate {
            if let Err(e) = self.notify_readers(env, var) {
                tracing::error!(error = %e, "settlement propagation failed");
                self.errors.push(e);
            }
        }
        // Drive newly selected methods so a newly enforced constraint
        // takes effect even without a source edit.
        for m in new_methods {
            if let Err(e) = self.maybe_execute(env, *m) {
                tracing::error!(error = %e, "method drive failed");
                self.errors.push(e);
            }
        }

        self.in_update = false;
        UpdateReport {
            executed: self.executed,
            changed: self.changed.drain(..).collect(),
            pending: self.pending.drain(..).collect(),
            failed: self.failed.drain(..).collect(),
            errors: std::mem::take(&mut self.errors),
        }
    }

    // -----------------------------------------------------------------
    // Phase internals
    // -----------------------------------------------------------------

    /// A variable counts as a source when no method writes it, or when its
    /// writer is its own stay method.
    fn is_source(&self, env: &EvalEnv<'_>, var: VarId) -> bool {
        match env.solution.writer_of(var) {
            None => true,
            Some(w) => env.stay_writer.get(&w) == Some(&var),
        }
    }

    /// Applies an external edit to a source variable and pushes the wave
    /// to its readers.
    fn set_source(
        &mut self,
        env: &EvalEnv<'_>,
        var: VarId,
        value: Value,
    ) -> Result<(), EvalError> {
        match self.write_value(var, value) {
            Ok(true) => self.notify_readers(env, var),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Folds a ladder's asynchronously-advanced authoritative outcome into
    /// the variable state. Returns true when the variable's readers must
    /// be re-triggered.
    fn fold_settlement(&mut self, var: VarId) -> Result<bool, EvalError> {
        let phase = self.phase;
        let outcome = self
            .vars
            .get(&var)
            .ok_or(EvalError::Unregistered { var })?
            .ladder
            .current();
        match outcome {
            Outcome::Fulfilled(value) => {
                let st = self.var_mut(var)?;
                st.last_examined = phase;
                let changed = if (st.eq)(&st.value, &value) {
                    if matches!(st.health, VarHealth::Fresh) {
                        false
                    } else {
                        // Settled back to the old value while readers were
                        // left pending/failed on it: counts as a change so
                        // they recompute off a healthy input.
                        st.health = VarHealth::Fresh;
                        st.last_changed = phase;
                        true
                    }
                } else {
                    st.value = value;
                    st.last_changed = phase;
                    st.health = VarHealth::Fresh;
                    true
                };
                if changed {
                    self.changed.insert(var);
                }
                Ok(changed)
            }
            Outcome::Rejected(blame) => {
                {
                    let st = self.var_mut(var)?;
                    st.last_examined = phase;
                    st.last_changed = phase;
                    st.health = VarHealth::Failed(blame);
                }
                self.failed.insert(var);
                Ok(true)
            }
        }
    }

    /// Lazily resolves a variable: executes its writer if stale, then
    /// marks the variable examined.
    fn resolve(&mut self, env: &EvalEnv<'_>, var: VarId) -> Result<(), EvalError> {
        if let Some(writer) = env.solution.writer_of(var) {
            self.maybe_execute(env, writer)?;
        }
        let phase = self.phase;
        if let Some(st) = self.vars.get_mut(&var) {
            st.last_examined = phase;
        }
        Ok(())
    }

    /// Idempotent within a phase: executes `method` if it is new to the
    /// solution this phase, or if any input recorded by its previous
    /// execution actually changed.
    fn maybe_execute(&mut self, env: &EvalEnv<'_>, method: MethodId) -> Result<(), EvalError> {
        let phase = self.phase;
        let st = self.methods.entry(method).or_default();
        if st.last_examined == phase {
            return Ok(());
        }
        st.last_examined = phase;
        let mut run = st.forced == phase;
        if !run {
            let prev_inputs: SmallVec<[VarId; 4]> = st.inputs_used.clone();
            for var in prev_inputs {
                self.resolve(env, var)?;
                if self
                    .vars
                    .get(&var)
                    .is_some_and(|vs| vs.last_changed == phase)
                {
                    run = true;
                    break;
                }
            }
        }
        if run {
            self.execute(env, method)?;
        }
        Ok(())
    }

    /// Executes a method body, staging all output writes before notifying
    /// any dependent. Body failures are contained here.
    fn execute(&mut self, env: &EvalEnv<'_>, method: MethodId) -> Result<(), EvalError> {
        let phase = self.phase;
        self.executed += 1;

        // Rebuild this method's input edges from scratch: stale usedBy
        // edges must not linger across executions.
        let old_inputs = {
            let st = self.methods.entry(method).or_default();
            st.last_executed = phase;
            std::mem::take(&mut st.inputs_used)
        };
        for var in old_inputs {
            if let Some(vs) = self.vars.get_mut(&var) {
                vs.readers.shift_remove(&method);
            }
        }

        let body = env
            .bodies
            .get(&method)
            .cloned()
            .ok_or(EvalError::MissingBody { method })?;
        let result = {
            let mut ctx = ExecCtx {
                eval: self,
                env,
                method,
            };
            body(&mut ctx)
        };
        let outputs = env.cgraph.method(method)?.outputs.clone();

        let emits = match result {
            Ok(out) => {
                if out.len() != outputs.len() {
                    let err = EvalError::OutputArity {
                        method,
                        expected: outputs.len(),
                        got: out.len(),
                    };
                    self.contain_failure(env, method, &outputs, err)?;
                    return Ok(());
                }
                out.into_emits()
            }
            Err(EvalError::InputPending { var }) => {
                // An input is awaiting a deferred result: the outputs go
                // pending and will be recomputed when it settles.
                tracing::debug!(
                    method = method.0,
                    input = var.0,
                    "method pending on deferred input"
                );
                for out in &outputs {
                    let st = self.var_mut(*out)?;
                    st.last_examined = phase;
                    st.health = VarHealth::Pending;
                    self.pending.insert(*out);
                }
                return Ok(());
            }
            Err(err) => {
                self.contain_failure(env, method, &outputs, err)?;
                return Ok(());
            }
        };

        // Stage: write every synchronous output before notifying anyone.
        let mut changed_now: SmallVec<[VarId; 2]> = SmallVec::new();
        let mut deferred_now: SmallVec<[(VarId, crate::ladder::Promise); 1]> = SmallVec::new();
        for (out, emit) in outputs.iter().zip(emits) {
            match emit {
                Emit::Value(value) => match self.write_value(*out, value) {
                    Ok(true) => changed_now.push(*out),
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "output write refused");
                        self.errors.push(e);
                    }
                },
                Emit::Deferred(promise) => deferred_now.push((*out, promise)),
            }
        }
        for (out, promise) in deferred_now {
            let st = self.var_mut(out)?;
            st.last_examined = phase;
            st.health = VarHealth::Pending;
            st.ladder.add_promise(promise);
            self.pending.insert(out);
        }
        for out in changed_now {
            self.notify_readers(env, out)?;
        }
        Ok(())
    }

    /// Marks every output of a failed method as failed with blame and
    /// propagates the error signal downstream.
    fn contain_failure(
        &mut self,
        env: &EvalEnv<'_>,
        method: MethodId,
        outputs: &[VarId],
        err: EvalError,
    ) -> Result<(), EvalError> {
        let phase = self.phase;
        tracing::warn!(method = method.0, error = %err, "method body failed");
        let mut blame = Blame::message(err.to_string());
        if let EvalError::UpstreamFailed { blame: upstream, .. } = &err {
            blame.merge(upstream);
            // The body aborted at the first failed input; fold in every
            // other declared input already failed this phase so the blame
            // names all root causes, not just the one read first.
            if let Ok(rec) = env.cgraph.method(method) {
                for input in &rec.inputs {
                    if let Some(vs) = self.vars.get(&input.var) {
                        if let VarHealth::Failed(b) = &vs.health {
                            blame.merge(b);
                        }
                    }
                }
            }
        }
        for out in outputs {
            let st = self.var_mut(*out)?;
            st.last_examined = phase;
            st.last_changed = phase;
            st.health = VarHealth::Failed(blame.clone());
            st.ladder.add_settled(Outcome::Rejected(blame.clone()));
            self.failed.insert(*out);
        }
        self.errors.push(match err {
            EvalError::Custom { message } => EvalError::MethodFailed { method, message },
            other => other,
        });
        for out in outputs {
            self.notify_readers(env, *out)?;
        }
        Ok(())
    }

    /// Writes a value through the equality predicate. Returns true if the
    /// variable actually changed. A second distinct write in one phase is
    /// refused with `DoubleWrite`.
    fn write_value(&mut self, var: VarId, value: Value) -> Result<bool, EvalError> {
        let phase = self.phase;
        let st = self.var_mut(var)?;
        st.last_examined = phase;
        if (st.eq)(&st.value, &value) {
            if matches!(st.health, VarHealth::Fresh) {
                return Ok(false);
            }
            // Same value, but recovering from pending/failed: propagate so
            // dependents recompute off a healthy input.
            st.health = VarHealth::Fresh;
            st.last_changed = phase;
            st.ladder.add_settled(Outcome::Fulfilled(value));
            self.changed.insert(var);
            return Ok(true);
        }
        if st.last_changed == phase {
            return Err(EvalError::DoubleWrite { var });
        }
        st.value = value.clone();
        st.last_changed = phase;
        st.health = VarHealth::Fresh;
        st.ladder.add_settled(Outcome::Fulfilled(value));
        self.changed.insert(var);
        Ok(true)
    }

    /// Re-triggers every still-selected method whose last execution read
    /// `var`; deselected readers are dropped from the reader set.
    fn notify_readers(&mut self, env: &EvalEnv<'_>, var: VarId) -> Result<(), EvalError> {
        let readers: SmallVec<[MethodId; 4]> = self
            .vars
            .get(&var)
            .map(|st| st.readers.iter().copied().collect())
            .unwrap_or_default();
        for reader in readers {
            if env.solution.is_selected(reader) {
                self.maybe_execute(env, reader)?;
            } else if let Some(st) = self.vars.get_mut(&var) {
                st.readers.shift_remove(&reader);
            }
        }
        Ok(())
    }

    /// A read from inside an executing method body (see [`ExecCtx::get`]).
    pub(crate) fn read(
        &mut self,
        env: &EvalEnv<'_>,
        reader: MethodId,
        var: VarId,
    ) -> Result<Value, EvalError> {
        let phase = self.phase;
        let is_own_output = env.solution.writer_of(var) == Some(reader);
        if is_own_output && env.cgraph.method(reader)?.is_prior_input(var) {
            // Prior self-read: the phase-start value, no recursion, no
            // usedBy edge (it can never demand re-execution).
            let st = self.var_mut(var)?;
            st.last_examined = phase;
            st.self_read = true;
            return Ok(st.value.clone());
        }
        // resolve() recursing into the reader itself is harmless: it was
        // marked examined before its body started.
        self.resolve(env, var)?;
        {
            let st = self.var_mut(var)?;
            st.readers.insert(reader);
        }
        if let Some(mst) = self.methods.get_mut(&reader) {
            if !mst.inputs_used.contains(&var) {
                mst.inputs_used.push(var);
            }
        }
        let st = self.vars.get(&var).ok_or(EvalError::Unregistered { var })?;
        match &st.health {
            VarHealth::Fresh => Ok(st.value.clone()),
            VarHealth::Pending => Err(EvalError::InputPending { var }),
            VarHealth::Failed(blame) => Err(EvalError::UpstreamFailed {
                var,
                blame: blame.clone(),
            }),
        }
    }

    fn var_mut(&mut self, var: VarId) -> Result<&mut VarState, EvalError> {
        self.vars.get_mut(&var).ok_or(EvalError::Unregistered { var })
    }
}
