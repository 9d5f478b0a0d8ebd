//! The execution context threaded through method bodies.
//!
//! There is no ambient "currently executing method": a body receives an
//! [`ExecCtx`] naming itself, pulls inputs through [`ExecCtx::get`] (which
//! lazily resolves upstream methods and records this phase's usedBy
//! edges), and returns its outputs positionally.

use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;

use reflow_core::{ConstraintGraph, MethodId, Value, VarId};

use super::error::EvalError;
use super::Evaluator;
use crate::ladder::Promise;
use crate::plan::SolutionGraph;

/// One positional output of a method body.
#[derive(Debug, Clone)]
pub enum Emit {
    /// A value available now.
    Value(Value),
    /// A result that settles later; the evaluator records it on the
    /// output variable's ladder and moves on without blocking.
    Deferred(Promise),
}

/// Positional outputs of one method execution. The count must match the
/// method's declared outputs.
#[derive(Debug, Clone, Default)]
pub struct MethodOutput {
    emits: SmallVec<[Emit; 2]>,
}

impl MethodOutput {
    pub fn new() -> Self {
        MethodOutput::default()
    }

    /// A single immediate value (the common single-output case).
    pub fn single(value: Value) -> Self {
        let mut out = MethodOutput::new();
        out.push_value(value);
        out
    }

    /// A single deferred result.
    pub fn deferred(promise: Promise) -> Self {
        let mut out = MethodOutput::new();
        out.push_deferred(promise);
        out
    }

    /// Immediate values in output order.
    pub fn values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut out = MethodOutput::new();
        for v in values {
            out.push_value(v);
        }
        out
    }

    pub fn push_value(&mut self, value: Value) {
        self.emits.push(Emit::Value(value));
    }

    pub fn push_deferred(&mut self, promise: Promise) {
        self.emits.push(Emit::Deferred(promise));
    }

    pub fn len(&self) -> usize {
        self.emits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emits.is_empty()
    }

    pub(crate) fn into_emits(self) -> SmallVec<[Emit; 2]> {
        self.emits
    }
}

/// A method's computation body.
pub type MethodBody = Rc<dyn Fn(&mut ExecCtx<'_, '_>) -> Result<MethodOutput, EvalError>>;

/// Read-only references the evaluator needs for one phase.
pub struct EvalEnv<'a> {
    pub cgraph: &'a ConstraintGraph,
    pub solution: &'a SolutionGraph,
    pub bodies: &'a HashMap<MethodId, MethodBody>,
    /// Stay methods by id, mapped to the variable each one keeps. A
    /// variable written by its own stay method still counts as a source.
    pub stay_writer: &'a HashMap<MethodId, VarId>,
}

/// Context handed to an executing method body.
pub struct ExecCtx<'e, 'a> {
    pub(crate) eval: &'e mut Evaluator,
    pub(crate) env: &'e EvalEnv<'a>,
    pub(crate) method: MethodId,
}

impl ExecCtx<'_, '_> {
    /// The id of the executing method.
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Reads a variable.
    ///
    /// If this method is `var`'s own writer and declares it as a prior
    /// input, the value as of the start of this phase is returned without
    /// recursing (writes are staged until a body completes, so the current
    /// value is exactly the phase-start value). Otherwise the variable is
    /// lazily resolved -- its writer is executed first if stale -- and the
    /// read is recorded as this phase's input/usedBy edge.
    pub fn get(&mut self, var: VarId) -> Result<Value, EvalError> {
        self.eval.read(self.env, self.method, var)
    }

    /// Reads a variable, widening to `f64`; `Err` if not numeric.
    pub fn get_float(&mut self, var: VarId) -> Result<f64, EvalError> {
        let value = self.get(var)?;
        value
            .as_float()
            .ok_or_else(|| EvalError::fail(format!("variable {var} is not numeric: {value}")))
    }

    /// Reads a variable as `i64`; `Err` if not an integer.
    pub fn get_int(&mut self, var: VarId) -> Result<i64, EvalError> {
        let value = self.get(var)?;
        value
            .as_int()
            .ok_or_else(|| EvalError::fail(format!("variable {var} is not an integer: {value}")))
    }
}
