//! Evaluation error types.
//!
//! Every variant carries the id of the method or variable involved, so a
//! failure can be reported against the right part of the network. Method
//! body failures are contained per method and never abort the phase.

use reflow_core::{CoreError, MethodId, VarId};
use thiserror::Error;

use crate::ladder::Blame;

/// Errors produced during an evaluation phase.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A method body reported failure.
    #[error("method {method} failed: {message}")]
    MethodFailed { method: MethodId, message: String },

    /// A body-level failure raised from inside a method, before the
    /// evaluator attaches the method id.
    #[error("{message}")]
    Custom { message: String },

    /// An input variable's value is still pending on a deferred result.
    #[error("input variable {var} is pending")]
    InputPending { var: VarId },

    /// An input variable's writer failed; the blame names the root cause.
    #[error("input variable {var} failed upstream: {blame}")]
    UpstreamFailed { var: VarId, blame: Blame },

    /// A body returned a different number of outputs than the method
    /// declares.
    #[error("method {method} returned {got} output(s), expected {expected}")]
    OutputArity {
        method: MethodId,
        expected: usize,
        got: usize,
    },

    /// A second distinct write to one variable within a single phase.
    /// A modeling error: reported, and the second write refused.
    #[error("second distinct write to variable {var} in one phase")]
    DoubleWrite { var: VarId },

    /// The evaluator has no state for a variable the solution references.
    #[error("variable {var} is not registered with the evaluator")]
    Unregistered { var: VarId },

    /// No body is registered for a selected method.
    #[error("method {method} has no body")]
    MissingBody { method: MethodId },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EvalError {
    /// Convenience for body code: a plain failure message.
    pub fn fail(message: impl Into<String>) -> Self {
        EvalError::Custom {
            message: message.into(),
        }
    }
}
