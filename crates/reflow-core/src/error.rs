//! Core error types for reflow-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! all anticipated failure modes in the constraint-graph data model.

use crate::id::{ConstraintId, MethodId, VarId};
use thiserror::Error;

/// Core errors produced by the reflow-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A variable id was not found in the graph.
    #[error("variable not found: VarId({id})", id = id.0)]
    VariableNotFound { id: VarId },

    /// A method id was not found in the graph.
    #[error("method not found: MethodId({id})", id = id.0)]
    MethodNotFound { id: MethodId },

    /// A constraint id was not found in the graph.
    #[error("constraint not found: ConstraintId({id})", id = id.0)]
    ConstraintNotFound { id: ConstraintId },

    /// A method declared the same output variable more than once.
    #[error("malformed method: duplicate output variable {var} (constraint {constraint})")]
    DuplicateOutput {
        constraint: ConstraintId,
        var: VarId,
    },

    /// A non-prior input also appears among the method's outputs. Only
    /// inputs flagged "prior" may legally alias an output.
    #[error("malformed method: non-prior input {var} is also an output (constraint {constraint})")]
    OutputAsInput {
        constraint: ConstraintId,
        var: VarId,
    },

    /// A method declared no outputs; such a method can never determine
    /// anything and cannot participate in planning.
    #[error("malformed method: no outputs (constraint {constraint})")]
    NoOutputs { constraint: ConstraintId },

    /// Attempted to remove a variable while methods still reference it.
    #[error("variable {id} still referenced by {count} method(s)")]
    VariableInUse { id: VarId, count: usize },

    /// An optional constraint id was not present in the strength order.
    #[error("constraint {id} is not in the optional strength order")]
    NotOptional { id: ConstraintId },
}
