pub mod cgraph;
pub mod digraph;
pub mod error;
pub mod id;
pub mod strength;
pub mod value;

// Re-export commonly used types
pub use cgraph::{ConstraintGraph, ConstraintRec, MethodInput, MethodRec};
pub use digraph::{Digraph, NodeKind};
pub use error::CoreError;
pub use id::{ConstraintId, MethodId, VarId};
pub use strength::{Strength, StrengthTable};
pub use value::Value;
