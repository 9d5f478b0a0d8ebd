//! reflow-solver: incremental planner, lazy evaluator, and promise ladder
//! for the reflow multi-way dataflow constraint system.
//!
//! The [`Network`] facade is the usual entry point: declare variables and
//! constraints, queue edits with [`Network::set`], and call
//! [`Network::update`] to re-plan and re-evaluate exactly what changed.

pub mod eval;
pub mod ladder;
pub mod network;
pub mod plan;

pub use eval::{
    Emit, EvalEnv, EvalError, Evaluator, ExecCtx, MethodBody, MethodOutput, UpdateReport,
    VarHealth,
};
pub use ladder::{Blame, Ladder, Outcome, Promise, PromiseId, PromiseState, Subscriber};
pub use network::{Network, SubscriptionId, VarEvent};
pub use plan::{plan, PlanError, PlanOutcome, SolutionGraph};
