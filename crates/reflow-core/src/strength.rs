//! Constraint strength hierarchy.
//!
//! Constraints are either `Required` or `Optional` with a position in one
//! total order, weakest first. The [`StrengthTable`] owns that order and
//! supports the promote/demote operations the planner control surface
//! exposes: edits promote a variable's stay constraint to the strongest
//! optional, defaults sit at the weakest end.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::CoreError;
use crate::id::ConstraintId;

/// Strength of a constraint. `Required` outranks every optional; optionals
/// compare by rank, higher rank = stronger.
///
/// Variant order matters: deriving `Ord` with `Optional` first makes
/// `Required` the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strength {
    /// Position in the optional order; 0 is the weakest.
    Optional(u32),
    Required,
}

impl Strength {
    /// Returns true for `Required`.
    pub fn is_required(&self) -> bool {
        matches!(self, Strength::Required)
    }
}

/// Total order over optional constraints, weakest first.
///
/// Constraints absent from the table are `Required`. The table is small
/// (one entry per optional constraint, including per-variable stays), so
/// positional lookups use linear scans over the order vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrengthTable {
    /// Optional constraints, index 0 = weakest.
    order: Vec<ConstraintId>,
}

impl StrengthTable {
    pub fn new() -> Self {
        StrengthTable::default()
    }

    /// Replaces the whole optional order, weakest to strongest.
    pub fn set_optionals(&mut self, order: Vec<ConstraintId>) {
        self.order = order;
    }

    /// Inserts a constraint at the weakest end. No-op if already present.
    pub fn insert_weakest(&mut self, id: ConstraintId) {
        if !self.order.contains(&id) {
            self.order.insert(0, id);
        }
    }

    /// Moves a constraint to the strongest end of the optional order.
    pub fn set_max_strength(&mut self, id: ConstraintId) -> Result<(), CoreError> {
        let pos = self.position(id)?;
        self.order.remove(pos);
        self.order.push(id);
        Ok(())
    }

    /// Moves a constraint to the weakest end of the optional order.
    pub fn set_min_strength(&mut self, id: ConstraintId) -> Result<(), CoreError> {
        let pos = self.position(id)?;
        self.order.remove(pos);
        self.order.insert(0, id);
        Ok(())
    }

    /// Removes a constraint from the optional order. Removal makes the
    /// constraint `Required` again by absence, so callers remove the
    /// constraint from the graph in the same breath.
    pub fn remove_optional(&mut self, id: ConstraintId) -> Result<(), CoreError> {
        let pos = self.position(id)?;
        self.order.remove(pos);
        Ok(())
    }

    /// Strength of a constraint: its optional rank, or `Required` when it
    /// is not in the optional order.
    pub fn strength_of(&self, id: ConstraintId) -> Strength {
        match self.order.iter().position(|c| *c == id) {
            Some(rank) => Strength::Optional(rank as u32),
            None => Strength::Required,
        }
    }

    /// Compares two constraints by strength.
    pub fn compare(&self, a: ConstraintId, b: ConstraintId) -> Ordering {
        self.strength_of(a).cmp(&self.strength_of(b))
    }

    /// True if `a` is strictly weaker than `b`.
    pub fn weaker(&self, a: ConstraintId, b: ConstraintId) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// The optional order, weakest first.
    pub fn optionals(&self) -> &[ConstraintId] {
        &self.order
    }

    fn position(&self, id: ConstraintId) -> Result<usize, CoreError> {
        self.order
            .iter()
            .position(|c| *c == id)
            .ok_or(CoreError::NotOptional { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(n: u32) -> ConstraintId {
        ConstraintId(n)
    }

    #[test]
    fn required_outranks_all_optionals() {
        assert!(Strength::Required > Strength::Optional(u32::MAX));
        assert!(Strength::Optional(3) > Strength::Optional(0));
    }

    #[test]
    fn absent_constraint_is_required() {
        let table = StrengthTable::new();
        assert_eq!(table.strength_of(c(9)), Strength::Required);
    }

    #[test]
    fn promote_moves_to_strongest() {
        let mut table = StrengthTable::new();
        table.set_optionals(vec![c(1), c(2), c(3)]);
        table.set_max_strength(c(1)).unwrap();
        assert_eq!(table.optionals(), &[c(2), c(3), c(1)]);
        assert!(table.weaker(c(2), c(1)));
    }

    #[test]
    fn demote_moves_to_weakest() {
        let mut table = StrengthTable::new();
        table.set_optionals(vec![c(1), c(2), c(3)]);
        table.set_min_strength(c(3)).unwrap();
        assert_eq!(table.optionals(), &[c(3), c(1), c(2)]);
    }

    #[test]
    fn promote_preserves_relative_order_of_rest() {
        let mut table = StrengthTable::new();
        table.set_optionals(vec![c(1), c(2), c(3), c(4)]);
        table.set_max_strength(c(2)).unwrap();
        assert_eq!(table.optionals(), &[c(1), c(3), c(4), c(2)]);
    }

    #[test]
    fn insert_weakest_is_idempotent() {
        let mut table = StrengthTable::new();
        table.insert_weakest(c(5));
        table.insert_weakest(c(5));
        assert_eq!(table.optionals(), &[c(5)]);
    }

    #[test]
    fn remove_unknown_errors() {
        let mut table = StrengthTable::new();
        assert!(table.remove_optional(c(1)).is_err());
    }
}
