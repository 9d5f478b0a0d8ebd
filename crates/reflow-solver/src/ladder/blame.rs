//! Blame records for rejected results.
//!
//! A rejection names the promise(s) at the root of the failure, so a
//! consumer can tell "my direct dependency failed" from "an unrelated
//! sibling failed" and still use values whose true dependencies succeeded.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use super::promise::PromiseId;

/// Root-cause record carried by a rejected promise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    /// Promises at the root of the failure, in discovery order.
    pub culprits: SmallVec<[PromiseId; 2]>,
    pub message: String,
}

impl Blame {
    /// Blame originating at a single promise.
    pub fn new(culprit: PromiseId, message: impl Into<String>) -> Self {
        Blame {
            culprits: smallvec::smallvec![culprit],
            message: message.into(),
        }
    }

    /// Blame with no identified promise yet; culprits are attached as the
    /// rejection is recorded on a ladder slot.
    pub fn message(message: impl Into<String>) -> Self {
        Blame {
            culprits: SmallVec::new(),
            message: message.into(),
        }
    }

    /// Absorbs another blame's culprits, keeping this message.
    pub fn merge(&mut self, other: &Blame) {
        for culprit in &other.culprits {
            if !self.culprits.contains(culprit) {
                self.culprits.push(*culprit);
            }
        }
    }

    /// True if `id` is among the root causes.
    pub fn implicates(&self, id: PromiseId) -> bool {
        self.culprits.contains(&id)
    }
}

impl fmt::Display for Blame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.culprits.is_empty() {
            write!(f, " (culprits:")?;
            for c in &self.culprits {
                write!(f, " {}", c.0)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_dedups_culprits() {
        let mut a = Blame::new(PromiseId(1), "left input failed");
        let b = Blame::new(PromiseId(1), "right input failed");
        let c = Blame::new(PromiseId(2), "right input failed");
        a.merge(&b);
        a.merge(&c);
        assert_eq!(a.culprits.as_slice(), &[PromiseId(1), PromiseId(2)]);
        assert!(a.implicates(PromiseId(2)));
        assert!(!a.implicates(PromiseId(3)));
    }

    #[test]
    fn display_lists_culprits() {
        let mut b = Blame::new(PromiseId(4), "boom");
        b.merge(&Blame::new(PromiseId(7), ""));
        assert_eq!(b.to_string(), "boom (culprits: 4 7)");
    }
}
