//! The promise ladder: one authoritative value per variable.
//!
//! A ladder collapses a time-ordered, possibly out-of-order sequence of
//! results for one variable into a single current value. Each new result
//! occupies a slot above the previous ones; the authoritative value is the
//! outcome of the highest settled slot. Once a later slot settles, every
//! earlier still-pending slot becomes irrelevant to the visible value --
//! such slots are still allowed to settle (their promises resolve for any
//! caller awaiting them) but are dropped from the ladder and never regress
//! what the ladder reports.
//!
//! Invariant: the bottom-most retained slot (the floor) is always settled.

mod blame;
mod promise;

pub use blame::Blame;
pub use promise::{Outcome, Promise, PromiseId, PromiseState, Subscriber, Ticket};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use reflow_core::Value;

struct Slot {
    promise: Promise,
    watcher: Option<Ticket>,
}

struct LadderInner {
    slots: VecDeque<Slot>,
    /// Absolute index of `slots[0]`.
    base: u64,
    /// Absolute index of the authoritative (highest settled) slot.
    high: u64,
    /// Cached outcome of the authoritative slot.
    current: Outcome,
    /// Fired when an asynchronous settlement advances the authoritative
    /// value; the network uses it to queue repropagation.
    settle_hook: Option<Rc<dyn Fn()>>,
}

/// Clonable handle to one variable's ladder.
#[derive(Clone)]
pub struct Ladder {
    inner: Rc<RefCell<LadderInner>>,
}

impl Ladder {
    /// A ladder whose floor is a fulfilled slot holding `initial`.
    pub fn new(initial: Value) -> Self {
        let floor = Slot {
            promise: Promise::fulfilled(initial.clone()),
            watcher: None,
        };
        Ladder {
            inner: Rc::new(RefCell::new(LadderInner {
                slots: VecDeque::from([floor]),
                base: 0,
                high: 0,
                current: Outcome::Fulfilled(initial),
                settle_hook: None,
            })),
        }
    }

    /// Installs the asynchronous-settlement hook.
    pub fn on_settle(&self, hook: impl Fn() + 'static) {
        self.inner.borrow_mut().settle_hook = Some(Rc::new(hook));
    }

    /// The authoritative outcome.
    pub fn current(&self) -> Outcome {
        self.inner.borrow().current.clone()
    }

    /// The authoritative value, if the current outcome is fulfilled.
    pub fn current_value(&self) -> Option<Value> {
        match self.current() {
            Outcome::Fulfilled(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    /// Appends an already-settled result (the synchronous write path).
    /// Advances the authoritative value without firing the settle hook;
    /// the evaluator is already propagating this change.
    pub fn add_settled(&self, outcome: Outcome) {
        let mut inner = self.inner.borrow_mut();
        let abs = inner.base + inner.slots.len() as u64;
        let promise = match &outcome {
            Outcome::Fulfilled(v) => Promise::fulfilled(v.clone()),
            Outcome::Rejected(b) => Promise::rejected(b.clone()),
        };
        inner.slots.push_back(Slot {
            promise,
            watcher: None,
        });
        inner.high = abs;
        inner.current = outcome;
        Self::collect(&mut inner);
    }

    /// Appends a possibly-pending result. When the promise settles, the
    /// ladder advances only if no later slot has settled first, and fires
    /// the settle hook so the owner can repropagate.
    pub fn add_promise(&self, promise: Promise) -> u64 {
        let abs = {
            let mut inner = self.inner.borrow_mut();
            let abs = inner.base + inner.slots.len() as u64;
            inner.slots.push_back(Slot {
                promise: promise.clone(),
                watcher: None,
            });
            abs
        };
        let weak: Weak<RefCell<LadderInner>> = Rc::downgrade(&self.inner);
        let ticket = promise.subscribe(Subscriber::settled(move |outcome| {
            if let Some(inner) = weak.upgrade() {
                Self::slot_settled(&inner, abs, outcome);
            }
        }));
        if let Some(ticket) = ticket {
            let mut inner = self.inner.borrow_mut();
            if let Some(slot) = Self::slot_at(&mut inner, abs) {
                slot.watcher = Some(ticket);
            }
        }
        abs
    }

    /// A promise for a downstream consumer, requested against the top of
    /// the ladder. See [`Ladder::forward_from`].
    pub fn forward(&self) -> Promise {
        let top = {
            let inner = self.inner.borrow();
            inner.base + inner.slots.len() as u64 - 1
        };
        self.forward_from(top)
    }

    /// A promise for a downstream consumer, requested against slot
    /// `point` (as returned by [`Ladder::add_promise`]). A settled request
    /// point resolves the consumer promise immediately with its outcome;
    /// a point already collected resolves with the authoritative outcome
    /// that superseded it. A still-pending request point stays linked to
    /// its slot: progress notifications pass through, and the consumer
    /// promise settles with the slot's own eventual outcome even if a
    /// later slot supersedes it in the meantime.
    pub fn forward_from(&self, point: u64) -> Promise {
        let fwd = Promise::pending();
        let (ready, chain) = {
            let inner = self.inner.borrow();
            let top = inner.base + inner.slots.len() as u64 - 1;
            let point = point.min(top);
            if point < inner.base {
                (Some(inner.current.clone()), None)
            } else {
                let slot = &inner.slots[(point - inner.base) as usize];
                match slot.promise.outcome() {
                    Some(outcome) => (Some(outcome), None),
                    None => (None, Some(slot.promise.clone())),
                }
            }
        };
        if let Some(outcome) = ready {
            match outcome {
                Outcome::Fulfilled(v) => fwd.resolve(v),
                Outcome::Rejected(b) => fwd.reject(b),
            }
        } else if let Some(source) = chain {
            let progress_fwd = fwd.clone();
            let settle_fwd = fwd.clone();
            source.subscribe(Subscriber {
                on_progress: Some(Rc::new(move |v: &Value| progress_fwd.notify(v))),
                on_settled: Some(Rc::new(move |o: &Outcome| match o {
                    Outcome::Fulfilled(v) => settle_fwd.resolve(v.clone()),
                    Outcome::Rejected(b) => settle_fwd.reject(b.clone()),
                })),
            });
        }
        fwd
    }

    /// Number of retained slots (floor included).
    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_at<'a>(inner: &'a mut LadderInner, abs: u64) -> Option<&'a mut Slot> {
        let base = inner.base;
        abs.checked_sub(base)
            .and_then(|rel| inner.slots.get_mut(rel as usize))
    }

    fn slot_settled(inner: &Rc<RefCell<LadderInner>>, abs: u64, outcome: &Outcome) {
        let hook = {
            let mut inner = inner.borrow_mut();
            if abs <= inner.high {
                // Superseded: a later slot already settled. The promise
                // itself stays resolved for its other subscribers.
                return;
            }
            inner.high = abs;
            inner.current = outcome.clone();
            Self::collect(&mut inner);
            inner.settle_hook.clone()
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Drops every slot below the authoritative one. Dropped pending slots
    /// lose the ladder's subscription, which fires their lost-observers
    /// hook if nobody else is watching.
    fn collect(inner: &mut LadderInner) {
        while inner.base < inner.high {
            if let Some(slot) = inner.slots.pop_front() {
                if let Some(ticket) = slot.watcher {
                    slot.promise.unsubscribe(ticket);
                }
            }
            inner.base += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn synchronous_writes_advance_current() {
        let ladder = Ladder::new(Value::Int(0));
        ladder.add_settled(Outcome::Fulfilled(Value::Int(1)));
        ladder.add_settled(Outcome::Fulfilled(Value::Int(2)));
        assert_eq!(ladder.current_value(), Some(Value::Int(2)));
        // Superseded slots are collected; only the floor remains.
        assert_eq!(ladder.len(), 1);
    }

    #[test]
    fn out_of_order_settlement_never_regresses() {
        let ladder = Ladder::new(Value::Str("init".into()));
        ladder.add_settled(Outcome::Fulfilled(Value::Str("B".into())));
        let pending = Promise::pending();
        ladder.add_promise(pending.clone());
        let newer = Promise::pending();
        ladder.add_promise(newer.clone());
        newer.resolve(Value::Str("A".into()));
        assert_eq!(ladder.current_value(), Some(Value::Str("A".into())));

        // The older promise settles afterwards: still resolved for its own
        // subscribers, but the visible value does not change.
        pending.resolve(Value::Str("stale".into()));
        assert_eq!(ladder.current_value(), Some(Value::Str("A".into())));
    }

    #[test]
    fn settle_hook_fires_only_for_authoritative_settlements() {
        let ladder = Ladder::new(Value::Int(0));
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        ladder.on_settle(move || fired2.set(fired2.get() + 1));

        let older = Promise::pending();
        let newer = Promise::pending();
        ladder.add_promise(older.clone());
        ladder.add_promise(newer.clone());
        newer.resolve(Value::Int(2));
        assert_eq!(fired.get(), 1);
        older.resolve(Value::Int(1));
        assert_eq!(fired.get(), 1);
        assert_eq!(ladder.current_value(), Some(Value::Int(2)));
    }

    #[test]
    fn rejection_becomes_current_with_blame() {
        let ladder = Ladder::new(Value::Int(0));
        let p = Promise::pending();
        ladder.add_promise(p.clone());
        p.reject(Blame::message("deferred computation failed"));
        match ladder.current() {
            Outcome::Rejected(blame) => assert!(blame.implicates(p.id())),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ladder.current_value(), None);
    }

    #[test]
    fn forward_from_settled_point_resolves_immediately() {
        let ladder = Ladder::new(Value::Int(7));
        ladder.add_settled(Outcome::Fulfilled(Value::Int(9)));
        let fwd = ladder.forward();
        assert_eq!(fwd.state(), PromiseState::Fulfilled(Value::Int(9)));
    }

    #[test]
    fn forward_from_pending_slot_relays_progress_then_settles() {
        let ladder = Ladder::new(Value::Int(0));
        let p = Promise::pending();
        let slot = ladder.add_promise(p.clone());
        let fwd = ladder.forward_from(slot);
        assert_eq!(fwd.state(), PromiseState::Pending);

        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        fwd.subscribe(Subscriber {
            on_progress: Some(Rc::new(move |v: &Value| seen2.borrow_mut().push(v.clone()))),
            on_settled: None,
        });
        p.notify(&Value::Int(40));
        p.notify(&Value::Int(80));
        p.resolve(Value::Int(100));
        assert_eq!(seen.borrow().as_slice(), &[Value::Int(40), Value::Int(80)]);
        assert_eq!(fwd.state(), PromiseState::Fulfilled(Value::Int(100)));
    }

    #[test]
    fn forward_from_superseded_point_keeps_the_requested_outcome() {
        let ladder = Ladder::new(Value::Int(0));
        let slow = Promise::pending();
        let slot = ladder.add_promise(slow.clone());
        let fwd = ladder.forward_from(slot);
        // A later slot settles first: the ladder moves on, but this
        // consumer asked for the requested slot's own result.
        ladder.add_settled(Outcome::Fulfilled(Value::Int(9)));
        assert_eq!(ladder.current_value(), Some(Value::Int(9)));
        assert_eq!(fwd.state(), PromiseState::Pending);
        slow.resolve(Value::Int(1));
        assert_eq!(fwd.state(), PromiseState::Fulfilled(Value::Int(1)));
        assert_eq!(ladder.current_value(), Some(Value::Int(9)));
    }

    #[test]
    fn forward_from_collected_point_gets_the_superseding_outcome() {
        let ladder = Ladder::new(Value::Int(0));
        ladder.add_settled(Outcome::Fulfilled(Value::Int(5)));
        // Slot 0 was collected when slot 1 settled.
        let fwd = ladder.forward_from(0);
        assert_eq!(fwd.state(), PromiseState::Fulfilled(Value::Int(5)));
    }

    #[test]
    fn forward_target_keeps_a_collected_slot_observed() {
        let ladder = Ladder::new(Value::Int(0));
        let stale = Promise::pending();
        let lost = Rc::new(Cell::new(false));
        let lost2 = lost.clone();
        stale.on_lost_observers(move || lost2.set(true));
        let slot = ladder.add_promise(stale.clone());
        let _fwd = ladder.forward_from(slot);
        ladder.add_settled(Outcome::Fulfilled(Value::Int(1)));
        // The ladder dropped its watcher, but the forward still observes.
        assert!(!lost.get());
    }

    #[test]
    fn collected_pending_slot_fires_lost_observers() {
        let ladder = Ladder::new(Value::Int(0));
        let stale = Promise::pending();
        let lost = Rc::new(Cell::new(false));
        let lost2 = lost.clone();
        stale.on_lost_observers(move || lost2.set(true));
        ladder.add_promise(stale);
        ladder.add_settled(Outcome::Fulfilled(Value::Int(1)));
        // The pending slot was superseded and dropped; the driver is told
        // nobody is watching anymore.
        assert!(lost.get());
    }
}
