//! Single-threaded promises with observer-style subscriptions.
//!
//! The concurrency model is cooperative: a promise is settled by whoever
//! holds a clone of it, and subscriber callbacks run synchronously on the
//! settling call. There is no runtime and no cancellation signal; instead
//! a promise fires its lost-observers hook when the last subscriber goes
//! away while it is still pending, so an external driver may choose to
//! abandon the underlying computation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use reflow_core::Value;
use serde::{Deserialize, Serialize};

use super::blame::Blame;

/// Identity of a promise, used by [`Blame`] to name root causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromiseId(pub u64);

thread_local! {
    static NEXT_PROMISE_ID: Cell<u64> = const { Cell::new(1) };
}

fn fresh_id() -> PromiseId {
    NEXT_PROMISE_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        PromiseId(id)
    })
}

/// Settled result of a promise.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Fulfilled(Value),
    Rejected(Blame),
}

impl Outcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Fulfilled(v) => Some(v),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn blame(&self) -> Option<&Blame> {
        match self {
            Outcome::Rejected(b) => Some(b),
            Outcome::Fulfilled(_) => None,
        }
    }
}

/// Observable state of a promise.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Blame),
}

/// Subscription callbacks. Progress fires zero or more times before the
/// settle callback fires exactly once.
#[derive(Default)]
pub struct Subscriber {
    pub on_progress: Option<Rc<dyn Fn(&Value)>>,
    pub on_settled: Option<Rc<dyn Fn(&Outcome)>>,
}

impl Subscriber {
    pub fn settled(f: impl Fn(&Outcome) + 'static) -> Self {
        Subscriber {
            on_progress: None,
            on_settled: Some(Rc::new(f)),
        }
    }
}

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct PromiseCell {
    id: PromiseId,
    state: PromiseState,
    subscribers: Vec<(Ticket, Subscriber)>,
    next_ticket: u64,
    on_lost_observers: Option<Rc<dyn Fn()>>,
}

/// A clonable handle to one asynchronous result.
#[derive(Clone)]
pub struct Promise {
    cell: Rc<RefCell<PromiseCell>>,
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cell = self.cell.borrow();
        f.debug_struct("Promise")
            .field("id", &cell.id)
            .field("state", &cell.state)
            .field("subscribers", &cell.subscribers.len())
            .finish()
    }
}

impl Promise {
    /// A fresh pending promise.
    pub fn pending() -> Self {
        Promise {
            cell: Rc::new(RefCell::new(PromiseCell {
                id: fresh_id(),
                state: PromiseState::Pending,
                subscribers: Vec::new(),
                next_ticket: 0,
                on_lost_observers: None,
            })),
        }
    }

    /// An already-fulfilled promise.
    pub fn fulfilled(value: Value) -> Self {
        let p = Promise::pending();
        p.resolve(value);
        p
    }

    /// An already-rejected promise.
    pub fn rejected(blame: Blame) -> Self {
        let p = Promise::pending();
        p.reject(blame);
        p
    }

    pub fn id(&self) -> PromiseId {
        self.cell.borrow().id
    }

    pub fn state(&self) -> PromiseState {
        self.cell.borrow().state.clone()
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<Outcome> {
        match &self.cell.borrow().state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(v) => Some(Outcome::Fulfilled(v.clone())),
            PromiseState::Rejected(b) => Some(Outcome::Rejected(b.clone())),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.cell.borrow().state, PromiseState::Pending)
    }

    /// Settles the promise with a value. Later settle calls are ignored.
    pub fn resolve(&self, value: Value) {
        self.settle(Outcome::Fulfilled(value));
    }

    /// Settles the promise with a rejection, attaching this promise to the
    /// blame's culprits if it names none yet.
    pub fn reject(&self, mut blame: Blame) {
        if blame.culprits.is_empty() {
            blame.culprits.push(self.id());
        }
        self.settle(Outcome::Rejected(blame));
    }

    fn settle(&self, outcome: Outcome) {
        let subscribers = {
            let mut cell = self.cell.borrow_mut();
            if !matches!(cell.state, PromiseState::Pending) {
                tracing::debug!(promise = cell.id.0, "settle on settled promise ignored");
                return;
            }
            cell.state = match &outcome {
                Outcome::Fulfilled(v) => PromiseState::Fulfilled(v.clone()),
                Outcome::Rejected(b) => PromiseState::Rejected(b.clone()),
            };
            // Settling completes every subscription.
            std::mem::take(&mut cell.subscribers)
        };
        for (_, sub) in &subscribers {
            if let Some(on_settled) = &sub.on_settled {
                on_settled(&outcome);
            }
        }
    }

    /// Delivers a progress notification to current subscribers. Ignored
    /// once settled.
    pub fn notify(&self, progress: &Value) {
        let callbacks: Vec<Rc<dyn Fn(&Value)>> = {
            let cell = self.cell.borrow();
            if !matches!(cell.state, PromiseState::Pending) {
                return;
            }
            cell.subscribers
                .iter()
                .filter_map(|(_, s)| s.on_progress.clone())
                .collect()
        };
        for cb in callbacks {
            cb(progress);
        }
    }

    /// Subscribes. If the promise is already settled, the settle callback
    /// fires immediately and no subscription is recorded.
    pub fn subscribe(&self, sub: Subscriber) -> Option<Ticket> {
        let outcome = self.outcome();
        if let Some(outcome) = outcome {
            if let Some(on_settled) = &sub.on_settled {
                on_settled(&outcome);
            }
            return None;
        }
        let mut cell = self.cell.borrow_mut();
        let ticket = Ticket(cell.next_ticket);
        cell.next_ticket += 1;
        cell.subscribers.push((ticket, sub));
        Some(ticket)
    }

    /// Removes a subscription. Fires the lost-observers hook if this was
    /// the last subscriber of a still-pending promise.
    pub fn unsubscribe(&self, ticket: Ticket) {
        let hook = {
            let mut cell = self.cell.borrow_mut();
            cell.subscribers.retain(|(t, _)| *t != ticket);
            if cell.subscribers.is_empty() && matches!(cell.state, PromiseState::Pending) {
                cell.on_lost_observers.clone()
            } else {
                None
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn observer_count(&self) -> usize {
        self.cell.borrow().subscribers.len()
    }

    /// Installs the hook fired when the last observer of a pending promise
    /// unsubscribes.
    pub fn on_lost_observers(&self, hook: impl Fn() + 'static) {
        self.cell.borrow_mut().on_lost_observers = Some(Rc::new(hook));
    }
}
