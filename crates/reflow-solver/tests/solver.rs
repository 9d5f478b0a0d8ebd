//! End-to-end behavior of the planner, evaluator, and ladder through the
//! `Network` facade.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;

use reflow_core::{MethodInput, Value, VarId};
use reflow_solver::{Ladder, MethodOutput, Network, Outcome, Promise, VarEvent, VarHealth};

fn int(v: i64) -> Value {
    Value::Int(v)
}

fn s(v: &str) -> Value {
    Value::Str(v.to_string())
}

/// The three-way constraint x + y = z with all of its methods, declared
/// sum first.
fn plus(net: &mut Network, x: VarId, y: VarId, z: VarId) {
    let c = net.add_constraint();
    net.add_method(
        c,
        &[MethodInput::new(x), MethodInput::new(y)],
        &[z],
        Rc::new(move |ctx| Ok(MethodOutput::single(int(ctx.get_int(x)? + ctx.get_int(y)?)))),
    )
    .unwrap();
    net.add_method(
        c,
        &[MethodInput::new(z), MethodInput::new(x)],
        &[y],
        Rc::new(move |ctx| Ok(MethodOutput::single(int(ctx.get_int(z)? - ctx.get_int(x)?)))),
    )
    .unwrap();
    net.add_method(
        c,
        &[MethodInput::new(z), MethodInput::new(y)],
        &[x],
        Rc::new(move |ctx| Ok(MethodOutput::single(int(ctx.get_int(z)? - ctx.get_int(y)?)))),
    )
    .unwrap();
}

#[test]
fn second_update_executes_nothing() {
    let mut net = Network::new();
    let x = net.add_variable(int(1)).unwrap();
    let y = net.add_variable(int(2)).unwrap();
    let z = net.add_variable(int(0)).unwrap();
    plus(&mut net, x, y, z);
    net.update().unwrap();
    assert_eq!(net.value(z), Some(&int(3)));

    let report = net.update().unwrap();
    assert_eq!(report.executed, 0);
    assert!(report.changed.is_empty());
}

#[test]
fn exactly_once_across_multiple_paths() {
    // a feeds b and c independently; d reads both, so d is reachable from
    // a along two paths.
    let mut net = Network::new();
    let a = net.add_variable(int(1)).unwrap();
    let b = net.add_variable(int(0)).unwrap();
    let c = net.add_variable(int(0)).unwrap();
    let d = net.add_variable(int(0)).unwrap();

    let counts: Rc<RefCell<[usize; 3]>> = Rc::new(RefCell::new([0; 3]));
    let mk = |net: &mut Network, slot: usize, input: VarId, output: VarId, f: fn(i64) -> i64| {
        let counts = Rc::clone(&counts);
        let cid = net.add_constraint();
        net.add_method(
            cid,
            &[MethodInput::new(input)],
            &[output],
            Rc::new(move |ctx| {
                counts.borrow_mut()[slot] += 1;
                Ok(MethodOutput::single(int(f(ctx.get_int(input)?))))
            }),
        )
        .unwrap();
    };
    mk(&mut net, 0, a, b, |v| v + 1);
    mk(&mut net, 1, a, c, |v| v * 10);
    let counts2 = Rc::clone(&counts);
    let cid = net.add_constraint();
    net.add_method(
        cid,
        &[MethodInput::new(b), MethodInput::new(c)],
        &[d],
        Rc::new(move |ctx| {
            counts2.borrow_mut()[2] += 1;
            Ok(MethodOutput::single(int(
                ctx.get_int(b)? + ctx.get_int(c)?,
            )))
        }),
    )
    .unwrap();

    net.update().unwrap();
    assert_eq!(*counts.borrow(), [1, 1, 1]);
    assert_eq!(net.value(d), Some(&int(12)));

    net.set(a, int(5)).unwrap();
    let report = net.update().unwrap();
    assert_eq!(report.executed, 3);
    assert_eq!(*counts.borrow(), [2, 2, 2]);
    assert_eq!(net.value(d), Some(&int(56)));
}

#[test]
fn diamond_outputs_are_never_torn() {
    // One method writes two variables; the consumer sums them with a
    // sign flip, so any mix of old and new values shows up as nonzero.
    let mut net = Network::new();
    let src = net.add_variable(int(1)).unwrap();
    let pos = net.add_variable(int(0)).unwrap();
    let neg = net.add_variable(int(0)).unwrap();
    let sum = net.add_variable(int(0)).unwrap();

    let c1 = net.add_constraint();
    net.add_method(
        c1,
        &[MethodInput::new(src)],
        &[pos, neg],
        Rc::new(move |ctx| {
            let v = ctx.get_int(src)?;
            Ok(MethodOutput::values([int(v), int(-v)]))
        }),
    )
    .unwrap();
    let c2 = net.add_constraint();
    net.add_method(
        c2,
        &[MethodInput::new(pos), MethodInput::new(neg)],
        &[sum],
        Rc::new(move |ctx| Ok(MethodOutput::single(int(ctx.get_int(pos)? + ctx.get_int(neg)?)))),
    )
    .unwrap();

    net.update().unwrap();
    for edit in [3, -8, 1000, 0] {
        net.set(src, int(edit)).unwrap();
        net.update().unwrap();
        assert_eq!(net.value(sum), Some(&int(0)));
    }
}

#[test]
fn prior_self_input_terminates_and_accumulates() {
    let mut net = Network::new();
    let step = net.add_variable(int(0)).unwrap();
    let total = net.add_variable(int(0)).unwrap();
    let c = net.add_constraint();
    net.add_method(
        c,
        &[MethodInput::new(step), MethodInput::prior(total)],
        &[total],
        Rc::new(move |ctx| {
            Ok(MethodOutput::single(int(
                ctx.get_int(total)? + ctx.get_int(step)?,
            )))
        }),
    )
    .unwrap();
    net.update().unwrap();
    assert_eq!(net.value(total), Some(&int(0)));

    for (edit, expect) in [(3, 3), (4, 7), (4, 7), (10, 17)] {
        net.set(step, int(edit)).unwrap();
        net.update().unwrap();
        assert_eq!(net.value(total), Some(&int(expect)), "after step {edit}");
    }
}

#[test]
fn required_retracts_weakest_stay_first() {
    let mut net = Network::new();
    let a = net.add_variable(int(0)).unwrap();
    let b = net.add_variable(int(0)).unwrap();
    // Stays are prepended weakest-first as variables are added, so b's
    // stay is currently the weakest.
    let c = net.add_constraint();
    net.add_method(
        c,
        &[MethodInput::new(b)],
        &[a],
        Rc::new(move |ctx| Ok(MethodOutput::single(ctx.get(b)?))),
    )
    .unwrap();
    net.add_method(
        c,
        &[MethodInput::new(a)],
        &[b],
        Rc::new(move |ctx| Ok(MethodOutput::single(ctx.get(a)?))),
    )
    .unwrap();
    net.update().unwrap();
    assert!(net.solution().writer_of(b).is_some());
    assert_ne!(
        net.solution().writer_of(b),
        net.solution().writer_of(a),
        "only one side of the constraint may be computed"
    );
    // b lost its stay, a kept its own.
    assert!(net.cgraph().has_variable(a));
    let b_written_by_constraint = net
        .cgraph()
        .constraint(c)
        .unwrap()
        .methods
        .iter()
        .any(|m| net.solution().writer_of(b) == Some(*m));
    assert!(b_written_by_constraint);

    // Editing b promotes its stay past a's; the constraint flips.
    net.set(b, int(9)).unwrap();
    net.update().unwrap();
    let a_written_by_constraint = net
        .cgraph()
        .constraint(c)
        .unwrap()
        .methods
        .iter()
        .any(|m| net.solution().writer_of(a) == Some(*m));
    assert!(a_written_by_constraint);
    assert_eq!(net.value(a), Some(&int(9)));
    assert_eq!(net.value(b), Some(&int(9)));
}

#[test]
fn sum_scenario_edit_outranks_oldest_stay() {
    let mut net = Network::new();
    let x = net.add_variable(int(0)).unwrap();
    let y = net.add_variable(int(0)).unwrap();
    let z = net.add_variable(int(0)).unwrap();
    plus(&mut net, x, y, z);

    net.set(x, int(3)).unwrap();
    net.update().unwrap();
    net.set(y, int(4)).unwrap();
    net.update().unwrap();
    assert_eq!(net.value(z), Some(&int(7)));

    // x was edited least recently, so its stay is the weakest of the two
    // inputs; editing z sacrifices x, not y.
    net.set(z, int(10)).unwrap();
    net.update().unwrap();
    assert_eq!(net.value(z), Some(&int(10)));
    assert_eq!(net.value(y), Some(&int(4)));
    assert_eq!(net.value(x), Some(&int(6)));
    assert!(net.solution().verify_acyclic(net.cgraph()));
}

#[test]
fn failing_method_surfaces_error_not_stale_success() {
    let mut net = Network::new();
    let num = net.add_variable(int(12)).unwrap();
    let den = net.add_variable(int(3)).unwrap();
    let quot = net.add_variable(int(0)).unwrap();
    let c = net.add_constraint();
    net.add_method(
        c,
        &[MethodInput::new(num), MethodInput::new(den)],
        &[quot],
        Rc::new(move |ctx| {
            let d = ctx.get_int(den)?;
            if d == 0 {
                return Err(reflow_solver::eval::EvalError::fail("division by zero"));
            }
            Ok(MethodOutput::single(int(ctx.get_int(num)? / d)))
        }),
    )
    .unwrap();
    net.update().unwrap();
    assert_eq!(net.value(quot), Some(&int(4)));

    let events: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
    let events2 = events.clone();
    net.subscribe(quot, move |ev| {
        events2.borrow_mut().push(matches!(ev, VarEvent::Error(_)));
    });

    net.set(den, int(0)).unwrap();
    let report = net.update().unwrap();
    assert!(matches!(net.health(quot), Some(VarHealth::Failed(_))));
    assert!(report.failed.contains(&quot));
    assert_eq!(events.borrow().as_slice(), &[true]);

    // Recovery: a good denominator clears the failure.
    net.set(den, int(6)).unwrap();
    net.update().unwrap();
    assert_eq!(net.health(quot), Some(&VarHealth::Fresh));
    assert_eq!(net.value(quot), Some(&int(2)));
}

#[test]
fn ladder_later_settlement_wins_and_never_reverts() {
    let ladder = Ladder::new(s("init"));
    let p1 = Promise::pending();
    let p2 = Promise::pending();
    let p3 = Promise::pending();
    ladder.add_promise(p1.clone());
    ladder.add_promise(p2.clone());
    ladder.add_promise(p3.clone());

    p3.resolve(s("third"));
    assert_eq!(ladder.current_value(), Some(s("third")));

    // Earlier slots settling afterwards changes nothing.
    p1.resolve(s("first"));
    p2.resolve(s("second"));
    assert_eq!(ladder.current_value(), Some(s("third")));
}

#[test]
fn ladder_pending_slot_between_settlements() {
    let ladder = Ladder::new(s("init"));
    let b = Promise::fulfilled(s("B"));
    ladder.add_promise(b);
    assert_eq!(ladder.current_value(), Some(s("B")));

    let middle = Promise::pending();
    ladder.add_promise(middle.clone());
    assert_eq!(ladder.current_value(), Some(s("B")));

    let a = Promise::fulfilled(s("A"));
    ladder.add_promise(a);
    assert_eq!(ladder.current_value(), Some(s("A")));

    middle.resolve(s("superseded"));
    assert_eq!(ladder.current_value(), Some(s("A")));
    assert!(matches!(ladder.current(), Outcome::Fulfilled(_)));
}

#[test]
fn deferred_failure_chains_blame_downstream() {
    let mut net = Network::new();
    let a = net.add_variable(int(1)).unwrap();
    let mid = net.add_variable(int(0)).unwrap();
    let end = net.add_variable(int(0)).unwrap();

    let handle: Rc<RefCell<Option<Promise>>> = Rc::new(RefCell::new(None));
    let handle2 = handle.clone();
    let c1 = net.add_constraint();
    net.add_method(
        c1,
        &[MethodInput::new(a)],
        &[mid],
        Rc::new(move |ctx| {
            ctx.get(a)?;
            let p = Promise::pending();
            *handle2.borrow_mut() = Some(p.clone());
            Ok(MethodOutput::deferred(p))
        }),
    )
    .unwrap();
    let c2 = net.add_constraint();
    net.add_method(
        c2,
        &[MethodInput::new(mid)],
        &[end],
        Rc::new(move |ctx| Ok(MethodOutput::single(ctx.get(mid)?))),
    )
    .unwrap();

    net.update().unwrap();
    assert_eq!(net.health(mid), Some(&VarHealth::Pending));

    let p = handle.borrow().clone().unwrap();
    let culprit = p.id();
    p.reject(reflow_solver::Blame::message("remote fetch failed"));
    net.update().unwrap();

    match (net.health(mid), net.health(end)) {
        (Some(VarHealth::Failed(root)), Some(VarHealth::Failed(chained))) => {
            assert!(root.implicates(culprit));
            assert!(chained.implicates(culprit));
        }
        other => panic!("expected both failed, got {other:?}"),
    }
}

proptest! {
    /// A linear chain v0 -> v1 -> ... -> vN stays consistent under edits
    /// to its head, every plan is acyclic, and a quiet update is free.
    #[test]
    fn chain_networks_converge(len in 2usize..8, edits in proptest::collection::vec(-1000i64..1000, 1..6)) {
        let mut net = Network::new();
        let mut vars = Vec::with_capacity(len);
        for _ in 0..len {
            vars.push(net.add_variable(int(0)).unwrap());
        }
        for w in vars.windows(2) {
            let (from, to) = (w[0], w[1]);
            let c = net.add_constraint();
            net.add_method(
                c,
                &[MethodInput::new(from)],
                &[to],
                Rc::new(move |ctx| Ok(MethodOutput::single(int(ctx.get_int(from)? + 1)))),
            )
            .unwrap();
        }
        net.update().unwrap();
        prop_assert!(net.solution().verify_acyclic(net.cgraph()));

        for edit in edits {
            net.set(vars[0], int(edit)).unwrap();
            net.update().unwrap();
            prop_assert!(net.solution().verify_acyclic(net.cgraph()));
            for (i, v) in vars.iter().enumerate() {
                prop_assert_eq!(net.value(*v), Some(&int(edit + i as i64)));
            }
            let quiet = net.update().unwrap();
            prop_assert_eq!(quiet.executed, 0);
        }
    }
}
