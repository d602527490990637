//! End-to-end scenarios driven through the public surface.
//!
//! A minimal collaborator stands in for the proxy layer: a `Store` holds
//! plain values and reports its reads and writes to the registry, exactly
//! the way an interception layer would.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use weft_reactive::{
    batch, computed, effect, global_version, on_effect_cleanup, track, trigger, Key, Target,
    TargetKind, TrackOp, TriggerOp,
};

// =============================================================================
// MINIMAL DRIVER
// =============================================================================

struct Store {
    target: Target,
    values: RefCell<HashMap<String, i64>>,
}

impl Store {
    fn new(pairs: &[(&str, i64)]) -> Rc<Self> {
        Rc::new(Self {
            target: Target::new(TargetKind::Plain),
            values: RefCell::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            ),
        })
    }

    fn get(&self, key: &str) -> i64 {
        track(&self.target, TrackOp::Get, Key::prop(key));
        self.values.borrow().get(key).copied().unwrap_or(0)
    }

    fn set(&self, key: &str, value: i64) {
        let changed = {
            let mut values = self.values.borrow_mut();
            let slot = values.entry(key.to_string()).or_insert(0);
            let changed = *slot != value;
            *slot = value;
            changed
        };
        if changed {
            trigger(&self.target, TriggerOp::Set, Some(Key::prop(key)), None);
        }
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn single_dep_single_effect() {
    let state = Store::new(&[("v", 1)]);
    let observed = Rc::new(RefCell::new(Vec::new()));

    let runner = effect({
        let state = state.clone();
        let observed = observed.clone();
        move || observed.borrow_mut().push(state.get("v"))
    });

    assert_eq!(*observed.borrow(), vec![1]);

    state.set("v", 2);
    assert_eq!(*observed.borrow(), vec![1, 2], "exactly two runs");
    runner.stop();
}

#[test]
fn shifting_dep_set() {
    let state = Store::new(&[("flag", 1), ("a", 1), ("b", 2)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            runs.set(runs.get() + 1);
            if state.get("flag") != 0 {
                state.get("a");
            } else {
                state.get("b");
            }
        }
    });

    assert_eq!(runs.get(), 1);

    state.set("b", 99);
    assert_eq!(runs.get(), 1, "b is not a dependency yet");

    state.set("flag", 0);
    assert_eq!(runs.get(), 2, "flag flip reruns and swaps the dep set");

    state.set("a", 42);
    assert_eq!(runs.get(), 2, "a dropped out of the dep set");

    state.set("b", 7);
    assert_eq!(runs.get(), 3, "b is live now");
    runner.stop();
}

#[test]
fn batch_coalescing() {
    let state = Store::new(&[("x", 0), ("y", 0)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            state.get("y");
            runs.set(runs.get() + 1);
        }
    });

    batch(|| {
        state.set("x", 1);
        state.set("y", 1);
        assert_eq!(runs.get(), 1, "nothing flushes inside the batch");
    });

    assert_eq!(runs.get(), 2, "two writes coalesced into one rerun");
    runner.stop();
}

#[test]
fn computed_chain() {
    let state = Store::new(&[("a", 1)]);
    let records = Rc::new(RefCell::new(Vec::new()));

    let doubled = computed({
        let state = state.clone();
        move |_| state.get("a") * 2
    });
    let final_value = computed({
        let doubled = doubled.clone();
        move |_| doubled.get() + 1
    });

    let runner = effect({
        let final_value = final_value.clone();
        let records = records.clone();
        move || records.borrow_mut().push(final_value.get())
    });

    assert_eq!(*records.borrow(), vec![3]);

    let before = global_version();
    state.set("a", 5);

    assert_eq!(*records.borrow(), vec![3, 11], "one record per mutation");
    assert_eq!(
        global_version(),
        before + 1,
        "one mutation advances the global version by one"
    );
    runner.stop();
}

#[test]
fn computed_with_no_subscribers_is_never_evaluated() {
    let state = Store::new(&[("n", 0)]);
    let evaluations = Rc::new(Cell::new(0));

    let _expensive = computed({
        let state = state.clone();
        let evaluations = evaluations.clone();
        move |_| {
            evaluations.set(evaluations.get() + 1);
            state.get("n") * 1000
        }
    });

    for i in 1..=20 {
        state.set("n", i);
    }

    assert_eq!(evaluations.get(), 0, "never read, never computed");
}

#[test]
fn cleanup_runs_before_each_rerun() {
    let state = Store::new(&[("x", 0)]);
    let log = Rc::new(RefCell::new(Vec::new()));

    let runner = effect({
        let state = state.clone();
        let log = log.clone();
        move || {
            log.borrow_mut().push("run");
            let log = log.clone();
            on_effect_cleanup(move || log.borrow_mut().push("cleanup"), false);
            state.get("x");
        }
    });

    state.set("x", 1);
    state.set("x", 2);
    state.set("x", 3);

    assert_eq!(
        *log.borrow(),
        vec!["run", "cleanup", "run", "cleanup", "run", "cleanup", "run"],
        "cleanup k always lands before run k+1"
    );
    runner.stop();
}

#[test]
fn error_in_effect_during_batch_flush() {
    let state = Store::new(&[("x", 0)]);
    let second_values = Rc::new(RefCell::new(Vec::new()));

    let armed = Rc::new(Cell::new(false));
    let bomb = effect({
        let state = state.clone();
        let armed = armed.clone();
        move || {
            state.get("x");
            if armed.get() {
                panic!("flush casualty");
            }
            armed.set(true);
        }
    });
    let second = effect({
        let state = state.clone();
        let second_values = second_values.clone();
        move || second_values.borrow_mut().push(state.get("x"))
    });

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        batch(|| state.set("x", 5));
    }));

    assert!(result.is_err(), "close of batch re-raises the first error");
    assert_eq!(
        *second_values.borrow(),
        vec![0, 5],
        "the second effect still ran exactly once with the new value"
    );
    bomb.stop();
    second.stop();
}

#[test]
fn pause_and_resume_runs_once() {
    let state = Store::new(&[("x", 0)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            runs.set(runs.get() + 1);
        }
    });

    runner.pause();
    state.set("x", 1);
    state.set("x", 2);
    assert_eq!(runs.get(), 1, "paused effect stays quiet");

    runner.resume();
    assert_eq!(runs.get(), 2, "one catch-up run on resume");
    runner.stop();
}

// =============================================================================
// LAWS
// =============================================================================

#[test]
fn stop_is_idempotent() {
    let state = Store::new(&[("x", 0)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            runs.set(runs.get() + 1);
        }
    });

    runner.stop();
    runner.stop();
    runner.stop();

    state.set("x", 1);
    assert_eq!(runs.get(), 1);
}

#[test]
fn nested_batches_are_flat() {
    let state = Store::new(&[("x", 0)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            runs.set(runs.get() + 1);
        }
    });

    batch(|| {
        state.set("x", 1);
        batch(|| {
            state.set("x", 2);
            batch(|| state.set("x", 3));
        });
        assert_eq!(runs.get(), 1, "inner closes never flush");
    });

    assert_eq!(runs.get(), 2, "flush timing equals one outer batch");
    runner.stop();
}

#[test]
fn glitch_free_reads_inside_callbacks() {
    let state = Store::new(&[("n", 1)]);
    let tripled = computed({
        let state = state.clone();
        move |_| state.get("n") * 3
    });

    let consistent = Rc::new(Cell::new(true));
    let runner = effect({
        let state = state.clone();
        let tripled = tripled.clone();
        let consistent = consistent.clone();
        move || {
            let n = state.get("n");
            if tripled.get() != n * 3 {
                consistent.set(false);
            }
        }
    });

    for i in 2..=6 {
        state.set("n", i);
    }
    batch(|| {
        state.set("n", 100);
        // A read in the same batch as the write sees the new graph.
        assert_eq!(tripled.get(), 300);
    });

    assert!(consistent.get(), "no callback ever saw a stale computed");
    runner.stop();
}

#[test]
fn quiescence_after_batches_close() {
    let state = Store::new(&[("x", 0)]);
    let runs = Rc::new(Cell::new(0));

    let runner = effect({
        let state = state.clone();
        let runs = runs.clone();
        move || {
            state.get("x");
            runs.set(runs.get() + 1);
        }
    });

    batch(|| state.set("x", 1));
    let settled = runs.get();

    // Triggering a key nobody reads leaves every effect untouched.
    trigger(
        &Target::new(TargetKind::Plain),
        TriggerOp::Set,
        Some(Key::prop("ghost")),
        None,
    );
    assert_eq!(runs.get(), settled);
    runner.stop();
}
