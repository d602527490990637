// ============================================================================
// weft-reactive - A fine-grained reactivity core
// ============================================================================
//
// The engine behind declarative UIs: a dependency graph that re-runs a
// computation exactly when the reactive state it actually read has changed.
//
// - deps and subscribers form a many-to-many graph of intrusive link lists,
// - version stamps detect stale reads without re-diffing dependency sets,
// - computeds are lazy and cached, with glitch-free reads,
// - effect notifications batch and flush in registration order.
//
// Container interception lives outside this crate: a proxy collaborator
// calls `track` on reads and `trigger` on writes, and the graph does the
// rest.
// ============================================================================

pub mod core;
pub mod graph;
pub mod primitives;
pub mod reactivity;
pub mod registry;

// Re-export the public surface at the crate root.
pub use crate::core::constants;
pub use crate::core::context::{
    global_version, is_server_mode, is_tracking, set_server_mode,
};
pub use crate::core::types::{
    default_equals, AnySubscriber, EqualsFn, ReadonlyWriteError,
};
pub use crate::graph::dep::Dep;
pub use crate::graph::link::LinkId;
pub use crate::primitives::computed::{
    computed, computed_with_equals, computed_with_setter, refresh_computed, Computed,
    ComputedGetter, ComputedSetter,
};
pub use crate::primitives::effect::{
    effect, effect_with_options, on_effect_cleanup, stop, CleanupFn, Effect, EffectFn,
    EffectOptions, SchedulerFn,
};
pub use crate::primitives::scope::{
    effect_scope, get_current_scope, on_scope_dispose, EffectScope, ScopeCleanupFn,
};
pub use crate::reactivity::batching::{batch, end_batch, is_batching, start_batch};
pub use crate::reactivity::equality::{
    always_equals, never_equals, safe_equals_f32, safe_equals_f64,
};
pub use crate::reactivity::tracking::{
    enable_tracking, pause_tracking, reset_tracking, untrack,
};
pub use crate::registry::{
    track, trigger, Key, Target, TargetId, TargetKind, TrackOp, TriggerOp,
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[test]
    fn diamond_flushes_each_effect_once() {
        //      base
        //     /    \
        //  left    right
        //     \    /
        //     joined
        let base = Dep::new();
        let value = Rc::new(Cell::new(1));

        let left = computed({
            let (base, value) = (base.clone(), value.clone());
            move |_| {
                base.track();
                value.get() + 10
            }
        });
        let right = computed({
            let (base, value) = (base.clone(), value.clone());
            move |_| {
                base.track();
                value.get() * 10
            }
        });
        let joined_evals = Rc::new(Cell::new(0));
        let joined = computed({
            let (left, right) = (left.clone(), right.clone());
            let joined_evals = joined_evals.clone();
            move |_| {
                joined_evals.set(joined_evals.get() + 1);
                left.get() + right.get()
            }
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let runner = effect({
            let joined = joined.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(joined.get())
        });

        assert_eq!(*seen.borrow(), vec![21]);
        assert_eq!(joined_evals.get(), 1);

        value.set(2);
        base.trigger();

        assert_eq!(*seen.borrow(), vec![21, 32], "single rerun for the diamond");
        assert_eq!(joined_evals.get(), 2, "joined recomputed exactly once");
        runner.stop();
    }

    #[test]
    fn nested_effects_attribute_reads_correctly() {
        let outer_dep = Dep::new();
        let inner_dep = Dep::new();
        let outer_runs = Rc::new(Cell::new(0));
        let inner_runs = Rc::new(Cell::new(0));

        let inner_slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let outer = effect({
            let (outer_dep, inner_dep) = (outer_dep.clone(), inner_dep.clone());
            let (outer_runs, inner_runs) = (outer_runs.clone(), inner_runs.clone());
            let inner_slot = inner_slot.clone();
            move || {
                outer_dep.track();
                outer_runs.set(outer_runs.get() + 1);

                if let Some(old) = inner_slot.borrow_mut().take() {
                    old.stop();
                }
                let inner = effect({
                    let inner_dep = inner_dep.clone();
                    let inner_runs = inner_runs.clone();
                    move || {
                        inner_dep.track();
                        inner_runs.set(inner_runs.get() + 1);
                    }
                });
                *inner_slot.borrow_mut() = Some(inner);
            }
        });

        assert_eq!((outer_runs.get(), inner_runs.get()), (1, 1));
        assert_eq!(outer_dep.sub_count(), 1);
        assert_eq!(inner_dep.sub_count(), 1);

        // The inner read must not leak onto the outer effect.
        inner_dep.trigger();
        assert_eq!((outer_runs.get(), inner_runs.get()), (1, 2));

        outer_dep.trigger();
        assert_eq!((outer_runs.get(), inner_runs.get()), (2, 3));
        assert_eq!(inner_dep.sub_count(), 1, "stale inner was stopped");

        outer.stop();
        let taken = inner_slot.borrow_mut().take();
        if let Some(inner) = taken {
            inner.stop();
        }
    }

    #[test]
    fn registry_to_effect_round_trip() {
        let profile = Target::new(TargetKind::Plain);
        let names = Rc::new(RefCell::new(Vec::new()));
        let name = Rc::new(RefCell::new("ada".to_string()));

        let runner = effect({
            let profile = profile.clone();
            let (names, name) = (names.clone(), name.clone());
            move || {
                track(&profile, TrackOp::Get, Key::prop("name"));
                names.borrow_mut().push(name.borrow().clone());
            }
        });

        *name.borrow_mut() = "grace".to_string();
        trigger(&profile, TriggerOp::Set, Some(Key::prop("name")), None);

        assert_eq!(*names.borrow(), vec!["ada", "grace"]);
        runner.stop();
    }

    #[test]
    fn untracked_reads_stay_invisible_to_the_graph() {
        let shown = Dep::new();
        let hidden = Dep::new();
        let runs = Rc::new(Cell::new(0));

        let runner = effect({
            let (shown, hidden) = (shown.clone(), hidden.clone());
            let runs = runs.clone();
            move || {
                shown.track();
                untrack(|| hidden.track());
                runs.set(runs.get() + 1);
            }
        });

        hidden.trigger();
        assert_eq!(runs.get(), 1);
        shown.trigger();
        assert_eq!(runs.get(), 2);
        runner.stop();
    }

    #[test]
    fn server_mode_recomputes_on_every_read() {
        set_server_mode(true);
        let dep = Dep::new();
        let evals = Rc::new(Cell::new(0));
        let c = computed({
            let (dep, evals) = (dep.clone(), evals.clone());
            move |_| {
                dep.track();
                evals.set(evals.get() + 1);
                1
            }
        });

        c.get();
        // A trigger anywhere forces a full recompute, dirty-elision is off.
        let unrelated = Dep::new();
        unrelated.trigger();
        c.get();

        set_server_mode(false);
        assert_eq!(evals.get(), 2, "server mode skips the version elision");
    }
}
