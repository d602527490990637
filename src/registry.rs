// ============================================================================
// weft-reactive - Track/Trigger Registry
// Process-wide target → key → Dep map; entry points for proxy collaborators
// ============================================================================
//
// Collaborators that intercept container reads and writes call `track` and
// `trigger` here. The registry lazily creates one dep per (target, key) pair
// and dispatches writes to the affected deps per operation kind.
//
// Targets are opaque handles: dropping the last clone of a `Target` removes
// its whole registry entry, which stands in for the weak-keyed map of the
// garbage-collected original: entries never keep a dead container's deps
// alive.
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::core::context::with_context;
use crate::graph::dep::Dep;
use crate::reactivity::batching::BatchGuard;

// =============================================================================
// KEYS AND OPERATIONS
// =============================================================================

/// Identity of a reactive container in the registry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TargetId(u64);

/// Shape of a reactive container; drives trigger dispatch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TargetKind {
    Plain,
    Array,
    Map,
    Set,
}

/// A reactive key within a target.
///
/// The three iteration sentinels are variants, which gives them stable
/// process-wide identity for free.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    /// Named property.
    Prop(String),
    /// Integer array index.
    Index(usize),
    /// The array `length` pseudo-property.
    Length,
    /// Keyed iteration over a plain object, map or set.
    Iterate,
    /// Iteration over a map's keys only.
    MapKeyIterate,
    /// Index iteration over an array.
    ArrayIterate,
}

impl Key {
    /// Named-property key.
    pub fn prop(name: impl Into<String>) -> Self {
        Key::Prop(name.into())
    }
}

/// Read operations reported by collaborators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Write operations reported by collaborators.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

// =============================================================================
// TARGET HANDLE
// =============================================================================

struct TargetInner {
    id: TargetId,
    kind: TargetKind,
}

impl Drop for TargetInner {
    fn drop(&mut self) {
        // The container is gone; its deps must not outlive it in the map.
        let id = self.id;
        let _ = TARGET_MAP.try_with(|map| {
            map.borrow_mut().remove(&id);
        });
    }
}

/// Opaque handle to a reactive container.
///
/// Clones share identity; the registry entry lives until the last clone is
/// dropped.
#[derive(Clone)]
pub struct Target {
    inner: Rc<TargetInner>,
}

impl Target {
    /// Register a new reactive container of the given shape.
    pub fn new(kind: TargetKind) -> Self {
        let id = TargetId(with_context(|ctx| ctx.next_target_id()));
        Self {
            inner: Rc::new(TargetInner { id, kind }),
        }
    }

    /// The container's registry identity.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// The container's shape.
    pub fn kind(&self) -> TargetKind {
        self.inner.kind
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

// =============================================================================
// THE MAP
// =============================================================================

type DepsForTarget = HashMap<Option<Key>, Rc<Dep>>;

thread_local! {
    /// target → key → dep. The `None` key is the "no key" slot that some
    /// collaborators trigger for whole-object writes.
    static TARGET_MAP: RefCell<HashMap<TargetId, DepsForTarget>> =
        RefCell::new(HashMap::new());
}

/// Remove a single (target, key) entry. Called by a dep when its last
/// attached subscriber leaves.
pub(crate) fn evict(target: TargetId, key: Option<Key>) {
    let _ = TARGET_MAP.try_with(|map| {
        let mut map = map.borrow_mut();
        if let Some(deps) = map.get_mut(&target) {
            deps.remove(&key);
            if deps.is_empty() {
                map.remove(&target);
            }
        }
    });
}

// =============================================================================
// TRACK
// =============================================================================

/// Record that the active subscriber read `key` of `target`.
///
/// No-op outside a tracking context; otherwise ensures a dep for the pair
/// and records the edge.
pub fn track(target: &Target, op: TrackOp, key: Key) {
    if !crate::core::context::is_tracking() {
        return;
    }
    trace!(target_id = ?target.id(), ?op, ?key, "track");

    let dep = TARGET_MAP.with(|map| {
        let mut map = map.borrow_mut();
        let deps = map.entry(target.id()).or_default();
        deps.entry(Some(key.clone()))
            .or_insert_with(|| {
                let dep = Dep::new();
                dep.set_registry_slot(target.id(), Some(key.clone()));
                dep
            })
            .clone()
    });
    // Map borrow released: dep.track may re-enter the registry through
    // subscriber hooks.
    dep.track();
}

// =============================================================================
// TRIGGER
// =============================================================================

/// Signal that `key` of `target` was written.
///
/// `new_len` carries the new length for array `length` writes, which
/// invalidate every index at or past it.
pub fn trigger(target: &Target, op: TriggerOp, key: Option<Key>, new_len: Option<usize>) {
    trace!(target_id = ?target.id(), ?op, ?key, "trigger");

    // Collect first, run after the map borrow is released: running a dep
    // flushes effects, and effect teardown may evict registry entries.
    let matched: Option<Vec<Rc<Dep>>> = TARGET_MAP.with(|map| {
        let map = map.borrow();
        let deps = map.get(&target.id())?;
        Some(collect_triggered(deps, target.kind(), op, &key, new_len))
    });

    match matched {
        None => {
            // Unknown target: nothing to notify, but computeds must still
            // see that the world moved.
            with_context(|ctx| ctx.bump_global_version());
        }
        Some(run) if run.is_empty() => {
            with_context(|ctx| ctx.bump_global_version());
        }
        Some(run) => {
            let _batch = BatchGuard::new();
            for dep in run {
                dep.trigger();
            }
        }
    }
}

/// Which deps a write touches.
fn collect_triggered(
    deps: &DepsForTarget,
    kind: TargetKind,
    op: TriggerOp,
    key: &Option<Key>,
    new_len: Option<usize>,
) -> Vec<Rc<Dep>> {
    let mut run = Vec::new();

    if op == TriggerOp::Clear {
        // Everything observed on this target is affected.
        run.extend(deps.values().cloned());
        return run;
    }

    let is_array = kind == TargetKind::Array;

    if is_array && *key == Some(Key::Length) {
        let new_len = new_len.unwrap_or(0);
        for (k, dep) in deps.iter() {
            let hit = matches!(k, Some(Key::Length) | Some(Key::ArrayIterate))
                || matches!(k, Some(Key::Index(i)) if *i >= new_len);
            if hit {
                run.push(dep.clone());
            }
        }
        return run;
    }

    let is_index = matches!(key, Some(Key::Index(_)));
    let mut push = |dep: Option<&Rc<Dep>>| {
        if let Some(dep) = dep {
            run.push(dep.clone());
        }
    };

    if key.is_some() || deps.contains_key(&None) {
        push(deps.get(key));
    }
    if is_array && is_index {
        push(deps.get(&Some(Key::ArrayIterate)));
    }

    match op {
        TriggerOp::Add => {
            if !is_array {
                push(deps.get(&Some(Key::Iterate)));
                if kind == TargetKind::Map {
                    push(deps.get(&Some(Key::MapKeyIterate)));
                }
            } else if is_index {
                push(deps.get(&Some(Key::Length)));
            }
        }
        TriggerOp::Delete => {
            if !is_array {
                push(deps.get(&Some(Key::Iterate)));
                if kind == TargetKind::Map {
                    push(deps.get(&Some(Key::MapKeyIterate)));
                }
            }
        }
        TriggerOp::Set => {
            if kind == TargetKind::Map {
                push(deps.get(&Some(Key::Iterate)));
            }
        }
        TriggerOp::Clear => {}
    }

    run
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::global_version;
    use crate::primitives::effect::effect;
    use std::cell::Cell;

    fn counting_effect(target: &Target, keys: Vec<Key>) -> (crate::primitives::effect::Effect, Rc<Cell<u32>>) {
        let runs = Rc::new(Cell::new(0));
        let runner = effect({
            let target = target.clone();
            let runs = runs.clone();
            move || {
                for key in &keys {
                    track(&target, TrackOp::Get, key.clone());
                }
                runs.set(runs.get() + 1);
            }
        });
        (runner, runs)
    }

    #[test]
    fn unknown_target_only_bumps_global_version() {
        let known = Target::new(TargetKind::Plain);
        let unknown = Target::new(TargetKind::Plain);
        let (runner, runs) = counting_effect(&known, vec![Key::prop("x")]);

        let before = global_version();
        trigger(&unknown, TriggerOp::Set, Some(Key::prop("x")), None);
        assert_eq!(global_version(), before + 1);
        assert_eq!(runs.get(), 1, "no effect may run");
        runner.stop();
    }

    #[test]
    fn keyed_set_reruns_keyed_reader() {
        let target = Target::new(TargetKind::Plain);
        let (runner, runs) = counting_effect(&target, vec![Key::prop("x")]);
        assert_eq!(runs.get(), 1);

        trigger(&target, TriggerOp::Set, Some(Key::prop("x")), None);
        assert_eq!(runs.get(), 2);

        trigger(&target, TriggerOp::Set, Some(Key::prop("y")), None);
        assert_eq!(runs.get(), 2, "unrelated key is quiet");
        runner.stop();
    }

    #[test]
    fn clear_fires_every_dep_of_the_target() {
        let target = Target::new(TargetKind::Map);
        let (r1, runs1) = counting_effect(&target, vec![Key::prop("a")]);
        let (r2, runs2) = counting_effect(&target, vec![Key::prop("b")]);

        trigger(&target, TriggerOp::Clear, None, None);
        assert_eq!(runs1.get(), 2);
        assert_eq!(runs2.get(), 2);
        r1.stop();
        r2.stop();
    }

    #[test]
    fn add_on_plain_fires_iterate_but_not_map_key_iterate() {
        let target = Target::new(TargetKind::Plain);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::Iterate]);
        let (mk_r, mk_runs) = counting_effect(&target, vec![Key::MapKeyIterate]);

        trigger(&target, TriggerOp::Add, Some(Key::prop("new")), None);
        assert_eq!(iter_runs.get(), 2);
        assert_eq!(mk_runs.get(), 1);
        iter_r.stop();
        mk_r.stop();
    }

    #[test]
    fn add_on_map_fires_both_iterate_sentinels() {
        let target = Target::new(TargetKind::Map);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::Iterate]);
        let (mk_r, mk_runs) = counting_effect(&target, vec![Key::MapKeyIterate]);

        trigger(&target, TriggerOp::Add, Some(Key::prop("new")), None);
        assert_eq!(iter_runs.get(), 2);
        assert_eq!(mk_runs.get(), 2);
        iter_r.stop();
        mk_r.stop();
    }

    #[test]
    fn set_on_map_fires_iterate() {
        let target = Target::new(TargetKind::Map);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::Iterate]);

        trigger(&target, TriggerOp::Set, Some(Key::prop("k")), None);
        assert_eq!(iter_runs.get(), 2);
        iter_r.stop();
    }

    #[test]
    fn set_on_plain_does_not_fire_iterate() {
        let target = Target::new(TargetKind::Plain);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::Iterate]);

        trigger(&target, TriggerOp::Set, Some(Key::prop("k")), None);
        assert_eq!(iter_runs.get(), 1);
        iter_r.stop();
    }

    #[test]
    fn array_add_at_index_fires_length_and_array_iterate() {
        let target = Target::new(TargetKind::Array);
        let (len_r, len_runs) = counting_effect(&target, vec![Key::Length]);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::ArrayIterate]);

        trigger(&target, TriggerOp::Add, Some(Key::Index(3)), None);
        assert_eq!(len_runs.get(), 2);
        assert_eq!(iter_runs.get(), 2);
        len_r.stop();
        iter_r.stop();
    }

    #[test]
    fn length_shrink_fires_truncated_indices_only() {
        let target = Target::new(TargetKind::Array);
        let (keep_r, keep_runs) = counting_effect(&target, vec![Key::Index(1)]);
        let (cut_r, cut_runs) = counting_effect(&target, vec![Key::Index(5)]);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::ArrayIterate]);

        trigger(&target, TriggerOp::Set, Some(Key::Length), Some(3));
        assert_eq!(keep_runs.get(), 1, "index below the new length survives");
        assert_eq!(cut_runs.get(), 2, "index past the new length is invalidated");
        assert_eq!(iter_runs.get(), 2);
        keep_r.stop();
        cut_r.stop();
        iter_r.stop();
    }

    #[test]
    fn delete_on_set_kind_fires_iterate_only() {
        let target = Target::new(TargetKind::Set);
        let (iter_r, iter_runs) = counting_effect(&target, vec![Key::Iterate]);
        let (mk_r, mk_runs) = counting_effect(&target, vec![Key::MapKeyIterate]);

        trigger(&target, TriggerOp::Delete, Some(Key::prop("member")), None);
        assert_eq!(iter_runs.get(), 2);
        assert_eq!(mk_runs.get(), 1);
        iter_r.stop();
        mk_r.stop();
    }

    #[test]
    fn stopped_reader_evicts_its_registry_entry() {
        let target = Target::new(TargetKind::Plain);
        let (runner, _runs) = counting_effect(&target, vec![Key::prop("x")]);

        let populated =
            TARGET_MAP.with(|m| m.borrow().get(&target.id()).is_some_and(|d| !d.is_empty()));
        assert!(populated);

        runner.stop();

        let emptied = TARGET_MAP.with(|m| m.borrow().get(&target.id()).is_none());
        assert!(emptied, "last subscriber gone, entry evicted");
    }

    #[test]
    fn dropping_target_clears_its_entry() {
        let target = Target::new(TargetKind::Plain);
        let id = target.id();

        // A soft-detached computed keeps the entry alive with zero attached
        // subscribers; only dropping the container itself may evict it.
        let c = crate::primitives::computed::computed({
            let target = target.clone();
            move |_| {
                track(&target, TrackOp::Get, Key::prop("x"));
                1
            }
        });
        let runner = effect({
            let c = c.clone();
            move || {
                c.get();
            }
        });
        runner.stop();

        assert!(
            TARGET_MAP.with(|m| m.borrow().contains_key(&id)),
            "entry survives a soft detach"
        );

        drop(c);
        drop(target);
        assert!(TARGET_MAP.with(|m| m.borrow().get(&id).is_none()));
    }

    #[test]
    fn known_target_unmatched_key_still_bumps_global_version() {
        let target = Target::new(TargetKind::Plain);
        let (runner, _runs) = counting_effect(&target, vec![Key::prop("x")]);

        let before = global_version();
        trigger(&target, TriggerOp::Set, Some(Key::prop("unobserved")), None);
        assert_eq!(global_version(), before + 1);
        runner.stop();
    }
}
