// ============================================================================
// weft-reactive - Dependency Tracking
// Arming, confirming and sweeping a subscriber's dependency edges
// ============================================================================
//
// A subscriber's dep list is rebuilt in place on every run:
//
//   1. prepare_deps arms every existing edge (version = None) and parks the
//      edge in its dep's active_link slot so track() can recognize reuse in
//      O(1).
//   2. The subscriber's function runs; every read confirms its edge (stamps
//      the dep's version) and splices it to the tail, so the list ends up in
//      access order.
//   3. cleanup_deps walks tail→head, drops edges still armed (not read this
//      run) and restores each dep's previous active_link.
//
// Staleness is version arithmetic: a subscriber is dirty iff some edge's
// stamp no longer matches its dep's version, after giving any upstream
// computed the chance to refresh.
// ============================================================================

use std::rc::Rc;

use crate::core::context::with_context;
use crate::core::types::AnySubscriber;
use crate::graph::link::{free_link, remove_dep, remove_sub};

// =============================================================================
// PREPARE / CLEANUP
// =============================================================================

/// Arm every edge of a subscriber before its run.
pub(crate) fn prepare_deps(sub: &dyn AnySubscriber) {
    with_context(|ctx| {
        ctx.with_links(|links| {
            let mut cursor = sub.deps_head();
            while let Some(id) = cursor {
                let link = &mut links[id.index()];
                link.version = None;
                link.prev_active_link = link.dep.active_link();
                link.dep.set_active_link(Some(id));
                cursor = link.next_dep;
            }
        });
    });
}

/// Sweep a subscriber's edges after its run.
///
/// Walks tail→head: edges confirmed this run were spliced to the tail in
/// access order, so everything still armed is stale and is dropped from both
/// lists. Each visited dep gets its saved active_link back, which is what
/// makes nested subscriber runs compose.
pub(crate) fn cleanup_deps(sub: &dyn AnySubscriber) {
    with_context(|ctx| {
        ctx.with_links(|links| {
            let mut head = None;
            let mut tail = sub.deps_tail();
            let mut cursor = tail;
            while let Some(id) = cursor {
                let prev = links[id.index()].prev_dep;
                let unused = links[id.index()].version.is_none();

                {
                    let link = &mut links[id.index()];
                    link.dep.set_active_link(link.prev_active_link.take());
                }

                if unused {
                    if Some(id) == tail {
                        tail = prev;
                    }
                    remove_sub(links, id, false);
                    remove_dep(links, id);
                    free_link(links, id);
                } else {
                    head = Some(id);
                }
                cursor = prev;
            }
            sub.set_deps_head(head);
            sub.set_deps_tail(tail);
        });
    });
}

// =============================================================================
// DIRTY CHECK
// =============================================================================

/// Whether a subscriber's cached state is older than any of its deps.
///
/// Walks the dep list in access order; the first stale edge short-circuits.
/// An edge whose dep fronts a computed first refreshes that computed, so the
/// comparison always sees a settled version.
pub(crate) fn is_dirty(sub: &Rc<dyn AnySubscriber>) -> bool {
    let mut cursor = sub.deps_head();
    while let Some(id) = cursor {
        let (dep, version, next) = with_context(|ctx| {
            (ctx.link_dep(id), ctx.link_version(id), ctx.link_next_dep(id))
        });

        if version != Some(dep.version()) {
            return true;
        }
        if let Some(owner) = dep.computed() {
            owner.refresh();
            if version != Some(dep.version()) {
                return true;
            }
        }
        cursor = next;
    }
    sub.is_marked_dirty()
}

/// Number of edges in a subscriber's dep list.
pub(crate) fn dep_count(sub: &dyn AnySubscriber) -> usize {
    let mut count = 0;
    let mut cursor = sub.deps_head();
    while let Some(id) = cursor {
        count += 1;
        cursor = with_context(|ctx| ctx.link_next_dep(id));
    }
    count
}

// =============================================================================
// TRACKING CONTROL
// =============================================================================

/// Disable dependency tracking until the matching `reset_tracking`.
pub fn pause_tracking() {
    with_context(|ctx| ctx.push_track_state(false));
}

/// Re-enable dependency tracking until the matching `reset_tracking`.
///
/// Used inside a paused region to open a tracked window.
pub fn enable_tracking() {
    with_context(|ctx| ctx.push_track_state(true));
}

/// Restore the tracking state saved by the last `pause_tracking` or
/// `enable_tracking`.
pub fn reset_tracking() {
    with_context(|ctx| ctx.pop_track_state());
}

/// Run a closure with dependency tracking disabled.
///
/// Reads inside the closure do not register edges on the running subscriber.
///
/// # Example
///
/// ```
/// use weft_reactive::{computed, untrack};
///
/// let doubled = computed(|_| untrack(|| 21) * 2);
/// assert_eq!(doubled.get(), 42);
/// ```
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    pause_tracking();

    struct ResetGuard;

    impl Drop for ResetGuard {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    let _guard = ResetGuard;
    f()
}

// =============================================================================
// TESTS
// =============================================================================
