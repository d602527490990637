// ============================================================================
// weft-reactive - Batching
// Defer subscriber notifications; flush once when the outermost batch closes
// ============================================================================
//
// Every trigger opens a batch around its notifications, so un-batched writes
// still flush synchronously at the end of the write. User batches nest on
// top and collapse the flush to a single pass.
//
// Two singly-linked batch lists are threaded through the subscribers' own
// `next` pointers: one for effects (re-run at flush) and one for computeds
// (only their NOTIFIED bit is cleared; they stay DIRTY and recompute
// lazily on the next read).
// ============================================================================

use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::core::constants::NOTIFIED;
use crate::core::context::with_context;
use crate::core::types::AnySubscriber;

// =============================================================================
// BATCH DEPTH
// =============================================================================

/// Open a batch. Must be balanced with `end_batch`.
pub fn start_batch() {
    with_context(|ctx| ctx.enter_batch());
}

/// Close a batch; the outermost close runs the flush.
///
/// If any effect in the flush panicked, the first panic is re-raised here
/// after the remaining effects have run.
pub fn end_batch() {
    let depth = with_context(|ctx| ctx.exit_batch());
    if depth > 0 {
        return;
    }
    flush();
}

/// Check if currently inside a batch.
pub fn is_batching() -> bool {
    with_context(|ctx| ctx.is_batching())
}

/// RAII batch: closes (and possibly flushes) on drop, panic included.
pub(crate) struct BatchGuard;

impl BatchGuard {
    pub(crate) fn new() -> Self {
        start_batch();
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        end_batch();
    }
}

/// Group multiple writes into a single flush.
///
/// # Example
///
/// ```
/// use weft_reactive::{batch, effect, Key, Target, TargetKind, TrackOp, TriggerOp};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let state = Target::new(TargetKind::Plain);
/// let runs = Rc::new(Cell::new(0));
///
/// let runs_in_effect = runs.clone();
/// let reader = {
///     let state = state.clone();
///     effect(move || {
///         weft_reactive::track(&state, TrackOp::Get, Key::prop("x"));
///         weft_reactive::track(&state, TrackOp::Get, Key::prop("y"));
///         runs_in_effect.set(runs_in_effect.get() + 1);
///     })
/// };
///
/// assert_eq!(runs.get(), 1);
///
/// batch(|| {
///     weft_reactive::trigger(&state, TriggerOp::Set, Some(Key::prop("x")), None);
///     weft_reactive::trigger(&state, TriggerOp::Set, Some(Key::prop("y")), None);
/// });
///
/// // Two writes, one re-run.
/// assert_eq!(runs.get(), 2);
/// reader.stop();
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _guard = BatchGuard::new();
    f()
}

// =============================================================================
// ENQUEUE
// =============================================================================

/// Thread a subscriber into a batch list, at most once per batch.
pub(crate) fn batch_subscriber(sub: &Rc<dyn AnySubscriber>, is_computed: bool) {
    sub.set_flags(sub.flags() | NOTIFIED);
    with_context(|ctx| ctx.push_batched(sub.clone(), is_computed));
}

// =============================================================================
// FLUSH
// =============================================================================

/// Drain both batch lists.
///
/// Computeds first: their `next` pointers are nulled and NOTIFIED cleared so
/// future batches can re-enqueue them; no computation is forced. Effects are
/// then popped one at a time, taking `next` before invoking, so arrivals
/// appended mid-flush are picked up by the outer loop. The first panic wins
/// and is re-raised once everything has flushed.
fn flush() {
    loop {
        let Some(head) = with_context(|ctx| ctx.take_batched_computeds()) else {
            break;
        };
        let mut cursor = Some(head);
        while let Some(sub) = cursor {
            let next = sub.take_batch_next();
            sub.set_flags(sub.flags() & !NOTIFIED);
            cursor = next;
        }
    }

    let mut first_error: Option<Box<dyn Any + Send>> = None;
    loop {
        let Some(head) = with_context(|ctx| ctx.take_batched_effects()) else {
            break;
        };
        let mut cursor = Some(head);
        while let Some(sub) = cursor {
            let next = sub.take_batch_next();
            sub.set_flags(sub.flags() & !NOTIFIED);
            if sub.is_active() {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sub.trigger())) {
                    if first_error.is_none() {
                        first_error = Some(payload);
                    }
                }
            }
            cursor = next;
        }
    }

    if let Some(payload) = first_error {
        resume_unwind(payload);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::dep::Dep;
    use crate::primitives::effect::effect;
    use std::cell::Cell;

    #[test]
    fn batch_returns_value() {
        assert_eq!(batch(|| 42), 42);
        assert_eq!(batch(|| String::from("hi")), "hi");
    }

    #[test]
    fn is_batching_flag() {
        assert!(!is_batching());
        batch(|| {
            assert!(is_batching());
            batch(|| assert!(is_batching()));
            assert!(is_batching());
        });
        assert!(!is_batching());
    }

    #[test]
    fn batch_defers_effects() {
        let dep = Dep::new();
        let runs = Rc::new(Cell::new(0));

        let runner = effect({
            let dep = dep.clone();
            let runs = runs.clone();
            move || {
                dep.clone().track();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        batch(|| {
            dep.trigger();
            assert_eq!(runs.get(), 1, "deferred inside the batch");
            dep.trigger();
            assert_eq!(runs.get(), 1);
        });

        assert_eq!(runs.get(), 2, "one re-run after the outermost close");
        runner.stop();
    }

    #[test]
    fn nested_batches_flush_once() {
        let dep = Dep::new();
        let runs = Rc::new(Cell::new(0));

        let runner = effect({
            let dep = dep.clone();
            let runs = runs.clone();
            move || {
                dep.clone().track();
                runs.set(runs.get() + 1);
            }
        });

        batch(|| {
            dep.trigger();
            batch(|| dep.trigger());
            assert_eq!(runs.get(), 1, "inner close must not flush");
            dep.trigger();
        });

        assert_eq!(runs.get(), 2);
        runner.stop();
    }

    #[test]
    fn batch_panic_still_closes() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            batch(|| panic!("boom"));
        }));
        assert!(result.is_err());
        assert!(!is_batching());
    }

    #[test]
    fn unbatched_trigger_flushes_synchronously() {
        let dep = Dep::new();
        let runs = Rc::new(Cell::new(0));

        let runner = effect({
            let dep = dep.clone();
            let runs = runs.clone();
            move || {
                dep.clone().track();
                runs.set(runs.get() + 1);
            }
        });

        dep.trigger();
        assert_eq!(runs.get(), 2);
        dep.trigger();
        assert_eq!(runs.get(), 3);
        runner.stop();
    }
}
