// ============================================================================
// weft-reactive - Type Definitions
// The type-erased subscriber capability trait and shared small types
// ============================================================================

use std::any::Any;
use std::rc::Rc;

use crate::core::constants::*;
use crate::graph::dep::Dep;
use crate::graph::link::LinkId;

// =============================================================================
// TYPE-ERASED SUBSCRIBER
// =============================================================================
//
// The graph is polymorphic over exactly two subscriber variants: effects and
// computeds. Graph surgery (link splicing, flag twiddling, batch threading)
// never needs the value type a computed caches, so the shared capability set
// lives behind a trait object and the concrete `EffectInner` /
// `ComputedInner<T>` types implement it.
//
// `notify` is the only operation that genuinely dispatches per variant;
// `trigger`, `refresh` and `as_computed_dep` default to the no-op side of
// their variant so each inner only overrides what it owns.
// =============================================================================

/// Capability set shared by both subscriber variants (effects and computeds).
///
/// A subscriber owns one side of every [`crate::graph::link::Link`] it holds:
/// the dep-list thread (`deps_head`/`deps_tail`). It also carries a single
/// `next` pointer used exclusively while it sits in a batch list.
pub trait AnySubscriber: Any {
    /// Get the flags bitmask.
    fn flags(&self) -> u32;

    /// Set the flags bitmask.
    fn set_flags(&self, flags: u32);

    /// Head of this subscriber's dep list (access order of the last run).
    fn deps_head(&self) -> Option<LinkId>;

    /// Set the dep-list head.
    fn set_deps_head(&self, link: Option<LinkId>);

    /// Tail of this subscriber's dep list.
    fn deps_tail(&self) -> Option<LinkId>;

    /// Set the dep-list tail.
    fn set_deps_tail(&self, link: Option<LinkId>);

    /// Take the batch-list `next` pointer, leaving `None`.
    ///
    /// The pointer is only meaningful while NOTIFIED is set; the flush nulls
    /// it out before clearing the flag.
    fn take_batch_next(&self) -> Option<Rc<dyn AnySubscriber>>;

    /// Thread this subscriber into a batch list.
    fn set_batch_next(&self, next: Option<Rc<dyn AnySubscriber>>);

    /// React to an upstream dep change.
    ///
    /// Returns `true` when the receiver is a computed that just became dirty,
    /// in which case the caller forward-propagates by notifying the computed's
    /// own dep (see `Dep::notify`).
    fn notify(&self) -> bool;

    /// Flush-time response: consult the scheduler or re-run if dirty.
    ///
    /// Only meaningful for effects; the default is a no-op.
    fn trigger(&self) {}

    /// Recompute the cached value if stale.
    ///
    /// Only meaningful for computeds; the default is a no-op.
    fn refresh(&self) {}

    /// The dep owned by this subscriber, when it is a computed.
    ///
    /// Effects are not readable sources and return `None`.
    fn as_computed_dep(&self) -> Option<Rc<Dep>> {
        None
    }

    /// Externally requested staleness (see `mark_dirty` on the handles).
    ///
    /// The mark is cleared by the subscriber's next run.
    fn is_marked_dirty(&self) -> bool {
        false
    }

    /// Upcast for downcasting to the concrete inner.
    fn as_any(&self) -> &dyn Any;

    /// Invoked after a dep records this subscriber as a reader.
    fn on_track_hook(&self) {}

    /// Invoked when a dep this subscriber reads fires.
    fn on_trigger_hook(&self) {}

    /// Check the ACTIVE bit.
    fn is_active(&self) -> bool {
        self.flags() & ACTIVE != 0
    }

    /// Check the RUNNING bit.
    fn is_running(&self) -> bool {
        self.flags() & RUNNING != 0
    }

    /// Check the TRACKING bit.
    fn is_attached(&self) -> bool {
        self.flags() & TRACKING != 0
    }
}

/// Identity comparison for type-erased subscribers.
///
/// Compares the data pointers of the two `Rc`s; vtable pointers are ignored
/// so the same allocation seen through different traits still matches.
pub fn same_subscriber(a: &Rc<dyn AnySubscriber>, b: &Rc<dyn AnySubscriber>) -> bool {
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

// =============================================================================
// CHANGE PREDICATES
// =============================================================================

/// Change predicate used by computeds to decide whether a recomputation
/// produced a genuinely new value.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

/// Default predicate using `PartialEq`.
pub fn default_equals<T: PartialEq>(a: &T, b: &T) -> bool {
    a == b
}

// =============================================================================
// ERRORS
// =============================================================================

/// Returned by `Computed::try_set` when the computed has no setter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot write to a computed without a setter")]
pub struct ReadonlyWriteError;

// =============================================================================
// TESTS
// =============================================================================
