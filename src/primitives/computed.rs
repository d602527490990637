// ============================================================================
// weft-reactive - Computed
// A lazy, cached derivation: subscriber to its inputs, dep to its readers
// ============================================================================
//
// A computed owns a Dep that downstream subscribers track when they read it.
// Its value is pulled, never pushed: triggers only mark it dirty, and the
// next read re-evaluates, or proves via version stamps that nothing it
// depends on changed and keeps the cache.
//
// While a computed has no subscribers of its own it soft-unsubscribes from
// its upstream deps: the link objects stay in its dep list (so the next
// subscriber re-arms the same set in O(n)) but leave the deps' subscriber
// lists, and version checks take over from push notifications.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::core::constants::*;
use crate::core::context::{try_with_context, with_context};
use crate::core::types::{default_equals, AnySubscriber, EqualsFn, ReadonlyWriteError};
use crate::graph::dep::Dep;
use crate::graph::link::{release_deps, LinkId};
use crate::reactivity::batching::batch_subscriber;
use crate::reactivity::tracking::{cleanup_deps, is_dirty, prepare_deps};

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// Computation function; receives the previous value when there is one.
pub type ComputedGetter<T> = Box<dyn FnMut(Option<&T>) -> T>;

/// Optional write-through function for writable computeds.
pub type ComputedSetter<T> = Box<dyn Fn(T)>;

// =============================================================================
// COMPUTED INNER
// =============================================================================

/// The subscriber-and-dep pair behind a [`Computed`] handle.
pub struct ComputedInner<T: 'static> {
    flags: Cell<u32>,
    deps_head: Cell<Option<LinkId>>,
    deps_tail: Cell<Option<LinkId>>,
    batch_next: RefCell<Option<Rc<dyn AnySubscriber>>>,

    getter: RefCell<ComputedGetter<T>>,
    setter: RefCell<Option<ComputedSetter<T>>>,

    /// Cached last value; `None` until the first evaluation.
    value: RefCell<Option<T>>,

    /// The dep downstream readers subscribe to.
    dep: Rc<Dep>,

    /// Global version at the last refresh; equality means nothing anywhere
    /// has triggered since, so the cache is trivially valid.
    global_version: Cell<u64>,

    /// Captured at creation; disables the dirty-elision fast path so server
    /// renders always recompute.
    server_mode: bool,

    equals: EqualsFn<T>,

    /// Externally requested staleness; cleared by the next refresh.
    marked_dirty: Cell<bool>,

    self_weak: RefCell<Weak<ComputedInner<T>>>,
}

impl<T: 'static> ComputedInner<T> {
    fn new(
        getter: ComputedGetter<T>,
        setter: Option<ComputedSetter<T>>,
        equals: EqualsFn<T>,
    ) -> Rc<Self> {
        let (global, server_mode) =
            with_context(|ctx| (ctx.global_version(), ctx.server_mode()));

        let inner = Rc::new(Self {
            flags: Cell::new(DIRTY),
            deps_head: Cell::new(None),
            deps_tail: Cell::new(None),
            batch_next: RefCell::new(None),
            getter: RefCell::new(getter),
            setter: RefCell::new(setter),
            value: RefCell::new(None),
            dep: Dep::new(),
            // One behind so the very first read cannot hit the fast path.
            global_version: Cell::new(global.wrapping_sub(1)),
            server_mode,
            equals,
            marked_dirty: Cell::new(false),
            self_weak: RefCell::new(Weak::new()),
        });

        *inner.self_weak.borrow_mut() = Rc::downgrade(&inner);
        let inner_dyn: Rc<dyn AnySubscriber> = inner.clone();
        let as_sub: Weak<dyn AnySubscriber> = Rc::downgrade(&inner_dyn);
        inner.dep.set_computed(as_sub);
        inner
    }

    fn upgrade(&self) -> Option<Rc<ComputedInner<T>>> {
        self.self_weak.borrow().upgrade()
    }
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        if self.deps_head.get().is_some() {
            let _ = try_with_context(|ctx| {
                ctx.with_links(|links| release_deps(links, &*self));
            });
        }
    }
}

// =============================================================================
// AnySubscriber IMPLEMENTATION
// =============================================================================

impl<T: 'static> AnySubscriber for ComputedInner<T> {
    fn flags(&self) -> u32 {
        self.flags.get()
    }

    fn set_flags(&self, flags: u32) {
        self.flags.set(flags);
    }

    fn deps_head(&self) -> Option<LinkId> {
        self.deps_head.get()
    }

    fn set_deps_head(&self, link: Option<LinkId>) {
        self.deps_head.set(link);
    }

    fn deps_tail(&self) -> Option<LinkId> {
        self.deps_tail.get()
    }

    fn set_deps_tail(&self, link: Option<LinkId>) {
        self.deps_tail.set(link);
    }

    fn take_batch_next(&self) -> Option<Rc<dyn AnySubscriber>> {
        self.batch_next.borrow_mut().take()
    }

    fn set_batch_next(&self, next: Option<Rc<dyn AnySubscriber>>) {
        *self.batch_next.borrow_mut() = next;
    }

    fn notify(&self) -> bool {
        self.flags.set(self.flags.get() | DIRTY);

        if self.flags.get() & NOTIFIED != 0 {
            return false;
        }
        // A computed invalidated from its own evaluation must not enqueue
        // itself.
        let active_is_self = with_context(|ctx| ctx.active_sub())
            .is_some_and(|sub| Rc::as_ptr(&sub) as *const () == self as *const Self as *const ());
        if active_is_self {
            return false;
        }

        if let Some(me) = self.upgrade() {
            batch_subscriber(&(me as Rc<dyn AnySubscriber>), true);
            return true;
        }
        false
    }

    /// The dirty-check + recompute routine.
    fn refresh(&self) {
        let flags = self.flags.get();
        // Attached and not dirtied: push notifications are authoritative.
        if flags & TRACKING != 0 && flags & DIRTY == 0 {
            return;
        }
        self.flags.set(flags & !DIRTY);

        // Nothing anywhere has triggered since the last refresh.
        let global = with_context(|ctx| ctx.global_version());
        if self.global_version.get() == global {
            return;
        }
        self.global_version.set(global);

        let Some(me) = self.upgrade() else { return };

        if !self.server_mode && self.flags.get() & EVALUATED != 0 {
            let as_sub: Rc<dyn AnySubscriber> = me.clone();
            let settled = (self.deps_head.get().is_none() && !self.marked_dirty.get())
                || !is_dirty(&as_sub);
            if settled {
                return;
            }
        }

        self.flags.set(self.flags.get() | RUNNING);
        self.marked_dirty.set(false);

        let as_sub: Rc<dyn AnySubscriber> = me.clone();
        let prev_sub = with_context(|ctx| ctx.set_active_sub(Some(as_sub)));
        let prev_track = with_context(|ctx| ctx.set_should_track(true));
        prepare_deps(self);

        // Restores tracking state and sweeps edges even when the getter
        // panics.
        struct RefreshGuard<'a, U: 'static> {
            computed: &'a ComputedInner<U>,
            prev_sub: Option<Rc<dyn AnySubscriber>>,
            prev_track: bool,
        }

        impl<U: 'static> Drop for RefreshGuard<'_, U> {
            fn drop(&mut self) {
                with_context(|ctx| {
                    ctx.set_active_sub(self.prev_sub.take());
                    ctx.set_should_track(self.prev_track);
                });
                cleanup_deps(self.computed);
                self.computed
                    .flags
                    .set(self.computed.flags.get() & !RUNNING);
            }
        }

        let guard = RefreshGuard {
            computed: self,
            prev_sub,
            prev_track,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let prev = self.value.borrow();
            let mut getter = self.getter.borrow_mut();
            let getter = getter.as_mut();
            getter(prev.as_ref())
        }));

        match outcome {
            Ok(next) => {
                let changed = self.dep.version() == 0 || {
                    let current = self.value.borrow();
                    match current.as_ref() {
                        Some(value) => !(self.equals)(value, &next),
                        None => true,
                    }
                };
                if changed {
                    self.flags.set(self.flags.get() | EVALUATED);
                    *self.value.borrow_mut() = Some(next);
                    self.dep.set_version(self.dep.version() + 1);
                }
                drop(guard);
            }
            Err(payload) => {
                // Downstream must re-check next time even though no new
                // value landed.
                self.dep.set_version(self.dep.version() + 1);
                drop(guard);
                resume_unwind(payload);
            }
        }
    }

    fn as_computed_dep(&self) -> Option<Rc<Dep>> {
        Some(self.dep.clone())
    }

    fn is_marked_dirty(&self) -> bool {
        self.marked_dirty.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// COMPUTED HANDLE
// =============================================================================

/// A lazy cached derivation with a `get`/`set` surface.
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: 'static> Computed<T> {
    fn from_parts(
        getter: ComputedGetter<T>,
        setter: Option<ComputedSetter<T>>,
        equals: EqualsFn<T>,
    ) -> Self {
        Self {
            inner: ComputedInner::new(getter, setter, equals),
        }
    }

    /// Read the value, refreshing if stale.
    ///
    /// Inside a tracking context the reader subscribes to this computed.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(Clone::clone)
    }

    /// Read through a closure without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let link = self.inner.dep.track();
        self.inner.refresh();
        if let Some(id) = link {
            with_context(|ctx| ctx.set_link_version(id, Some(self.inner.dep.version())));
        }
        f(self
            .inner
            .value
            .borrow()
            .as_ref()
            .expect("computed has no cached value to read"))
    }

    /// Write through the setter; warns and ignores the value without one.
    pub fn set(&self, value: T) {
        if self.try_set(value).is_err() {
            warn!("write to a computed without a setter was ignored");
        }
    }

    /// Write through the setter.
    pub fn try_set(&self, value: T) -> Result<(), ReadonlyWriteError> {
        let setter = self.inner.setter.borrow();
        match setter.as_ref() {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => Err(ReadonlyWriteError),
        }
    }

    /// Synchronously settle the cached value (for integrations that need a
    /// non-tracking read to be fresh).
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Force the next refresh to re-evaluate regardless of version checks.
    pub fn mark_dirty(&self) {
        self.inner.marked_dirty.set(true);
        self.inner
            .flags
            .set(self.inner.flags.get() | DIRTY);
        // Step off the global fast path: the mark arrived without a trigger.
        self.inner
            .global_version
            .set(self.inner.global_version.get().wrapping_sub(1));
    }

    /// Number of subscribers currently attached to this computed.
    pub fn subscriber_count(&self) -> u32 {
        self.inner.dep.sub_count()
    }

    /// Number of upstream dependencies recorded by the last evaluation.
    pub fn dep_count(&self) -> usize {
        crate::reactivity::tracking::dep_count(&*self.inner)
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed").field("value", &self.get()).finish()
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create a lazy cached computed.
///
/// The getter receives the previous value (when there is one) and is only
/// invoked when a dependency version check fails, never while nobody reads
/// the computed.
///
/// # Example
///
/// ```
/// use weft_reactive::computed;
///
/// let answer = computed(|_| 6 * 7);
/// assert_eq!(answer.get(), 42);
/// ```
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: FnMut(Option<&T>) -> T + 'static,
{
    Computed::from_parts(Box::new(getter), None, default_equals)
}

/// Create a computed with a custom change predicate.
pub fn computed_with_equals<T, F>(getter: F, equals: EqualsFn<T>) -> Computed<T>
where
    T: 'static,
    F: FnMut(Option<&T>) -> T + 'static,
{
    Computed::from_parts(Box::new(getter), None, equals)
}

/// Create a writable computed; `set` delegates to the setter.
pub fn computed_with_setter<T, F, S>(getter: F, setter: S) -> Computed<T>
where
    T: PartialEq + 'static,
    F: FnMut(Option<&T>) -> T + 'static,
    S: Fn(T) + 'static,
{
    Computed::from_parts(Box::new(getter), Some(Box::new(setter)), default_equals)
}

/// Settle a computed synchronously. Alias for `c.refresh()` kept as a free
/// function for integrations.
pub fn refresh_computed<T: 'static>(c: &Computed<T>) {
    c.refresh();
}

// =============================================================================
// TESTS
// =============================================================================
