// ============================================================================
// weft-reactive - Effect
// A side-effecting subscriber re-run when its dependency set changes
// ============================================================================
//
// An effect runs its function once at creation and again whenever a dep it
// actually read fires. The dep set is rebuilt on every run by the
// prepare/confirm/cleanup protocol in reactivity::tracking, so branches that
// stop reading a dep stop depending on it.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::core::constants::*;
use crate::core::context::{try_with_context, with_context};
use crate::core::types::AnySubscriber;
use crate::graph::link::{release_deps, LinkId};
use crate::primitives::scope::register_effect_with_scope;
use crate::reactivity::batching::batch_subscriber;
use crate::reactivity::tracking::{cleanup_deps, dep_count, is_dirty, prepare_deps};
use crate::reactivity::tracking::{pause_tracking, reset_tracking};

// =============================================================================
// TYPE ALIASES
// =============================================================================

/// The function an effect re-runs.
pub type EffectFn = Box<dyn FnMut()>;

/// Replaces the default "re-run when dirty" response to a trigger.
pub type SchedulerFn = Box<dyn Fn()>;

/// User cleanup invoked before the next run and on stop.
pub type CleanupFn = Box<dyn FnOnce()>;

// =============================================================================
// OPTIONS
// =============================================================================

/// Creation-time knobs for [`effect_with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Invoked instead of re-running when the effect is triggered; the
    /// scheduler decides when (or whether) to call the runner.
    pub scheduler: Option<SchedulerFn>,

    /// Let the effect notify itself from its own run (one pending rerun).
    pub allow_recurse: bool,

    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn FnOnce()>>,

    /// Debug hook: the effect recorded a dependency.
    pub on_track: Option<Box<dyn Fn()>>,

    /// Debug hook: a dependency of the effect fired.
    pub on_trigger: Option<Box<dyn Fn()>>,
}

// =============================================================================
// EFFECT INNER
// =============================================================================

/// The subscriber side of an effect.
pub struct EffectInner {
    flags: Cell<u32>,
    deps_head: Cell<Option<LinkId>>,
    deps_tail: Cell<Option<LinkId>>,
    batch_next: RefCell<Option<Rc<dyn AnySubscriber>>>,

    func: RefCell<Option<EffectFn>>,
    scheduler: RefCell<Option<SchedulerFn>>,
    cleanup: RefCell<Option<CleanupFn>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    on_track: RefCell<Option<Box<dyn Fn()>>>,
    on_trigger: RefCell<Option<Box<dyn Fn()>>>,

    /// Externally requested staleness; cleared by the next run.
    marked_dirty: Cell<bool>,

    /// A trigger reached this effect while it was running; with
    /// ALLOW_RECURSE the current pass is followed by exactly one more.
    rerun_requested: Cell<bool>,

    /// Weak self-reference for trait-object conversion.
    self_weak: RefCell<Weak<EffectInner>>,
}

impl EffectInner {
    pub(crate) fn new(func: EffectFn, options: EffectOptions) -> Rc<Self> {
        let mut flags = ACTIVE | TRACKING;
        if options.allow_recurse {
            flags |= ALLOW_RECURSE;
        }

        let effect = Rc::new(Self {
            flags: Cell::new(flags),
            deps_head: Cell::new(None),
            deps_tail: Cell::new(None),
            batch_next: RefCell::new(None),
            func: RefCell::new(Some(func)),
            scheduler: RefCell::new(options.scheduler),
            cleanup: RefCell::new(None),
            on_stop: RefCell::new(options.on_stop),
            on_track: RefCell::new(options.on_track),
            on_trigger: RefCell::new(options.on_trigger),
            marked_dirty: Cell::new(false),
            rerun_requested: Cell::new(false),
            self_weak: RefCell::new(Weak::new()),
        });
        *effect.self_weak.borrow_mut() = Rc::downgrade(&effect);
        effect
    }

    fn upgrade(&self) -> Option<Rc<EffectInner>> {
        self.self_weak.borrow().upgrade()
    }

    pub(crate) fn set_cleanup(&self, cleanup: Option<CleanupFn>) {
        *self.cleanup.borrow_mut() = cleanup;
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.borrow_mut().take() {
            cleanup();
        }
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

impl AnySubscriber for EffectInner {
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
        let flags = self.flags.get();
        if flags & RUNNING != 0 && flags & ALLOW_RECURSE == 0 {
            return false;
        }
        if flags & NOTIFIED == 0 {
            if let Some(me) = self.upgrade() {
                batch_subscriber(&(me as Rc<dyn AnySubscriber>), false);
            }
        }
        false
    }

    fn trigger(&self) {
        let Some(me) = self.upgrade() else { return };

        if self.flags.get() & PAUSED != 0 {
            with_context(|ctx| ctx.queue_paused(&(me as Rc<dyn AnySubscriber>)));
        } else if self.scheduler.borrow().is_some() {
            let scheduler = self.scheduler.borrow();
            if let Some(scheduler) = scheduler.as_ref() {
                scheduler();
            }
        } else {
            run_if_dirty(&me);
        }
    }

    fn is_marked_dirty(&self) -> bool {
        self.marked_dirty.get()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn on_track_hook(&self) {
        if let Some(hook) = self.on_track.borrow().as_ref() {
            hook();
        }
    }

    fn on_trigger_hook(&self) {
        if let Some(hook) = self.on_trigger.borrow().as_ref() {
            hook();
        }
    }
}

// =============================================================================
// RUN / STOP
// =============================================================================

/// Run an effect's function with full dependency tracking.
///
/// A stopped effect still executes its function, just without any tracking
/// setup; the runner keeps working as a plain function.
pub(crate) fn run_effect(effect: &Rc<EffectInner>) {
    if effect.flags.get() & ACTIVE == 0 {
        if let Some(func) = effect.func.borrow_mut().as_mut() {
            func();
        }
        return;
    }

    if effect.flags.get() & RUNNING != 0 {
        // Re-entrant call from a nested flush: remember it and let the
        // current pass finish. ALLOW_RECURSE turns the memo into one more
        // pass below; without it the memo is discarded.
        effect.rerun_requested.set(true);
        return;
    }

    loop {
        run_effect_pass(effect);

        let again = effect.rerun_requested.replace(false)
            && effect.flags.get() & ALLOW_RECURSE != 0
            && effect.flags.get() & ACTIVE != 0;
        if !again {
            break;
        }
    }
}

/// One tracked execution of the effect's function.
fn run_effect_pass(effect: &Rc<EffectInner>) {
    effect.set_flags(effect.flags() | RUNNING);
    run_registered_cleanup(effect);
    effect.marked_dirty.set(false);
    prepare_deps(&**effect);

    let as_sub: Rc<dyn AnySubscriber> = effect.clone();
    let prev_sub = with_context(|ctx| ctx.set_active_sub(Some(as_sub)));
    let prev_track = with_context(|ctx| ctx.set_should_track(true));

    // Unwinds the tracking state even when the function panics.
    struct RunGuard {
        effect: Rc<EffectInner>,
        prev_sub: Option<Rc<dyn AnySubscriber>>,
        prev_track: bool,
    }

    impl Drop for RunGuard {
        fn drop(&mut self) {
            let still_us = with_context(|ctx| match ctx.active_sub() {
                Some(sub) => {
                    Rc::as_ptr(&sub) as *const () == Rc::as_ptr(&self.effect) as *const ()
                }
                None => false,
            });
            if !still_us {
                warn!("active subscriber was not restored after an effect run");
            }

            cleanup_deps(&*self.effect);
            with_context(|ctx| {
                ctx.set_active_sub(self.prev_sub.take());
                ctx.set_should_track(self.prev_track);
            });
            self.effect
                .set_flags(self.effect.flags() & !RUNNING);
        }
    }

    let _guard = RunGuard {
        effect: effect.clone(),
        prev_sub,
        prev_track,
    };

    if let Some(func) = effect.func.borrow_mut().as_mut() {
        func();
    }
}

/// Re-run only when some dependency actually changed.
pub(crate) fn run_if_dirty(effect: &Rc<EffectInner>) {
    let as_sub: Rc<dyn AnySubscriber> = effect.clone();
    if is_dirty(&as_sub) {
        run_effect(effect);
    }
}

/// Tear an effect out of the graph. Idempotent.
pub(crate) fn stop_effect(effect: &Rc<EffectInner>) {
    if effect.flags.get() & ACTIVE == 0 {
        return;
    }
    with_context(|ctx| ctx.with_links(|links| release_deps(links, &**effect)));
    run_registered_cleanup(effect);
    if let Some(hook) = effect.on_stop.borrow_mut().take() {
        hook();
    }
    effect.set_flags(effect.flags() & !ACTIVE);
}

/// Run the user cleanup registered during the previous run.
///
/// The cleanup sees no active subscriber and no tracking, so reads inside it
/// never leak edges onto the effect.
fn run_registered_cleanup(effect: &EffectInner) {
    let Some(cleanup) = effect.cleanup.borrow_mut().take() else {
        return;
    };

    let prev_sub = with_context(|ctx| ctx.set_active_sub(None));
    pause_tracking();

    struct CleanupGuard {
        prev_sub: Option<Rc<dyn AnySubscriber>>,
    }

    impl Drop for CleanupGuard {
        fn drop(&mut self) {
            reset_tracking();
            with_context(|ctx| ctx.set_active_sub(self.prev_sub.take()));
        }
    }

    let _guard = CleanupGuard { prev_sub };
    cleanup();
}

// =============================================================================
// EFFECT HANDLE
// =============================================================================

/// Runner handle for an effect.
///
/// Clones share the same effect. Dropping the last handle stops it, unless a
/// scope owns it.
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    pub(crate) fn from_inner(inner: Rc<EffectInner>) -> Self {
        Self { inner }
    }

    /// Re-run the effect's function unconditionally.
    pub fn run(&self) {
        run_effect(&self.inner);
    }

    /// Stop the effect: drop all edges, run the registered cleanup, invoke
    /// `on_stop`. Further triggers are no-ops. Idempotent.
    pub fn stop(&self) {
        stop_effect(&self.inner);
    }

    /// Park the effect; triggers while paused are remembered once.
    pub fn pause(&self) {
        self.inner.set_flags(self.inner.flags() | PAUSED);
    }

    /// Un-park the effect; if a trigger arrived while paused, it fires now.
    pub fn resume(&self) {
        if self.inner.flags.get() & PAUSED == 0 {
            return;
        }
        self.inner.set_flags(self.inner.flags() & !PAUSED);

        let as_sub: Rc<dyn AnySubscriber> = self.inner.clone();
        let was_queued = with_context(|ctx| ctx.unqueue_paused(&as_sub));
        if was_queued {
            self.inner.trigger();
        }
    }

    /// Whether some dependency changed since the last run.
    pub fn dirty(&self) -> bool {
        let as_sub: Rc<dyn AnySubscriber> = self.inner.clone();
        is_dirty(&as_sub)
    }

    /// Force the next dirty check to report stale.
    pub fn mark_dirty(&self) {
        self.inner.marked_dirty.set(true);
    }

    /// Whether the effect has not been stopped.
    pub fn is_active(&self) -> bool {
        self.inner.flags.get() & ACTIVE != 0
    }

    /// Number of dependencies recorded by the last run.
    pub fn dep_count(&self) -> usize {
        dep_count(&*self.inner)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        // Last handle going away stops the effect; a scope holding the inner
        // keeps it alive past this point on purpose.
        if Rc::strong_count(&self.inner) == 1 {
            self.stop();
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create an effect and run it once immediately.
///
/// # Example
///
/// ```
/// use weft_reactive::{computed, effect};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let doubled = computed(|_| 21 * 2);
/// let seen = Rc::new(Cell::new(0));
///
/// let seen_in_effect = seen.clone();
/// let doubled_in_effect = doubled.clone();
/// let runner = effect(move || {
///     seen_in_effect.set(doubled_in_effect.get());
/// });
///
/// assert_eq!(seen.get(), 42);
/// runner.stop();
/// ```
pub fn effect<F>(f: F) -> Effect
where
    F: FnMut() + 'static,
{
    effect_with_options(f, EffectOptions::default())
}

/// Create an effect with scheduler, recursion and lifecycle options.
///
/// If the first run panics the effect is stopped before the panic resumes.
pub fn effect_with_options<F>(f: F, options: EffectOptions) -> Effect
where
    F: FnMut() + 'static,
{
    let inner = EffectInner::new(Box::new(f), options);
    let handle = Effect::from_inner(inner);
    register_effect_with_scope(&handle);

    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handle.run())) {
        handle.stop();
        resume_unwind(payload);
    }
    handle
}

/// Stop a runner. Idempotent.
pub fn stop(runner: &Effect) {
    runner.stop();
}

/// Register a cleanup on the currently running effect.
///
/// The cleanup runs before the effect's next run and on stop, with tracking
/// disabled and no active subscriber. Outside an effect this warns unless
/// `fail_silently` is set.
pub fn on_effect_cleanup<F>(f: F, fail_silently: bool)
where
    F: FnOnce() + 'static,
{
    let mut attached = false;
    with_context(|ctx| {
        if let Some(sub) = ctx.active_sub() {
            if let Some(effect) = sub.as_any().downcast_ref::<EffectInner>() {
                effect.set_cleanup(Some(Box::new(f)));
                attached = true;
            }
        }
    });

    if !attached && !fail_silently {
        warn!("on_effect_cleanup called outside of an active effect");
    }
}

// =============================================================================
// TESTS
// =============================================================================
