// ============================================================================
// weft-reactive - Effect Scope
// Group effects for bulk disposal, with pause/resume and nesting
// ============================================================================
//
// Effects created while a scope is active are collected by it. Stopping the
// scope stops them all, runs registered cleanups in reverse order and stops
// child scopes. Detached scopes opt out of parent collection.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::primitives::effect::Effect;

// =============================================================================
// THREAD-LOCAL SCOPE STATE
// =============================================================================

thread_local! {
    /// Currently active scope (if any).
    static ACTIVE_SCOPE: RefCell<Option<Rc<EffectScopeInner>>> = const { RefCell::new(None) };
}

fn get_active_scope() -> Option<Rc<EffectScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.borrow().clone())
}

fn set_active_scope(scope: Option<Rc<EffectScopeInner>>) -> Option<Rc<EffectScopeInner>> {
    ACTIVE_SCOPE.with(|s| s.replace(scope))
}

// =============================================================================
// CLEANUP TYPE
// =============================================================================

/// Cleanup function run when a scope stops.
pub type ScopeCleanupFn = Box<dyn FnOnce()>;

// =============================================================================
// EFFECT SCOPE INNER
// =============================================================================

struct EffectScopeInner {
    active: Cell<bool>,
    paused: Cell<bool>,
    effects: RefCell<Vec<Effect>>,
    cleanups: RefCell<Vec<ScopeCleanupFn>>,
    parent: RefCell<Option<Weak<EffectScopeInner>>>,
    scopes: RefCell<Vec<Rc<EffectScopeInner>>>,
    self_weak: RefCell<Weak<EffectScopeInner>>,
}

impl EffectScopeInner {
    fn new(detached: bool) -> Rc<Self> {
        let parent = if detached { None } else { get_active_scope() };

        let scope = Rc::new(Self {
            active: Cell::new(true),
            paused: Cell::new(false),
            effects: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: RefCell::new(parent.as_ref().map(Rc::downgrade)),
            scopes: RefCell::new(Vec::new()),
            self_weak: RefCell::new(Weak::new()),
        });
        *scope.self_weak.borrow_mut() = Rc::downgrade(&scope);

        if let Some(ref parent_scope) = parent {
            parent_scope.scopes.borrow_mut().push(scope.clone());
        }
        scope
    }

    fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.active.get() {
            return None;
        }
        let self_rc = self.self_weak.borrow().upgrade()?;

        let prev_scope = set_active_scope(Some(self_rc));

        struct ScopeGuard {
            prev: Option<Rc<EffectScopeInner>>,
        }

        impl Drop for ScopeGuard {
            fn drop(&mut self) {
                set_active_scope(self.prev.take());
            }
        }

        let _guard = ScopeGuard { prev: prev_scope };
        Some(f())
    }

    fn stop(&self) {
        if !self.active.get() {
            return;
        }
        self.active.set(false);

        let effects: Vec<_> = self.effects.borrow_mut().drain(..).collect();
        for effect in effects {
            effect.stop();
        }

        // LIFO, matching acquisition order of whatever the cleanups release.
        let cleanups: Vec<_> = self.cleanups.borrow_mut().drain(..).collect();
        for cleanup in cleanups.into_iter().rev() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cleanup));
        }

        let children: Vec<_> = self.scopes.borrow_mut().drain(..).collect();
        for child in children {
            child.stop();
        }

        if let Some(parent) = self.parent.borrow().as_ref().and_then(Weak::upgrade) {
            if let Some(self_rc) = self.self_weak.borrow().upgrade() {
                parent
                    .scopes
                    .borrow_mut()
                    .retain(|s| !Rc::ptr_eq(s, &self_rc));
            }
        }
    }

    fn pause(&self) {
        if !self.active.get() || self.paused.get() {
            return;
        }
        self.paused.set(true);

        for effect in self.effects.borrow().iter() {
            effect.pause();
        }
        for child in self.scopes.borrow().iter() {
            child.pause();
        }
    }

    fn resume(&self) {
        if !self.active.get() || !self.paused.get() {
            return;
        }
        self.paused.set(false);

        for effect in self.effects.borrow().iter() {
            effect.resume();
        }
        for child in self.scopes.borrow().iter() {
            child.resume();
        }
    }
}

impl Drop for EffectScopeInner {
    fn drop(&mut self) {
        if self.active.get() {
            self.stop();
        }
    }
}

// =============================================================================
// EFFECT SCOPE (public wrapper)
// =============================================================================

/// Groups effects so they can be stopped together.
///
/// # Example
///
/// ```
/// use weft_reactive::{effect, effect_scope};
///
/// let scope = effect_scope(false);
/// scope.run(|| {
///     effect(|| { /* collected by the scope */ });
/// });
/// scope.stop();
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<EffectScopeInner>,
}

impl EffectScope {
    /// Whether the scope has not been stopped.
    pub fn active(&self) -> bool {
        self.inner.active.get()
    }

    /// Whether the scope is paused.
    pub fn paused(&self) -> bool {
        self.inner.paused.get()
    }

    /// Run a closure with this scope collecting created effects.
    ///
    /// Returns `None` once the scope is stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.inner.run(f)
    }

    /// Stop every collected effect, run cleanups (reverse order), stop child
    /// scopes. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Pause every collected effect and child scope.
    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Resume; effects triggered while paused catch up once.
    pub fn resume(&self) {
        self.inner.resume();
    }

    /// Number of effects collected so far.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }
}

impl Drop for EffectScope {
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) == 1 {
            self.inner.stop();
        }
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Create an effect scope. `detached` opts out of collection by the
/// enclosing scope.
pub fn effect_scope(detached: bool) -> EffectScope {
    EffectScope {
        inner: EffectScopeInner::new(detached),
    }
}

/// The scope currently collecting effects, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    get_active_scope().map(|inner| EffectScope { inner })
}

/// Register a cleanup on the current scope; runs when the scope stops.
pub fn on_scope_dispose<F: FnOnce() + 'static>(f: F) {
    match get_active_scope() {
        Some(scope) => scope.cleanups.borrow_mut().push(Box::new(f)),
        None => warn!("on_scope_dispose called outside of an active scope"),
    }
}

/// Collect a freshly created effect into the current scope.
pub(crate) fn register_effect_with_scope(effect: &Effect) {
    if let Some(scope) = get_active_scope() {
        scope.effects.borrow_mut().push(effect.clone());
    }
}

// =============================================================================
// TESTS
// =============================================================================
