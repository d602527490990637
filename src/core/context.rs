// ============================================================================
// weft-reactive - Reactive Context
// Thread-local state for the whole reactive runtime
// ============================================================================
//
// One mutator at a time: the context is a thread-local singleton and every
// entry point goes through it. User callbacks re-enter the core freely, so
// fields are Cell/RefCell and every borrow is kept as short as possible.
//
// The Link arena also lives here. Links are addressed by LinkId handles and
// the arena is only ever borrowed for a single surgery pass at a time; the
// per-field accessors below each open and close their own borrow.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use slab::Slab;

use crate::core::types::AnySubscriber;
use crate::graph::dep::Dep;
use crate::graph::link::{Link, LinkId};

// =============================================================================
// REACTIVE CONTEXT
// =============================================================================

/// Thread-local reactive context holding all global state for reactivity.
pub struct ReactiveContext {
    // =========================================================================
    // TRACKING
    // =========================================================================
    /// Currently executing subscriber (effect or computed).
    active_sub: RefCell<Option<Rc<dyn AnySubscriber>>>,

    /// Whether reads currently register dependencies.
    should_track: Cell<bool>,

    /// Saved `should_track` values for pause/enable/reset nesting.
    track_stack: RefCell<Vec<bool>>,

    // =========================================================================
    // VERSIONS
    // =========================================================================
    /// Monotonic counter bumped on every trigger; the "anything changed
    /// anywhere" fast check for computeds.
    global_version: Cell<u64>,

    // =========================================================================
    // BATCHING
    // =========================================================================
    /// Current batch depth (nested batches collapse into the outermost).
    batch_depth: Cell<u32>,

    /// Head of the effect batch list, threaded through subscriber `next`
    /// pointers.
    batched_effects: RefCell<Option<Rc<dyn AnySubscriber>>>,

    /// Head of the computed batch list (kept separate so the flush can clear
    /// computed NOTIFIED bits without running anything).
    batched_computeds: RefCell<Option<Rc<dyn AnySubscriber>>>,

    /// Effects whose trigger arrived while they were paused.
    paused_effects: RefCell<Vec<Weak<dyn AnySubscriber>>>,

    // =========================================================================
    // LINK ARENA
    // =========================================================================
    /// Storage for every live edge of the graph.
    links: RefCell<Slab<Link>>,

    // =========================================================================
    // MISC
    // =========================================================================
    /// Server-render mode; computeds capture this at creation.
    server_mode: Cell<bool>,

    /// Source of registry target ids.
    next_target_id: Cell<u64>,
}

impl ReactiveContext {
    /// Create a new reactive context with default values.
    pub fn new() -> Self {
        Self {
            active_sub: RefCell::new(None),
            should_track: Cell::new(true),
            track_stack: RefCell::new(Vec::new()),
            global_version: Cell::new(0),
            batch_depth: Cell::new(0),
            batched_effects: RefCell::new(None),
            batched_computeds: RefCell::new(None),
            paused_effects: RefCell::new(Vec::new()),
            links: RefCell::new(Slab::new()),
            server_mode: Cell::new(false),
            next_target_id: Cell::new(1),
        }
    }

    // =========================================================================
    // TRACKING
    // =========================================================================

    /// Install the active subscriber, returning the previous one.
    pub fn set_active_sub(
        &self,
        sub: Option<Rc<dyn AnySubscriber>>,
    ) -> Option<Rc<dyn AnySubscriber>> {
        self.active_sub.replace(sub)
    }

    /// Get the active subscriber.
    pub fn active_sub(&self) -> Option<Rc<dyn AnySubscriber>> {
        self.active_sub.borrow().clone()
    }

    /// Check if a subscriber is currently running.
    pub fn has_active_sub(&self) -> bool {
        self.active_sub.borrow().is_some()
    }

    /// Whether reads currently register dependencies.
    pub fn should_track(&self) -> bool {
        self.should_track.get()
    }

    /// Set `should_track`, returning the previous value.
    pub fn set_should_track(&self, value: bool) -> bool {
        self.should_track.replace(value)
    }

    /// Push the current `should_track` and install a new value.
    pub fn push_track_state(&self, value: bool) {
        self.track_stack.borrow_mut().push(self.should_track.get());
        self.should_track.set(value);
    }

    /// Pop the last saved `should_track`; an empty stack restores the
    /// default (tracking enabled).
    pub fn pop_track_state(&self) {
        let restored = self.track_stack.borrow_mut().pop().unwrap_or(true);
        self.should_track.set(restored);
    }

    // =========================================================================
    // VERSIONS
    // =========================================================================

    /// Current global version.
    pub fn global_version(&self) -> u64 {
        self.global_version.get()
    }

    /// Increment and return the global version.
    pub fn bump_global_version(&self) -> u64 {
        let v = self.global_version.get() + 1;
        self.global_version.set(v);
        v
    }

    // =========================================================================
    // BATCHING
    // =========================================================================

    /// Increment batch depth, returning the new depth.
    pub fn enter_batch(&self) -> u32 {
        let depth = self.batch_depth.get() + 1;
        self.batch_depth.set(depth);
        depth
    }

    /// Decrement batch depth, returning the new depth.
    pub fn exit_batch(&self) -> u32 {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        depth
    }

    /// Current batch depth.
    pub fn batch_depth(&self) -> u32 {
        self.batch_depth.get()
    }

    /// Check if currently inside a batch.
    pub fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    /// Push a subscriber onto the head of a batch list.
    pub fn push_batched(&self, sub: Rc<dyn AnySubscriber>, computed: bool) {
        let list = if computed {
            &self.batched_computeds
        } else {
            &self.batched_effects
        };
        let head = list.borrow_mut().take();
        sub.set_batch_next(head);
        *list.borrow_mut() = Some(sub);
    }

    /// Take the whole effect batch list.
    pub fn take_batched_effects(&self) -> Option<Rc<dyn AnySubscriber>> {
        self.batched_effects.borrow_mut().take()
    }

    /// Take the whole computed batch list.
    pub fn take_batched_computeds(&self) -> Option<Rc<dyn AnySubscriber>> {
        self.batched_computeds.borrow_mut().take()
    }

    /// Park a paused effect whose trigger arrived; deduplicated by identity.
    pub fn queue_paused(&self, sub: &Rc<dyn AnySubscriber>) {
        let key = Rc::as_ptr(sub) as *const ();
        let mut queue = self.paused_effects.borrow_mut();
        let already = queue
            .iter()
            .any(|w| w.upgrade().is_some_and(|s| Rc::as_ptr(&s) as *const () == key));
        if !already {
            queue.push(Rc::downgrade(sub));
        }
    }

    /// Remove a subscriber from the paused queue, reporting whether it was
    /// parked there.
    pub fn unqueue_paused(&self, sub: &Rc<dyn AnySubscriber>) -> bool {
        let key = Rc::as_ptr(sub) as *const ();
        let mut queue = self.paused_effects.borrow_mut();
        let before = queue.len();
        queue.retain(|w| match w.upgrade() {
            Some(s) => Rc::as_ptr(&s) as *const () != key,
            None => false,
        });
        queue.len() != before
    }

    // =========================================================================
    // LINK ARENA
    // =========================================================================

    /// Run a surgery pass over the link arena.
    ///
    /// BORROW SAFETY: the closure must not re-enter any context method that
    /// touches the arena. Dep fields are Cells and subscriber accessors are
    /// Cell-backed, so graph surgery inside the closure is fine.
    pub fn with_links<R>(&self, f: impl FnOnce(&mut Slab<Link>) -> R) -> R {
        f(&mut self.links.borrow_mut())
    }

    /// The dep side of a link.
    pub fn link_dep(&self, id: LinkId) -> Rc<Dep> {
        self.links.borrow()[id.index()].dep.clone()
    }

    /// The subscriber side of a link, if it is still alive.
    pub fn link_sub(&self, id: LinkId) -> Option<Rc<dyn AnySubscriber>> {
        self.links.borrow()[id.index()].sub.upgrade()
    }

    /// The link's version stamp (`None` = armed, not yet re-read this run).
    pub fn link_version(&self, id: LinkId) -> Option<u64> {
        self.links.borrow()[id.index()].version
    }

    /// Set the link's version stamp.
    pub fn set_link_version(&self, id: LinkId, version: Option<u64>) {
        self.links.borrow_mut()[id.index()].version = version;
    }

    /// Next link in the owning subscriber's dep list.
    pub fn link_next_dep(&self, id: LinkId) -> Option<LinkId> {
        self.links.borrow()[id.index()].next_dep
    }

    /// Next link in the owning dep's subscriber list.
    pub fn link_next_sub(&self, id: LinkId) -> Option<LinkId> {
        self.links.borrow()[id.index()].next_sub
    }

    /// Number of live edges in the arena.
    pub fn live_link_count(&self) -> usize {
        self.links.borrow().len()
    }

    // =========================================================================
    // MISC
    // =========================================================================

    /// Server-render mode flag.
    pub fn server_mode(&self) -> bool {
        self.server_mode.get()
    }

    /// Set server-render mode (captured by computeds at creation).
    pub fn set_server_mode(&self, value: bool) {
        self.server_mode.set(value);
    }

    /// Mint a fresh registry target id.
    pub fn next_target_id(&self) -> u64 {
        let id = self.next_target_id.get();
        self.next_target_id.set(id + 1);
        id
    }
}

impl Default for ReactiveContext {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// THREAD-LOCAL ACCESS
// =============================================================================

thread_local! {
    /// The thread-local reactive context.
    static CONTEXT: ReactiveContext = ReactiveContext::new();
}

/// Access the thread-local reactive context.
pub fn with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> R {
    CONTEXT.with(f)
}

/// Access the context if the thread-local is still alive.
///
/// Drop impls use this: during thread teardown the context may already be
/// gone, in which case there is nothing left to unlink anyway.
pub fn try_with_context<R>(f: impl FnOnce(&ReactiveContext) -> R) -> Option<R> {
    CONTEXT.try_with(f).ok()
}

// =============================================================================
// CONVENIENCE FUNCTIONS
// =============================================================================

/// Check if reads are currently being tracked (an active subscriber exists
/// and tracking is enabled).
pub fn is_tracking() -> bool {
    with_context(|ctx| ctx.has_active_sub() && ctx.should_track())
}

/// Current global version. Monotonic; bumped on every trigger.
pub fn global_version() -> u64 {
    with_context(|ctx| ctx.global_version())
}

/// Toggle server-render mode. Boot-time: computeds capture the flag when
/// created, so flip it before building the graph.
pub fn set_server_mode(enabled: bool) {
    with_context(|ctx| ctx.set_server_mode(enabled));
}

/// Whether server-render mode is on.
pub fn is_server_mode() -> bool {
    with_context(|ctx| ctx.server_mode())
}

// =============================================================================
// TESTS
// =============================================================================
