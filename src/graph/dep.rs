// ============================================================================
// weft-reactive - Dep
// A single reactive source: owns its subscriber list, issues track/trigger
// ============================================================================
//
// A dep is one reactive key. Registry deps are created lazily on first track
// of a (target, key) pair; computed-owned deps are created with the computed
// and front it for downstream readers.
//
// The subscriber list is intrusive: the dep holds head/tail LinkIds and the
// links thread themselves. Notification walks tail→head, which combined with
// the batch list's push-to-head makes the final flush run effects in
// registration order.
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use slab::Slab;

use crate::core::constants::*;
use crate::core::context::with_context;
use crate::core::types::{same_subscriber, AnySubscriber};
use crate::graph::link::{Link, LinkId};
use crate::reactivity::batching::BatchGuard;
use crate::registry::{Key, TargetId};

// =============================================================================
// DEP
// =============================================================================

/// A single reactive source.
pub struct Dep {
    /// Bumped on every trigger; links stamp this to detect staleness.
    version: Cell<u64>,

    /// Tail of the subscriber list (notification order is tail→head).
    subs_tail: Cell<Option<LinkId>>,

    /// Head of the subscriber list; debug hooks fire in registration order.
    subs_head: Cell<Option<LinkId>>,

    /// The link owned by the subscriber currently mid-run, if any. Lets
    /// `track` recognize an existing edge in O(1).
    active_link: Cell<Option<LinkId>>,

    /// Number of links currently attached in the subscriber list.
    sub_count: Cell<u32>,

    /// Registry slot for O(1) eviction once the last subscriber detaches.
    registry_slot: RefCell<Option<(TargetId, Option<Key>)>>,

    /// Set when this dep fronts a computed: reading the computed reads this.
    computed: RefCell<Option<Weak<dyn AnySubscriber>>>,

    /// Weak self-reference so `track` can mint owning links from `&self`.
    self_weak: RefCell<Weak<Dep>>,
}

impl Dep {
    /// Create a fresh dep with no subscribers.
    pub fn new() -> Rc<Self> {
        let dep = Rc::new(Self {
            version: Cell::new(0),
            subs_tail: Cell::new(None),
            subs_head: Cell::new(None),
            active_link: Cell::new(None),
            sub_count: Cell::new(0),
            registry_slot: RefCell::new(None),
            computed: RefCell::new(None),
            self_weak: RefCell::new(Weak::new()),
        });
        *dep.self_weak.borrow_mut() = Rc::downgrade(&dep);
        dep
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    pub(crate) fn set_version(&self, version: u64) {
        self.version.set(version);
    }

    /// Number of attached subscriber links.
    pub fn sub_count(&self) -> u32 {
        self.sub_count.get()
    }

    pub(crate) fn set_sub_count(&self, count: u32) {
        self.sub_count.set(count);
    }

    pub(crate) fn subs_tail(&self) -> Option<LinkId> {
        self.subs_tail.get()
    }

    pub(crate) fn set_subs_tail(&self, link: Option<LinkId>) {
        self.subs_tail.set(link);
    }

    pub(crate) fn subs_head(&self) -> Option<LinkId> {
        self.subs_head.get()
    }

    pub(crate) fn set_subs_head(&self, link: Option<LinkId>) {
        self.subs_head.set(link);
    }

    pub(crate) fn active_link(&self) -> Option<LinkId> {
        self.active_link.get()
    }

    pub(crate) fn set_active_link(&self, link: Option<LinkId>) {
        self.active_link.set(link);
    }

    /// The computed this dep fronts, if any.
    pub(crate) fn computed(&self) -> Option<Rc<dyn AnySubscriber>> {
        self.computed.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_computed(&self, owner: Weak<dyn AnySubscriber>) {
        *self.computed.borrow_mut() = Some(owner);
    }

    pub(crate) fn set_registry_slot(&self, target: TargetId, key: Option<Key>) {
        *self.registry_slot.borrow_mut() = Some((target, key));
    }

    /// Drop this dep's registry entry, if it has one.
    pub(crate) fn remove_from_registry(&self) {
        if let Some((target, key)) = self.registry_slot.borrow_mut().take() {
            crate::registry::evict(target, key);
        }
    }

    // =========================================================================
    // TRACK
    // =========================================================================

    /// Record the active subscriber as a reader of this dep.
    ///
    /// Returns the link for the edge, or `None` outside a tracking context.
    /// A computed never tracks its own dep.
    pub fn track(&self) -> Option<LinkId> {
        if !crate::core::context::is_tracking() {
            return None;
        }
        let active = with_context(|ctx| ctx.active_sub())?;
        let me = self.self_weak.borrow().upgrade()?;

        if let Some(owner) = self.computed() {
            if same_subscriber(&owner, &active) {
                return None;
            }
        }

        let reused = match self.active_link.get() {
            Some(id) => with_context(|ctx| ctx.link_sub(id))
                .is_some_and(|sub| same_subscriber(&sub, &active))
                .then_some(id),
            None => None,
        };

        let link = match reused {
            Some(id) => {
                // Edge armed by prepare_deps: confirm it for this run and
                // splice it to the tail so the dep list stays in access
                // order, which is what lets cleanup walk tail→head.
                if with_context(|ctx| ctx.link_version(id)).is_none() {
                    with_context(|ctx| {
                        ctx.set_link_version(id, Some(self.version.get()));
                        ctx.with_links(|links| splice_to_deps_tail(links, id, &*active));
                    });
                }
                id
            }
            None => {
                let id = with_context(|ctx| {
                    ctx.with_links(|links| {
                        let link = Link::new(me, &active);
                        let id = append_to_deps_tail(links, link, &*active);
                        add_sub(links, id);
                        id
                    })
                });
                self.active_link.set(Some(id));
                id
            }
        };

        active.on_track_hook();
        Some(link)
    }

    // =========================================================================
    // TRIGGER / NOTIFY
    // =========================================================================

    /// Record a change: bump versions and notify subscribers.
    pub fn trigger(&self) {
        self.version.set(self.version.get() + 1);
        with_context(|ctx| ctx.bump_global_version());
        self.notify();
    }

    /// Notify all subscribers inside a batch.
    ///
    /// Notification order is tail→head; a computed that reports fresh
    /// dirtiness gets its own dep notified in turn, forward-propagating into
    /// downstream subscribers while keeping the recursion shallow.
    pub fn notify(&self) {
        let _batch = BatchGuard::new();

        // BORROW SAFETY: collect first, then call out. Hooks and notify
        // bodies are user-adjacent code and may restructure the very list
        // being walked.
        let mut in_registration_order = Vec::new();
        let mut cursor = self.subs_head.get();
        while let Some(id) = cursor {
            let (sub, next) = with_context(|ctx| (ctx.link_sub(id), ctx.link_next_sub(id)));
            if let Some(sub) = sub {
                in_registration_order.push(sub);
            }
            cursor = next;
        }

        // Debug hooks see triggers in registration order.
        for sub in &in_registration_order {
            sub.on_trigger_hook();
        }

        for sub in in_registration_order.iter().rev() {
            if sub.notify() {
                if let Some(dep) = sub.as_computed_dep() {
                    dep.notify();
                }
            }
        }
    }
}

// =============================================================================
// LIST HELPERS
// =============================================================================

/// Insert a fresh link at the tail of its subscriber's dep list.
fn append_to_deps_tail(links: &mut Slab<Link>, mut link: Link, sub: &dyn AnySubscriber) -> LinkId {
    let tail = sub.deps_tail();
    link.prev_dep = tail;
    let id = LinkId::new(links.insert(link));
    match tail {
        Some(tail) => links[tail.index()].next_dep = Some(id),
        None => sub.set_deps_head(Some(id)),
    }
    sub.set_deps_tail(Some(id));
    id
}

/// Move a reused link to the tail of its subscriber's dep list, preserving
/// the invariant that the list is ordered by access order of the current run.
fn splice_to_deps_tail(links: &mut Slab<Link>, id: LinkId, sub: &dyn AnySubscriber) {
    let Some(next) = links[id.index()].next_dep else {
        return; // already the tail
    };
    let prev = links[id.index()].prev_dep;

    links[next.index()].prev_dep = prev;
    if let Some(prev) = prev {
        links[prev.index()].next_dep = Some(next);
    }
    if sub.deps_head() == Some(id) {
        sub.set_deps_head(Some(next));
    }

    let tail = sub.deps_tail();
    links[id.index()].prev_dep = tail;
    links[id.index()].next_dep = None;
    if let Some(tail) = tail {
        links[tail.index()].next_dep = Some(id);
    }
    sub.set_deps_tail(Some(id));
}

/// Attach a link to its dep's subscriber list.
///
/// Only subscribers carrying TRACKING attach; a computed read outside any
/// subscriber context keeps its dep-list edges without joining subscriber
/// lists (it will be pulled by version checks instead of pushed).
///
/// When the attaching edge gives a computed's dep its first subscriber, the
/// computed switches to TRACKING|DIRTY and re-attaches its own upstream
/// edges recursively: lazy subscription of computed chains.
pub(crate) fn add_sub(links: &mut Slab<Link>, id: LinkId) {
    let (dep, sub) = {
        let link = &links[id.index()];
        (link.dep.clone(), link.sub.upgrade())
    };
    let Some(sub) = sub else { return };

    if sub.flags() & TRACKING == 0 {
        return;
    }
    if crate::graph::link::is_attached(links, id) {
        return;
    }

    if let Some(owner) = dep.computed() {
        if dep.subs_tail().is_none() {
            owner.set_flags(owner.flags() | TRACKING | DIRTY);
            let mut cursor = owner.deps_head();
            while let Some(link_id) = cursor {
                let next = links[link_id.index()].next_dep;
                add_sub(links, link_id);
                cursor = next;
            }
        }
    }

    let tail = dep.subs_tail();
    if tail != Some(id) {
        links[id.index()].prev_sub = tail;
        if let Some(tail) = tail {
            links[tail.index()].next_sub = Some(id);
        }
    }
    if dep.subs_head().is_none() {
        dep.set_subs_head(Some(id));
    }
    dep.set_subs_tail(Some(id));
    dep.set_sub_count(dep.sub_count() + 1);
}

// =============================================================================
// TESTS
// =============================================================================
