// ============================================================================
// weft-reactive - Link
// The edge between one Dep and one Subscriber, node in two intrusive lists
// ============================================================================
//
// Links live in an arena (a slab inside the thread-local context) and are
// addressed by stable `LinkId` handles. Each link is threaded through two
// doubly-linked lists at once: its dep's subscriber list and its subscriber's
// dep list. The two unlinks are always paired; the arena slot is freed only
// when the edge leaves both lists.
// ============================================================================

use std::rc::{Rc, Weak};

use slab::Slab;

use crate::core::constants::TRACKING;
use crate::core::types::AnySubscriber;
use crate::graph::dep::Dep;

// =============================================================================
// LINK ID
// =============================================================================

/// Stable handle to a [`Link`] in the arena.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct LinkId(u32);

impl LinkId {
    /// Wrap a raw slab index.
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    /// Convert to a slab index.
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

// =============================================================================
// LINK
// =============================================================================

/// One edge of the dep ⇄ subscriber graph.
pub struct Link {
    /// The dep side of the edge. Subscribers keep their deps alive.
    pub(crate) dep: Rc<Dep>,

    /// The subscriber side. Weak so that a dep's readers can be dropped.
    pub(crate) sub: Weak<dyn AnySubscriber>,

    /// Stamp of `dep.version` when this edge was last confirmed by a run.
    ///
    /// `None` means the edge is armed: the subscriber is mid-run and has not
    /// (yet) re-read the dep. Edges still `None` when the run finishes are
    /// stale and get dropped by `cleanup_deps`.
    pub(crate) version: Option<u64>,

    /// Position in the subscriber's dep list.
    pub(crate) prev_dep: Option<LinkId>,
    pub(crate) next_dep: Option<LinkId>,

    /// Position in the dep's subscriber list.
    pub(crate) prev_sub: Option<LinkId>,
    pub(crate) next_sub: Option<LinkId>,

    /// The dep's `active_link` as saved by `prepare_deps`, restored on exit.
    /// Makes nested subscriber runs see the right owner on re-entry.
    pub(crate) prev_active_link: Option<LinkId>,
}

impl Link {
    /// Fresh edge, stamped with the dep's current version and not yet wired
    /// into either list.
    pub(crate) fn new(dep: Rc<Dep>, sub: &Rc<dyn AnySubscriber>) -> Self {
        let version = Some(dep.version());
        Self {
            dep,
            sub: Rc::downgrade(sub),
            version,
            prev_dep: None,
            next_dep: None,
            prev_sub: None,
            next_sub: None,
            prev_active_link: None,
        }
    }
}

// =============================================================================
// LIST SURGERY
// =============================================================================
//
// All helpers below take `&mut Slab<Link>` and run inside a single arena
// borrow. They only touch Cell-backed fields on Dep and trait accessors on
// subscribers, so no other RefCell can alias the arena mid-surgery.
// =============================================================================

/// Whether the link is currently wired into its dep's subscriber list.
pub(crate) fn is_attached(links: &Slab<Link>, id: LinkId) -> bool {
    let link = &links[id.index()];
    link.prev_sub.is_some() || link.next_sub.is_some() || link.dep.subs_tail() == Some(id)
}

/// Detach a link from its dep's subscriber list.
///
/// `soft` keeps the edge alive for re-attachment (the computed
/// soft-unsubscribe path); a hard removal additionally evicts the dep from
/// the registry once its last attached subscriber is gone.
///
/// Detached links are a no-op: the edge already left the list and was
/// already accounted for.
pub(crate) fn remove_sub(links: &mut Slab<Link>, id: LinkId, soft: bool) {
    if !is_attached(links, id) {
        return;
    }

    let (dep, prev_sub, next_sub) = {
        let link = &links[id.index()];
        (link.dep.clone(), link.prev_sub, link.next_sub)
    };

    if let Some(prev) = prev_sub {
        links[prev.index()].next_sub = next_sub;
        links[id.index()].prev_sub = None;
    }
    if let Some(next) = next_sub {
        links[next.index()].prev_sub = prev_sub;
        links[id.index()].next_sub = None;
    }

    if dep.subs_head() == Some(id) {
        dep.set_subs_head(next_sub);
    }

    if dep.subs_tail() == Some(id) {
        dep.set_subs_tail(prev_sub);

        if prev_sub.is_none() {
            if let Some(owner) = dep.computed() {
                // Last reader left a computed's dep: the computed lets go of
                // its upstream edges but keeps the link objects so a future
                // subscriber can re-arm the same dependency set in O(n).
                owner.set_flags(owner.flags() & !TRACKING);
                let mut cursor = owner.deps_head();
                while let Some(link_id) = cursor {
                    let next = links[link_id.index()].next_dep;
                    remove_sub(links, link_id, true);
                    cursor = next;
                }
            }
        }
    }

    let remaining = dep.sub_count().saturating_sub(1);
    dep.set_sub_count(remaining);
    if !soft && remaining == 0 {
        dep.remove_from_registry();
    }
}

/// Detach a link from its subscriber's dep list.
///
/// Neighbor pointers only; the subscriber's head/tail are owned by the
/// caller (`cleanup_deps` rebuilds them while walking).
pub(crate) fn remove_dep(links: &mut Slab<Link>, id: LinkId) {
    let (prev_dep, next_dep) = {
        let link = &links[id.index()];
        (link.prev_dep, link.next_dep)
    };

    if let Some(prev) = prev_dep {
        links[prev.index()].next_dep = next_dep;
        links[id.index()].prev_dep = None;
    }
    if let Some(next) = next_dep {
        links[next.index()].prev_dep = prev_dep;
        links[id.index()].next_dep = None;
    }
}

/// Drop every edge a subscriber owns: unlink both sides and free the arena
/// slots. Used by `Effect::stop` and when a computed is destroyed.
pub(crate) fn release_deps(links: &mut Slab<Link>, sub: &dyn AnySubscriber) {
    let mut cursor = sub.deps_head();
    while let Some(id) = cursor {
        let next = links[id.index()].next_dep;
        remove_sub(links, id, false);
        free_link(links, id);
        cursor = next;
    }
    sub.set_deps_head(None);
    sub.set_deps_tail(None);
}

/// Free an arena slot, dropping any `active_link` reference into it first.
/// A dangling handle here would alias whatever edge reuses the slot.
pub(crate) fn free_link(links: &mut Slab<Link>, id: LinkId) {
    if links[id.index()].dep.active_link() == Some(id) {
        links[id.index()].dep.set_active_link(None);
    }
    links.remove(id.index());
}

// =============================================================================
// TESTS
// =============================================================================
