// ============================================================================
// weft-reactive - Constants
// Flag bits shared by every subscriber in the reactive graph
// ============================================================================

// =============================================================================
// SUBSCRIBER FLAGS
// =============================================================================

/// Subscriber participates in the graph; cleared by `stop()`.
pub const ACTIVE: u32 = 1 << 0;

/// Subscriber's function is executing right now.
pub const RUNNING: u32 = 1 << 1;

/// Subscriber is attached to its deps' subscriber lists.
///
/// Effects carry this bit for their whole active life. Computeds gain it when
/// they acquire their first subscriber and shed it again when the last one
/// leaves (soft unsubscribe).
pub const TRACKING: u32 = 1 << 2;

/// Subscriber sits in a batch list awaiting the outermost flush.
///
/// Guards against double-enqueueing; the batch `next` pointer is only
/// meaningful while this bit is set.
pub const NOTIFIED: u32 = 1 << 3;

/// Computed's cached value is stale and must be recomputed on next read.
pub const DIRTY: u32 = 1 << 4;

/// Effect may notify itself from its own run (at most one pending rerun).
pub const ALLOW_RECURSE: u32 = 1 << 5;

/// Effect is paused; triggers park it in the paused queue until resume.
pub const PAUSED: u32 = 1 << 6;

/// Computed has produced a value at least once.
pub const EVALUATED: u32 = 1 << 7;

// =============================================================================
// TESTS
// =============================================================================
