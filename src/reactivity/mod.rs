// ============================================================================
// weft-reactive - Reactivity
// Tracking discipline and the batch scheduler
// ============================================================================

pub mod batching;
pub mod equality;
pub mod tracking;
