// ============================================================================
// weft-reactive - Core
// Flags, shared types and the thread-local reactive context
// ============================================================================

pub mod constants;
pub mod context;
pub mod types;
