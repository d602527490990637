// ============================================================================
// weft-reactive - Graph
// Deps, links and the intrusive lists that connect them
// ============================================================================

pub mod dep;
pub mod link;
