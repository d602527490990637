// ============================================================================
// weft-reactive - Change Predicates
// Ready-made EqualsFn implementations for computed_with_equals
// ============================================================================

use crate::core::types::EqualsFn;

/// Treat every recomputation as unchanged; downstream never re-runs.
pub fn always_equals<T>(_: &T, _: &T) -> bool {
    true
}

/// Treat every recomputation as a change; downstream always re-runs.
pub fn never_equals<T>(_: &T, _: &T) -> bool {
    false
}

/// NaN-stable equality for f64.
///
/// `NaN` compares equal to `NaN`, so a computed that settles on `NaN` does
/// not invalidate its readers on every refresh.
///
/// # Example
///
/// ```
/// use weft_reactive::reactivity::equality::safe_equals_f64;
///
/// assert!(safe_equals_f64(&1.0, &1.0));
/// assert!(!safe_equals_f64(&1.0, &2.0));
/// assert!(safe_equals_f64(&f64::NAN, &f64::NAN));
/// assert!(!safe_equals_f64(&f64::NAN, &1.0));
/// ```
pub fn safe_equals_f64(a: &f64, b: &f64) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// NaN-stable equality for f32.
pub fn safe_equals_f32(a: &f32, b: &f32) -> bool {
    if a.is_nan() {
        return b.is_nan();
    }
    a == b
}

/// Coerce a plain fn to the predicate type expected by computeds.
pub fn as_equals_fn<T>(f: fn(&T, &T) -> bool) -> EqualsFn<T> {
    f
}

// =============================================================================
// TESTS
// =============================================================================
