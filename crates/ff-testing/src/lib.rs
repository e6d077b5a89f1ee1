#![forbid(unsafe_code)]

//! Assertion helpers for comparing Series in tests.
//!
//! `assert_series_equal` checks name, length, index labels, dtype, and
//! values. Missing values compare equal to each other regardless of marker
//! kind. Under the default inexact comparison, floats match within a
//! relative-plus-absolute tolerance; temporal ticks always compare exactly.

use ff_frame::Series;
use ff_types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    pub check_exact: bool,
    pub rtol: f64,
    pub atol: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            check_exact: false,
            rtol: 1e-5,
            atol: 1e-8,
        }
    }
}

impl CompareOptions {
    #[must_use]
    pub fn exact() -> Self {
        Self {
            check_exact: true,
            ..Self::default()
        }
    }
}

/// Scalar comparison under `CompareOptions` tolerances.
#[must_use]
pub fn scalars_approx_eq(left: &Scalar, right: &Scalar, options: CompareOptions) -> bool {
    if left.is_missing() || right.is_missing() {
        return left.is_missing() && right.is_missing();
    }
    if options.check_exact {
        return left.semantic_eq(right);
    }

    match (left, right) {
        (Scalar::Timestamp(a), Scalar::Timestamp(b))
        | (Scalar::Timedelta(a), Scalar::Timedelta(b)) => a == b,
        _ => match (left.to_f64(), right.to_f64()) {
            (Ok(a), Ok(b)) => (a - b).abs() <= options.atol + options.rtol * b.abs(),
            _ => left.semantic_eq(right),
        },
    }
}

/// Panic with a positional diagnostic unless the two Series are equal under
/// the given options.
pub fn assert_series_equal(left: &Series, right: &Series, options: CompareOptions) {
    assert_eq!(
        left.name(),
        right.name(),
        "series name mismatch: '{}' vs '{}'",
        left.name(),
        right.name()
    );
    assert_eq!(
        left.len(),
        right.len(),
        "series length mismatch: {} vs {}",
        left.len(),
        right.len()
    );
    assert_eq!(
        left.index().labels(),
        right.index().labels(),
        "series index mismatch"
    );

    for (pos, (l, r)) in left.values().iter().zip(right.values().iter()).enumerate() {
        assert!(
            scalars_approx_eq(l, r, options),
            "series values differ at position {pos}: {l:?} vs {r:?}"
        );
    }
}

/// Default inexact comparison, the common call in aggregate cross-checks.
pub fn assert_series_close(left: &Series, right: &Series) {
    assert_series_equal(left, right, CompareOptions::default());
}
