//! Print/equals contract for value types.
//!
//! Every type that can sit in a [`Values`](crate::Values) store, and every
//! matrix a test wants to compare, implements [`Testable`]: it can render
//! itself with an optional label and compare itself to another instance up
//! to a tolerance. `equals` never prints; [`assert_equal`] is the one place
//! that prints, and only when the comparison fails.

use crate::types::constants::DEFAULT_TOLERANCE;
use crate::types::{DMatrix, DVector};
use std::fmt;

/// Types that can be printed and compared with a tolerance.
pub trait Testable {
    /// Writes a human-readable representation, preceded by `label`.
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result;

    /// Returns `true` if `self` and `other` agree within `tol`.
    ///
    /// Must not print or otherwise have side effects.
    fn equals(&self, other: &Self, tol: f64) -> bool;

    /// Prints the labeled representation to standard output.
    fn print(&self, label: &str) {
        let mut text = String::new();
        if self.write_labeled(label, &mut text).is_ok() {
            print!("{text}");
        }
    }
}

/// Compares `actual` against `expected`, printing both on mismatch.
///
/// Returns `actual.equals(expected, tol)`. Diagnostic output goes to
/// standard output; use [`assert_equal_to`] to capture it.
pub fn assert_equal<V: Testable + ?Sized>(expected: &V, actual: &V, tol: f64) -> bool {
    let mut text = String::new();
    let equal = assert_equal_to(expected, actual, tol, &mut text);
    if !equal {
        print!("{text}");
    }
    equal
}

/// [`assert_equal`] with [`DEFAULT_TOLERANCE`].
pub fn assert_near<V: Testable + ?Sized>(expected: &V, actual: &V) -> bool {
    assert_equal(expected, actual, DEFAULT_TOLERANCE)
}

/// Like [`assert_equal`] but writes the diagnostic into `out`.
pub fn assert_equal_to<V: Testable + ?Sized>(
    expected: &V,
    actual: &V,
    tol: f64,
    out: &mut dyn fmt::Write,
) -> bool {
    if actual.equals(expected, tol) {
        return true;
    }
    tracing::debug!(tol, "assert_equal mismatch");
    // Formatting failures only lose diagnostics, never the verdict.
    let _ = writeln!(out, "Not equal:");
    let _ = expected.write_labeled("expected", out);
    let _ = actual.write_labeled("actual", out);
    false
}

fn write_label(label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
    if label.is_empty() {
        Ok(())
    } else {
        write!(out, "{label}: ")
    }
}

fn entries_near<'a>(
    lhs: impl Iterator<Item = &'a f64>,
    rhs: impl Iterator<Item = &'a f64>,
    tol: f64,
) -> bool {
    lhs.zip(rhs).all(|(a, b)| (a - b).abs() <= tol)
}

impl Testable for f64 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        write_label(label, out)?;
        writeln!(out, "{self}")
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        (self - other).abs() <= tol
    }
}

impl Testable for DVector<f64> {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        write_label(label, out)?;
        writeln!(out, "{}", self.transpose())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.len() == other.len() && entries_near(self.iter(), other.iter(), tol)
    }
}

impl Testable for DMatrix<f64> {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        write_label(label, out)?;
        writeln!(out, "{self}")
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.shape() == other.shape() && entries_near(self.iter(), other.iter(), tol)
    }
}
