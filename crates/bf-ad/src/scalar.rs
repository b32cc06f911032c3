//! [`Scalar`] trait: abstraction over `f64` and [`Dual`](crate::dual::Dual).
//!
//! The yield function and the loss are written once against this trait and
//! reused for plain evaluation, forward-mode derivatives, and as the node value
//! type of the reverse-mode tape.

use crate::dual::Dual;
use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A scalar type suitable for likelihood computation.
pub trait Scalar:
    Copy
    + Debug
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Sum
    + PartialOrd
    + Sized
{
    /// Wrap an `f64` constant (derivative = 0 for AD types).
    fn from_f64(v: f64) -> Self;

    /// Extract the primal (function) value.
    fn value(&self) -> f64;

    /// Natural logarithm.
    fn ln(self) -> Self;

    /// Exponential.
    fn exp(self) -> Self;

    /// Integer power.
    fn powi(self, n: i32) -> Self;

    /// Clamp to `[lo, hi]`; derivative is zero where the bound is active.
    fn clamp_s(self, lo: f64, hi: f64) -> Self;

    /// True when every component is exactly zero.
    fn is_zero(&self) -> bool;
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn clamp_s(self, lo: f64, hi: f64) -> Self {
        if self < lo {
            lo
        } else if self > hi {
            hi
        } else {
            self
        }
    }

    #[inline]
    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

impl Scalar for Dual {
    #[inline]
    fn from_f64(v: f64) -> Self {
        Dual::constant(v)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.val
    }

    #[inline]
    fn ln(self) -> Self {
        Dual::ln(self)
    }

    #[inline]
    fn exp(self) -> Self {
        Dual::exp(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }

    #[inline]
    fn clamp_s(self, lo: f64, hi: f64) -> Self {
        Dual::clamp(self, lo, hi)
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.dot == 0.0
    }
}
