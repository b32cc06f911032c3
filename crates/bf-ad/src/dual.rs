//! Dual numbers for forward-mode derivatives.
//!
//! Evaluated directly, a [`Dual`] gives one directional derivative per pass.
//! As the node value of a reverse-mode tape it gives one Hessian column per
//! reverse sweep.

use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Value `val` and tangent `dot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dual {
    /// Primal value.
    pub val: f64,
    /// Derivative along the seeded direction.
    pub dot: f64,
}

impl Dual {
    /// Zero tangent.
    #[inline]
    pub fn constant(val: f64) -> Self {
        Self { val, dot: 0.0 }
    }

    /// Unit tangent.
    #[inline]
    pub fn var(val: f64) -> Self {
        Self { val, dot: 1.0 }
    }

    /// Explicit tangent.
    #[inline]
    pub fn new(val: f64, dot: f64) -> Self {
        Self { val, dot }
    }

    /// `f(self)` given `f(val)` and `f'(val)`.
    #[inline]
    fn chain(self, f: f64, df: f64) -> Self {
        Self { val: f, dot: self.dot * df }
    }

    /// Natural logarithm.
    #[inline]
    pub fn ln(self) -> Self {
        self.chain(self.val.ln(), self.val.recip())
    }

    /// Exponential.
    #[inline]
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }

    /// Integer power.
    #[inline]
    pub fn powi(self, n: i32) -> Self {
        self.chain(self.val.powi(n), f64::from(n) * self.val.powi(n - 1))
    }

    /// Clamp to `[lo, hi]`; the bound is a constant when active.
    #[inline]
    pub fn clamp(self, lo: f64, hi: f64) -> Self {
        if self.val < lo {
            Self::constant(lo)
        } else if self.val > hi {
            Self::constant(hi)
        } else {
            self
        }
    }
}

impl Add for Dual {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.dot + rhs.dot)
    }
}

impl Sub for Dual {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.dot - rhs.dot)
    }
}

impl Mul for Dual {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.dot * rhs.val + self.val * rhs.dot)
    }
}

impl Div for Dual {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let q = self.val / rhs.val;
        Self::new(q, (self.dot - q * rhs.dot) / rhs.val)
    }
}

impl Neg for Dual {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.val, -self.dot)
    }
}

impl Sum for Dual {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Dual::constant(0.0), |acc, x| acc + x)
    }
}

/// Ordered by value; tangents are ignored.
impl PartialOrd for Dual {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.val.partial_cmp(&other.val)
    }
}
