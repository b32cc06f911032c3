//! Core traits for binfit
//!
//! The fit engine (bf-inference) minimizes against [`SecondOrderObjective`] and
//! never sees how derivatives are produced. The binned likelihood in bf-model
//! backs it with reverse-mode AD; tests back it with closed-form quadratics.

use crate::Result;

/// Value, gradient and dense Hessian of an objective at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Objective value.
    pub value: f64,
    /// Gradient, length `n`.
    pub gradient: Vec<f64>,
    /// Hessian, row-major `n×n`.
    pub hessian: Vec<f64>,
}

impl Evaluation {
    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.gradient.len()
    }

    /// Hessian element `(i, j)`.
    #[inline]
    pub fn hessian_at(&self, i: usize, j: usize) -> f64 {
        self.hessian[i * self.dim() + j]
    }
}

/// Twice-differentiable scalar objective.
pub trait SecondOrderObjective: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Objective value.
    fn value(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of the objective.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Dense Hessian, row-major `dim×dim`.
    fn hessian(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Value and gradient together.
    ///
    /// Backends that get the value for free from the gradient pass should override this.
    fn value_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        Ok((self.value(params)?, self.gradient(params)?))
    }

    /// Value, gradient and Hessian together.
    fn evaluate(&self, params: &[f64]) -> Result<Evaluation> {
        let (value, gradient) = self.value_and_gradient(params)?;
        let hessian = self.hessian(params)?;
        Ok(Evaluation { value, gradient, hessian })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// f(x, y) = x^2 + 3 y^2 + x y
    struct Quadratic;

    impl SecondOrderObjective for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn value(&self, p: &[f64]) -> Result<f64> {
            Ok(p[0] * p[0] + 3.0 * p[1] * p[1] + p[0] * p[1])
        }

        fn gradient(&self, p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0 * p[0] + p[1], 6.0 * p[1] + p[0]])
        }

        fn hessian(&self, _p: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![2.0, 1.0, 1.0, 6.0])
        }
    }

    #[test]
    fn test_default_evaluate() {
        let e = Quadratic.evaluate(&[1.0, 2.0]).unwrap();
        assert_eq!(e.dim(), 2);
        assert_eq!(e.value, 1.0 + 12.0 + 2.0);
        assert_eq!(e.gradient, vec![4.0, 13.0]);
        assert_eq!(e.hessian_at(0, 1), 1.0);
        assert_eq!(e.hessian_at(1, 1), 6.0);
    }
}
