//! Whitening of the parameter space from a reference Hessian.
//!
//! With `C = H⁻¹ = V Λ Vᵀ` the change of variables `y = R x`, `R = Λ^{-1/2} Vᵀ`,
//! maps the reference Hessian to the identity. Objectives are pulled back
//! through [`Whitened`], so any [`Minimizer`](crate::optimizer::Minimizer) can run
//! in the whitened basis unchanged.

use bf_core::{Error, Evaluation, Result, SecondOrderObjective};
use nalgebra::{DMatrix, DVector};

/// Linear map between the physical and whitened bases.
#[derive(Debug, Clone)]
pub struct Preconditioner {
    /// `R`: physical → whitened.
    forward: DMatrix<f64>,
    /// `R⁻¹`: whitened → physical.
    inverse: DMatrix<f64>,
}

impl Preconditioner {
    /// Build from a row-major `n×n` reference Hessian.
    pub fn from_hessian(hessian: &[f64], n: usize) -> Result<Self> {
        if hessian.len() != n * n {
            return Err(Error::Validation(format!(
                "hessian length {} != {}x{}",
                hessian.len(),
                n,
                n
            )));
        }
        if hessian.iter().any(|h| !h.is_finite()) {
            return Err(Error::Preconditioning("reference hessian has non-finite entries".into()));
        }
        let h = DMatrix::from_row_slice(n, n, hessian);
        let cov = h
            .lu()
            .try_inverse()
            .ok_or_else(|| Error::Preconditioning("reference hessian is singular".into()))?;
        let cov = (&cov + cov.transpose()) * 0.5;

        let eig = cov.symmetric_eigen();
        for (i, &l) in eig.eigenvalues.iter().enumerate() {
            if !l.is_finite() || l <= 0.0 {
                return Err(Error::Preconditioning(format!(
                    "covariance eigenvalue {} is {} (not positive definite)",
                    i, l
                )));
            }
        }

        let v = &eig.eigenvectors;
        let mut forward = v.transpose();
        let mut inverse = v.clone();
        for (k, &l) in eig.eigenvalues.iter().enumerate() {
            let s = l.sqrt();
            forward.row_mut(k).scale_mut(1.0 / s);
            inverse.column_mut(k).scale_mut(s);
        }

        log::debug!(
            "preconditioner: covariance eigenvalues min={:.3e} max={:.3e}",
            eig.eigenvalues.min(),
            eig.eigenvalues.max()
        );
        Ok(Self { forward, inverse })
    }

    /// The identity map in `n` dimensions.
    pub fn identity(n: usize) -> Self {
        Self { forward: DMatrix::identity(n, n), inverse: DMatrix::identity(n, n) }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.forward.nrows()
    }

    /// `y = R x`
    pub fn to_whitened(&self, x: &[f64]) -> Vec<f64> {
        (&self.forward * DVector::from_column_slice(x)).as_slice().to_vec()
    }

    /// `x = R⁻¹ y`
    pub fn to_physical(&self, y: &[f64]) -> Vec<f64> {
        (&self.inverse * DVector::from_column_slice(y)).as_slice().to_vec()
    }

    /// Physical gradient pulled back to the whitened basis: `R⁻ᵀ g`.
    pub fn pull_back_gradient(&self, g: &[f64]) -> Vec<f64> {
        self.inverse.tr_mul(&DVector::from_column_slice(g)).as_slice().to_vec()
    }

    /// Physical Hessian pulled back to the whitened basis: `R⁻ᵀ H R⁻¹` (row-major).
    pub fn pull_back_hessian(&self, h: &[f64]) -> Vec<f64> {
        let n = self.dim();
        let h = DMatrix::from_row_slice(n, n, h);
        let w = self.inverse.transpose() * h * &self.inverse;
        let w = (&w + w.transpose()) * 0.5;
        w.transpose().as_slice().to_vec()
    }
}

/// An objective evaluated in the whitened basis.
pub struct Whitened<'a, O: ?Sized> {
    inner: &'a O,
    pre: &'a Preconditioner,
}

impl<'a, O: SecondOrderObjective + ?Sized> Whitened<'a, O> {
    /// Wrap `inner`; the dimensions must agree.
    pub fn new(inner: &'a O, pre: &'a Preconditioner) -> Result<Self> {
        if inner.dim() != pre.dim() {
            return Err(Error::Validation(format!(
                "preconditioner dimension {} != objective dimension {}",
                pre.dim(),
                inner.dim()
            )));
        }
        Ok(Self { inner, pre })
    }
}

impl<O: SecondOrderObjective + ?Sized> SecondOrderObjective for Whitened<'_, O> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn value(&self, y: &[f64]) -> Result<f64> {
        self.inner.value(&self.pre.to_physical(y))
    }

    fn gradient(&self, y: &[f64]) -> Result<Vec<f64>> {
        let g = self.inner.gradient(&self.pre.to_physical(y))?;
        Ok(self.pre.pull_back_gradient(&g))
    }

    fn hessian(&self, y: &[f64]) -> Result<Vec<f64>> {
        let h = self.inner.hessian(&self.pre.to_physical(y))?;
        Ok(self.pre.pull_back_hessian(&h))
    }

    fn value_and_gradient(&self, y: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (v, g) = self.inner.value_and_gradient(&self.pre.to_physical(y))?;
        Ok((v, self.pre.pull_back_gradient(&g)))
    }

    fn evaluate(&self, y: &[f64]) -> Result<Evaluation> {
        let e = self.inner.evaluate(&self.pre.to_physical(y))?;
        Ok(Evaluation {
            value: e.value,
            gradient: self.pre.pull_back_gradient(&e.gradient),
            hessian: self.pre.pull_back_hessian(&e.hessian),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::Quadratic;
    use approx::assert_relative_eq;

    #[test]
    fn test_whitened_reference_hessian_is_identity() {
        let q = Quadratic { a: vec![1.0, -2.0, 0.5], c: vec![3.0, 0.5, 10.0] };
        let x = [0.2, 0.1, -0.3];
        let h = q.hessian(&x).unwrap();
        let pre = Preconditioner::from_hessian(&h, 3).unwrap();
        let w = Whitened::new(&q, &pre).unwrap();
        let hw = w.hessian(&pre.to_whitened(&x)).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(hw[i * 3 + j], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_round_trip_and_value_invariance() {
        let q = Quadratic { a: vec![1.0, -2.0], c: vec![2.0, 0.25] };
        let h = q.hessian(&[0.0, 0.0]).unwrap();
        let pre = Preconditioner::from_hessian(&h, 2).unwrap();
        let x = [0.7, -1.3];
        let back = pre.to_physical(&pre.to_whitened(&x));
        assert_relative_eq!(back[0], x[0], epsilon = 1e-12);
        assert_relative_eq!(back[1], x[1], epsilon = 1e-12);

        let w = Whitened::new(&q, &pre).unwrap();
        assert_relative_eq!(
            w.value(&pre.to_whitened(&x)).unwrap(),
            q.value(&x).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_gradient_chain_rule() {
        let q = Quadratic { a: vec![1.0, -2.0], c: vec![2.0, 0.25] };
        let pre = Preconditioner::from_hessian(&q.hessian(&[0.0, 0.0]).unwrap(), 2).unwrap();
        let w = Whitened::new(&q, &pre).unwrap();
        let y = [0.3, -0.4];
        let g = w.gradient(&y).unwrap();
        let eps = 1e-6;
        for i in 0..2 {
            let mut yp = y;
            let mut ym = y;
            yp[i] += eps;
            ym[i] -= eps;
            let fd = (w.value(&yp).unwrap() - w.value(&ym).unwrap()) / (2.0 * eps);
            assert_relative_eq!(g[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_singular_hessian_is_rejected() {
        let err = Preconditioner::from_hessian(&[1.0, 1.0, 1.0, 1.0], 2).unwrap_err();
        assert!(matches!(err, Error::Preconditioning(_)));
    }

    #[test]
    fn test_indefinite_hessian_is_rejected() {
        let err = Preconditioner::from_hessian(&[1.0, 0.0, 0.0, -2.0], 2).unwrap_err();
        assert!(matches!(err, Error::Preconditioning(_)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let q = Quadratic { a: vec![0.0, 0.0], c: vec![1.0, 1.0] };
        let pre = Preconditioner::identity(3);
        assert!(Whitened::new(&q, &pre).is_err());
    }
}
