//! Covariance, uncertainties and curvature diagnostics at a fit point.

use bf_core::{FitStatus, UNCERTAINTY_SENTINEL};
use nalgebra::{DMatrix, DVector};

/// Everything derived from the gradient and Hessian at the final point.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    /// `H⁻¹` (row-major); `None` when the inversion failed.
    pub covariance: Option<Vec<f64>>,
    /// `sqrt` of the covariance diagonal, or [`UNCERTAINTY_SENTINEL`].
    pub uncertainties: Vec<f64>,
    /// `½ gᵀ H⁻¹ g`, or [`UNCERTAINTY_SENTINEL`].
    pub edm: f64,
    /// Covariance extraction outcome.
    pub status: FitStatus,
    /// Ascending.
    pub eigenvalues: Vec<f64>,
    /// Every eigenvalue above `-convexity_tolerance`.
    pub is_convex: bool,
    /// Every eigenvalue `>= 0`.
    pub is_convex_strict: bool,
    /// See [`condition_number`].
    pub condition_number: f64,
}

/// Eigenvalues (ascending) of the symmetrized Hessian; NaN when it has non-finite entries.
pub fn hessian_eigenvalues(h: &DMatrix<f64>) -> Vec<f64> {
    let n = h.nrows();
    if h.iter().any(|v| !v.is_finite()) {
        return vec![f64::NAN; n];
    }
    let sym = (h + h.transpose()) * 0.5;
    let mut ev: Vec<f64> = sym.symmetric_eigenvalues().iter().copied().collect();
    ev.sort_by(|a, b| a.total_cmp(b));
    ev
}

/// `s_max / s_min` from the SVD; infinite when the smallest singular value is zero.
pub fn condition_number(h: &DMatrix<f64>) -> f64 {
    if h.nrows() == 0 {
        return 1.0;
    }
    if h.iter().any(|v| !v.is_finite()) {
        return f64::NAN;
    }
    let svd = h.clone().svd(false, false);
    let svals = &svd.singular_values;
    let s_max = svals.iter().fold(0.0_f64, |a, &b| a.max(b));
    let s_min = svals.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    if s_min > 0.0 { s_max / s_min } else { f64::INFINITY }
}

/// Extract covariance, uncertainties, EDM and curvature from a gradient and a
/// row-major Hessian.
///
/// - inversion fails or yields non-finite entries: [`FitStatus::SingularCovariance`],
///   uncertainties and EDM set to [`UNCERTAINTY_SENTINEL`];
/// - any negative variance: [`FitStatus::NonpositiveVariance`], the NaN
///   uncertainties are kept;
/// - otherwise [`FitStatus::Ok`].
pub fn diagnose(gradient: &[f64], hessian: &[f64], convexity_tolerance: f64) -> Diagnostics {
    let n = gradient.len();
    let h = DMatrix::from_row_slice(n, n, hessian);

    let eigenvalues = hessian_eigenvalues(&h);
    let is_convex = eigenvalues.iter().all(|&l| l > -convexity_tolerance);
    let is_convex_strict = eigenvalues.iter().all(|&l| l >= 0.0);
    let condition_number = condition_number(&h);

    let cov = h
        .clone()
        .lu()
        .try_inverse()
        .filter(|c| c.iter().all(|v| v.is_finite()));

    let Some(cov) = cov else {
        return Diagnostics {
            covariance: None,
            uncertainties: vec![UNCERTAINTY_SENTINEL; n],
            edm: UNCERTAINTY_SENTINEL,
            status: FitStatus::SingularCovariance,
            eigenvalues,
            is_convex,
            is_convex_strict,
            condition_number,
        };
    };

    let uncertainties: Vec<f64> = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
    let g = DVector::from_column_slice(gradient);
    let edm = 0.5 * g.dot(&(&cov * &g));
    let status = if uncertainties.iter().any(|s| s.is_nan()) {
        FitStatus::NonpositiveVariance
    } else {
        FitStatus::Ok
    };

    Diagnostics {
        covariance: Some(cov.transpose().as_slice().to_vec()),
        uncertainties,
        edm,
        status,
        eigenvalues,
        is_convex,
        is_convex_strict,
        condition_number,
    }
}
