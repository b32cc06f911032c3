//! Common data types for binfit

use serde::{Deserialize, Serialize};

/// Value reported for every uncertainty (and the EDM) when the Hessian cannot be inverted.
pub const UNCERTAINTY_SENTINEL: f64 = -99.0;

/// Outcome of the covariance extraction at the final fit point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Hessian inverted, all variances non-negative.
    Ok,
    /// Hessian inverted but at least one variance is negative (`sqrt` gives NaN).
    NonpositiveVariance,
    /// Hessian singular to numerical precision.
    SingularCovariance,
}

impl FitStatus {
    /// Integer error status as written into result records (0, 1, 2).
    pub fn code(self) -> i32 {
        match self {
            FitStatus::Ok => 0,
            FitStatus::NonpositiveVariance => 1,
            FitStatus::SingularCovariance => 2,
        }
    }

    /// Whether uncertainties can be trusted.
    pub fn is_ok(self) -> bool {
        self == FitStatus::Ok
    }
}

/// Fit result: point estimate, local curvature and convergence diagnostics.
///
/// All vectors live in the fitted parameter space (physical basis, after undoing
/// any preconditioning rotation). Matrices are row-major `n×n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Best-fit parameter values
    pub parameters: Vec<f64>,

    /// Gradient of the NLL at `parameters`
    pub gradient: Vec<f64>,

    /// Hessian of the NLL at `parameters`
    pub hessian: Vec<f64>,

    /// Inverse Hessian. `None` if inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Parameter uncertainties (`sqrt` of the covariance diagonal, or the sentinel)
    pub uncertainties: Vec<f64>,

    /// Negative log-likelihood at `parameters`
    pub nll: f64,

    /// Estimated distance to minimum, `0.5 gᵀ H⁻¹ g` (sentinel if singular)
    pub edm: f64,

    /// Covariance extraction status
    pub status: FitStatus,

    /// Acceptance criterion met (strictly convex and `0 < edm < tolerance`)
    pub converged: bool,

    /// All Hessian eigenvalues above the numerical-noise tolerance
    pub is_convex: bool,

    /// All Hessian eigenvalues `>= 0`
    pub is_convex_strict: bool,

    /// Hessian eigenvalues, ascending
    pub eigenvalues: Vec<f64>,

    /// Hessian condition number (`s_max / s_min`, infinite if singular)
    pub condition_number: f64,

    /// Number of minimizer invocations
    pub n_cycles: usize,

    /// Total minimizer iterations across cycles
    pub n_iter: usize,

    /// Total objective evaluations across cycles
    pub n_fev: usize,

    /// Total gradient evaluations across cycles
    pub n_gev: usize,

    /// Termination message of the last minimizer invocation
    pub message: String,
}

impl FitResult {
    /// A fit that could not be evaluated at all: parameters stay at `x0`, the
    /// covariance is singular and every uncertainty carries the sentinel.
    pub fn failed(x0: &[f64], message: impl Into<String>) -> Self {
        let n = x0.len();
        Self {
            parameters: x0.to_vec(),
            gradient: vec![f64::NAN; n],
            hessian: vec![f64::NAN; n * n],
            covariance: None,
            uncertainties: vec![UNCERTAINTY_SENTINEL; n],
            nll: f64::NAN,
            edm: UNCERTAINTY_SENTINEL,
            status: FitStatus::SingularCovariance,
            converged: false,
            is_convex: false,
            is_convex_strict: false,
            eigenvalues: vec![f64::NAN; n],
            condition_number: f64::NAN,
            n_cycles: 0,
            n_iter: 0,
            n_fev: 0,
            n_gev: 0,
            message: message.into(),
        }
    }

    /// Split a per-parameter vector into the signal-strength block (first `npoi`) and
    /// the nuisance block (the rest).
    pub fn split<'a>(values: &'a [f64], npoi: usize) -> (&'a [f64], &'a [f64]) {
        values.split_at(npoi.min(values.len()))
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.parameters.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if !(sigma_i > 0.0 && sigma_j > 0.0) {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn result_with_cov() -> FitResult {
        FitResult {
            parameters: vec![1.0, 0.2],
            gradient: vec![0.0, 0.0],
            hessian: vec![4.0, 1.0, 1.0, 1.0],
            covariance: Some(vec![1.0 / 3.0, -1.0 / 3.0, -1.0 / 3.0, 4.0 / 3.0]),
            uncertainties: vec![(1.0f64 / 3.0).sqrt(), (4.0f64 / 3.0).sqrt()],
            nll: 1.5,
            edm: 0.0,
            status: FitStatus::Ok,
            converged: true,
            is_convex: true,
            is_convex_strict: true,
            eigenvalues: vec![0.697, 4.303],
            condition_number: 6.17,
            n_cycles: 1,
            n_iter: 3,
            n_fev: 4,
            n_gev: 4,
            message: "edm below tolerance".into(),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FitStatus::Ok.code(), 0);
        assert_eq!(FitStatus::NonpositiveVariance.code(), 1);
        assert_eq!(FitStatus::SingularCovariance.code(), 2);
        assert!(FitStatus::Ok.is_ok());
        assert!(!FitStatus::SingularCovariance.is_ok());
    }

    #[test]
    fn test_split() {
        let (poi, np) = FitResult::split(&[1.0, 2.0, 3.0], 1);
        assert_eq!(poi, &[1.0]);
        assert_eq!(np, &[2.0, 3.0]);

        let (poi, np) = FitResult::split(&[2.0, 3.0], 0);
        assert!(poi.is_empty());
        assert_eq!(np.len(), 2);
    }

    #[test]
    fn test_correlation() {
        let fr = result_with_cov();
        assert_relative_eq!(fr.correlation(0, 0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(fr.correlation(0, 1).unwrap(), -0.5, epsilon = 1e-12);
        assert!(fr.correlation(0, 2).is_none());
    }

    #[test]
    fn test_correlation_unavailable_without_covariance() {
        let mut fr = result_with_cov();
        fr.covariance = None;
        assert!(fr.correlation(0, 1).is_none());
    }

    #[test]
    fn test_failed_result_carries_sentinels() {
        let fr = FitResult::failed(&[0.5, -0.2], "objective is not finite");
        assert_eq!(fr.parameters, vec![0.5, -0.2]);
        assert_eq!(fr.status.code(), 2);
        assert!(!fr.converged);
        assert_eq!(fr.edm, UNCERTAINTY_SENTINEL);
        assert!(fr.uncertainties.iter().all(|&u| u == UNCERTAINTY_SENTINEL));
        assert!(fr.nll.is_nan());
        assert!(fr.correlation(0, 1).is_none());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let s = serde_json::to_string(&FitStatus::SingularCovariance).unwrap();
        assert_eq!(s, "\"singular_covariance\"");
    }
}
