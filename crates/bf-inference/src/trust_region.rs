//! Exact-Hessian trust-region Newton minimizer.
//!
//! Each iteration evaluates value, gradient and Hessian, approximately solves the
//! trust-region subproblem with Steihaug truncated conjugate gradients, and
//! accepts or rejects the step from the ratio of actual to predicted reduction.
//!
//! Stopping rule: the estimated distance to minimum `EDM = ½ gᵀ H⁻¹ g` falls
//! below `edm_tol` at a point where `H` is positive definite (Cholesky succeeds).
//! The run also ends when the iteration budget is spent or the trust radius
//! collapses (stall).

use bf_core::{Error, Result, SecondOrderObjective};
use nalgebra::{DMatrix, DVector};

use crate::optimizer::{Minimizer, OptimizationResult};

/// Configuration for [`TrustRegionNewton`].
#[derive(Debug, Clone)]
pub struct TrustRegionConfig {
    /// EDM threshold for convergence.
    pub edm_tol: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Initial trust radius.
    pub initial_radius: f64,
    /// Upper bound on the trust radius.
    pub max_radius: f64,
    /// Minimum reduction ratio for a step to be accepted.
    pub eta: f64,
    /// Radius below which the run is declared stalled.
    pub min_radius: f64,
}

impl Default for TrustRegionConfig {
    fn default() -> Self {
        Self {
            edm_tol: 1e-5,
            max_iter: 10_000,
            initial_radius: 1.0,
            max_radius: 1e3,
            eta: 1e-4,
            min_radius: 1e-12,
        }
    }
}

/// `½ gᵀ H⁻¹ g` when `H` is positive definite, `None` otherwise.
pub fn edm_if_positive_definite(g: &DVector<f64>, h: &DMatrix<f64>) -> Option<f64> {
    let chol = h.clone().cholesky()?;
    let x = chol.solve(g);
    Some(0.5 * g.dot(&x))
}

/// Largest `tau >= 0` with `|z + tau d| = radius`.
fn boundary_tau(z: &DVector<f64>, d: &DVector<f64>, radius: f64) -> f64 {
    let a = d.dot(d);
    let b = 2.0 * z.dot(d);
    let c = z.dot(z) - radius * radius;
    let disc = (b * b - 4.0 * a * c).max(0.0);
    (-b + disc.sqrt()) / (2.0 * a)
}

/// Steihaug–Toint truncated CG for `min gᵀp + ½ pᵀHp` subject to `|p| <= radius`.
fn steihaug(g: &DVector<f64>, h: &DMatrix<f64>, radius: f64) -> DVector<f64> {
    let n = g.len();
    let mut z = DVector::zeros(n);
    let mut r = g.clone();
    let gnorm = g.norm();
    let eps = gnorm.sqrt().min(0.5) * gnorm;
    if gnorm <= eps || gnorm == 0.0 {
        return z;
    }
    let mut d = -&r;

    for _ in 0..(2 * n).max(1) {
        let hd = h * &d;
        let dhd = d.dot(&hd);
        if dhd <= 0.0 {
            let tau = boundary_tau(&z, &d, radius);
            return z + d * tau;
        }
        let rr = r.dot(&r);
        let alpha = rr / dhd;
        let z_next = &z + &d * alpha;
        if z_next.norm() >= radius {
            let tau = boundary_tau(&z, &d, radius);
            return z + d * tau;
        }
        let r_next = &r + hd * alpha;
        if r_next.norm() < eps {
            return z_next;
        }
        let beta = r_next.dot(&r_next) / rr;
        d = -&r_next + d * beta;
        z = z_next;
        r = r_next;
    }
    z
}

/// Trust-region Newton with exact Hessians.
#[derive(Debug, Clone, Default)]
pub struct TrustRegionNewton {
    config: TrustRegionConfig,
}

impl TrustRegionNewton {
    /// Create with the given configuration.
    pub fn new(config: TrustRegionConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &TrustRegionConfig {
        &self.config
    }
}

impl Minimizer for TrustRegionNewton {
    fn name(&self) -> &'static str {
        "trust-region-newton"
    }

    fn minimize(
        &self,
        objective: &dyn SecondOrderObjective,
        x0: &[f64],
    ) -> Result<OptimizationResult> {
        let n = objective.dim();
        if x0.len() != n {
            return Err(Error::Validation(format!(
                "start point length {} != objective dimension {}",
                x0.len(),
                n
            )));
        }
        let cfg = &self.config;

        let mut x = DVector::from_column_slice(x0);
        let mut eval = objective.evaluate(x.as_slice())?;
        let (mut n_fev, mut n_gev) = (1usize, 1usize);
        if !eval.value.is_finite() {
            return Err(Error::Computation(format!(
                "objective is not finite at the start point ({})",
                eval.value
            )));
        }

        let mut radius = cfg.initial_radius;
        let mut iter = 0usize;
        let (converged, message) = loop {
            let g = DVector::from_column_slice(&eval.gradient);
            let h = DMatrix::from_row_slice(n, n, &eval.hessian);

            if let Some(edm) = edm_if_positive_definite(&g, &h)
                && edm.is_finite()
                && edm < cfg.edm_tol
            {
                break (true, format!("edm {:.3e} below tolerance", edm));
            }
            if iter >= cfg.max_iter {
                break (false, "maximum iterations reached".to_string());
            }
            if radius < cfg.min_radius {
                break (false, "trust region collapsed".to_string());
            }
            iter += 1;

            let p = steihaug(&g, &h, radius);
            let pnorm = p.norm();
            let predicted = -(g.dot(&p) + 0.5 * p.dot(&(&h * &p)));
            let x_trial = &x + &p;
            let f_trial = objective.value(x_trial.as_slice())?;
            n_fev += 1;

            let rho = if predicted > 0.0 && f_trial.is_finite() {
                (eval.value - f_trial) / predicted
            } else {
                -1.0
            };

            if rho < 0.25 {
                radius = 0.25 * pnorm.min(radius);
            } else if rho > 0.75 && pnorm >= 0.99 * radius {
                radius = (2.0 * radius).min(cfg.max_radius);
            }

            log::trace!(
                "tr iter={} f={:.10e} trial={:.10e} rho={:.3} |p|={:.3e} radius={:.3e}",
                iter,
                eval.value,
                f_trial,
                rho,
                pnorm,
                radius
            );

            if rho > cfg.eta {
                x = x_trial;
                eval = objective.evaluate(x.as_slice())?;
                n_fev += 1;
                n_gev += 1;
            }
        };

        Ok(OptimizationResult {
            parameters: x.as_slice().to_vec(),
            fval: eval.value,
            n_iter: iter,
            n_fev,
            n_gev,
            converged,
            message,
        })
    }
}
