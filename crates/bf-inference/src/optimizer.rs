//! Minimizer interface and the argmin-backed L-BFGS minimizer.
//!
//! Every minimizer works against [`SecondOrderObjective`]; first-order methods
//! simply never ask for the Hessian.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use bf_core::{Error, Result, SecondOrderObjective};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Result of one minimizer invocation.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Final parameters.
    pub parameters: Vec<f64>,
    /// Objective value at `parameters`.
    pub fval: f64,
    /// Number of iterations.
    pub n_iter: usize,
    /// Number of objective evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Whether the minimizer's own stopping rule was met.
    pub converged: bool,
    /// Termination message.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// A local minimizer.
pub trait Minimizer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Minimize `objective` starting from `x0`.
    fn minimize(&self, objective: &dyn SecondOrderObjective, x0: &[f64])
    -> Result<OptimizationResult>;
}

/// Configuration for [`LbfgsMinimizer`].
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for the gradient norm
    pub tol: f64,
    /// Number of stored correction pairs
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-5, m: 10 }
    }
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct ArgminProblem<'a> {
    objective: &'a dyn SecondOrderObjective,
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let v = self.objective.value(params).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        // NaN is reported as +inf so cost comparisons stay ordered.
        Ok(if v.is_nan() { f64::INFINITY } else { v })
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        self.objective.gradient(params).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

/// L-BFGS with More–Thuente line search (argmin).
///
/// Used for the frequentist reference prefit; the final fits use
/// [`TrustRegionNewton`](crate::trust_region::TrustRegionNewton).
#[derive(Debug, Clone, Default)]
pub struct LbfgsMinimizer {
    config: OptimizerConfig,
}

impl LbfgsMinimizer {
    /// Create with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }
}

impl Minimizer for LbfgsMinimizer {
    fn name(&self) -> &'static str {
        "lbfgs"
    }

    fn minimize(
        &self,
        objective: &dyn SecondOrderObjective,
        x0: &[f64],
    ) -> Result<OptimizationResult> {
        if x0.len() != objective.dim() {
            return Err(Error::Validation(format!(
                "start point length {} != objective dimension {}",
                x0.len(),
                objective.dim()
            )));
        }

        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Configuration(format!("invalid L-BFGS tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Configuration(format!("invalid L-BFGS cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(x0.to_vec()).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("L-BFGS failed: {e}")))?;

        let state = res.state();
        let parameters = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("L-BFGS produced no parameters".to_string()))?
            .clone();
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter() as usize,
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// f(x) = sum_i c_i (x_i - a_i)^2 + 0.1 (x_0 x_1)
    pub(crate) struct Quadratic {
        pub a: Vec<f64>,
        pub c: Vec<f64>,
    }

    impl SecondOrderObjective for Quadratic {
        fn dim(&self) -> usize {
            self.a.len()
        }

        fn value(&self, x: &[f64]) -> Result<f64> {
            let mut v: f64 = x
                .iter()
                .zip(&self.a)
                .zip(&self.c)
                .map(|((xi, ai), ci)| ci * (xi - ai) * (xi - ai))
                .sum();
            if x.len() > 1 {
                v += 0.1 * x[0] * x[1];
            }
            Ok(v)
        }

        fn gradient(&self, x: &[f64]) -> Result<Vec<f64>> {
            let mut g: Vec<f64> = x
                .iter()
                .zip(&self.a)
                .zip(&self.c)
                .map(|((xi, ai), ci)| 2.0 * ci * (xi - ai))
                .collect();
            if x.len() > 1 {
                g[0] += 0.1 * x[1];
                g[1] += 0.1 * x[0];
            }
            Ok(g)
        }

        fn hessian(&self, x: &[f64]) -> Result<Vec<f64>> {
            let n = x.len();
            let mut h = vec![0.0; n * n];
            for i in 0..n {
                h[i * n + i] = 2.0 * self.c[i];
            }
            if n > 1 {
                h[1] += 0.1;
                h[n] += 0.1;
            }
            Ok(h)
        }
    }

    #[test]
    fn test_lbfgs_quadratic() {
        let q = Quadratic { a: vec![2.0, -3.0], c: vec![1.0, 4.0] };
        let res = LbfgsMinimizer::default().minimize(&q, &[0.0, 0.0]).unwrap();
        let g = q.gradient(&res.parameters).unwrap();
        assert!(res.converged, "{}", res.message);
        assert!(g.iter().all(|gi| gi.abs() < 1e-4));
        assert!(res.n_fev > 0 && res.n_gev > 0);
    }

    #[test]
    fn test_lbfgs_rejects_wrong_dimension() {
        let q = Quadratic { a: vec![2.0, -3.0], c: vec![1.0, 4.0] };
        let err = LbfgsMinimizer::default().minimize(&q, &[0.0]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_display() {
        let r = OptimizationResult {
            parameters: vec![1.0],
            fval: 0.5,
            n_iter: 3,
            n_fev: 4,
            n_gev: 4,
            converged: true,
            message: "ok".into(),
        };
        assert!(r.to_string().contains("n_iter=3"));
        assert_relative_eq!(r.fval, 0.5);
    }
}
