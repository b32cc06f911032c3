//! Fit driver: preconditioning, minimizer cycles and acceptance.
//!
//! ```text
//! Init -> Preconditioned -> Fitting -> Converged
//!                               \----> Failed
//! ```
//!
//! A failed fit still returns its last point; `converged` is false.

use bf_core::{Error, FitResult, Result, SecondOrderObjective};

use crate::optimizer::Minimizer;
use crate::precondition::{Preconditioner, Whitened};
use crate::result::{Diagnostics, diagnose};
use crate::trust_region::TrustRegionNewton;

/// When a minimizer result is accepted.
#[derive(Debug, Clone)]
pub struct ConvergencePolicy {
    /// Maximum number of minimizer invocations per fit.
    pub max_cycles: usize,
    /// Acceptance requires `0 < edm < edm_tolerance`.
    pub edm_tolerance: f64,
    /// Eigenvalues above `-convexity_tolerance` count as convex.
    pub convexity_tolerance: f64,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self { max_cycles: 1, edm_tolerance: 1e-3, convexity_tolerance: 1e-6 }
    }
}

impl ConvergencePolicy {
    /// Strictly convex with `0 < edm < edm_tolerance`.
    pub fn accepts(&self, d: &Diagnostics) -> bool {
        d.is_convex_strict && d.edm > 0.0 && d.edm < self.edm_tolerance
    }
}

/// Lifecycle of a single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    /// Start point set.
    Init,
    /// Whitening applied.
    Preconditioned,
    /// Minimizer cycles running.
    Fitting,
    /// A cycle met the acceptance policy.
    Converged,
    /// Cycle budget exhausted without acceptance.
    Failed,
}

fn transition(state: &mut FitState, next: FitState) {
    log::debug!("fit state {:?} -> {:?}", state, next);
    *state = next;
}

/// Runs one fit of an objective under a [`ConvergencePolicy`].
pub struct FitDriver {
    minimizer: Box<dyn Minimizer>,
    policy: ConvergencePolicy,
}

impl Default for FitDriver {
    fn default() -> Self {
        Self::new(Box::new(TrustRegionNewton::default()), ConvergencePolicy::default())
    }
}

impl FitDriver {
    /// Drive `minimizer` under `policy`.
    pub fn new(minimizer: Box<dyn Minimizer>, policy: ConvergencePolicy) -> Self {
        Self { minimizer, policy }
    }

    /// Acceptance policy.
    pub fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    /// The minimizer run in every cycle.
    pub fn minimizer(&self) -> &dyn Minimizer {
        self.minimizer.as_ref()
    }

    /// Minimize `objective` from `x0`, optionally in the basis whitened by `preconditioner`.
    ///
    /// Parameters, gradient, Hessian and diagnostics in the result are always in
    /// the physical basis.
    pub fn fit(
        &self,
        objective: &dyn SecondOrderObjective,
        x0: &[f64],
        preconditioner: Option<&Preconditioner>,
    ) -> Result<FitResult> {
        let n = objective.dim();
        if n == 0 {
            return Err(Error::Validation("nothing to fit: zero free parameters".into()));
        }
        if x0.len() != n {
            return Err(Error::Validation(format!(
                "start point length {} != objective dimension {}",
                x0.len(),
                n
            )));
        }

        let mut state = FitState::Init;
        let whitened = preconditioner.map(|p| Whitened::new(objective, p)).transpose()?;
        let target: &dyn SecondOrderObjective = match &whitened {
            Some(w) => w,
            None => objective,
        };
        let mut y = match preconditioner {
            Some(p) => {
                transition(&mut state, FitState::Preconditioned);
                p.to_whitened(x0)
            }
            None => x0.to_vec(),
        };

        let max_cycles = self.policy.max_cycles.max(1);
        let (mut n_iter, mut n_fev, mut n_gev, mut n_cycles) = (0, 0, 0, 0);
        let mut last = None;
        transition(&mut state, FitState::Fitting);

        for cycle in 0..max_cycles {
            let res = self.minimizer.minimize(target, &y)?;
            n_cycles += 1;
            n_iter += res.n_iter;
            n_fev += res.n_fev;
            n_gev += res.n_gev;
            log::debug!("{} cycle {}: {}", self.minimizer.name(), cycle, res);

            y = res.parameters;
            let x = match preconditioner {
                Some(p) => p.to_physical(&y),
                None => y.clone(),
            };
            let eval = objective.evaluate(&x)?;
            let diag = diagnose(&eval.gradient, &eval.hessian, self.policy.convexity_tolerance);
            log::debug!(
                "cycle {}: nll={:.10e} edm={:.3e} cond={:.3e} eigenvalues={:?}",
                cycle,
                eval.value,
                diag.edm,
                diag.condition_number,
                diag.eigenvalues
            );

            let accepted = self.policy.accepts(&diag);
            last = Some((x, eval, diag, res.message));
            if accepted {
                transition(&mut state, FitState::Converged);
                break;
            }
        }

        let Some((parameters, eval, diag, message)) = last else {
            return Err(Error::Computation("fit produced no result".into()));
        };

        if state != FitState::Converged {
            transition(&mut state, FitState::Failed);
            log::warn!(
                "fit not accepted after {} cycle(s): edm={:.3e} strictly_convex={} ({})",
                n_cycles,
                diag.edm,
                diag.is_convex_strict,
                message
            );
        }
        if !diag.status.is_ok() {
            log::warn!("covariance status {} ({:?})", diag.status.code(), diag.status);
        }

        Ok(FitResult {
            parameters,
            gradient: eval.gradient,
            hessian: eval.hessian,
            covariance: diag.covariance,
            uncertainties: diag.uncertainties,
            nll: eval.value,
            edm: diag.edm,
            status: diag.status,
            converged: state == FitState::Converged,
            is_convex: diag.is_convex,
            is_convex_strict: diag.is_convex_strict,
            eigenvalues: diag.eigenvalues,
            condition_number: diag.condition_number,
            n_cycles,
            n_iter,
            n_fev,
            n_gev,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::tests::Quadratic;
    use crate::optimizer::{LbfgsMinimizer, OptimizationResult};
    use approx::assert_relative_eq;
    use bf_core::FitStatus;

    #[test]
    fn test_quadratic_converges() {
        let q = Quadratic { a: vec![1.0, 2.0], c: vec![1.0, 3.0] };
        let r = FitDriver::default().fit(&q, &[0.0, 0.0], None).unwrap();
        assert_eq!(r.status, FitStatus::Ok);
        assert!(r.is_convex_strict);
        assert!(r.edm >= 0.0 && r.edm < 1e-5);
        assert_eq!(r.n_cycles, 1);
    }

    #[test]
    fn test_exact_minimum_is_not_accepted() {
        // edm == 0 fails the `0 < edm` acceptance test; every cycle is spent.
        let q = Quadratic { a: vec![0.0], c: vec![1.0] };
        let policy = ConvergencePolicy { max_cycles: 3, ..Default::default() };
        let d = FitDriver::new(Box::new(TrustRegionNewton::default()), policy);
        let r = d.fit(&q, &[0.0], None).unwrap();
        assert!(!r.converged);
        assert_eq!(r.n_cycles, 3);
        assert_eq!(r.status, FitStatus::Ok);
    }

    #[test]
    fn test_preconditioned_fit_matches_plain() {
        let q = Quadratic { a: vec![1.0, -2.0, 0.5], c: vec![0.1, 5.0, 50.0] };
        let x0 = [0.0, 0.0, 0.0];
        let pre = Preconditioner::from_hessian(&q.hessian(&x0).unwrap(), 3).unwrap();
        let d = FitDriver::default();
        let plain = d.fit(&q, &x0, None).unwrap();
        let white = d.fit(&q, &x0, Some(&pre)).unwrap();
        for i in 0..3 {
            assert_relative_eq!(plain.parameters[i], white.parameters[i], epsilon = 1e-2);
            assert_relative_eq!(plain.uncertainties[i], white.uncertainties[i], epsilon = 1e-8);
        }
    }

    struct Stuck;

    impl Minimizer for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn minimize(
            &self,
            objective: &dyn SecondOrderObjective,
            x0: &[f64],
        ) -> Result<OptimizationResult> {
            Ok(OptimizationResult {
                parameters: x0.to_vec(),
                fval: objective.value(x0)?,
                n_iter: 0,
                n_fev: 1,
                n_gev: 0,
                converged: false,
                message: "no progress".into(),
            })
        }
    }

    #[test]
    fn test_budget_exhausted_returns_last_point() {
        let q = Quadratic { a: vec![3.0, 3.0], c: vec![1.0, 1.0] };
        let policy = ConvergencePolicy { max_cycles: 2, ..Default::default() };
        let r = FitDriver::new(Box::new(Stuck), policy).fit(&q, &[0.0, 0.0], None).unwrap();
        assert!(!r.converged);
        assert_eq!(r.n_cycles, 2);
        assert_eq!(r.parameters, vec![0.0, 0.0]);
        assert_eq!(r.message, "no progress");
    }

    #[test]
    fn test_lbfgs_driver() {
        let q = Quadratic { a: vec![1.0, 2.0], c: vec![1.0, 3.0] };
        let d = FitDriver::new(Box::new(LbfgsMinimizer::default()), ConvergencePolicy::default());
        let r = d.fit(&q, &[0.0, 0.0], None).unwrap();
        assert_eq!(r.status, FitStatus::Ok);
        assert!(r.edm < 1e-3);
    }

    #[test]
    fn test_wrong_start_length() {
        let q = Quadratic { a: vec![1.0, 2.0], c: vec![1.0, 3.0] };
        assert!(FitDriver::default().fit(&q, &[0.0], None).is_err());
    }
}
