//! Fit session: a model, a configuration and the toy loop.
//!
//! A session fixes a reference point (the start values, or a prefit to the
//! observed data for frequentist toys), then for every toy generates an
//! [`Observation`], builds the likelihood and runs the [`FitDriver`] from the
//! reference point, optionally in a basis whitened by the Asimov Hessian at that
//! point. Results come back as serializable [`ToyRecord`]s.

use bf_core::{Error, FitResult, Result, SecondOrderObjective};
use bf_model::{BinnedModel, Likelihood, LikelihoodForm, Observation, Parameterization};
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::driver::{ConvergencePolicy, FitDriver};
use crate::optimizer::{LbfgsMinimizer, Minimizer, OptimizerConfig};
use crate::precondition::Preconditioner;
use crate::toys::{SeedStrategy, ToyConfig, ToyGenerator};
use crate::trust_region::{TrustRegionConfig, TrustRegionNewton};

/// When the whitening transform is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionMode {
    /// Fit in the physical basis.
    Disabled,
    /// Compute once when the session is created.
    #[default]
    Once,
    /// Recompute before every toy.
    PerToy,
}

/// Everything a [`FitSession`] needs besides the model.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Signal strengths start at `ln(expect_signal)`.
    pub expect_signal: f64,
    /// Hold signal strengths fixed at their start value.
    pub freeze_pois: bool,
    /// Offset (saturated) or plain Poisson loss.
    pub form: LikelihoodForm,
    /// When the whitening transform is computed.
    pub precondition: PreconditionMode,
    /// Acceptance rule and cycle budget of every toy fit.
    pub policy: ConvergencePolicy,
    /// Settings of the main minimizer.
    pub trust_region: TrustRegionConfig,
    /// L-BFGS settings for the reference prefit.
    pub prefit: OptimizerConfig,
    /// Dataset generation and seeding.
    pub toys: ToyConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expect_signal: 1.0,
            freeze_pois: false,
            form: LikelihoodForm::default(),
            precondition: PreconditionMode::default(),
            policy: ConvergencePolicy::default(),
            trust_region: TrustRegionConfig::default(),
            prefit: OptimizerConfig::default(),
            toys: ToyConfig::default(),
        }
    }
}

/// A fitted signal strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiEntry {
    /// Signal process name.
    pub name: String,
    /// Fitted `ln r`.
    pub log_value: f64,
    /// `r = exp(log_value)`.
    pub value: f64,
    /// Uncertainty on `ln r`; 0 when frozen.
    pub uncertainty: f64,
}

/// A fitted nuisance parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuisanceEntry {
    /// Systematic name.
    pub name: String,
    /// Fitted `theta`.
    pub value: f64,
    /// Gaussian constraint center used for this toy.
    pub constraint_center: f64,
    /// `sqrt` of the covariance diagonal, or the sentinel.
    pub uncertainty: f64,
}

/// Outcome of one toy fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToyRecord {
    /// Toy index, 0-based.
    pub toy: usize,
    /// Seed of the stream the toy drew from.
    pub seed: u64,
    /// 0 ok, 1 negative variance, 2 singular Hessian.
    pub status: i32,
    /// Estimated distance to minimum; the sentinel when `status` is 2.
    pub edm: f64,
    /// Loss at the final point; NaN when the fit could not start.
    pub nll: f64,
    /// Whether the acceptance policy was met.
    pub converged: bool,
    /// Eigenvalues above the convexity tolerance.
    pub is_convex: bool,
    /// Eigenvalues all non-negative.
    pub is_convex_strict: bool,
    /// `s_max / s_min` of the final Hessian.
    pub condition_number: f64,
    /// Hessian eigenvalues, ascending.
    pub eigenvalues: Vec<f64>,
    /// Minimizer iterations summed over cycles.
    pub n_iter: usize,
    /// One entry per signal process.
    pub signal_strengths: Vec<PoiEntry>,
    /// One entry per systematic.
    pub nuisances: Vec<NuisanceEntry>,
}

/// Owns everything that is fixed across toys.
pub struct FitSession<'a> {
    model: &'a BinnedModel,
    config: SessionConfig,
    param: Parameterization,
    driver: FitDriver,
    reference: Vec<f64>,
    generator: ToyGenerator,
    preconditioner: Option<Preconditioner>,
}

impl<'a> FitSession<'a> {
    /// Validate the configuration, run the reference prefit if one is needed, and
    /// compute a session-wide preconditioner under [`PreconditionMode::Once`].
    pub fn new(model: &'a BinnedModel, config: SessionConfig) -> Result<Self> {
        let param = Parameterization::new(model, config.expect_signal, config.freeze_pois)?;
        if param.dim() == 0 {
            return Err(Error::Validation(
                "no free parameters: signal strengths frozen and no systematics".into(),
            ));
        }
        let start = param.start_point(&vec![0.0; param.nsyst()])?;
        let minimizer = TrustRegionNewton::new(config.trust_region.clone());
        let driver = FitDriver::new(Box::new(minimizer), config.policy.clone());

        let reference = if config.toys.needs_prefit() {
            Self::prefit(model, &param, &config, &start)?
        } else {
            start
        };
        let generator = ToyGenerator::new(
            model,
            config.toys.clone(),
            &param.logr(&reference),
            param.theta(&reference),
        )?;

        let mut session =
            Self { model, config, param, driver, reference, generator, preconditioner: None };
        if session.config.precondition == PreconditionMode::Once {
            session.preconditioner = Some(session.reference_preconditioner()?);
        }
        log::debug!(
            "session: {} bins, {} signal strengths, {} nuisances, mode {:?}",
            model.nbins(),
            model.npoi(),
            model.nsyst(),
            session.config.toys.mode
        );
        Ok(session)
    }

    fn prefit(
        model: &BinnedModel,
        param: &Parameterization,
        config: &SessionConfig,
        start: &[f64],
    ) -> Result<Vec<f64>> {
        let obs = Observation::observed(model);
        let nll = Likelihood::new(model, &obs, param, config.form)?;
        let res = LbfgsMinimizer::new(config.prefit.clone()).minimize(&nll, start)?;
        if res.converged {
            log::info!("reference prefit: {}", res);
        } else {
            log::warn!("reference prefit did not converge: {} ({})", res, res.message);
        }
        Ok(res.parameters)
    }

    /// The configuration the session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Layout of the fitted parameter vector.
    pub fn parameterization(&self) -> &Parameterization {
        &self.param
    }

    /// Start point of every toy fit (before frequentist centering).
    pub fn reference_point(&self) -> &[f64] {
        &self.reference
    }

    /// Preconditioner from the Hessian of the Asimov likelihood at the reference
    /// point, with constraint centers at zero.
    pub fn reference_preconditioner(&self) -> Result<Preconditioner> {
        let logr = self.param.logr(&self.reference);
        let theta = self.param.theta(&self.reference);
        let asimov = Observation::asimov(self.model, &logr, theta)?;
        let nll = Likelihood::new(self.model, &asimov, &self.param, self.config.form)?;
        let h = nll.hessian(&self.reference)?;
        Preconditioner::from_hessian(&h, self.param.dim())
    }

    /// Run every toy on the current thread, in order.
    pub fn run(&self) -> Result<Vec<ToyRecord>> {
        let n = self.config.toys.mode.n_fits();
        let mut records = Vec::with_capacity(n);
        match self.config.toys.seed_strategy {
            SeedStrategy::Shared => {
                let mut rng = self.config.toys.rng();
                for itoy in 0..n {
                    records.push(self.run_toy(itoy, self.config.toys.seed, &mut rng)?);
                }
            }
            SeedStrategy::PerToy => {
                for itoy in 0..n {
                    records.push(self.run_seeded_toy(itoy)?);
                }
            }
        }
        Ok(records)
    }

    /// Run toys across the rayon pool. Requires [`SeedStrategy::PerToy`]; the
    /// records match [`run`](Self::run) and come back in toy order.
    pub fn run_parallel(&self) -> Result<Vec<ToyRecord>> {
        if self.config.toys.seed_strategy != SeedStrategy::PerToy {
            return Err(Error::Validation(
                "parallel toys require the per-toy seed strategy".into(),
            ));
        }
        (0..self.config.toys.mode.n_fits())
            .into_par_iter()
            .map(|itoy| self.run_seeded_toy(itoy))
            .collect()
    }

    fn run_seeded_toy(&self, itoy: usize) -> Result<ToyRecord> {
        let seed = self.config.toys.toy_seed(itoy);
        let mut rng = StdRng::seed_from_u64(seed);
        self.run_toy(itoy, seed, &mut rng)
    }

    /// Generate and fit a single toy, drawing from `rng`.
    ///
    /// A fit that fails numerically (a non-finite loss at the start point, for
    /// instance) is reported as a non-converged record with status 2; only
    /// configuration and preconditioning errors are returned.
    pub fn run_toy<R: Rng + ?Sized>(&self, itoy: usize, seed: u64, rng: &mut R) -> Result<ToyRecord> {
        let per_toy;
        let pre = match self.config.precondition {
            PreconditionMode::Disabled => None,
            PreconditionMode::Once => self.preconditioner.as_ref(),
            PreconditionMode::PerToy => {
                per_toy = self.reference_preconditioner()?;
                Some(&per_toy)
            }
        };

        let obs = self.generator.generate(rng)?;
        let mut x0 = self.reference.clone();
        let toys = &self.config.toys;
        if toys.mode.is_random() && toys.frequentist {
            x0[self.param.theta_offset()..].copy_from_slice(&obs.theta0);
        }

        let nll = Likelihood::new(self.model, &obs, &self.param, self.config.form)?;
        let fit = match self.driver.fit(&nll, &x0, pre) {
            Ok(fit) => fit,
            Err(Error::Computation(msg)) => {
                log::warn!("toy {}: fit failed: {}", itoy, msg);
                FitResult::failed(&x0, msg)
            }
            Err(e) => return Err(e),
        };
        let record = self.record(itoy, seed, &obs, &fit);
        log::info!(
            "toy {}: status={} edm={:.3e} nll={:.6} converged={} r={:?}",
            itoy,
            record.status,
            record.edm,
            record.nll,
            record.converged,
            record.signal_strengths.iter().map(|p| p.value).collect::<Vec<_>>()
        );
        Ok(record)
    }

    fn record(&self, itoy: usize, seed: u64, obs: &Observation, fit: &FitResult) -> ToyRecord {
        let table = self.model.table();
        let logr = self.param.logr(&fit.parameters);
        let theta = self.param.theta(&fit.parameters);
        let off = self.param.theta_offset();
        let (poi_unc, syst_unc) = FitResult::split(&fit.uncertainties, off);

        let signal_strengths = table
            .pois()
            .iter()
            .enumerate()
            .map(|(i, name)| PoiEntry {
                name: name.clone(),
                log_value: logr[i],
                value: logr[i].exp(),
                uncertainty: poi_unc.get(i).copied().unwrap_or(0.0),
            })
            .collect();
        let nuisances = table
            .systematics()
            .iter()
            .enumerate()
            .map(|(s, name)| NuisanceEntry {
                name: name.clone(),
                value: theta[s],
                constraint_center: obs.theta0[s],
                uncertainty: syst_unc[s],
            })
            .collect();

        ToyRecord {
            toy: itoy,
            seed,
            status: fit.status.code(),
            edm: fit.edm,
            nll: fit.nll,
            converged: fit.converged,
            is_convex: fit.is_convex,
            is_convex_strict: fit.is_convex_strict,
            condition_number: fit.condition_number,
            eigenvalues: fit.eigenvalues.clone(),
            n_iter: fit.n_iter,
            signal_strengths,
            nuisances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toys::ToyMode;
    use approx::assert_relative_eq;
    use bf_core::UNCERTAINTY_SENTINEL;
    use bf_model::simplemodels;
    use bf_model::{BuildOptions, Effect};

    fn model() -> BinnedModel {
        simplemodels::with_systematics(&[5.0, 10.0], &[50.0, 60.0], &[58.0, 74.0])
            .build(&BuildOptions::default())
            .unwrap()
    }

    #[test]
    fn test_asimov_fit_recovers_start() {
        let m = model();
        let mut cfg = SessionConfig::default();
        cfg.toys.mode = ToyMode::Asimov;
        let s = FitSession::new(&m, cfg).unwrap();
        let recs = s.run().unwrap();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.status, 0);
        assert_relative_eq!(r.signal_strengths[0].value, 1.0, epsilon = 1e-4);
        for n in &r.nuisances {
            assert!(n.value.abs() < 1e-3);
            assert!(n.uncertainty > 0.0 && n.uncertainty <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_frozen_pois_report_zero_uncertainty() {
        let m = model();
        let mut cfg = SessionConfig { freeze_pois: true, ..Default::default() };
        cfg.toys.mode = ToyMode::Data;
        let s = FitSession::new(&m, cfg).unwrap();
        let r = &s.run().unwrap()[0];
        assert_eq!(r.signal_strengths[0].uncertainty, 0.0);
        assert_eq!(r.signal_strengths[0].log_value, 0.0);
        assert_eq!(r.nuisances.len(), m.nsyst());
    }

    #[test]
    fn test_parallel_requires_per_toy_seeds() {
        let m = model();
        let mut cfg = SessionConfig::default();
        cfg.toys.mode = ToyMode::Random(2);
        let s = FitSession::new(&m, cfg).unwrap();
        assert!(matches!(s.run_parallel().unwrap_err(), Error::Validation(_)));
    }

    #[test]
    fn test_prefit_moves_reference() {
        let m = model();
        let mut cfg = SessionConfig::default();
        cfg.toys.mode = ToyMode::Random(1);
        cfg.toys.bypass_frequentist_fit = false;
        let s = FitSession::new(&m, cfg).unwrap();
        let r0 = s.parameterization().logr(s.reference_point())[0];
        // excess over the nominal expectation pulls the signal strength up
        assert!(r0 > 0.0);
    }

    #[test]
    fn test_numerical_failure_stays_in_its_record() {
        // kappa = 3 on a negative background: constraint centers above ~0.2
        // put the start point in a region of negative expectation
        let m = simplemodels::signal_background(&[5.0, 5.0], &[-4.0, -4.0], &[1.0, 1.0])
            .with_lnn("k", "bkg", Effect::Symmetric(3.0))
            .build(&BuildOptions { allow_negative_expectation: true, ..Default::default() })
            .unwrap();
        let mut cfg = SessionConfig::default();
        cfg.toys.mode = ToyMode::Random(20);
        let recs = FitSession::new(&m, cfg).unwrap().run().unwrap();
        assert_eq!(recs.len(), 20);
        assert_eq!(recs.iter().map(|r| r.toy).collect::<Vec<_>>(), (0..20).collect::<Vec<_>>());

        let failed: Vec<&ToyRecord> = recs.iter().filter(|r| r.nll.is_nan()).collect();
        assert!(!failed.is_empty());
        for r in &failed {
            assert_eq!(r.status, 2);
            assert!(!r.converged);
            assert_eq!(r.edm, UNCERTAINTY_SENTINEL);
            assert_eq!(r.nuisances[0].uncertainty, UNCERTAINTY_SENTINEL);
            assert_eq!(r.nuisances[0].value, r.nuisances[0].constraint_center);
        }
        assert!(recs.iter().any(|r| r.nll.is_finite()));
    }

    #[test]
    fn test_precondition_modes_agree() {
        let m = model();
        let mut fits = Vec::new();
        for mode in [PreconditionMode::Disabled, PreconditionMode::Once, PreconditionMode::PerToy] {
            let mut cfg = SessionConfig { precondition: mode, ..Default::default() };
            cfg.toys.mode = ToyMode::Data;
            fits.push(FitSession::new(&m, cfg).unwrap().run().unwrap().remove(0));
        }
        for f in &fits[1..] {
            assert_relative_eq!(
                f.signal_strengths[0].value,
                fits[0].signal_strengths[0].value,
                epsilon = 1e-2
            );
            assert_relative_eq!(
                f.signal_strengths[0].uncertainty,
                fits[0].signal_strengths[0].uncertainty,
                epsilon = 1e-2
            );
        }
    }
}
