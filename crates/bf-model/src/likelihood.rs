//! Negative log-likelihood and its derivatives.
//!
//! ```text
//! loss = sum_b [ -nobs_b (ln nexp_b - ln nexpnom_b) + (nexp_b - nexpnom_b) ]
//!        + 1/2 sum_s (theta_s - theta0_s)^2
//! ```
//!
//! Bins with `nobs == 0` contribute `nexp - nexpnom` only; `ln nexpnom` is taken
//! as 0 where `nexpnom <= 0`. The `nexpnom` terms are constant offsets that keep the
//! loss near zero at the nominal point; [`LikelihoodForm::Plain`] drops them.
//!
//! Gradients come from one reverse sweep, Hessians from forward-over-reverse; see
//! [`bf_ad::hessian`].

use bf_ad::hessian::{self, TapeRecorder};
use bf_ad::scalar::Scalar;
use bf_ad::tape::{GenericTape, Var};
use bf_core::{Error, Result, SecondOrderObjective};
use serde::{Deserialize, Serialize};

use crate::model::BinnedModel;

/// Per-toy inputs: observed counts and Gaussian constraint centers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observed (or generated) counts per bin.
    pub data_obs: Vec<f64>,
    /// Constraint center per nuisance.
    pub theta0: Vec<f64>,
}

impl Observation {
    /// Explicit counts and centers.
    pub fn new(data_obs: Vec<f64>, theta0: Vec<f64>) -> Self {
        Self { data_obs, theta0 }
    }

    /// The model's observed data with centers at zero.
    pub fn observed(model: &BinnedModel) -> Self {
        Self::new(model.table().data_obs().to_vec(), vec![0.0; model.nsyst()])
    }

    /// Asimov data: the expected yields at `(logr, theta)`, centers at zero.
    pub fn asimov(model: &BinnedModel, logr: &[f64], theta: &[f64]) -> Result<Self> {
        Ok(Self::new(model.expected_yields(logr, theta)?, vec![0.0; model.nsyst()]))
    }
}

/// Whether the nominal-expectation offset is included in the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikelihoodForm {
    /// Subtract the loss at the nominal expectation (bin by bin).
    #[default]
    Offset,
    /// Plain Poisson + Gaussian loss (up to the `ln nobs!` constant).
    Plain,
}

/// Layout of the fitted parameter vector.
///
/// The fitted vector is `[logr (npoi), theta (nsyst)]`, or just `theta` when the
/// signal strengths are frozen at their starting value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameterization {
    npoi: usize,
    nsyst: usize,
    freeze_pois: bool,
    logr_start: Vec<f64>,
}

impl Parameterization {
    /// Signal strengths start at `ln(expect_signal)`.
    ///
    /// `expect_signal` must be positive, or zero with frozen signal strengths
    /// (a background-only fit).
    pub fn new(model: &BinnedModel, expect_signal: f64, freeze_pois: bool) -> Result<Self> {
        let ok = expect_signal.is_finite()
            && (expect_signal > 0.0 || (freeze_pois && expect_signal == 0.0));
        if !ok {
            return Err(Error::Validation(format!(
                "expected signal strength must be positive, got {}",
                expect_signal
            )));
        }
        Ok(Self {
            npoi: model.npoi(),
            nsyst: model.nsyst(),
            freeze_pois,
            logr_start: vec![expect_signal.ln(); model.npoi()],
        })
    }

    /// Length of the fitted vector.
    pub fn dim(&self) -> usize {
        self.theta_offset() + self.nsyst
    }

    /// Number of signal strengths in the model.
    pub fn npoi(&self) -> usize {
        self.npoi
    }

    /// Number of nuisances.
    pub fn nsyst(&self) -> usize {
        self.nsyst
    }

    /// Whether the signal strengths are held fixed.
    pub fn freeze_pois(&self) -> bool {
        self.freeze_pois
    }

    /// Index of the first nuisance in the fitted vector.
    pub fn theta_offset(&self) -> usize {
        if self.freeze_pois { 0 } else { self.npoi }
    }

    /// Starting log signal strengths.
    pub fn logr_start(&self) -> &[f64] {
        &self.logr_start
    }

    /// Fitted start vector with nuisances at `theta`.
    pub fn start_point(&self, theta: &[f64]) -> Result<Vec<f64>> {
        if theta.len() != self.nsyst {
            return Err(Error::Validation(format!(
                "start nuisances length {} != {}",
                theta.len(),
                self.nsyst
            )));
        }
        let mut x = Vec::with_capacity(self.dim());
        if !self.freeze_pois {
            x.extend_from_slice(&self.logr_start);
        }
        x.extend_from_slice(theta);
        Ok(x)
    }

    /// Log signal strengths at a fitted point.
    pub fn logr(&self, params: &[f64]) -> Vec<f64> {
        if self.freeze_pois { self.logr_start.clone() } else { params[..self.npoi].to_vec() }
    }

    /// Nuisances at a fitted point.
    pub fn theta<'p>(&self, params: &'p [f64]) -> &'p [f64] {
        &params[self.theta_offset()..]
    }

    fn check_dim(&self, n: usize) -> Result<()> {
        if n != self.dim() {
            return Err(Error::Validation(format!(
                "parameter length mismatch: expected {}, got {}",
                self.dim(),
                n
            )));
        }
        Ok(())
    }
}

/// Binned likelihood for one observation.
#[derive(Debug, Clone)]
pub struct Likelihood<'a> {
    model: &'a BinnedModel,
    observation: &'a Observation,
    param: &'a Parameterization,
    /// `sum_b c_b` with `c_b = nobs_b ln nexpnom_b - nexpnom_b` (offset form only).
    offset: f64,
}

impl<'a> Likelihood<'a> {
    /// Bind a model, an observation and a parameter layout.
    pub fn new(
        model: &'a BinnedModel,
        observation: &'a Observation,
        param: &'a Parameterization,
        form: LikelihoodForm,
    ) -> Result<Self> {
        if observation.data_obs.len() != model.nbins() {
            return Err(Error::Validation(format!(
                "data length {} != number of bins {}",
                observation.data_obs.len(),
                model.nbins()
            )));
        }
        if observation.theta0.len() != model.nsyst() {
            return Err(Error::Validation(format!(
                "theta0 length {} != number of nuisances {}",
                observation.theta0.len(),
                model.nsyst()
            )));
        }
        if param.npoi != model.npoi() || param.nsyst != model.nsyst() {
            return Err(Error::Validation(
                "parameterization does not match the model".to_string(),
            ));
        }

        let offset = match form {
            LikelihoodForm::Plain => 0.0,
            LikelihoodForm::Offset => observation
                .data_obs
                .iter()
                .zip(model.nexpnom())
                .map(|(&nobs, &nom)| {
                    let ln_nom = if nobs == 0.0 || nom <= 0.0 { 0.0 } else { nom.ln() };
                    nobs * ln_nom - nom
                })
                .sum(),
        };

        Ok(Self { model, observation, param, offset })
    }

    /// The parameter layout.
    pub fn parameterization(&self) -> &Parameterization {
        self.param
    }

    /// Expected yields at a fitted point.
    pub fn expected(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.param.check_dim(params.len())?;
        self.model.expected_yields(&self.param.logr(params), self.param.theta(params))
    }

    /// Loss, generic over the scalar type.
    pub fn nll<T: Scalar>(&self, params: &[T]) -> Result<T> {
        self.param.check_dim(params.len())?;
        let off = self.param.theta_offset();
        let logr: Vec<T> = if self.param.freeze_pois {
            self.param.logr_start.iter().map(|&v| T::from_f64(v)).collect()
        } else {
            params[..off].to_vec()
        };
        let theta = &params[off..];
        let nexp = self.model.expected_yields(&logr, theta)?;

        let mut loss = T::from_f64(self.offset);
        for (&n, &nobs) in nexp.iter().zip(&self.observation.data_obs) {
            loss = loss + n;
            if nobs != 0.0 {
                loss = loss - T::from_f64(nobs) * n.ln();
            }
        }
        for (&th, &th0) in theta.iter().zip(&self.observation.theta0) {
            let d = th - T::from_f64(th0);
            loss = loss + T::from_f64(0.5) * d * d;
        }
        Ok(loss)
    }
}

impl TapeRecorder for Likelihood<'_> {
    type Error = Error;

    fn record<T: Scalar>(&self, tape: &mut GenericTape<T>, inputs: &[Var]) -> Result<Var> {
        self.param.check_dim(inputs.len())?;
        let off = self.param.theta_offset();
        let logr: Vec<Var> = if self.param.freeze_pois {
            self.param.logr_start.iter().map(|&v| tape.constant(v)).collect()
        } else {
            inputs[..off].to_vec()
        };
        let theta = &inputs[off..];
        let nexp = self.model.expected_yields_on_tape(tape, &logr, theta)?;

        let mut terms = Vec::with_capacity(nexp.len() + theta.len());
        for (&n, &nobs) in nexp.iter().zip(&self.observation.data_obs) {
            if nobs != 0.0 {
                let ln = tape.ln(n);
                let w = tape.mul_f64(ln, -nobs);
                terms.push(tape.add(n, w));
            } else {
                terms.push(n);
            }
        }
        for (&th, &th0) in theta.iter().zip(&self.observation.theta0) {
            let d = tape.sub_f64(th, th0);
            let sq = tape.mul(d, d);
            terms.push(tape.mul_f64(sq, 0.5));
        }
        let total = tape.sum(&terms);
        Ok(tape.add_f64(total, self.offset))
    }

    fn capacity_hint(&self) -> usize {
        self.model.tape_capacity_hint() + 4 * self.model.nbins() + 4 * self.model.nsyst()
    }
}

impl SecondOrderObjective for Likelihood<'_> {
    fn dim(&self) -> usize {
        self.param.dim()
    }

    fn value(&self, params: &[f64]) -> Result<f64> {
        self.nll(params)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(hessian::value_and_gradient(self, params)?.1)
    }

    fn hessian(&self, params: &[f64]) -> Result<Vec<f64>> {
        hessian::hessian(self, params)
    }

    fn value_and_gradient(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        hessian::value_and_gradient(self, params)
    }
}
