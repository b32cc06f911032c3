//! Toy dataset generation (Asimov, observed, Poisson + constraint randomization).

use bf_core::{Error, Result};
use bf_model::{BinnedModel, Observation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

/// Which dataset(s) a session fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToyMode {
    /// One fit to the expectation at the reference point.
    Asimov,
    /// One fit to the observed counts.
    Data,
    /// `n` randomized toys.
    Random(usize),
}

impl ToyMode {
    /// Negative counts select the Asimov dataset, zero the observed data.
    pub fn from_count(n: i64) -> Self {
        match n {
            n if n < 0 => ToyMode::Asimov,
            0 => ToyMode::Data,
            n => ToyMode::Random(n as usize),
        }
    }

    /// Number of fits in a session.
    pub fn n_fits(&self) -> usize {
        match self {
            ToyMode::Random(n) => *n,
            _ => 1,
        }
    }

    /// Whether the session draws randomized datasets.
    pub fn is_random(&self) -> bool {
        matches!(self, ToyMode::Random(_))
    }
}

/// How random streams are seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// One stream for the whole session, seeded once.
    #[default]
    Shared,
    /// Toy `i` draws from its own stream seeded with `seed + i`.
    PerToy,
}

/// Dataset generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToyConfig {
    /// Asimov, observed or random toys.
    pub mode: ToyMode,
    /// Fluctuate around the observed counts instead of the expectation.
    pub bootstrap_data: bool,
    /// Randomize constraint centers for random toys.
    pub frequentist: bool,
    /// Skip the reference prefit and randomize around the start values.
    pub bypass_frequentist_fit: bool,
    /// Session seed.
    pub seed: u64,
    /// One shared stream or one stream per toy.
    pub seed_strategy: SeedStrategy,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            mode: ToyMode::Data,
            bootstrap_data: false,
            frequentist: true,
            bypass_frequentist_fit: true,
            seed: 123_456_789,
            seed_strategy: SeedStrategy::Shared,
        }
    }
}

impl ToyConfig {
    /// Whether a reference fit to the observed data precedes the toys.
    pub fn needs_prefit(&self) -> bool {
        self.mode.is_random() && self.frequentist && !self.bypass_frequentist_fit
    }

    /// Seed used by toy `itoy` under [`SeedStrategy::PerToy`].
    pub fn toy_seed(&self, itoy: usize) -> u64 {
        self.seed.wrapping_add(itoy as u64)
    }

    /// A fresh stream seeded from the session seed.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

/// One Poisson draw; non-positive or non-finite means give 0.
pub fn poisson_sample<R: Rng + ?Sized>(lam: f64, rng: &mut R) -> Result<f64> {
    if !lam.is_finite() || lam <= 0.0 {
        return Ok(0.0);
    }
    let pois = Poisson::new(lam)
        .map_err(|e| Error::Computation(format!("Poisson({lam}) rejected: {e}")))?;
    Ok(pois.sample(rng))
}

/// Produces the per-toy [`Observation`] from a fixed reference point.
#[derive(Debug, Clone)]
pub struct ToyGenerator {
    config: ToyConfig,
    observed: Vec<f64>,
    expected: Vec<f64>,
    theta_ref: Vec<f64>,
}

impl ToyGenerator {
    /// `logr`/`theta` is the reference point: the prefit result, or the start values.
    pub fn new(model: &BinnedModel, config: ToyConfig, logr: &[f64], theta: &[f64]) -> Result<Self> {
        let expected = model.expected_yields(logr, theta)?;
        if let Some((b, v)) = expected.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Computation(format!(
                "expectation at the reference point is not finite in bin {b}: {v}"
            )));
        }
        Ok(Self {
            config,
            observed: model.table().data_obs().to_vec(),
            expected,
            theta_ref: theta.to_vec(),
        })
    }

    /// Generation settings.
    pub fn config(&self) -> &ToyConfig {
        &self.config
    }

    /// Expected counts at the reference point.
    pub fn expected(&self) -> &[f64] {
        &self.expected
    }

    /// Draw the next observation. Poisson counts are drawn first (bin order), then
    /// one standard normal per nuisance.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Observation> {
        let nsyst = self.theta_ref.len();
        match self.config.mode {
            ToyMode::Asimov => Ok(Observation::new(self.expected.clone(), vec![0.0; nsyst])),
            ToyMode::Data => Ok(Observation::new(self.observed.clone(), vec![0.0; nsyst])),
            ToyMode::Random(_) => {
                let means = if self.config.bootstrap_data { &self.observed } else { &self.expected };
                let data = means
                    .iter()
                    .map(|&lam| poisson_sample(lam, rng))
                    .collect::<Result<Vec<f64>>>()?;
                let theta0 = if self.config.frequentist {
                    self.theta_ref
                        .iter()
                        .map(|&t| {
                            let z: f64 = rng.sample(StandardNormal);
                            t + z
                        })
                        .collect()
                } else {
                    vec![0.0; nsyst]
                };
                Ok(Observation::new(data, theta0))
            }
        }
    }
}
