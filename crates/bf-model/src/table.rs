//! Variation table: dense per-bin nominal yields and log-kappas.
//!
//! All tensors are flat and row-major:
//! - `data_obs[bin]`
//! - `norm[bin, proc]`
//! - `logkup[bin, proc, syst]`, `logkdown[bin, proc, syst]` and the derived
//!   `logkavg = (up + down) / 2`, `logkhalfdiff = (up - down) / 2`
//! - `logkr[proc, poi]`, the 0/1 signal-strength indicator
//!
//! Bins are the bins of all channels concatenated in card order.

use bf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::card::{Datacard, Effect, SystematicKind};
use crate::shapes::{ShapeProvider, Variation, data_key, nominal_key, variation_key};

/// Kappa assigned to a bin whose varied template is empty.
pub const KAPPA_EPSILON: f64 = 1e-3;

/// Handling of shape templates with an empty (or sign-flipped) varied bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeEdgePolicy {
    /// Empty varied bin (non-empty nominal) gets `±ln(KAPPA_EPSILON)`.
    #[default]
    Sentinel,
    /// Empty varied bin contributes no variation.
    Zero,
}

/// Options for [`VariationTable::build`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Edge handling for shape systematics.
    #[serde(default)]
    pub shape_edge_policy: ShapeEdgePolicy,
    /// Keep negative nominal yields instead of clamping them to zero.
    #[serde(default)]
    pub allow_negative_expectation: bool,
}

/// Channel metadata: name and bin range in the concatenated bin axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// First bin index.
    pub offset: usize,
    /// Number of bins.
    pub nbins: usize,
}

/// Dense tensors describing the model.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationTable {
    channels: Vec<ChannelInfo>,
    processes: Vec<String>,
    systematics: Vec<String>,
    pois: Vec<String>,
    data_obs: Vec<f64>,
    norm: Vec<f64>,
    logkup: Vec<f64>,
    logkdown: Vec<f64>,
    logkavg: Vec<f64>,
    logkhalfdiff: Vec<f64>,
    logkr: Vec<f64>,
}

fn lookup<'a>(shapes: &'a dyn ShapeProvider, name: &str, nbins: usize) -> Result<&'a [f64]> {
    let h = shapes
        .shape(name)
        .ok_or_else(|| Error::Validation(format!("Missing histogram '{}'", name)))?;
    if h.len() != nbins {
        return Err(Error::Validation(format!(
            "Histogram '{}' has {} bins, expected {}",
            name,
            h.len(),
            nbins
        )));
    }
    Ok(h)
}

fn lnn_kappa(k: f64, syst: &str) -> Result<f64> {
    if !k.is_finite() || k < 0.0 {
        return Err(Error::Validation(format!("Invalid lnN kappa {} for '{}'", k, syst)));
    }
    Ok(if k == 0.0 { 1.0 } else { k })
}

/// Log-kappa of one bin of a shape variation. Returns the value and whether an
/// edge case (empty or sign-flipped varied bin) was hit.
fn shape_logk(
    nominal: f64,
    varied: f64,
    kfac: f64,
    dir: Variation,
    policy: ShapeEdgePolicy,
) -> (f64, bool) {
    if nominal == 0.0 {
        return (0.0, false);
    }
    let sentinel = dir.sign() * KAPPA_EPSILON.ln();
    if varied == 0.0 {
        let v = match policy {
            ShapeEdgePolicy::Sentinel => sentinel,
            ShapeEdgePolicy::Zero => 0.0,
        };
        return (v, true);
    }
    let ratio = varied / nominal;
    if ratio < 0.0 {
        return (sentinel, true);
    }
    (dir.sign() * kfac * ratio.ln(), false)
}

impl VariationTable {
    /// Build the table from a card and its histograms.
    ///
    /// Deterministic: identical inputs give bit-identical tensors.
    pub fn build(
        card: &Datacard,
        shapes: &dyn ShapeProvider,
        options: &BuildOptions,
    ) -> Result<Self> {
        card.validate()?;
        let kinds =
            card.systematics.iter().map(|s| s.kind()).collect::<Result<Vec<SystematicKind>>>()?;

        let nproc = card.processes.len();
        let nsyst = card.systematics.len();

        let mut channels = Vec::with_capacity(card.channels.len());
        let mut data_obs = Vec::new();
        for ch in &card.channels {
            let name = data_key(&ch.name);
            let data = shapes
                .shape(&name)
                .ok_or_else(|| Error::Validation(format!("Missing histogram '{}'", name)))?;
            if data.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(Error::Validation(format!(
                    "Histogram '{}' has negative or non-finite counts",
                    name
                )));
            }
            channels.push(ChannelInfo {
                name: ch.name.clone(),
                offset: data_obs.len(),
                nbins: data.len(),
            });
            data_obs.extend_from_slice(data);
        }
        let nbins = data_obs.len();

        let mut norm = vec![0.0; nbins * nproc];
        let mut logkup = vec![0.0; nbins * nproc * nsyst];
        let mut logkdown = vec![0.0; nbins * nproc * nsyst];
        let mut n_clamped = 0usize;

        for (ch, info) in card.channels.iter().zip(&channels) {
            for (p, proc) in card.processes.iter().enumerate() {
                if !ch.processes.iter().any(|n| n == &proc.name) {
                    continue;
                }
                let nominal = lookup(shapes, &nominal_key(&ch.name, &proc.name), info.nbins)?;
                for (i, &v) in nominal.iter().enumerate() {
                    if !v.is_finite() {
                        return Err(Error::Validation(format!(
                            "Non-finite nominal yield in '{}/{}' bin {}",
                            ch.name, proc.name, i
                        )));
                    }
                    let b = info.offset + i;
                    norm[b * nproc + p] = if v < 0.0 && !options.allow_negative_expectation {
                        n_clamped += 1;
                        0.0
                    } else {
                        v
                    };
                }

                for (s, (syst, kind)) in card.systematics.iter().zip(&kinds).enumerate() {
                    let Some(effect) = syst.effect(&ch.name, &proc.name) else {
                        continue;
                    };
                    match kind {
                        SystematicKind::LogNormal => {
                            let (up, down) = match effect {
                                Effect::Symmetric(k) => {
                                    let lk = lnn_kappa(k, &syst.name)?.ln();
                                    (lk, lk)
                                }
                                Effect::Asymmetric([kdown, kup]) => (
                                    lnn_kappa(kup, &syst.name)?.ln(),
                                    -lnn_kappa(kdown, &syst.name)?.ln(),
                                ),
                            };
                            for i in 0..info.nbins {
                                let idx = ((info.offset + i) * nproc + p) * nsyst + s;
                                logkup[idx] = up;
                                logkdown[idx] = down;
                            }
                        }
                        SystematicKind::Shape => {
                            let kfac = match effect {
                                Effect::Symmetric(k) => k,
                                Effect::Asymmetric(_) => {
                                    return Err(Error::Validation(format!(
                                        "Shape systematic '{}' takes a single scale factor",
                                        syst.name
                                    )));
                                }
                            };
                            if kfac.is_nan() || kfac <= 0.0 {
                                continue;
                            }
                            for dir in [Variation::Up, Variation::Down] {
                                let key = variation_key(&ch.name, &proc.name, &syst.name, dir);
                                let varied = lookup(shapes, &key, info.nbins)?;
                                let mut edge = false;
                                for (i, &v) in varied.iter().enumerate() {
                                    let b = info.offset + i;
                                    let (lk, hit) = shape_logk(
                                        norm[b * nproc + p],
                                        v,
                                        kfac,
                                        dir,
                                        options.shape_edge_policy,
                                    );
                                    edge |= hit;
                                    let idx = (b * nproc + p) * nsyst + s;
                                    match dir {
                                        Variation::Up => logkup[idx] = lk,
                                        Variation::Down => logkdown[idx] = lk,
                                    }
                                }
                                if edge {
                                    log::warn!(
                                        "empty or sign-flipped {} variation: channel={} process={} syst={}",
                                        dir.label(),
                                        ch.name,
                                        proc.name,
                                        syst.name
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        if n_clamped > 0 {
            log::warn!("clamped {} negative nominal yields to zero", n_clamped);
        }

        for (name, t) in [("logkup", &logkup), ("logkdown", &logkdown)] {
            if let Some(idx) = t.iter().position(|v| !v.is_finite()) {
                let s = idx % nsyst;
                let p = (idx / nsyst) % nproc;
                let b = idx / (nsyst * nproc);
                return Err(Error::Validation(format!(
                    "Non-finite {} at bin {} process '{}' systematic '{}'",
                    name, b, card.processes[p].name, card.systematics[s].name
                )));
            }
        }

        let logkavg: Vec<f64> = logkup.iter().zip(&logkdown).map(|(u, d)| 0.5 * (u + d)).collect();
        let logkhalfdiff: Vec<f64> =
            logkup.iter().zip(&logkdown).map(|(u, d)| 0.5 * (u - d)).collect();

        let pois: Vec<String> =
            card.signal_processes().into_iter().map(str::to_string).collect();
        let npoi = pois.len();
        let mut logkr = vec![0.0; nproc * npoi];
        let mut poi = 0;
        for (p, proc) in card.processes.iter().enumerate() {
            if proc.signal {
                logkr[p * npoi + poi] = 1.0;
                poi += 1;
            }
        }

        let max_abs = |t: &[f64]| t.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        log::debug!(
            "variation table: channels={} bins={} processes={} systematics={} pois={}",
            channels.len(),
            nbins,
            nproc,
            nsyst,
            npoi
        );
        log::debug!("max |logkup|={:.6} max |logkdown|={:.6}", max_abs(&logkup), max_abs(&logkdown));

        Ok(Self {
            channels,
            processes: card.processes.iter().map(|p| p.name.clone()).collect(),
            systematics: card.systematics.iter().map(|s| s.name.clone()).collect(),
            pois,
            data_obs,
            norm,
            logkup,
            logkdown,
            logkavg,
            logkhalfdiff,
            logkr,
        })
    }

    /// Total number of bins.
    pub fn nbins(&self) -> usize {
        self.data_obs.len()
    }

    /// Number of processes.
    pub fn nproc(&self) -> usize {
        self.processes.len()
    }

    /// Number of systematics (nuisance parameters).
    pub fn nsyst(&self) -> usize {
        self.systematics.len()
    }

    /// Number of signal strengths.
    pub fn npoi(&self) -> usize {
        self.pois.len()
    }

    /// Channel layout.
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    /// Process names.
    pub fn processes(&self) -> &[String] {
        &self.processes
    }

    /// Systematic names.
    pub fn systematics(&self) -> &[String] {
        &self.systematics
    }

    /// Signal-strength names (the signal process names).
    pub fn pois(&self) -> &[String] {
        &self.pois
    }

    /// Observed counts.
    pub fn data_obs(&self) -> &[f64] {
        &self.data_obs
    }

    /// `norm[bin, proc]`, flat.
    pub fn norm(&self) -> &[f64] {
        &self.norm
    }

    /// `logkup[bin, proc, syst]`, flat.
    pub fn logkup(&self) -> &[f64] {
        &self.logkup
    }

    /// `logkdown[bin, proc, syst]`, flat.
    pub fn logkdown(&self) -> &[f64] {
        &self.logkdown
    }

    /// `logkavg[bin, proc, syst]`, flat.
    pub fn logkavg(&self) -> &[f64] {
        &self.logkavg
    }

    /// `logkhalfdiff[bin, proc, syst]`, flat.
    pub fn logkhalfdiff(&self) -> &[f64] {
        &self.logkhalfdiff
    }

    /// `logkr[proc, poi]`, flat.
    pub fn logkr(&self) -> &[f64] {
        &self.logkr
    }

    /// Flat index into the `[bin, proc, syst]` tensors.
    #[inline]
    pub fn index(&self, bin: usize, proc: usize, syst: usize) -> usize {
        (bin * self.nproc() + proc) * self.nsyst() + syst
    }
}
