//! Expected yields as a function of signal strengths and nuisances.
//!
//! For log signal strengths `logr[npoi]` and nuisances `theta[nsyst]`:
//!
//! ```text
//! signal[p]      = exp( sum_poi logkr[p, poi] * logr[poi] )
//! alpha(t)       = clamp( x/8 * (x^2 (3 x^2 - 10) + 15), -1, 1 ),  x = 2 t
//! logk[b, p, s]  = logkavg[b, p, s] + alpha(theta[s]) * logkhalfdiff[b, p, s]
//! nuis[b, p]     = exp( sum_s logk[b, p, s] * theta[s] )
//! nexp[b]        = sum_p norm[b, p] * signal[p] * nuis[b, p]
//! ```
//!
//! The function exists twice: generic over [`Scalar`] for direct evaluation, and
//! recorded on a [`GenericTape`] for reverse-mode derivatives. Zero entries of the
//! tables are skipped in both; they contribute exactly nothing.

use bf_ad::scalar::Scalar;
use bf_ad::tape::{GenericTape, Var};
use bf_core::{Error, Result};

use crate::table::VariationTable;

/// Smooth interpolation weight between the averaged and the asymmetric log-kappa.
///
/// Odd, `alpha(0) = 0`, reaches `±1` at `t = ±1/2` with vanishing first and second
/// derivatives, and is clamped to `[-1, 1]` beyond.
pub fn alpha<T: Scalar>(theta: T) -> T {
    let x = T::from_f64(2.0) * theta;
    let x2 = x * x;
    let poly = x2 * (T::from_f64(3.0) * x2 - T::from_f64(10.0)) + T::from_f64(15.0);
    (T::from_f64(0.125) * x * poly).clamp_s(-1.0, 1.0)
}

fn alpha_on_tape<T: Scalar>(tape: &mut GenericTape<T>, theta: Var) -> Var {
    let x = tape.mul_f64(theta, 2.0);
    let x2 = tape.mul(x, x);
    let a = tape.mul_f64(x2, 3.0);
    let a = tape.sub_f64(a, 10.0);
    let a = tape.mul(x2, a);
    let a = tape.add_f64(a, 15.0);
    let a = tape.mul(x, a);
    let a = tape.mul_f64(a, 0.125);
    tape.clamp(a, -1.0, 1.0)
}

/// The binned model: the variation table plus derived nominal totals.
#[derive(Debug, Clone)]
pub struct BinnedModel {
    table: VariationTable,
    nexpnom: Vec<f64>,
}

impl BinnedModel {
    /// Wrap a table.
    pub fn new(table: VariationTable) -> Self {
        let nproc = table.nproc();
        let nexpnom = table.norm().chunks(nproc.max(1)).map(|row| row.iter().sum()).collect();
        Self { table, nexpnom }
    }

    /// The underlying table.
    pub fn table(&self) -> &VariationTable {
        &self.table
    }

    /// Nominal expected total per bin, `sum_p norm[b, p]`.
    pub fn nexpnom(&self) -> &[f64] {
        &self.nexpnom
    }

    /// Number of bins.
    pub fn nbins(&self) -> usize {
        self.table.nbins()
    }

    /// Number of signal strengths.
    pub fn npoi(&self) -> usize {
        self.table.npoi()
    }

    /// Number of nuisance parameters.
    pub fn nsyst(&self) -> usize {
        self.table.nsyst()
    }

    fn check_lengths(&self, npoi: usize, nsyst: usize) -> Result<()> {
        if npoi != self.npoi() || nsyst != self.nsyst() {
            return Err(Error::Validation(format!(
                "parameter length mismatch: got {} signal strengths and {} nuisances, expected {} and {}",
                npoi,
                nsyst,
                self.npoi(),
                self.nsyst()
            )));
        }
        Ok(())
    }

    /// Expected yield per bin.
    pub fn expected_yields<T: Scalar>(&self, logr: &[T], theta: &[T]) -> Result<Vec<T>> {
        self.check_lengths(logr.len(), theta.len())?;
        let t = &self.table;
        let (nproc, nsyst, npoi) = (t.nproc(), t.nsyst(), t.npoi());
        let zero = T::from_f64(0.0);

        let signal: Vec<Option<T>> = (0..nproc)
            .map(|p| {
                let row = &t.logkr()[p * npoi..(p + 1) * npoi];
                let mut exponent = None;
                for (&k, &lr) in row.iter().zip(logr) {
                    if k != 0.0 {
                        let term = T::from_f64(k) * lr;
                        exponent = Some(exponent.map_or(term, |e: T| e + term));
                    }
                }
                exponent.map(T::exp)
            })
            .collect();

        let alphas: Vec<T> = theta.iter().map(|&th| alpha(th)).collect();

        let mut nexp = Vec::with_capacity(t.nbins());
        for b in 0..t.nbins() {
            let mut total = zero;
            for p in 0..nproc {
                let norm = t.norm()[b * nproc + p];
                if norm == 0.0 {
                    continue;
                }
                let base = (b * nproc + p) * nsyst;
                let mut exponent = zero;
                let mut any = false;
                for s in 0..nsyst {
                    let avg = t.logkavg()[base + s];
                    let half = t.logkhalfdiff()[base + s];
                    if avg == 0.0 && half == 0.0 {
                        continue;
                    }
                    let logk = T::from_f64(avg) + alphas[s] * T::from_f64(half);
                    exponent = exponent + logk * theta[s];
                    any = true;
                }
                let mut y = T::from_f64(norm);
                if any {
                    y = y * exponent.exp();
                }
                if let Some(sig) = signal[p] {
                    y = y * sig;
                }
                total = total + y;
            }
            nexp.push(total);
        }
        Ok(nexp)
    }

    /// Record the expected yields on a tape. Returns one node per bin.
    pub fn expected_yields_on_tape<T: Scalar>(
        &self,
        tape: &mut GenericTape<T>,
        logr: &[Var],
        theta: &[Var],
    ) -> Result<Vec<Var>> {
        self.check_lengths(logr.len(), theta.len())?;
        let t = &self.table;
        let (nproc, nsyst, npoi) = (t.nproc(), t.nsyst(), t.npoi());

        let mut signal: Vec<Option<Var>> = Vec::with_capacity(nproc);
        for p in 0..nproc {
            let row = &t.logkr()[p * npoi..(p + 1) * npoi];
            let terms: Vec<Var> = row
                .iter()
                .zip(logr)
                .filter(|&(&k, _)| k != 0.0)
                .map(|(&k, &lr)| if k == 1.0 { lr } else { tape.mul_f64(lr, k) })
                .collect();
            signal.push(if terms.is_empty() {
                None
            } else {
                let e = tape.sum(&terms);
                Some(tape.exp(e))
            });
        }

        let alphas: Vec<Var> = theta.iter().map(|&th| alpha_on_tape(tape, th)).collect();

        let mut nexp = Vec::with_capacity(t.nbins());
        let mut proc_terms = Vec::with_capacity(nproc);
        let mut syst_terms = Vec::with_capacity(nsyst);
        for b in 0..t.nbins() {
            proc_terms.clear();
            for p in 0..nproc {
                let norm = t.norm()[b * nproc + p];
                if norm == 0.0 {
                    continue;
                }
                let base = (b * nproc + p) * nsyst;
                syst_terms.clear();
                for s in 0..nsyst {
                    let avg = t.logkavg()[base + s];
                    let half = t.logkhalfdiff()[base + s];
                    if avg == 0.0 && half == 0.0 {
                        continue;
                    }
                    let term = if half == 0.0 {
                        tape.mul_f64(theta[s], avg)
                    } else {
                        let logk = tape.mul_f64(alphas[s], half);
                        let logk = tape.add_f64(logk, avg);
                        tape.mul(logk, theta[s])
                    };
                    syst_terms.push(term);
                }

                let mut factor: Option<Var> = None;
                if !syst_terms.is_empty() {
                    let e = tape.sum(&syst_terms);
                    factor = Some(tape.exp(e));
                }
                if let Some(sig) = signal[p] {
                    factor = Some(match factor {
                        Some(f) => tape.mul(f, sig),
                        None => sig,
                    });
                }
                let y = match factor {
                    Some(f) => tape.mul_f64(f, norm),
                    None => tape.constant(norm),
                };
                proc_terms.push(y);
            }
            nexp.push(tape.sum(&proc_terms));
        }
        Ok(nexp)
    }

    /// Rough node count of one likelihood recording, for tape pre-allocation.
    pub fn tape_capacity_hint(&self) -> usize {
        let t = &self.table;
        let active = t
            .logkavg()
            .iter()
            .zip(t.logkhalfdiff())
            .filter(|&(&a, &h)| a != 0.0 || h != 0.0)
            .count();
        4 * active + 6 * t.nbins() * t.nproc().max(1) + 12 * t.nsyst() + 4 * t.npoi() + 16
    }
}
