//! Gradient and Hessian drivers on top of the generic tape.
//!
//! A function is described once by a [`TapeRecorder`], which records it on a
//! tape of any [`Scalar`] node type. The gradient comes from one reverse sweep on
//! `f64` nodes. The Hessian comes from one reverse sweep per parameter on
//! [`Dual`] nodes (forward-over-reverse): seeding input `j` with a unit tangent
//! makes the tangents of the adjoints equal to column `j` of the Hessian.
//! Columns are independent and evaluated in parallel with rayon.

use rayon::prelude::*;

use crate::dual::Dual;
use crate::scalar::Scalar;
use crate::tape::{GenericTape, Tape, Var};

/// A scalar function that can be recorded on a reverse-mode tape.
pub trait TapeRecorder: Sync {
    /// Error returned when recording fails (e.g. a non-finite intermediate).
    type Error: Send;

    /// Record the function on `tape` given the already-recorded `inputs`, and
    /// return the output node.
    fn record<T: Scalar>(
        &self,
        tape: &mut GenericTape<T>,
        inputs: &[Var],
    ) -> Result<Var, Self::Error>;

    /// Expected number of tape nodes, used to pre-allocate.
    fn capacity_hint(&self) -> usize {
        0
    }
}

/// Value and gradient from one forward and one reverse pass.
pub fn value_and_gradient<R: TapeRecorder>(
    recorder: &R,
    params: &[f64],
) -> Result<(f64, Vec<f64>), R::Error> {
    let mut tape = Tape::with_capacity(recorder.capacity_hint());
    let inputs: Vec<Var> = params.iter().map(|&p| tape.var(p)).collect();
    let out = recorder.record(&mut tape, &inputs)?;
    tape.backward(out);
    let grad = inputs.iter().map(|&v| tape.adjoint(v)).collect();
    Ok((tape.val(out), grad))
}

/// One Hessian column plus the gradient, from a dual-valued reverse sweep.
fn hessian_column<R: TapeRecorder>(
    recorder: &R,
    tape: &mut GenericTape<Dual>,
    params: &[f64],
    j: usize,
) -> Result<Vec<f64>, R::Error> {
    tape.clear();
    let inputs: Vec<Var> = params
        .iter()
        .enumerate()
        .map(|(i, &p)| tape.var(Dual::new(p, if i == j { 1.0 } else { 0.0 })))
        .collect();
    let out = recorder.record(tape, &inputs)?;
    tape.backward(out);
    Ok(inputs.iter().map(|&v| tape.adjoint(v).dot).collect())
}

/// Dense Hessian (row-major `n×n`) by forward-over-reverse.
///
/// The result is symmetrized to remove rounding asymmetry between columns.
pub fn hessian<R: TapeRecorder>(recorder: &R, params: &[f64]) -> Result<Vec<f64>, R::Error> {
    let n = params.len();
    let cap = recorder.capacity_hint();

    let columns: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map_init(
            || GenericTape::<Dual>::with_capacity(cap),
            |tape, j| hessian_column(recorder, tape, params, j),
        )
        .collect::<Result<Vec<_>, _>>()?;

    let mut h = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            h[i * n + j] = 0.5 * (columns[j][i] + columns[i][j]);
        }
    }
    Ok(h)
}

/// Value, gradient and Hessian.
pub fn value_gradient_hessian<R: TapeRecorder>(
    recorder: &R,
    params: &[f64],
) -> Result<(f64, Vec<f64>, Vec<f64>), R::Error> {
    let (value, grad) = value_and_gradient(recorder, params)?;
    let h = hessian(recorder, params)?;
    Ok((value, grad, h))
}
