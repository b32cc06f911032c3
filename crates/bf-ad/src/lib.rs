//! # bf-ad
//!
//! Automatic differentiation (AD) primitives for binfit.
//!
//! Provides:
//! - **Forward-mode AD** via [`dual::Dual`] numbers
//! - **Reverse-mode AD** via a computation tape ([`tape::GenericTape`]) whose node
//!   values can be `f64` (gradients) or `Dual` (Hessian columns)
//! - [`hessian`]: value/gradient/Hessian drivers built on the two
//! - [`Scalar`](scalar::Scalar) trait for writing generic code over `f64` and `Dual`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dual;
pub mod hessian;
pub mod scalar;
pub mod tape;
