//! # bf-inference
//!
//! Fit engine for binfit.
//!
//! This crate provides:
//! - Whitening of the parameter space from a reference Hessian
//! - Minimizers: exact-Hessian trust region (default) and L-BFGS (prefit)
//! - The fit driver with EDM/convexity acceptance
//! - Toy generation and the per-toy fit session
//!
//! Everything here works against `SecondOrderObjective` from bf-core; the
//! model crate only supplies the likelihood.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Fit driver and acceptance policy.
pub mod driver;
/// Minimizer trait and the L-BFGS backend.
pub mod optimizer;
/// Whitening transform and whitened objectives.
pub mod precondition;
/// Covariance and curvature diagnostics.
pub mod result;
/// Per-toy fit session.
pub mod session;
/// Toy dataset generation.
pub mod toys;
/// Trust-region Newton minimizer.
pub mod trust_region;

pub use driver::{ConvergencePolicy, FitDriver, FitState};
pub use optimizer::{LbfgsMinimizer, Minimizer, OptimizationResult, OptimizerConfig};
pub use precondition::{Preconditioner, Whitened};
pub use result::{Diagnostics, diagnose};
pub use session::{FitSession, NuisanceEntry, PoiEntry, PreconditionMode, SessionConfig, ToyRecord};
pub use toys::{SeedStrategy, ToyConfig, ToyGenerator, ToyMode};
pub use trust_region::{TrustRegionConfig, TrustRegionNewton};
