//! # bf-core
//!
//! Core types, traits, and error handling for binfit.
//!
//! This crate provides:
//! - The common error type
//! - The [`SecondOrderObjective`] trait the fit engine minimizes against
//! - Shared fit-result data structures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Evaluation, SecondOrderObjective};
pub use types::{FitResult, FitStatus, UNCERTAINTY_SENTINEL};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
