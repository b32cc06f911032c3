//! # bf-model
//!
//! Binned model for binfit: from a parsed [`Datacard`] and its histograms to a
//! dense [`VariationTable`], the expected-yield function ([`BinnedModel`]) and the
//! negative log-likelihood with AD derivatives ([`Likelihood`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod card;
pub mod input;
pub mod likelihood;
pub mod model;
pub mod shapes;
pub mod simplemodels;
pub mod table;

pub use card::{ChannelSpec, Datacard, Effect, ProcessSpec, SystematicKind, SystematicSpec};
pub use input::ModelInput;
pub use likelihood::{Likelihood, LikelihoodForm, Observation, Parameterization};
pub use model::{BinnedModel, alpha};
pub use shapes::{ShapeProvider, ShapeStore, Variation};
pub use table::{BuildOptions, KAPPA_EPSILON, ShapeEdgePolicy, VariationTable};
