//! Coordination - inference of interpersonal coordination from turn-taking series
//!
//! Coordination is a per-step quantity in `[0, 1]` that says how much a
//! speaker's latent vocalic state is pulled toward the most recent turn of
//! somebody else rather than their own previous turn:
//!
//! ```text
//! V_t = (1 - C_t) · V_own + C_t · V_other + noise
//! ```
//!
//! # Engines
//!
//! - [`DiscreteCoordinationEngine`] - exact forward/backward smoothing of a
//!   binary coordination chain, one message per time step
//! - [`ParticleFilterEngine`] - sequential Monte Carlo over continuous or
//!   binary coordination, optionally with latent vocalics
//! - [`GibbsEngine`] - blocked Gibbs sampling of coordination, latent paths
//!   and the model variances over many trials
//!
//! [`SyntheticGenerator`] draws trials from the same generative model, with
//! the ground truth attached.
//!
//! # Modules
//!
//! - [`blending`] - the blended transition mean, phase transforms and bounding maps
//! - [`config`] - configuration types and loading
//! - [`stats`] - Gaussian densities and samplers shared by the engines

pub mod blending;
pub mod config;
pub mod discrete;
pub mod error;
pub mod gibbs;
pub mod latent;
pub mod particle;
pub mod stats;
pub mod synthetic;

mod parallel;

pub use blending::{BlendingModel, BoundingMap, CoordinationEstimate, PhaseTransform, Role};
pub use config::{
    Config, CoordinationKind, DiscreteConfig, FixedVariances, GibbsConfig, GibbsCoordination, InverseGammaPrior,
    ParticleConfig, ParticleEvidence, VariancePriors, Variances,
};
pub use discrete::{DiscreteCoordinationEngine, DiscretePosterior, Message};
pub use error::{CoordinationError, Result};
pub use gibbs::{ChainSample, GibbsEngine, GibbsEvidence, GibbsPosterior, SweepRecord, SweepTrace};
pub use latent::LatentPath;
pub use particle::{CoordinationState, ParticleFilter, ParticleFilterEngine, ParticleModel, Particles};
pub use synthetic::{SyntheticConfig, SyntheticCoordination, SyntheticGenerator, SyntheticTrial};
pub use turnseries::{TurnSeries, TurnSeriesBuilder};
