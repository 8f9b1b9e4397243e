//! Sequential importance resampling
//!
//! [`ParticleFilter`] is a generic bootstrap filter driven by a
//! [`ParticleModel`]. The coordination engines plug in a
//! [`CoordinationDynamics`] and one of two evidence models.

mod dynamics;
mod engine;
mod evidence;
mod latent;

pub use dynamics::{CoordinationDynamics, CoordinationParticles, DiscreteDynamics, LogisticDynamics, TruncatedDynamics};
pub use engine::ParticleFilterEngine;
pub use evidence::{ObservedVocalicsModel, VocalicsEvidence};
pub use latent::{LatentParticles, LatentVocalicsModel};

use rand::Rng;
use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::error::{CoordinationError, Result};
use crate::stats::normalize_log_weights;

/// Particle-owned state. Resampling must reorder every component jointly.
pub trait Particles: Clone + Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the set by the particles at `indices` (with repetition)
    fn resample(&mut self, indices: &[usize]);
}

/// Particle states that expose a coordination value per particle
pub trait CoordinationState {
    fn coordination(&self) -> &[f64];
}

/// Model hooks the filter is parameterized by
pub trait ParticleModel {
    type State: Particles;

    fn num_steps(&self) -> usize;

    fn sample_prior<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> Self::State;

    fn sample_transition<R: Rng + ?Sized>(&self, time: usize, previous: &Self::State, rng: &mut R) -> Self::State;

    /// Per-particle log likelihood at `time`, or `None` when the step carries
    /// no evidence
    fn log_likelihood(&self, time: usize, state: &Self::State) -> Option<Vec<f64>>;

    fn resample_at(&self, time: usize) -> bool;
}

/// Bootstrap filter with its own seeded stream
pub struct ParticleFilter<'m, M: ParticleModel> {
    model: &'m M,
    num_particles: usize,
    rng: ChaCha8Rng,
}

impl<'m, M: ParticleModel> ParticleFilter<'m, M> {
    pub fn new(model: &'m M, num_particles: usize, seed: u64) -> Self {
        Self {
            model,
            num_particles,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Run the filter over every step. `on_step` sees the propagated
    /// particles and their normalized weights before any resampling.
    pub fn run<F>(&mut self, mut on_step: F) -> Result<M::State>
    where
        F: FnMut(usize, &M::State, &[f64]),
    {
        let num_steps = self.model.num_steps();
        debug!(num_steps, num_particles = self.num_particles, "ParticleFilter::run: called");

        let mut state = self.model.sample_prior(self.num_particles, &mut self.rng);
        let mut log_weights = vec![0.0; self.num_particles];

        for t in 0..num_steps {
            if t > 0 {
                state = self.model.sample_transition(t, &state, &mut self.rng);
            }

            let observed = match self.model.log_likelihood(t, &state) {
                Some(ll) => {
                    log_weights.iter_mut().zip(&ll).for_each(|(w, l)| *w += l);
                    true
                }
                None => false,
            };
            let weights = normalize_log_weights(&log_weights);
            on_step(t, &state, &weights);

            if observed && self.model.resample_at(t) {
                let indices = resample_indices(&weights, &mut self.rng)
                    .map_err(|reason| CoordinationError::DegenerateWeights { time: t, reason })?;
                state.resample(&indices);
                log_weights.fill(0.0);
                trace!(time = t, "ParticleFilter::run: resampled");
            }
        }
        Ok(state)
    }
}

/// Multinomial draw of `weights.len()` indices with replacement
pub(crate) fn resample_indices<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> std::result::Result<Vec<usize>, String> {
    let distribution = WeightedIndex::new(weights).map_err(|e| e.to_string())?;
    Ok((0..weights.len()).map(|_| distribution.sample(rng)).collect())
}
