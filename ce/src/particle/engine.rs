//! Coordination estimation by particle filtering

use tracing::{debug, info};
use turnseries::TurnSeries;

use super::{
    CoordinationDynamics, CoordinationState, DiscreteDynamics, LatentVocalicsModel, LogisticDynamics, ObservedVocalicsModel,
    ParticleFilter, ParticleModel, TruncatedDynamics, VocalicsEvidence,
};
use crate::blending::{BlendingModel, CoordinationEstimate};
use crate::config::{CoordinationKind, ParticleConfig, ParticleEvidence};
use crate::error::Result;
use crate::parallel;
use crate::stats::weighted_mean_variance;

/// Runs one particle filter per trial and reports the weighted mean and
/// variance of coordination at every step
#[derive(Debug, Clone)]
pub struct ParticleFilterEngine {
    config: ParticleConfig,
}

impl ParticleFilterEngine {
    pub fn new(config: ParticleConfig) -> Result<Self> {
        debug!(?config, "ParticleFilterEngine::new: called");
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    pub fn estimate(&self, series: &TurnSeries, seed: u64) -> Result<CoordinationEstimate> {
        debug!(num_time_steps = series.num_time_steps(), seed, "ParticleFilterEngine::estimate: called");
        let config = &self.config;
        match config.kind {
            CoordinationKind::Logistic => self.estimate_with(
                series,
                LogisticDynamics::new(config.initial_coordination, config.sd_initial_coordination, config.sd_coordination),
                seed,
            ),
            CoordinationKind::Truncated => self.estimate_with(
                series,
                TruncatedDynamics::new(config.initial_coordination, config.sd_initial_coordination, config.sd_coordination),
                seed,
            ),
            CoordinationKind::Discrete => self.estimate_with(
                series,
                DiscreteDynamics::new(config.initial_coordination, config.change_probability),
                seed,
            ),
        }
    }

    /// Estimate every trial on `num_jobs` workers; trial `i` uses seed `seed + i`
    pub fn estimate_all(&self, trials: &[TurnSeries], seed: u64, num_jobs: usize) -> Result<Vec<CoordinationEstimate>> {
        debug!(num_trials = trials.len(), seed, num_jobs, "ParticleFilterEngine::estimate_all: called");
        let estimates = parallel::run_indexed(num_jobs, trials.len(), |i| {
            self.estimate(&trials[i], seed.wrapping_add(i as u64))
        })?;
        info!(num_trials = trials.len(), "Particle filter inference complete");
        Ok(estimates)
    }

    fn estimate_with<D: CoordinationDynamics>(&self, series: &TurnSeries, dynamics: D, seed: u64) -> Result<CoordinationEstimate> {
        let config = &self.config;
        match config.evidence {
            ParticleEvidence::Observed => {
                let evidence = VocalicsEvidence::new(config, series.num_features())?;
                let model = ObservedVocalicsModel::new(series, dynamics, evidence, config.fix_second_half);
                self.summarize(&model, series.num_time_steps(), seed)
            }
            ParticleEvidence::Latent => {
                let model = LatentVocalicsModel::new(
                    series,
                    dynamics,
                    config.variances,
                    BlendingModel::new(config.self_dependent),
                    config.fix_second_half,
                );
                self.summarize(&model, series.num_time_steps(), seed)
            }
        }
    }

    fn summarize<M>(&self, model: &M, num_time_steps: usize, seed: u64) -> Result<CoordinationEstimate>
    where
        M: ParticleModel,
        M::State: CoordinationState,
    {
        let mut estimate = CoordinationEstimate::with_capacity(num_time_steps);
        let mut filter = ParticleFilter::new(model, self.config.num_particles, seed);
        filter.run(|_, state, weights| {
            let (mean, variance) = weighted_mean_variance(state.coordination(), weights);
            estimate.push(mean, variance);
        })?;
        Ok(estimate.extend_to(num_time_steps))
    }
}
