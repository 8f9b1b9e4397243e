//! Blocked Gibbs sampling of coordination, latent paths and variances
//!
//! Each sweep runs, per trial, the coordination block (unless coordination
//! is known) and the latent block (unless the latent path is known), then
//! refreshes the variances pooled over every trial. Only the state after
//! the last sweep is kept, plus a bounded [`SweepTrace`].

mod coordination;
mod latent;
mod state;
mod trace;
mod variance;

pub use state::TrialState;
pub use trace::{SweepRecord, SweepTrace};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace};
use turnseries::TurnSeries;

use crate::blending::{BlendingModel, CoordinationEstimate};
use crate::config::{GibbsConfig, GibbsCoordination, Variances};
use crate::error::{CoordinationError, Result};
use crate::latent::LatentPath;
use crate::parallel;
use coordination::{RandomWalkPrior, coordination_terms, sample_discrete, sample_truncated};
use state::TrialModel;
use variance::Residuals;

/// One trial and whatever is known about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GibbsEvidence {
    pub series: TurnSeries,
    /// Known coordination at every step
    pub coordination: Option<Vec<f64>>,
    /// Known latent path
    pub latent: Option<LatentPath>,
}

impl GibbsEvidence {
    pub fn new(series: TurnSeries) -> Self {
        Self {
            series,
            coordination: None,
            latent: None,
        }
    }

    pub fn with_coordination(mut self, coordination: Vec<f64>) -> Self {
        self.coordination = Some(coordination);
        self
    }

    pub fn with_latent(mut self, latent: LatentPath) -> Self {
        self.latent = Some(latent);
        self
    }

    fn validate(&self) -> Result<()> {
        if let Some(coordination) = &self.coordination {
            if coordination.len() != self.series.num_time_steps() {
                return Err(CoordinationError::InvalidParameter {
                    name: "known coordination",
                    reason: format!(
                        "has {} steps but the series has {}",
                        coordination.len(),
                        self.series.num_time_steps()
                    ),
                });
            }
            if let Some(c) = coordination.iter().find(|c| !(0.0..=1.0).contains(*c)) {
                return Err(CoordinationError::ProbabilityOutOfRange {
                    name: "known coordination",
                    value: *c,
                });
            }
        }
        if let Some(latent) = &self.latent
            && !latent.matches(&self.series)
        {
            return Err(CoordinationError::InvalidParameter {
                name: "known latent path",
                reason: "shape differs from the series".to_string(),
            });
        }
        Ok(())
    }
}

/// Final state of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSample {
    pub chain: usize,
    /// Per trial
    pub states: Vec<TrialState>,
    pub variances: Variances,
    pub trace: SweepTrace,
}

/// Last-sweep samples of every chain plus their cross-chain summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GibbsPosterior {
    pub chains: Vec<ChainSample>,
    /// Per trial: mean and variance of coordination across chains
    pub coordination: Vec<CoordinationEstimate>,
    /// Variances averaged across chains
    pub variances: Variances,
}

/// Blocked Gibbs sampler over a set of trials
#[derive(Debug, Clone)]
pub struct GibbsEngine {
    config: GibbsConfig,
    seed: u64,
    num_jobs: usize,
    cancel: Arc<AtomicBool>,
}

impl GibbsEngine {
    pub fn new(config: GibbsConfig, seed: u64, num_jobs: usize) -> Result<Self> {
        debug!(?config, seed, num_jobs, "GibbsEngine::new: called");
        config.validate()?;
        Ok(Self {
            config,
            seed,
            num_jobs,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &GibbsConfig {
        &self.config
    }

    /// Flag that stops every chain before its next sweep once set
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn sample(&self, trials: &[GibbsEvidence]) -> Result<GibbsPosterior> {
        debug!(
            num_trials = trials.len(),
            num_chains = self.config.num_chains,
            "GibbsEngine::sample: called"
        );
        if trials.is_empty() {
            return Err(CoordinationError::InvalidParameter {
                name: "trials",
                reason: "at least one trial is required".to_string(),
            });
        }
        for trial in trials {
            trial.validate()?;
        }

        let chains = parallel::run_indexed(self.num_jobs, self.config.num_chains, |chain| {
            self.run_chain(chain, trials)
        })?;
        let posterior = summarize(chains, trials);
        info!(
            num_trials = trials.len(),
            num_chains = self.config.num_chains,
            prior = posterior.variances.prior,
            transition = posterior.variances.transition,
            observation = posterior.variances.observation,
            "Gibbs sampling complete"
        );
        Ok(posterior)
    }

    fn blending(&self) -> BlendingModel {
        BlendingModel::new(self.config.self_dependent)
    }

    fn random_walk(&self) -> RandomWalkPrior {
        RandomWalkPrior {
            initial_mean: self.config.initial_coordination,
            sd_initial: self.config.sd_initial_coordination,
            sd_step: self.config.sd_coordination,
        }
    }

    fn initial_state(&self, model: &TrialModel<'_>, trial: &GibbsEvidence) -> TrialState {
        let num_time_steps = trial.series.num_time_steps();
        let start = match self.config.coordination {
            GibbsCoordination::Discrete if self.config.initial_coordination >= 0.5 => 1.0,
            GibbsCoordination::Discrete => 0.0,
            GibbsCoordination::Truncated => self.config.initial_coordination,
        };
        let coordination = trial.coordination.clone().unwrap_or_else(|| vec![start; num_time_steps]);
        let unbounded = (0..model.horizon)
            .map(|j| if trial.coordination.is_some() { coordination[j] } else { start })
            .collect();
        let latent = trial
            .latent
            .clone()
            .unwrap_or_else(|| LatentPath::from_observed(&trial.series));
        TrialState {
            coordination,
            unbounded,
            latent,
        }
    }

    fn run_chain(&self, chain: usize, trials: &[GibbsEvidence]) -> Result<ChainSample> {
        debug!(chain, "GibbsEngine::run_chain: called");
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(chain as u64);

        let blending = self.blending();
        let models: Vec<TrialModel<'_>> = trials
            .iter()
            .map(|t| TrialModel::new(&t.series, blending, self.config.fix_second_half))
            .collect();
        let mut states: Vec<TrialState> = models
            .iter()
            .zip(trials)
            .map(|(model, trial)| self.initial_state(model, trial))
            .collect();
        let mut variances = self.config.initial_variances;
        let mut trace = SweepTrace::new(self.config.trace_capacity);
        let walk = self.random_walk();

        for sweep in 0..self.config.num_sweeps {
            if self.cancel.load(Ordering::Relaxed) {
                debug!(chain, sweep, "GibbsEngine::run_chain: cancelled");
                return Err(CoordinationError::Cancelled { sweep });
            }

            for ((model, state), trial) in models.iter().zip(states.iter_mut()).zip(trials) {
                if trial.coordination.is_none() {
                    let terms = coordination_terms(model, state, variances.transition);
                    match self.config.coordination {
                        GibbsCoordination::Discrete => sample_discrete(
                            model,
                            state,
                            &terms,
                            self.config.initial_coordination,
                            self.config.change_probability,
                            &mut rng,
                        ),
                        GibbsCoordination::Truncated => sample_truncated(model, state, &terms, &walk, &mut rng),
                    }
                }
                if trial.latent.is_none() {
                    latent::sample_latent(model, state, &variances, &mut rng)?;
                }
            }

            let mut residuals = Residuals::default();
            for (model, state) in models.iter().zip(&states) {
                residuals.merge(&Residuals::collect(model, state));
            }
            variances = residuals.sample_variances(
                &variances,
                &self.config.priors,
                &self.config.fixed_variances,
                &mut rng,
            )?;

            let log_likelihood = residuals.log_likelihood(&variances);
            trace!(chain, sweep, log_likelihood, "GibbsEngine::run_chain: sweep done");
            trace.push(SweepRecord {
                sweep,
                variances,
                log_likelihood,
            });
        }

        Ok(ChainSample {
            chain,
            states,
            variances,
            trace,
        })
    }
}

fn summarize(chains: Vec<ChainSample>, trials: &[GibbsEvidence]) -> GibbsPosterior {
    let num_chains = chains.len() as f64;
    let coordination = trials
        .iter()
        .enumerate()
        .map(|(i, trial)| {
            let num_time_steps = trial.series.num_time_steps();
            let mut estimate = CoordinationEstimate::with_capacity(num_time_steps);
            for t in 0..num_time_steps {
                let values: Vec<f64> = chains.iter().map(|c| c.states[i].coordination[t]).collect();
                let mean = values.iter().sum::<f64>() / num_chains;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / num_chains;
                estimate.push(mean, variance);
            }
            estimate
        })
        .collect();

    let mut variances = Variances::new(0.0, 0.0, 0.0);
    for chain in &chains {
        variances.prior += chain.variances.prior / num_chains;
        variances.transition += chain.variances.transition / num_chains;
        variances.observation += chain.variances.observation / num_chains;
    }

    GibbsPosterior {
        chains,
        coordination,
        variances,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedVariances;
    use turnseries::TurnSeriesBuilder;

    fn trial() -> GibbsEvidence {
        let mut builder = TurnSeriesBuilder::new(2, 1, 6);
        builder.observe(0, 0, vec![0.5]).unwrap();
        builder.observe(1, 1, vec![0.4]).unwrap();
        builder.observe(3, 0, vec![0.1]).unwrap();
        builder.observe(4, 1, vec![0.2]).unwrap();
        GibbsEvidence::new(builder.build().unwrap())
    }

    fn config() -> GibbsConfig {
        GibbsConfig {
            num_sweeps: 5,
            num_chains: 2,
            trace_capacity: 3,
            ..GibbsConfig::default()
        }
    }

    #[test]
    fn test_sample_shapes() {
        let engine = GibbsEngine::new(config(), 1, 2).unwrap();
        let posterior = engine.sample(&[trial(), trial()]).unwrap();

        assert_eq!(posterior.chains.len(), 2);
        assert_eq!(posterior.coordination.len(), 2);
        assert_eq!(posterior.coordination[0].len(), 6);
        for chain in &posterior.chains {
            assert_eq!(chain.trace.len(), 3);
            assert_eq!(chain.trace.last().map(|r| r.sweep), Some(4));
            assert!(chain.states[0].coordination.iter().all(|c| (0.0..=1.0).contains(c)));
        }
        assert!(posterior.variances.prior > 0.0);
    }

    #[test]
    fn test_chains_are_reproducible_and_distinct() {
        let engine = GibbsEngine::new(config(), 7, 2).unwrap();
        let a = engine.sample(&[trial()]).unwrap();
        let b = engine.sample(&[trial()]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.chains[0].states, a.chains[1].states);
    }

    #[test]
    fn test_known_quantities_are_untouched() {
        let known = vec![0.3; 6];
        let evidence = trial().with_coordination(known.clone());
        let latent = LatentPath::from_observed(&evidence.series);
        let evidence = evidence.with_latent(latent.clone());

        let engine = GibbsEngine::new(config(), 3, 1).unwrap();
        let posterior = engine.sample(&[evidence]).unwrap();
        for chain in &posterior.chains {
            assert_eq!(chain.states[0].coordination, known);
            assert_eq!(chain.states[0].latent, latent);
        }
        assert!(posterior.coordination[0].variance.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fixed_variances_stay_put() {
        let mut config = config();
        config.initial_variances = Variances::new(0.5, 0.25, 0.125);
        config.fixed_variances = FixedVariances {
            prior: true,
            transition: true,
            observation: true,
        };
        let engine = GibbsEngine::new(config, 0, 1).unwrap();
        let posterior = engine.sample(&[trial()]).unwrap();
        assert_eq!(posterior.variances, Variances::new(0.5, 0.25, 0.125));
    }

    #[test]
    fn test_discrete_coordination_is_binary() {
        let mut config = config();
        config.coordination = GibbsCoordination::Discrete;
        config.fix_second_half = true;
        let engine = GibbsEngine::new(config, 5, 1).unwrap();
        let posterior = engine.sample(&[trial()]).unwrap();
        for chain in &posterior.chains {
            let c = &chain.states[0].coordination;
            assert!(c.iter().all(|v| *v == 0.0 || *v == 1.0));
            assert!(c[3..].iter().all(|v| *v == c[3]));
        }
    }

    #[test]
    fn test_cancelled_before_first_sweep() {
        let engine = GibbsEngine::new(config(), 0, 1).unwrap();
        engine.cancellation().store(true, Ordering::Relaxed);
        assert!(matches!(
            engine.sample(&[trial()]),
            Err(CoordinationError::Cancelled { sweep: 0 })
        ));
    }

    #[test]
    fn test_invalid_evidence_rejected() {
        let engine = GibbsEngine::new(config(), 0, 1).unwrap();
        assert!(engine.sample(&[]).is_err());
        assert!(engine.sample(&[trial().with_coordination(vec![0.5; 2])]).is_err());
        assert!(engine.sample(&[trial().with_coordination(vec![1.5; 6])]).is_err());
        assert!(
            engine
                .sample(&[trial().with_latent(LatentPath::zeros(2, 2, 6))])
                .is_err()
        );
    }
}
