//! Exact two-state coordination inference by forward-backward message passing

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use turnseries::TurnSeries;

use crate::blending::{CoordinationEstimate, Role, inference_horizon};
use crate::config::{DiscreteConfig, per_feature};
use crate::error::{CoordinationError, Result};
use crate::parallel;
use crate::stats::{EPSILON, diag_normal_pdf};

/// Likelihood pair for states `(0, 1)`
pub type Message = [f64; 2];

const NEUTRAL: Message = [0.5, 0.5];

/// Result of one forward-backward pass.
///
/// `forward`, `backward` and `marginals` cover the inference horizon: with
/// the second half frozen, every step from `M = T / 2` onward is collapsed
/// into step `M`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscretePosterior {
    pub num_time_steps: usize,
    /// Per-step evidence messages over all `T` steps
    pub messages: Vec<Message>,
    pub forward: Vec<Message>,
    pub backward: Vec<Message>,
    pub marginals: Vec<Message>,
}

impl DiscretePosterior {
    /// `P(C_t = 1)` for every step, frozen steps repeating the collapsed one.
    /// The variance is the Bernoulli variance of the marginal.
    pub fn to_estimate(&self) -> CoordinationEstimate {
        let mut estimate = CoordinationEstimate::with_capacity(self.num_time_steps);
        for marginal in &self.marginals {
            let p = marginal[1];
            estimate.push(p, p * (1.0 - p));
        }
        estimate.extend_to(self.num_time_steps)
    }
}

/// Forward-backward engine over a symmetric two-state coordination chain
#[derive(Debug, Clone)]
pub struct DiscreteCoordinationEngine {
    config: DiscreteConfig,
}

impl DiscreteCoordinationEngine {
    pub fn new(config: DiscreteConfig) -> Result<Self> {
        debug!(?config, "DiscreteCoordinationEngine::new: called");
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DiscreteConfig {
        &self.config
    }

    /// Evidence each step's observations carry about coordination
    pub fn messages(&self, series: &TurnSeries) -> Result<Vec<Message>> {
        debug!(num_time_steps = series.num_time_steps(), "DiscreteCoordinationEngine::messages: called");
        if series.num_subjects() < 2 {
            return Err(CoordinationError::InvalidParameter {
                name: "series",
                reason: format!("needs at least two subjects, got {}", series.num_subjects()),
            });
        }

        let num_features = series.num_features();
        let mean_prior = per_feature("mean-prior", &self.config.mean_prior, num_features)?;
        let sd_prior = per_feature("sd-prior", &self.config.sd_prior, num_features)?;
        let sd_uncoordinated = per_feature("sd-uncoordinated", &self.config.sd_uncoordinated, num_features)?;
        let sd_coordinated = per_feature("sd-coordinated", &self.config.sd_coordinated, num_features)?;
        let phase = self.config.phase;

        let mut messages = Vec::with_capacity(series.num_time_steps());
        for t in 0..series.num_time_steps() {
            let mut message = [1.0, 1.0];
            for s in 0..series.num_subjects() {
                let factor = match series.turn(t, s) {
                    Some(turn) => {
                        let other = turn
                            .previous_from_other
                            .and_then(|r| series.value(r.time, r.subject))
                            .map(|v| phase.apply(v, Role::Other));
                        match other {
                            None => NEUTRAL,
                            Some(other) => {
                                let x = phase.apply(turn.value, Role::Own);
                                let own = turn
                                    .previous_from_self
                                    .and_then(|p| series.value(p, s))
                                    .map(|v| phase.apply(v, Role::Own));
                                let c0 = match own {
                                    Some(own) => diag_normal_pdf(&x, &own, &sd_uncoordinated),
                                    None => diag_normal_pdf(&x, &mean_prior, &sd_prior),
                                };
                                let c1 = diag_normal_pdf(&x, &other, &sd_coordinated);
                                if c0 <= EPSILON && c1 <= EPSILON { NEUTRAL } else { [c0, c1] }
                            }
                        }
                    }
                    None => NEUTRAL,
                };
                message[0] *= factor[0];
                message[1] *= factor[1];
            }
            messages.push(message);
        }
        Ok(messages)
    }

    /// Forward-backward over precomputed messages (one per time step)
    pub fn smooth(&self, messages: &[Message]) -> DiscretePosterior {
        let num_time_steps = messages.len();
        let horizon = inference_horizon(num_time_steps, self.config.fix_second_half);
        debug!(num_time_steps, horizon, "DiscreteCoordinationEngine::smooth: called");

        // The last inferred step absorbs every remaining message
        let log_messages: Vec<Message> = (0..horizon)
            .map(|t| {
                let range = if t + 1 == horizon { t..num_time_steps } else { t..t + 1 };
                messages[range].iter().fold([0.0, 0.0], |acc, m| {
                    [acc[0] + (m[0] + EPSILON).ln(), acc[1] + (m[1] + EPSILON).ln()]
                })
            })
            .collect();

        let p = self.config.change_probability;
        let propagate = |v: &Message| -> Message { [(1.0 - p) * v[0] + p * v[1], p * v[0] + (1.0 - p) * v[1]] };

        let mut forward: Vec<Message> = Vec::with_capacity(horizon);
        for lm in &log_messages {
            let predicted = match forward.last() {
                Some(previous) => propagate(previous),
                None => [1.0 - self.config.initial_coordination, self.config.initial_coordination],
            };
            forward.push(normalize_log([
                (predicted[0] + EPSILON).ln() + lm[0],
                (predicted[1] + EPSILON).ln() + lm[1],
            ]));
        }

        let mut backward: Vec<Message> = vec![[0.0, 0.0]; horizon];
        for t in (0..horizon).rev() {
            let lm = log_messages[t];
            backward[t] = if t + 1 == horizon {
                normalize_log(lm)
            } else {
                let next = propagate(&backward[t + 1]);
                normalize_log([(next[0] + EPSILON).ln() + lm[0], (next[1] + EPSILON).ln() + lm[1]])
            };
        }

        let marginals: Vec<Message> = (0..horizon)
            .map(|t| {
                if t + 1 == horizon {
                    forward[t]
                } else {
                    let next = propagate(&backward[t + 1]);
                    normalize([forward[t][0] * next[0], forward[t][1] * next[1]])
                }
            })
            .collect();

        DiscretePosterior {
            num_time_steps,
            messages: messages.to_vec(),
            forward,
            backward,
            marginals,
        }
    }

    pub fn infer(&self, series: &TurnSeries) -> Result<DiscretePosterior> {
        let messages = self.messages(series)?;
        Ok(self.smooth(&messages))
    }

    pub fn estimate(&self, series: &TurnSeries) -> Result<CoordinationEstimate> {
        Ok(self.infer(series)?.to_estimate())
    }

    /// Estimate every trial independently on `num_jobs` workers
    pub fn estimate_all(&self, trials: &[TurnSeries], num_jobs: usize) -> Result<Vec<CoordinationEstimate>> {
        debug!(num_trials = trials.len(), num_jobs, "DiscreteCoordinationEngine::estimate_all: called");
        let estimates = parallel::run_indexed(num_jobs, trials.len(), |i| self.estimate(&trials[i]))?;
        info!(num_trials = trials.len(), "Discrete coordination inference complete");
        Ok(estimates)
    }
}

fn normalize(v: Message) -> Message {
    let total = v[0] + v[1];
    if total > 0.0 && total.is_finite() {
        [v[0] / total, v[1] / total]
    } else {
        NEUTRAL
    }
}

fn normalize_log(l: Message) -> Message {
    let max = l[0].max(l[1]);
    if !max.is_finite() {
        return NEUTRAL;
    }
    normalize([(l[0] - max).exp(), (l[1] - max).exp()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use turnseries::TurnSeriesBuilder;

    fn engine(change_probability: f64, initial_coordination: f64, fix_second_half: bool) -> DiscreteCoordinationEngine {
        DiscreteCoordinationEngine::new(DiscreteConfig {
            change_probability,
            initial_coordination,
            fix_second_half,
            ..DiscreteConfig::default()
        })
        .unwrap()
    }

    fn mocked_messages() -> Vec<Message> {
        vec![[0.3, 0.8], [0.4, 0.7], [0.5, 0.5], [0.6, 0.3], [0.25, 0.25], [0.3, 0.9]]
    }

    #[test]
    fn test_marginals_are_distributions() {
        let posterior = engine(0.2, 0.3, false).smooth(&mocked_messages());
        assert_eq!(posterior.marginals.len(), 6);
        for m in &posterior.marginals {
            assert!((0.0..=1.0).contains(&m[0]) && (0.0..=1.0).contains(&m[1]));
            assert_relative_eq!(m[0] + m[1], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_neutral_evidence_with_even_switching() {
        let posterior = engine(0.5, 0.3, false).smooth(&[NEUTRAL; 5]);
        assert_relative_eq!(posterior.marginals[0][1], 0.3, epsilon = 1e-12);
        for m in &posterior.marginals[1..] {
            assert_relative_eq!(m[1], 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_backward_round_trip() {
        let messages = mocked_messages();
        let posterior = engine(0.1, 0.4, false).smooth(&messages);
        for t in 0..messages.len() {
            let a = posterior.forward[t];
            let b = posterior.backward[t];
            let m = messages[t];
            let recovered = normalize([a[0] * b[0] / m[0], a[1] * b[1] / m[1]]);
            assert_relative_eq!(recovered[1], posterior.marginals[t][1], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_last_marginal_is_forward() {
        let posterior = engine(0.1, 0.4, false).smooth(&mocked_messages());
        assert_eq!(posterior.marginals.last(), posterior.forward.last());
    }

    #[test]
    fn test_frozen_second_half_collapses_steps() {
        let messages = mocked_messages();
        let frozen = engine(0.1, 0.4, true).smooth(&messages);
        assert_eq!(frozen.marginals.len(), 4);

        // Folding the tail into one step is a product of the tail messages
        let tail: Message = messages[3..]
            .iter()
            .fold([1.0, 1.0], |acc, m| [acc[0] * m[0], acc[1] * m[1]]);
        let mut folded = messages[..3].to_vec();
        folded.push(tail);
        let unfrozen = engine(0.1, 0.4, false).smooth(&folded);
        for t in 0..4 {
            assert_relative_eq!(frozen.marginals[t][1], unfrozen.marginals[t][1], epsilon = 1e-9);
        }

        let estimate = frozen.to_estimate();
        assert_eq!(estimate.len(), 6);
        assert_eq!(estimate.mean[3], estimate.mean[5]);
    }

    #[test]
    fn test_empty_series() {
        let posterior = engine(0.1, 0.5, true).smooth(&[]);
        assert!(posterior.marginals.is_empty());
        assert!(posterior.to_estimate().is_empty());
    }

    #[test]
    fn test_messages_are_neutral_without_cross_predecessor() {
        let mut builder = TurnSeriesBuilder::new(2, 1, 3);
        builder.observe(0, 0, vec![0.1]).unwrap();
        builder.observe(0, 1, vec![0.2]).unwrap();
        let series = builder.build().unwrap();

        let messages = engine(0.1, 0.5, false).messages(&series).unwrap();
        assert_eq!(messages, vec![[0.25, 0.25]; 3]);
    }

    #[test]
    fn test_underflowing_likelihoods_reset_to_neutral() {
        let mut builder = TurnSeriesBuilder::new(2, 1, 2);
        builder.observe(0, 0, vec![0.0]).unwrap();
        builder.observe(1, 1, vec![1e6]).unwrap();
        let series = builder.build().unwrap();

        let messages = engine(0.1, 0.5, false).messages(&series).unwrap();
        assert_eq!(messages[1], [0.25, 0.25]);
    }

    #[test]
    fn test_single_subject_rejected() {
        let mut builder = TurnSeriesBuilder::new(1, 1, 2);
        builder.observe(0, 0, vec![0.0]).unwrap();
        let series = builder.build().unwrap();
        assert!(engine(0.1, 0.5, false).infer(&series).is_err());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut builder = TurnSeriesBuilder::new(2, 3, 2);
        builder.observe(0, 0, vec![0.0, 0.0, 0.0]).unwrap();
        let series = builder.build().unwrap();
        let engine = DiscreteCoordinationEngine::new(DiscreteConfig {
            sd_coordinated: vec![1.0, 1.0],
            ..DiscreteConfig::default()
        })
        .unwrap();
        assert!(matches!(
            engine.messages(&series),
            Err(CoordinationError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
    }
}
