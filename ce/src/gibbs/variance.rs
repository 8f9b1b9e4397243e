//! Conjugate inverse-gamma updates of the three variances

use rand::Rng;

use super::state::{TrialModel, TrialState};
use crate::config::{FixedVariances, InverseGammaPrior, VariancePriors, Variances};
use crate::error::Result;
use crate::stats::sample_inverse_gamma;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Count and sum of squares of scalar residuals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SumOfSquares {
    pub count: usize,
    pub total: f64,
}

impl SumOfSquares {
    fn add(&mut self, residual: f64) {
        self.count += 1;
        self.total += residual * residual;
    }

    fn merge(&mut self, other: &SumOfSquares) {
        self.count += other.count;
        self.total += other.total;
    }

    /// Zero-mean Gaussian log density of the residuals under `variance`
    pub fn log_likelihood(&self, variance: f64) -> f64 {
        -0.5 * self.count as f64 * (LN_2PI + variance.ln()) - 0.5 * self.total / variance
    }

    /// Draw from `InverseGamma(shape + n / 2, scale + Σ r² / 2)`
    pub fn sample_posterior<R: Rng + ?Sized>(&self, prior: &InverseGammaPrior, rng: &mut R) -> Result<f64> {
        sample_inverse_gamma(
            rng,
            prior.shape + self.count as f64 / 2.0,
            prior.scale + self.total / 2.0,
        )
    }
}

/// Residuals of the prior, transition and observation densities
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Residuals {
    pub prior: SumOfSquares,
    pub transition: SumOfSquares,
    pub observation: SumOfSquares,
}

impl Residuals {
    /// Residuals of one trial over its observed turns
    pub fn collect(model: &TrialModel<'_>, state: &TrialState) -> Self {
        let mut residuals = Self::default();
        for turn in model.series.turns() {
            let here = turn.turn_ref();
            let latent = state.latent.get(turn.time, turn.subject);
            match model.transition_mean(state, here) {
                Some(mean) => latent
                    .iter()
                    .zip(&mean)
                    .for_each(|(v, m)| residuals.transition.add(v - m)),
                None => latent.iter().for_each(|v| residuals.prior.add(*v)),
            }
            turn.value
                .iter()
                .zip(latent)
                .for_each(|(x, v)| residuals.observation.add(x - v));
        }
        residuals
    }

    pub fn merge(&mut self, other: &Residuals) {
        self.prior.merge(&other.prior);
        self.transition.merge(&other.transition);
        self.observation.merge(&other.observation);
    }

    /// Joint log density of latent paths and observations
    pub fn log_likelihood(&self, variances: &Variances) -> f64 {
        self.prior.log_likelihood(variances.prior)
            + self.transition.log_likelihood(variances.transition)
            + self.observation.log_likelihood(variances.observation)
    }

    /// Fresh variances; fixed ones keep their current value
    pub fn sample_variances<R: Rng + ?Sized>(
        &self,
        current: &Variances,
        priors: &VariancePriors,
        fixed: &FixedVariances,
        rng: &mut R,
    ) -> Result<Variances> {
        Ok(Variances {
            prior: if fixed.prior {
                current.prior
            } else {
                self.prior.sample_posterior(&priors.prior, rng)?
            },
            transition: if fixed.transition {
                current.transition
            } else {
                self.transition.sample_posterior(&priors.transition, rng)?
            },
            observation: if fixed.observation {
                current.observation
            } else {
                self.observation.sample_posterior(&priors.observation, rng)?
            },
        })
    }
}
