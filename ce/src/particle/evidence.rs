//! Particle weights from blended observed values

use rand::Rng;
use turnseries::TurnSeries;

use super::{CoordinationDynamics, CoordinationParticles, ParticleModel};
use crate::blending::{BlendingModel, PhaseTransform, Role, inference_horizon};
use crate::config::{ParticleConfig, per_feature};
use crate::error::Result;
use crate::stats::normal_log_pdf;

/// Likelihood of an observed value given the blend of its predecessors.
///
/// A turn without a cross-subject predecessor carries no evidence. A
/// missing own predecessor is replaced by `mean_prior`.
#[derive(Debug, Clone, PartialEq)]
pub struct VocalicsEvidence {
    mean_prior: Vec<f64>,
    sd_coordinated: Vec<f64>,
    phase: PhaseTransform,
    blending: BlendingModel,
}

impl VocalicsEvidence {
    pub fn new(config: &ParticleConfig, num_features: usize) -> Result<Self> {
        Ok(Self {
            mean_prior: per_feature("mean-prior", &config.mean_prior, num_features)?,
            sd_coordinated: per_feature("sd-coordinated", &config.sd_coordinated, num_features)?,
            phase: config.phase,
            blending: BlendingModel::new(config.self_dependent),
        })
    }

    /// Whether the turn of `subject` at `time` informs coordination
    pub fn informs(&self, series: &TurnSeries, time: usize, subject: usize) -> bool {
        series.mask(time, subject) && series.previous_from_other(time, subject).is_some()
    }

    /// Add each particle's log likelihood of the turn to `out`. Returns
    /// whether the turn contributed.
    pub fn accumulate(&self, series: &TurnSeries, time: usize, subject: usize, coordination: &[f64], out: &mut [f64]) -> bool {
        let Some(turn) = series.turn(time, subject) else {
            return false;
        };
        let Some(other) = turn
            .previous_from_other
            .and_then(|r| series.value(r.time, r.subject))
            .map(|v| self.phase.apply(v, Role::Other))
        else {
            return false;
        };

        let x = self.phase.apply(turn.value, Role::Own);
        let own = turn
            .previous_from_self
            .and_then(|p| series.value(p, subject))
            .map(|v| self.phase.apply(v, Role::Own))
            .unwrap_or_else(|| self.mean_prior.clone());

        let mut mean = vec![0.0; x.len()];
        for (c, ll) in coordination.iter().zip(out.iter_mut()) {
            self.blending.mean_into(Some(&own), Some(&other), *c, &mut mean);
            *ll += x
                .iter()
                .zip(&mean)
                .zip(&self.sd_coordinated)
                .map(|((x, m), sd)| normal_log_pdf(*x, *m, *sd))
                .sum::<f64>();
        }
        true
    }
}

/// Coordination-only particle model weighted by [`VocalicsEvidence`].
///
/// With the second half frozen the filter stops at `M = T / 2` and that
/// step absorbs the evidence of every later step.
pub struct ObservedVocalicsModel<'a, D> {
    series: &'a TurnSeries,
    dynamics: D,
    evidence: VocalicsEvidence,
    horizon: usize,
}

impl<'a, D: CoordinationDynamics> ObservedVocalicsModel<'a, D> {
    pub fn new(series: &'a TurnSeries, dynamics: D, evidence: VocalicsEvidence, fix_second_half: bool) -> Self {
        Self {
            series,
            dynamics,
            evidence,
            horizon: inference_horizon(series.num_time_steps(), fix_second_half),
        }
    }

    fn steps(&self, time: usize) -> std::ops::Range<usize> {
        if time + 1 == self.horizon {
            time..self.series.num_time_steps()
        } else {
            time..time + 1
        }
    }
}

impl<D: CoordinationDynamics> ParticleModel for ObservedVocalicsModel<'_, D> {
    type State = CoordinationParticles;

    fn num_steps(&self) -> usize {
        self.horizon
    }

    fn sample_prior<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> CoordinationParticles {
        self.dynamics.sample_initial(num_particles, rng)
    }

    fn sample_transition<R: Rng + ?Sized>(&self, _time: usize, previous: &CoordinationParticles, rng: &mut R) -> CoordinationParticles {
        self.dynamics.sample_next(previous, rng)
    }

    fn log_likelihood(&self, time: usize, state: &CoordinationParticles) -> Option<Vec<f64>> {
        let mut ll = vec![0.0; state.coordination.len()];
        let mut contributed = false;
        for t in self.steps(time) {
            for s in 0..self.series.num_subjects() {
                contributed |= self.evidence.accumulate(self.series, t, s, &state.coordination, &mut ll);
            }
        }
        contributed.then_some(ll)
    }

    fn resample_at(&self, time: usize) -> bool {
        self.steps(time)
            .any(|t| (0..self.series.num_subjects()).any(|s| self.evidence.informs(self.series, t, s)))
    }
}
