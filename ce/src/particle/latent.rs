//! Particles carrying coordination plus each subject's latest latent vector

use rand::Rng;
use turnseries::TurnSeries;

use super::{CoordinationDynamics, CoordinationParticles, CoordinationState, ParticleModel, Particles};
use crate::blending::BlendingModel;
use crate::config::Variances;
use crate::stats::{normal_log_pdf, sample_normal};

#[derive(Debug, Clone, PartialEq)]
pub struct LatentParticles {
    pub coordination: CoordinationParticles,
    /// `[particle][subject][feature]`, flattened
    pub latent: Vec<f64>,
    num_subjects: usize,
    num_features: usize,
}

impl LatentParticles {
    fn new(coordination: CoordinationParticles, num_subjects: usize, num_features: usize) -> Self {
        let len = coordination.len() * num_subjects * num_features;
        Self {
            coordination,
            latent: vec![0.0; len],
            num_subjects,
            num_features,
        }
    }

    fn row(&self) -> usize {
        self.num_subjects * self.num_features
    }

    /// Latest latent vector of `subject` in particle `particle`
    pub fn latent(&self, particle: usize, subject: usize) -> &[f64] {
        let start = particle * self.row() + subject * self.num_features;
        &self.latent[start..start + self.num_features]
    }

    fn latent_mut(&mut self, particle: usize, subject: usize) -> &mut [f64] {
        let start = particle * self.row() + subject * self.num_features;
        &mut self.latent[start..start + self.num_features]
    }
}

impl Particles for LatentParticles {
    fn len(&self) -> usize {
        self.coordination.len()
    }

    fn resample(&mut self, indices: &[usize]) {
        self.coordination.resample(indices);
        let row = self.row();
        let mut latent = Vec::with_capacity(self.latent.len());
        for i in indices {
            latent.extend_from_slice(&self.latent[i * row..(i + 1) * row]);
        }
        self.latent = latent;
    }
}

impl CoordinationState for LatentParticles {
    fn coordination(&self) -> &[f64] {
        &self.coordination.coordination
    }
}

/// Latent-vocalics model with known variances.
///
/// Every observed turn draws a fresh latent vector from the blending
/// transition (or the zero-mean prior when it has no predecessor) and is
/// weighted by the observation density. With the second half frozen,
/// coordination stops moving after `M = T / 2`.
pub struct LatentVocalicsModel<'a, D> {
    series: &'a TurnSeries,
    dynamics: D,
    variances: Variances,
    blending: BlendingModel,
    fix_second_half: bool,
}

impl<'a, D: CoordinationDynamics> LatentVocalicsModel<'a, D> {
    pub fn new(series: &'a TurnSeries, dynamics: D, variances: Variances, blending: BlendingModel, fix_second_half: bool) -> Self {
        Self {
            series,
            dynamics,
            variances,
            blending,
            fix_second_half,
        }
    }

    /// Draw latent vectors for the turns at `time`. Turns at the same step
    /// only see latents from earlier steps.
    fn advance_latent<R: Rng + ?Sized>(&self, time: usize, state: &mut LatentParticles, rng: &mut R) {
        let num_features = self.series.num_features();
        let sd_prior = self.variances.prior.sqrt();
        let sd_transition = self.variances.transition.sqrt();
        let turns: Vec<_> = self.series.turns_at(time).collect();
        let mut drawn = vec![0.0; turns.len() * num_features];
        let mut mean = vec![0.0; num_features];

        for i in 0..state.len() {
            let c = state.coordination.coordination[i];
            for (j, turn) in turns.iter().enumerate() {
                let out = &mut drawn[j * num_features..(j + 1) * num_features];
                if !turn.has_predecessor() {
                    out.iter_mut().for_each(|v| *v = sample_normal(rng, 0.0, sd_prior));
                    continue;
                }
                let own = turn.previous_from_self.map(|_| state.latent(i, turn.subject));
                let other = turn.previous_from_other.map(|r| state.latent(i, r.subject));
                self.blending.mean_into(own, other, c, &mut mean);
                out.iter_mut()
                    .zip(&mean)
                    .for_each(|(v, m)| *v = sample_normal(rng, *m, sd_transition));
            }
            for (j, turn) in turns.iter().enumerate() {
                state
                    .latent_mut(i, turn.subject)
                    .copy_from_slice(&drawn[j * num_features..(j + 1) * num_features]);
            }
        }
    }
}

impl<D: CoordinationDynamics> ParticleModel for LatentVocalicsModel<'_, D> {
    type State = LatentParticles;

    fn num_steps(&self) -> usize {
        self.series.num_time_steps()
    }

    fn sample_prior<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> LatentParticles {
        let coordination = self.dynamics.sample_initial(num_particles, rng);
        let mut state = LatentParticles::new(coordination, self.series.num_subjects(), self.series.num_features());
        if self.series.num_time_steps() > 0 {
            self.advance_latent(0, &mut state, rng);
        }
        state
    }

    fn sample_transition<R: Rng + ?Sized>(&self, time: usize, previous: &LatentParticles, rng: &mut R) -> LatentParticles {
        let mut state = previous.clone();
        if !(self.fix_second_half && time > self.series.fixed_coordination_boundary()) {
            state.coordination = self.dynamics.sample_next(&previous.coordination, rng);
        }
        self.advance_latent(time, &mut state, rng);
        state
    }

    fn log_likelihood(&self, time: usize, state: &LatentParticles) -> Option<Vec<f64>> {
        if !self.series.is_observed(time) {
            return None;
        }
        let sd = self.variances.observation.sqrt();
        let ll = (0..state.len())
            .map(|i| {
                self.series
                    .turns_at(time)
                    .map(|turn| {
                        turn.value
                            .iter()
                            .zip(state.latent(i, turn.subject))
                            .map(|(x, v)| normal_log_pdf(*x, *v, sd))
                            .sum::<f64>()
                    })
                    .sum()
            })
            .collect();
        Some(ll)
    }

    /// Only turns answering another subject inform coordination
    fn resample_at(&self, time: usize) -> bool {
        self.series.turns_at(time).any(|turn| turn.previous_from_other.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::{DiscreteDynamics, ParticleFilter, TruncatedDynamics};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use turnseries::TurnSeriesBuilder;

    fn series() -> TurnSeries {
        let mut builder = TurnSeriesBuilder::new(2, 2, 5);
        builder.observe(0, 0, vec![1.0, -1.0]).unwrap();
        builder.observe(1, 1, vec![0.5, 0.5]).unwrap();
        builder.observe(3, 0, vec![0.0, 0.0]).unwrap();
        builder.observe(3, 1, vec![0.2, 0.1]).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_resample_keeps_latent_rows_together() {
        let mut state = LatentParticles::new(
            CoordinationParticles {
                coordination: vec![0.0, 1.0],
                unbounded: vec![0.0, 1.0],
            },
            2,
            1,
        );
        state.latent = vec![1.0, 2.0, 3.0, 4.0];
        state.resample(&[1, 1]);
        assert_eq!(state.latent, vec![3.0, 4.0, 3.0, 4.0]);
        assert_eq!(state.coordination.coordination, vec![1.0, 1.0]);
    }

    #[test]
    fn test_unobserved_latents_are_carried() {
        let series = series();
        let model = LatentVocalicsModel::new(
            &series,
            DiscreteDynamics::new(0.5, 0.1),
            Variances::default(),
            BlendingModel::default(),
            false,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let prior = model.sample_prior(10, &mut rng);
        let next = model.sample_transition(1, &prior, &mut rng);

        // Subject 0 is silent at t = 1
        for i in 0..10 {
            assert_eq!(next.latent(i, 0), prior.latent(i, 0));
            assert_ne!(next.latent(i, 1), prior.latent(i, 1));
        }
        assert!(model.log_likelihood(2, &next).is_none());
        assert!(!model.resample_at(2));
    }

    #[test]
    fn test_frozen_coordination_stops_after_boundary() {
        let series = series();
        let model = LatentVocalicsModel::new(
            &series,
            TruncatedDynamics::new(0.5, 0.3, 0.3),
            Variances::default(),
            BlendingModel::default(),
            true,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut state = model.sample_prior(8, &mut rng);
        for t in 1..=2 {
            state = model.sample_transition(t, &state, &mut rng);
        }
        let at_boundary = state.coordination.clone();
        for t in 3..5 {
            state = model.sample_transition(t, &state, &mut rng);
        }
        assert_eq!(state.coordination, at_boundary);
    }

    #[test]
    fn test_resample_needs_cross_subject_predecessor() {
        let series = series();
        let model = LatentVocalicsModel::new(
            &series,
            DiscreteDynamics::new(0.5, 0.1),
            Variances::default(),
            BlendingModel::default(),
            false,
        );
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let state = model.sample_prior(4, &mut rng);

        // t = 0 is observed but nobody has spoken before
        assert!(model.log_likelihood(0, &state).is_some());
        assert!(!model.resample_at(0));
        assert!(model.resample_at(1));
        assert!(model.resample_at(3));
    }

    #[test]
    fn test_monologue_never_resamples() {
        let mut builder = TurnSeriesBuilder::new(2, 1, 5);
        for t in 0..5 {
            builder.observe(t, 0, vec![t as f64]).unwrap();
        }
        let series = builder.build().unwrap();
        let model = LatentVocalicsModel::new(
            &series,
            DiscreteDynamics::new(0.5, 0.0),
            Variances::new(1.0, 1.0, 0.01),
            BlendingModel::default(),
            false,
        );
        assert!((0..5).all(|t| !model.resample_at(t)));

        let mut weights_seen = Vec::new();
        let last = ParticleFilter::new(&model, 200, 31)
            .run(|_, _, weights| weights_seen.push(weights.to_vec()))
            .unwrap();

        // No switching and no resampling: the particles keep their prior draws
        let mut rng = ChaCha8Rng::seed_from_u64(31);
        let prior = model.sample_prior(200, &mut rng);
        assert_eq!(last.coordination.coordination, prior.coordination.coordination);
        // Weights keep accumulating instead of being reset
        let uniform = 1.0 / 200.0;
        assert!(weights_seen[4].iter().any(|w| (w - uniform).abs() > 1e-6));
    }
}
