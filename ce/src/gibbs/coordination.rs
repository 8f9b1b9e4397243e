//! Coordination blocks
//!
//! Given the latent path, each inferred step `j` sees coordination only
//! through the transitions of turns with a cross-subject predecessor:
//!
//! ```text
//! log p(V | c) = -λ_j c² / 2 + η_j c + const
//! λ_j = Σ |B - A|² / σ²_transition
//! η_j = Σ (B - A)·(V - A) / σ²_transition
//! ```
//!
//! Both coordination processes are sampled exactly from these terms.

use rand::Rng;

use super::state::{TrialModel, TrialState};
use crate::stats::{log_normal_interval, normalize_log_weights, sample_truncated_normal};

/// Quadratic log-likelihood coefficients of one inferred step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct CoordinationTerms {
    pub lambda: f64,
    pub eta: f64,
}

impl CoordinationTerms {
    pub fn log_likelihood(&self, c: f64) -> f64 {
        -0.5 * self.lambda * c * c + self.eta * c
    }
}

pub(crate) fn coordination_terms(model: &TrialModel<'_>, state: &TrialState, transition_variance: f64) -> Vec<CoordinationTerms> {
    let series = model.series;
    let mut terms = vec![CoordinationTerms::default(); model.horizon];
    for turn in series.turns() {
        let here = turn.turn_ref();
        let Some(other) = model.other_latent(state, here) else {
            continue;
        };
        let own = model.blending.own(model.own_latent(state, here));
        let v = state.latent.get(turn.time, turn.subject);
        let term = &mut terms[model.group(turn.time)];
        for k in 0..series.num_features() {
            let a = own.map_or(0.0, |a| a[k]);
            let d = other[k] - a;
            term.lambda += d * d / transition_variance;
            term.eta += d * (v[k] - a) / transition_variance;
        }
    }
    terms
}

fn write_group(model: &TrialModel<'_>, state: &mut TrialState, group: usize, coordination: f64) {
    for t in model.group_steps(group) {
        state.coordination[t] = coordination;
    }
}

/// Forward filtering, backward sampling of a symmetric two-state chain
pub(crate) fn sample_discrete<R: Rng + ?Sized>(
    model: &TrialModel<'_>,
    state: &mut TrialState,
    terms: &[CoordinationTerms],
    initial_probability: f64,
    change_probability: f64,
    rng: &mut R,
) {
    let horizon = terms.len();
    if horizon == 0 {
        return;
    }
    let p = change_probability;
    let ln = |x: f64| if x > 0.0 { x.ln() } else { f64::NEG_INFINITY };

    let mut filtered: Vec<[f64; 2]> = Vec::with_capacity(horizon);
    for term in terms {
        let predicted = match filtered.last() {
            Some(f) => [(1.0 - p) * f[0] + p * f[1], p * f[0] + (1.0 - p) * f[1]],
            None => [1.0 - initial_probability, initial_probability],
        };
        let w = normalize_log_weights(&[ln(predicted[0]), ln(predicted[1]) + term.log_likelihood(1.0)]);
        filtered.push([w[0], w[1]]);
    }

    let mut next = draw(rng, filtered[horizon - 1]);
    write_group(model, state, horizon - 1, next);
    state.unbounded[horizon - 1] = next;
    for j in (0..horizon - 1).rev() {
        let f = filtered[j];
        // P(C_j = c | C_{j+1}) ∝ f(c) * A(c, next)
        let stay = |c: f64| if c == next { 1.0 - p } else { p };
        let w = [f[0] * stay(0.0), f[1] * stay(1.0)];
        let total = w[0] + w[1];
        let probabilities = if total > 0.0 { [w[0] / total, w[1] / total] } else { [0.5, 0.5] };
        next = draw(rng, probabilities);
        write_group(model, state, j, next);
        state.unbounded[j] = next;
    }
}

fn draw<R: Rng + ?Sized>(rng: &mut R, probabilities: [f64; 2]) -> f64 {
    if rng.random::<f64>() < probabilities[1] { 1.0 } else { 0.0 }
}

/// Random-walk prior and its parameters for the clipped process
#[derive(Debug, Clone, Copy)]
pub(crate) struct RandomWalkPrior {
    pub initial_mean: f64,
    pub sd_initial: f64,
    pub sd_step: f64,
}

impl RandomWalkPrior {
    /// Conditional prior of `U_j` given its neighbours on the walk
    fn conditional(&self, unbounded: &[f64], j: usize) -> (f64, f64) {
        let step_precision = 1.0 / (self.sd_step * self.sd_step);
        let (mut precision, mut weighted) = if j == 0 {
            let p = 1.0 / (self.sd_initial * self.sd_initial);
            (p, p * self.initial_mean)
        } else {
            (step_precision, step_precision * unbounded[j - 1])
        };
        if let Some(next) = unbounded.get(j + 1) {
            precision += step_precision;
            weighted += step_precision * next;
        }
        (weighted / precision, precision.recip().sqrt())
    }
}

/// Single-site update of the clipped random walk.
///
/// With `c = clip(U)` the conditional of `U_j` is a three-piece mixture:
/// below zero (`c = 0`), inside `[0, 1]` (a Gaussian tilted by the
/// likelihood) and above one (`c = 1`). A piece is chosen by its exact mass
/// and `U_j` drawn from the matching truncated normal.
pub(crate) fn sample_truncated<R: Rng + ?Sized>(
    model: &TrialModel<'_>,
    state: &mut TrialState,
    terms: &[CoordinationTerms],
    prior: &RandomWalkPrior,
    rng: &mut R,
) {
    for (j, term) in terms.iter().enumerate() {
        let (mu, sd) = prior.conditional(&state.unbounded, j);
        let var = sd * sd;

        let lower_mass = log_normal_interval(f64::NEG_INFINITY, -mu / sd);
        let upper_mass = term.log_likelihood(1.0) + log_normal_interval((1.0 - mu) / sd, f64::INFINITY);

        let precision = 1.0 / var + term.lambda;
        let m = (mu / var + term.eta) / precision;
        let root = precision.sqrt();
        let middle_mass = -0.5 * (var * precision).ln() + 0.5 * precision * m * m - 0.5 * mu * mu / var
            + log_normal_interval(-m * root, (1.0 - m) * root);

        let weights = normalize_log_weights(&[lower_mass, middle_mass, upper_mass]);
        let u: f64 = rng.random();
        let unbounded = if u < weights[0] {
            sample_truncated_normal(rng, mu, sd, f64::NEG_INFINITY, 0.0)
        } else if u < weights[0] + weights[1] {
            sample_truncated_normal(rng, m, root.recip(), 0.0, 1.0)
        } else {
            sample_truncated_normal(rng, mu, sd, 1.0, f64::INFINITY)
        };

        state.unbounded[j] = unbounded;
        write_group(model, state, j, unbounded.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blending::BlendingModel;
    use crate::latent::LatentPath;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use turnseries::{TurnSeries, TurnSeriesBuilder};

    /// Subject 1 answers subject 0 at every odd step
    fn dialogue() -> (TurnSeries, LatentPath) {
        let mut builder = TurnSeriesBuilder::new(2, 1, 4);
        builder.observe(0, 0, vec![0.0]).unwrap();
        builder.observe(1, 1, vec![0.0]).unwrap();
        builder.observe(2, 0, vec![0.0]).unwrap();
        builder.observe(3, 1, vec![0.0]).unwrap();
        let series = builder.build().unwrap();

        let mut latent = LatentPath::zeros(2, 1, 4);
        latent.get_mut(0, 0)[0] = 2.0;
        latent.get_mut(1, 1)[0] = 2.0; // copies subject 0: coordinated
        latent.get_mut(2, 0)[0] = 2.0; // stays: uncoordinated toward 2.0 anyway
        latent.get_mut(3, 1)[0] = 2.0;
        (series, latent)
    }

    fn state(latent: LatentPath, horizon: usize) -> TrialState {
        TrialState {
            coordination: vec![0.5; latent.num_time_steps()],
            unbounded: vec![0.5; horizon],
            latent,
        }
    }

    #[test]
    fn test_terms() {
        let (series, latent) = dialogue();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let state = state(latent, 4);
        let terms = coordination_terms(&model, &state, 0.5);

        // t = 1: own absent, D = 2, V - A = 2
        assert_relative_eq!(terms[1].lambda, 8.0);
        assert_relative_eq!(terms[1].eta, 8.0);
        // t = 2: own 2, other 2, D = 0
        assert_relative_eq!(terms[2].lambda, 0.0);
        assert_eq!(terms[0], CoordinationTerms::default());
    }

    #[test]
    fn test_discrete_block_follows_strong_evidence() {
        let (series, latent) = dialogue();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let mut state = state(latent, 4);
        let terms = coordination_terms(&model, &state, 0.01);

        let mut rng = ChaCha8Rng::seed_from_u64(8);
        sample_discrete(&model, &mut state, &terms, 0.5, 0.1, &mut rng);
        assert_eq!(state.coordination[1], 1.0);
        assert!(state.coordination.iter().all(|c| *c == 0.0 || *c == 1.0));
    }

    #[test]
    fn test_truncated_block_without_evidence_matches_prior_mass() {
        let (series, latent) = dialogue();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let prior = RandomWalkPrior {
            initial_mean: 0.0,
            sd_initial: 1.0,
            sd_step: 1.0,
        };
        let terms = vec![CoordinationTerms::default(); 1];
        let mut rng = ChaCha8Rng::seed_from_u64(13);

        // One step, no evidence: U ~ N(0, 1), so P(C = 0) = 0.5
        let n = 10_000;
        let mut zeros = 0;
        for _ in 0..n {
            let mut s = state(latent.clone(), 1);
            sample_truncated(&model, &mut s, &terms, &prior, &mut rng);
            assert_eq!(s.coordination[0], s.unbounded[0].clamp(0.0, 1.0));
            if s.coordination[0] == 0.0 {
                zeros += 1;
            }
        }
        assert_relative_eq!(zeros as f64 / n as f64, 0.5, epsilon = 0.02);
    }

    #[test]
    fn test_truncated_block_follows_evidence() {
        let (series, latent) = dialogue();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let mut state = state(latent, 4);
        let terms = coordination_terms(&model, &state, 0.01);
        let prior = RandomWalkPrior {
            initial_mean: 0.0,
            sd_initial: 1.0,
            sd_step: 0.5,
        };

        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let mut total = 0.0;
        for _ in 0..200 {
            sample_truncated(&model, &mut state, &terms, &prior, &mut rng);
            total += state.coordination[1];
        }
        assert!(total / 200.0 > 0.9);
    }
}
