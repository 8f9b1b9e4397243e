//! Latent block: single-site Gaussian conditionals in time order

use rand::Rng;
use turnseries::TurnRef;

use super::state::{TrialModel, TrialState};
use crate::config::Variances;
use crate::error::{CoordinationError, Result};
use crate::stats::sample_normal;

/// Resample every observed latent vector of a trial from its full
/// conditional, then carry latents forward over unobserved entries.
///
/// The conditional of `V[t, s]` combines its own transition (or the prior),
/// the transitions of every turn that uses it as a predecessor, and its
/// observation.
pub(crate) fn sample_latent<R: Rng + ?Sized>(
    model: &TrialModel<'_>,
    state: &mut TrialState,
    variances: &Variances,
    rng: &mut R,
) -> Result<()> {
    let series = model.series;
    let num_features = series.num_features();
    let mut numerator = vec![0.0; num_features];

    for t in 0..series.num_time_steps() {
        for s in 0..series.num_subjects() {
            let Some(observed) = series.value(t, s) else {
                continue;
            };
            let turn = TurnRef::new(s, t);

            let (prior_mean, prior_variance) = match model.transition_mean(state, turn) {
                Some(mean) => (mean, variances.transition),
                None => (vec![0.0; num_features], variances.prior),
            };
            let mut precision = 1.0 / prior_variance + 1.0 / variances.observation;
            for k in 0..num_features {
                numerator[k] = prior_mean[k] / prior_variance + observed[k] / variances.observation;
            }

            // Own successor: mean = h * V + r with h = 1 - C * other_mask
            if let Some(t2) = series.next_from_self(t, s) {
                let next = TurnRef::new(s, t2);
                let c2 = state.coordination[t2];
                let other = model.other_latent(state, next);
                let h = model.blending.own_coefficient(other.is_some(), c2);
                if h != 0.0 {
                    let v2 = state.latent.get(t2, s);
                    precision += h * h / variances.transition;
                    for k in 0..num_features {
                        let r = other.map_or(0.0, |b| c2 * b[k]);
                        numerator[k] += h * (v2[k] - r) / variances.transition;
                    }
                }
            }

            // Cross-subject successors: mean = C * V + (1 - C) * own
            for next in series.next_from_other(t, s) {
                let c2 = state.coordination[next.time];
                let h = model.blending.other_coefficient(c2);
                if h == 0.0 {
                    continue;
                }
                let own = model.blending.own(model.own_latent(state, *next));
                let v2 = state.latent.get(next.time, next.subject);
                precision += h * h / variances.transition;
                for k in 0..num_features {
                    let r = own.map_or(0.0, |a| a[k] * (1.0 - c2));
                    numerator[k] += h * (v2[k] - r) / variances.transition;
                }
            }

            if !(precision.is_finite() && precision > 0.0) {
                return Err(CoordinationError::NonPositivePrecision {
                    time: t,
                    subject: s,
                    precision,
                });
            }
            let sd = precision.recip().sqrt();
            let latent = state.latent.get_mut(t, s);
            for k in 0..num_features {
                latent[k] = sample_normal(rng, numerator[k] / precision, sd);
            }
        }
    }

    state.latent.carry_forward(series);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blending::BlendingModel;
    use crate::latent::LatentPath;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use turnseries::TurnSeriesBuilder;

    #[test]
    fn test_isolated_turn_conditional_matches_closed_form() {
        // A single turn: prior N(0, 4), observation 3 with variance 1
        let mut builder = TurnSeriesBuilder::new(2, 1, 2);
        builder.observe(0, 0, vec![3.0]).unwrap();
        let series = builder.build().unwrap();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let variances = Variances::new(4.0, 1.0, 1.0);

        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let n = 20_000;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            let mut state = TrialState {
                coordination: vec![0.5; 2],
                unbounded: vec![0.5; 2],
                latent: LatentPath::zeros(2, 1, 2),
            };
            sample_latent(&model, &mut state, &variances, &mut rng).unwrap();
            let v = state.latent.get(0, 0)[0];
            sum += v;
            sum_sq += v * v;
            // Carried forward exactly
            assert_eq!(state.latent.get(1, 0)[0], v);
        }
        let mean = sum / n as f64;
        let variance = sum_sq / n as f64 - mean * mean;
        // Precision 1/4 + 1 = 5/4: mean 3 / (5/4) = 2.4, variance 0.8
        assert_relative_eq!(mean, 2.4, epsilon = 0.03);
        assert_relative_eq!(variance, 0.8, epsilon = 0.03);
    }

    #[test]
    fn test_degenerate_precision_is_reported() {
        let mut builder = TurnSeriesBuilder::new(2, 1, 1);
        builder.observe(0, 0, vec![0.0]).unwrap();
        let series = builder.build().unwrap();
        let model = TrialModel::new(&series, BlendingModel::default(), false);
        let variances = Variances::new(1.0, 1.0, 1e-320);
        let mut state = TrialState {
            coordination: vec![0.5],
            unbounded: vec![0.5],
            latent: LatentPath::zeros(2, 1, 1),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            sample_latent(&model, &mut state, &variances, &mut rng),
            Err(CoordinationError::NonPositivePrecision { time: 0, subject: 0, .. })
        ));
    }
}
