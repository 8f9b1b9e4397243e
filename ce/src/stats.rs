//! Density, normalization and sampling helpers shared by the engines

use rand::Rng;
use rand_distr::{Distribution, Gamma, StandardNormal};
use statrs::function::erf::{erfc, erfc_inv};

use crate::error::{CoordinationError, Result};

/// Floor added before taking logs of messages and under which a pair of
/// likelihoods is considered to have underflowed
pub const EPSILON: f64 = 1e-16;

const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Closed form of `statrs::distribution::Normal::ln_pdf`. Called once per
/// particle and feature, so no distribution is constructed per call.
pub fn normal_log_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -0.5 * z * z - sd.ln() - LN_SQRT_2PI
}

pub fn normal_pdf(x: f64, mean: f64, sd: f64) -> f64 {
    normal_log_pdf(x, mean, sd).exp()
}

/// Product of independent per-feature Gaussian densities
pub fn diag_normal_pdf(x: &[f64], mean: &[f64], sd: &[f64]) -> f64 {
    x.iter()
        .zip(mean)
        .zip(sd)
        .map(|((x, m), s)| normal_pdf(*x, *m, *s))
        .product()
}

pub fn diag_normal_log_pdf(x: &[f64], mean: &[f64], sd: &[f64]) -> f64 {
    x.iter()
        .zip(mean)
        .zip(sd)
        .map(|((x, m), s)| normal_log_pdf(*x, *m, *s))
        .sum()
}

/// Standard normal CDF
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Standard normal quantile
pub fn normal_quantile(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

/// `ln(Φ(b) - Φ(a))` for `a <= b`, evaluated on the side of the origin that
/// keeps the difference away from catastrophic cancellation
pub fn log_normal_interval(a: f64, b: f64) -> f64 {
    let mass = if a > 0.0 {
        normal_cdf(-a) - normal_cdf(-b)
    } else {
        normal_cdf(b) - normal_cdf(a)
    };
    mass.max(0.0).ln()
}

/// Turn log weights into normalized weights: subtract the max, exponentiate,
/// divide by the sum
pub fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let uniform = 1.0 / log_weights.len() as f64;
        return vec![uniform; log_weights.len()];
    }
    let mut weights: Vec<f64> = log_weights.iter().map(|w| (w - max).exp()).collect();
    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);
    weights
}

/// Weighted mean and (population) variance
pub fn weighted_mean_variance(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let mean: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    let variance: f64 = values.iter().zip(weights).map(|(v, w)| w * (v - mean).powi(2)).sum();
    (mean, variance)
}

pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + sd * z
}

/// Draw from `InverseGamma(shape, scale)` as the reciprocal of a
/// `Gamma(shape, 1 / scale)` draw
pub fn sample_inverse_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64, scale: f64) -> Result<f64> {
    let gamma = Gamma::new(shape, 1.0 / scale).map_err(|e| CoordinationError::InvalidParameter {
        name: "inverse-gamma parameters",
        reason: format!("shape={shape}, scale={scale}: {e}"),
    })?;
    Ok(1.0 / gamma.sample(rng))
}

/// Draw from `Normal(mean, sd²)` truncated to `[lower, upper]` by inverting
/// the CDF. Bounds may be infinite.
pub fn sample_truncated_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64, lower: f64, upper: f64) -> f64 {
    let a = (lower - mean) / sd;
    let b = (upper - mean) / sd;
    let u: f64 = rng.random();

    // Sample in the lower half-line so the CDF values are not close to one
    let z = if a > 0.0 {
        -standard_truncated(-b, -a, u)
    } else {
        standard_truncated(a, b, u)
    };
    (mean + sd * z).clamp(lower, upper)
}

fn standard_truncated(a: f64, b: f64, u: f64) -> f64 {
    let lower = normal_cdf(a);
    let upper = normal_cdf(b);
    let p = lower + u * (upper - lower);
    if p <= 0.0 {
        return if a.is_finite() { a } else { b };
    }
    if p >= 1.0 {
        return if b.is_finite() { b } else { a };
    }
    normal_quantile(p).clamp(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use statrs::distribution::{Continuous, Normal};

    #[test]
    fn test_normal_log_pdf_agrees_with_statrs() {
        for (x, mean, sd) in [(0.3, -1.2, 0.5), (4.0, 0.0, 2.0), (-0.1, 0.2, 1e-3)] {
            let reference = Normal::new(mean, sd).unwrap();
            assert_relative_eq!(normal_log_pdf(x, mean, sd), reference.ln_pdf(x), epsilon = 1e-9);
            assert_relative_eq!(normal_pdf(x, mean, sd), reference.pdf(x), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_normal_log_pdf_matches_closed_form() {
        assert_relative_eq!(normal_pdf(0.0, 0.0, 1.0), 0.398_942_280_401_432_7, epsilon = 1e-15);
        assert_relative_eq!(normal_log_pdf(1.0, 0.0, 2.0), -0.125 - 2f64.ln() - LN_SQRT_2PI, epsilon = 1e-15);
    }

    #[test]
    fn test_normal_cdf_and_quantile() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(normal_cdf(1.96), 0.975_002_104_851_780_1, epsilon = 1e-9);
        assert_relative_eq!(normal_quantile(0.975_002_104_851_780_1), 1.96, epsilon = 1e-7);
    }

    #[test]
    fn test_normalize_log_weights_handles_large_offsets() {
        let weights = normalize_log_weights(&[-1000.0, -1000.0 + 2f64.ln()]);
        assert_relative_eq!(weights[0], 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(weights[1], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_log_weights_degenerate_is_uniform() {
        let weights = normalize_log_weights(&[f64::NEG_INFINITY; 4]);
        assert_eq!(weights, vec![0.25; 4]);
    }

    #[test]
    fn test_truncated_normal_respects_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let x = sample_truncated_normal(&mut rng, 0.3, 2.0, 0.0, 1.0);
            assert!((0.0..=1.0).contains(&x));
            let tail = sample_truncated_normal(&mut rng, 0.0, 1.0, 4.0, f64::INFINITY);
            assert!(tail >= 4.0 && tail.is_finite());
            let left = sample_truncated_normal(&mut rng, 0.0, 1.0, f64::NEG_INFINITY, -3.0);
            assert!(left <= -3.0 && left.is_finite());
        }
    }

    #[test]
    fn test_inverse_gamma_mean() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let (shape, scale) = (50.0, 98.0);
        let n = 20_000;
        let mean = (0..n)
            .map(|_| sample_inverse_gamma(&mut rng, shape, scale).unwrap())
            .sum::<f64>()
            / n as f64;
        // E = scale / (shape - 1) = 2
        assert_relative_eq!(mean, 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_inverse_gamma_rejects_bad_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(sample_inverse_gamma(&mut rng, 0.0, 1.0).is_err());
    }
}
