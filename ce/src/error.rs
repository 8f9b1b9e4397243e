//! Coordination engine error types

use thiserror::Error;
use turnseries::SeriesError;

/// Errors surfaced by the inference engines.
///
/// Configuration errors are raised before any sampling starts; the rest
/// surface while an engine runs.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("{name} must be positive, got {value}")]
    NonPositiveVariance { name: &'static str, value: f64 },

    #[error("{name} must lie in [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },

    #[error("{name} has {actual} entries but the data has {expected} features")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid series: {0}")]
    Series(#[from] SeriesError),

    #[error("Non-positive or non-finite precision {precision} in the latent conditional at time {time} for subject {subject}")]
    NonPositivePrecision {
        time: usize,
        subject: usize,
        precision: f64,
    },

    #[error("Particle weights at step {time} cannot be resampled: {reason}")]
    DegenerateWeights { time: usize, reason: String },

    #[error("Sampling cancelled before sweep {sweep}")]
    Cancelled { sweep: usize },

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl CoordinationError {
    /// Whether this error was raised by configuration validation
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoordinationError::NonPositiveVariance { .. }
                | CoordinationError::ProbabilityOutOfRange { .. }
                | CoordinationError::DimensionMismatch { .. }
                | CoordinationError::InvalidParameter { .. }
                | CoordinationError::Series(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Check that every entry of a standard-deviation or variance vector is positive and finite
pub(crate) fn ensure_positive(name: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        Some(value) => Err(CoordinationError::NonPositiveVariance { name, value: *value }),
        None => Ok(()),
    }
}

pub(crate) fn ensure_finite(name: &'static str, values: &[f64]) -> Result<()> {
    if !values.iter().all(|v| v.is_finite()) {
        return Err(CoordinationError::InvalidParameter {
            name,
            reason: "entries must be finite".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn ensure_probability(name: &'static str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoordinationError::ProbabilityOutOfRange { name, value });
    }
    Ok(())
}

pub(crate) fn ensure_dimension(name: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CoordinationError::DimensionMismatch { name, expected, actual });
    }
    Ok(())
}
