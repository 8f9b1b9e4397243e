//! Turn series error types

use thiserror::Error;

/// Errors raised while building or validating a turn series
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("Series must have at least one subject")]
    NoSubjects,

    #[error("Series must have at least one feature")]
    NoFeatures,

    #[error("Expected {expected} {what}, got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Subject {subject} out of range (series has {num_subjects} subjects)")]
    SubjectOutOfRange { subject: usize, num_subjects: usize },

    #[error("Time step {time} out of range (series has {num_time_steps} steps)")]
    TimeOutOfRange { time: usize, num_time_steps: usize },

    #[error("Subject {subject} already observed at time {time}")]
    DuplicateTurn { time: usize, subject: usize },

    #[error("Feature vector at time {time} for subject {subject} has {actual} values, expected {expected}")]
    FeatureMismatch {
        time: usize,
        subject: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Non-finite value at time {time} for subject {subject}")]
    NonFinite { time: usize, subject: usize },

    #[error("Invalid {link} link at time {time} for subject {subject}: {reason}")]
    InvalidLink {
        link: &'static str,
        time: usize,
        subject: usize,
        reason: String,
    },

    #[error("Feature index {feature} out of range (series has {num_features} features)")]
    FeatureOutOfRange { feature: usize, num_features: usize },
}
