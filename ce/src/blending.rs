//! Blending transition law shared by the three engines
//!
//! Coordination `C` pulls a subject's next latent value toward the most
//! recent value produced by somebody else:
//!
//! ```text
//! mean = (other - own) * C * other_mask + own
//! ```
//!
//! with a missing `own` contributing zero.

use serde::{Deserialize, Serialize};

/// Role a value plays in the blending mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Own,
    Other,
}

/// Transform applied to values before they enter the blending mean.
///
/// Anti-phase negates the speaker's own values so that coordination favours
/// mirrored behaviour; either-phase compares magnitudes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseTransform {
    #[default]
    InPhase,
    AntiPhase,
    EitherPhase,
}

impl PhaseTransform {
    pub fn apply(&self, value: &[f64], role: Role) -> Vec<f64> {
        match (self, role) {
            (PhaseTransform::InPhase, _) | (PhaseTransform::AntiPhase, Role::Other) => value.to_vec(),
            (PhaseTransform::AntiPhase, Role::Own) => value.iter().map(|v| -v).collect(),
            (PhaseTransform::EitherPhase, _) => value.iter().map(|v| v.abs()).collect(),
        }
    }
}

/// Map from the unconstrained coordination scale onto `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundingMap {
    #[default]
    Logistic,
    Clip,
}

impl BoundingMap {
    pub fn bound(&self, unbounded: f64) -> f64 {
        match self {
            BoundingMap::Logistic => sigmoid(unbounded),
            BoundingMap::Clip => unbounded.clamp(0.0, 1.0),
        }
    }
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of [`sigmoid`], with the probability kept off the endpoints
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    (p / (1.0 - p)).ln()
}

/// The blending transition.
///
/// When `self_dependent` is false the own term is dropped from the mean and a
/// subject is only ever pulled toward others (or toward the zero prior mean).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendingModel {
    pub self_dependent: bool,
}

impl Default for BlendingModel {
    fn default() -> Self {
        Self { self_dependent: true }
    }
}

impl BlendingModel {
    pub fn new(self_dependent: bool) -> Self {
        Self { self_dependent }
    }

    /// Own predecessor as seen by the mean, after the self-dependence switch
    pub fn own<'a>(&self, own: Option<&'a [f64]>) -> Option<&'a [f64]> {
        if self.self_dependent { own } else { None }
    }

    /// Write the blending mean into `out`
    pub fn mean_into(&self, own: Option<&[f64]>, other: Option<&[f64]>, coordination: f64, out: &mut [f64]) {
        let own = self.own(own);
        for (k, slot) in out.iter_mut().enumerate() {
            let a = own.map_or(0.0, |v| v[k]);
            *slot = match other {
                Some(b) => (b[k] - a) * coordination + a,
                None => a,
            };
        }
    }

    pub fn mean(&self, own: Option<&[f64]>, other: Option<&[f64]>, coordination: f64, num_features: usize) -> Vec<f64> {
        let mut out = vec![0.0; num_features];
        self.mean_into(own, other, coordination, &mut out);
        out
    }

    /// Derivative of the mean with respect to the own predecessor
    pub fn own_coefficient(&self, has_other: bool, coordination: f64) -> f64 {
        match (self.self_dependent, has_other) {
            (false, _) => 0.0,
            (true, true) => 1.0 - coordination,
            (true, false) => 1.0,
        }
    }

    /// Derivative of the mean with respect to the cross-subject predecessor
    pub fn other_coefficient(&self, coordination: f64) -> f64 {
        coordination
    }
}

/// Number of coordination steps an engine resolves. With the second half
/// frozen, steps `M = T / 2` onward collapse into step `M`.
pub fn inference_horizon(num_time_steps: usize, fix_second_half: bool) -> usize {
    if fix_second_half && num_time_steps > 0 {
        num_time_steps / 2 + 1
    } else {
        num_time_steps
    }
}

/// Per-step posterior mean and variance of coordination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinationEstimate {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl CoordinationEstimate {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mean: Vec::with_capacity(capacity),
            variance: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, mean: f64, variance: f64) {
        self.mean.push(mean);
        self.variance.push(variance);
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Repeat the last (collapsed) entry until the estimate covers
    /// `num_time_steps` steps
    pub fn extend_to(mut self, num_time_steps: usize) -> Self {
        if let (Some(&mean), Some(&variance)) = (self.mean.last(), self.variance.last()) {
            while self.mean.len() < num_time_steps {
                self.push(mean, variance);
            }
        }
        self
    }
}
