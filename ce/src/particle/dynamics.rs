//! Coordination processes carried by particles

use rand::Rng;

use super::{CoordinationState, Particles};
use crate::blending::{BoundingMap, logit};
use crate::stats::sample_normal;

/// Coordination per particle, with the value on the unbounded scale it was
/// derived from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinationParticles {
    pub coordination: Vec<f64>,
    pub unbounded: Vec<f64>,
}

impl Particles for CoordinationParticles {
    fn len(&self) -> usize {
        self.coordination.len()
    }

    fn resample(&mut self, indices: &[usize]) {
        self.coordination = indices.iter().map(|i| self.coordination[*i]).collect();
        self.unbounded = indices.iter().map(|i| self.unbounded[*i]).collect();
    }
}

impl CoordinationState for CoordinationParticles {
    fn coordination(&self) -> &[f64] {
        &self.coordination
    }
}

/// Prior and step of a coordination process
pub trait CoordinationDynamics: Sync {
    fn sample_initial<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> CoordinationParticles;

    fn sample_next<R: Rng + ?Sized>(&self, previous: &CoordinationParticles, rng: &mut R) -> CoordinationParticles;
}

fn random_walk_initial<R: Rng + ?Sized>(
    bounding: BoundingMap,
    mean: f64,
    sd: f64,
    num_particles: usize,
    rng: &mut R,
) -> CoordinationParticles {
    let unbounded: Vec<f64> = (0..num_particles).map(|_| sample_normal(rng, mean, sd)).collect();
    CoordinationParticles {
        coordination: unbounded.iter().map(|u| bounding.bound(*u)).collect(),
        unbounded,
    }
}

fn random_walk_step<R: Rng + ?Sized>(
    bounding: BoundingMap,
    sd: f64,
    previous: &CoordinationParticles,
    rng: &mut R,
) -> CoordinationParticles {
    let unbounded: Vec<f64> = previous.unbounded.iter().map(|u| sample_normal(rng, *u, sd)).collect();
    CoordinationParticles {
        coordination: unbounded.iter().map(|u| bounding.bound(*u)).collect(),
        unbounded,
    }
}

/// Gaussian random walk on the logit scale
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticDynamics {
    /// Initial mean on the logit scale
    pub initial_mean: f64,
    pub sd_initial: f64,
    pub sd_step: f64,
}

impl LogisticDynamics {
    /// `initial_coordination` is given on `[0, 1]`
    pub fn new(initial_coordination: f64, sd_initial: f64, sd_step: f64) -> Self {
        Self {
            initial_mean: logit(initial_coordination),
            sd_initial,
            sd_step,
        }
    }
}

impl CoordinationDynamics for LogisticDynamics {
    fn sample_initial<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> CoordinationParticles {
        random_walk_initial(BoundingMap::Logistic, self.initial_mean, self.sd_initial, num_particles, rng)
    }

    fn sample_next<R: Rng + ?Sized>(&self, previous: &CoordinationParticles, rng: &mut R) -> CoordinationParticles {
        random_walk_step(BoundingMap::Logistic, self.sd_step, previous, rng)
    }
}

/// Gaussian random walk clipped to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TruncatedDynamics {
    pub initial_mean: f64,
    pub sd_initial: f64,
    pub sd_step: f64,
}

impl TruncatedDynamics {
    pub fn new(initial_coordination: f64, sd_initial: f64, sd_step: f64) -> Self {
        Self {
            initial_mean: initial_coordination,
            sd_initial,
            sd_step,
        }
    }
}

impl CoordinationDynamics for TruncatedDynamics {
    fn sample_initial<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> CoordinationParticles {
        random_walk_initial(BoundingMap::Clip, self.initial_mean, self.sd_initial, num_particles, rng)
    }

    fn sample_next<R: Rng + ?Sized>(&self, previous: &CoordinationParticles, rng: &mut R) -> CoordinationParticles {
        random_walk_step(BoundingMap::Clip, self.sd_step, previous, rng)
    }
}

/// Two-state chain that flips with `change_probability`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteDynamics {
    /// `P(C_0 = 1)`
    pub initial_probability: f64,
    pub change_probability: f64,
}

impl DiscreteDynamics {
    pub fn new(initial_probability: f64, change_probability: f64) -> Self {
        Self {
            initial_probability,
            change_probability,
        }
    }
}

impl CoordinationDynamics for DiscreteDynamics {
    fn sample_initial<R: Rng + ?Sized>(&self, num_particles: usize, rng: &mut R) -> CoordinationParticles {
        let coordination: Vec<f64> = (0..num_particles)
            .map(|_| if rng.random::<f64>() < self.initial_probability { 1.0 } else { 0.0 })
            .collect();
        CoordinationParticles {
            unbounded: coordination.clone(),
            coordination,
        }
    }

    fn sample_next<R: Rng + ?Sized>(&self, previous: &CoordinationParticles, rng: &mut R) -> CoordinationParticles {
        let coordination: Vec<f64> = previous
            .coordination
            .iter()
            .map(|c| if rng.random::<f64>() < self.change_probability { 1.0 - c } else { *c })
            .collect();
        CoordinationParticles {
            unbounded: coordination.clone(),
            coordination,
        }
    }
}
