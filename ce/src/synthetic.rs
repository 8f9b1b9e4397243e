//! Synthetic trials drawn by ancestral sampling from the latent model

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use turnseries::{SeriesParts, TurnSeries, TurnSeriesBuilder};

use crate::blending::{BlendingModel, BoundingMap};
use crate::config::Variances;
use crate::error::{self, CoordinationError, Result};
use crate::gibbs::GibbsEvidence;
use crate::latent::LatentPath;
use crate::stats::sample_normal;

/// Coordination path of a synthetic trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntheticCoordination {
    Constant(f64),
    /// Gaussian random walk on the unbounded scale starting at `initial`
    RandomWalk {
        initial: f64,
        sd: f64,
        bounding: BoundingMap,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub num_subjects: usize,
    pub num_features: usize,
    pub num_time_steps: usize,
    /// Fraction of steps at which somebody speaks
    pub time_scale_density: f64,
    pub coordination: SyntheticCoordination,
    pub variances: Variances,
    pub self_dependent: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_subjects: 2,
            num_features: 2,
            num_time_steps: 50,
            time_scale_density: 1.0,
            coordination: SyntheticCoordination::Constant(0.5),
            variances: Variances::default(),
            self_dependent: true,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_subjects < 2 {
            return Err(CoordinationError::InvalidParameter {
                name: "num-subjects",
                reason: "speakers alternate, so at least two subjects are required".to_string(),
            });
        }
        if self.num_features == 0 {
            return Err(CoordinationError::InvalidParameter {
                name: "num-features",
                reason: "at least one feature is required".to_string(),
            });
        }
        error::ensure_probability("time-scale-density", self.time_scale_density)?;
        match self.coordination {
            SyntheticCoordination::Constant(c) => error::ensure_probability("coordination", c)?,
            SyntheticCoordination::RandomWalk { sd, .. } => error::ensure_positive("coordination sd", &[sd])?,
        }
        self.variances.validate()
    }
}

/// A generated trial with the ground truth it was drawn from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTrial {
    pub series: TurnSeries,
    pub coordination: Vec<f64>,
    pub latent: LatentPath,
}

impl SyntheticTrial {
    /// Evidence with nothing known
    pub fn evidence(&self) -> GibbsEvidence {
        GibbsEvidence::new(self.series.clone())
    }

    /// Evidence with the true coordination and latent path known
    pub fn evidence_with_truth(&self) -> GibbsEvidence {
        self.evidence()
            .with_coordination(self.coordination.clone())
            .with_latent(self.latent.clone())
    }
}

/// Generator of synthetic trials
pub struct SyntheticGenerator {
    config: SyntheticConfig,
    rng: ChaCha8Rng,
}

impl SyntheticGenerator {
    pub fn new(config: SyntheticConfig, seed: u64) -> Result<Self> {
        debug!(?config, seed, "SyntheticGenerator::new: called");
        config.validate()?;
        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn generate_many(&mut self, num_trials: usize) -> Result<Vec<SyntheticTrial>> {
        (0..num_trials).map(|_| self.generate()).collect()
    }

    pub fn generate(&mut self) -> Result<SyntheticTrial> {
        let speakers = self.generate_speakers();
        let coordination = self.generate_coordination();

        // Links come from the turn-taking pattern alone
        let mut builder = TurnSeriesBuilder::new(self.config.num_subjects, self.config.num_features, self.config.num_time_steps);
        for (t, speaker) in speakers.iter().enumerate() {
            if let Some(s) = speaker {
                builder.observe(t, *s, vec![0.0; self.config.num_features])?;
            }
        }
        let skeleton = builder.build()?;

        let latent = self.generate_latent(&skeleton, &coordination);
        let mut parts = SeriesParts::from(skeleton);
        let sd_observation = self.config.variances.observation.sqrt();
        for (t, speaker) in speakers.iter().enumerate() {
            if let Some(s) = speaker {
                parts.values[t][*s] = latent
                    .get(t, *s)
                    .iter()
                    .map(|v| sample_normal(&mut self.rng, *v, sd_observation))
                    .collect();
            }
        }

        Ok(SyntheticTrial {
            series: TurnSeries::from_parts(parts)?,
            coordination,
            latent,
        })
    }

    /// One speaker per step (or silence); consecutive speakers always differ
    fn generate_speakers(&mut self) -> Vec<Option<usize>> {
        let num_subjects = self.config.num_subjects;
        let mut last: Option<usize> = None;
        (0..self.config.num_time_steps)
            .map(|_| {
                if self.rng.random::<f64>() >= self.config.time_scale_density {
                    return None;
                }
                let speaker = match last {
                    None => self.rng.random_range(0..num_subjects),
                    Some(previous) => {
                        let offset = self.rng.random_range(1..num_subjects);
                        (previous + offset) % num_subjects
                    }
                };
                last = Some(speaker);
                Some(speaker)
            })
            .collect()
    }

    fn generate_coordination(&mut self) -> Vec<f64> {
        let num_time_steps = self.config.num_time_steps;
        match self.config.coordination {
            SyntheticCoordination::Constant(c) => vec![c; num_time_steps],
            SyntheticCoordination::RandomWalk { initial, sd, bounding } => {
                let mut unbounded = initial;
                (0..num_time_steps)
                    .map(|t| {
                        if t > 0 {
                            unbounded = sample_normal(&mut self.rng, unbounded, sd);
                        }
                        bounding.bound(unbounded)
                    })
                    .collect()
            }
        }
    }

    fn generate_latent(&mut self, series: &TurnSeries, coordination: &[f64]) -> LatentPath {
        let blending = BlendingModel::new(self.config.self_dependent);
        let sd_prior = self.config.variances.prior.sqrt();
        let sd_transition = self.config.variances.transition.sqrt();
        let mut latent = LatentPath::zeros(series.num_subjects(), series.num_features(), series.num_time_steps());

        for turn in series.turns() {
            let drawn: Vec<f64> = if turn.has_predecessor() {
                let own = turn.previous_from_self.map(|p| latent.get(p, turn.subject));
                let other = turn.previous_from_other.map(|r| latent.get(r.time, r.subject));
                blending
                    .mean(own, other, coordination[turn.time], series.num_features())
                    .into_iter()
                    .map(|m| sample_normal(&mut self.rng, m, sd_transition))
                    .collect()
            } else {
                (0..series.num_features())
                    .map(|_| sample_normal(&mut self.rng, 0.0, sd_prior))
                    .collect()
            };
            latent.get_mut(turn.time, turn.subject).copy_from_slice(&drawn);
        }
        latent.carry_forward(series);
        latent
    }
}
