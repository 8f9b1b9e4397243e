//! Engine configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::blending::PhaseTransform;
use crate::error::{self, CoordinationError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base seed; trials and chains derive their own streams from it
    pub seed: u64,

    /// Worker threads for trial and chain parallelism (0 lets rayon decide)
    #[serde(rename = "num-jobs")]
    pub num_jobs: usize,

    pub discrete: DiscreteConfig,

    pub particle: ParticleConfig,

    pub gibbs: GibbsConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .coordination.yml
        let local_config = PathBuf::from(".coordination.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/coordination/coordination.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("coordination").join("coordination.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(path, content).context(format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Validate every engine section
    pub fn validate(&self) -> error::Result<()> {
        self.discrete.validate()?;
        self.particle.validate()?;
        self.gibbs.validate()
    }
}

/// Exact two-state engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscreteConfig {
    /// Probability that coordination switches state between steps
    #[serde(rename = "change-probability")]
    pub change_probability: f64,

    /// `P(C_0 = 1)`
    #[serde(rename = "initial-coordination")]
    pub initial_coordination: f64,

    /// Entry prior mean per feature (a single entry is broadcast)
    #[serde(rename = "mean-prior")]
    pub mean_prior: Vec<f64>,

    #[serde(rename = "sd-prior")]
    pub sd_prior: Vec<f64>,

    #[serde(rename = "sd-uncoordinated")]
    pub sd_uncoordinated: Vec<f64>,

    #[serde(rename = "sd-coordinated")]
    pub sd_coordinated: Vec<f64>,

    /// Hold coordination fixed over the second half of each trial
    #[serde(rename = "fix-second-half")]
    pub fix_second_half: bool,

    pub phase: PhaseTransform,
}

impl Default for DiscreteConfig {
    fn default() -> Self {
        Self {
            change_probability: 0.1,
            initial_coordination: 0.5,
            mean_prior: vec![0.0],
            sd_prior: vec![1.0],
            sd_uncoordinated: vec![1.0],
            sd_coordinated: vec![1.0],
            fix_second_half: false,
            phase: PhaseTransform::InPhase,
        }
    }
}

impl DiscreteConfig {
    pub fn validate(&self) -> error::Result<()> {
        error::ensure_probability("change-probability", self.change_probability)?;
        error::ensure_probability("initial-coordination", self.initial_coordination)?;
        error::ensure_finite("mean-prior", &self.mean_prior)?;
        error::ensure_positive("sd-prior", &self.sd_prior)?;
        error::ensure_positive("sd-uncoordinated", &self.sd_uncoordinated)?;
        error::ensure_positive("sd-coordinated", &self.sd_coordinated)?;
        ensure_feature_lengths(&[
            ("mean-prior", self.mean_prior.as_slice()),
            ("sd-prior", self.sd_prior.as_slice()),
            ("sd-uncoordinated", self.sd_uncoordinated.as_slice()),
            ("sd-coordinated", self.sd_coordinated.as_slice()),
        ])
    }
}

/// Which coordination process the particles follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoordinationKind {
    /// Random walk on the logit scale pushed through the logistic function
    #[default]
    Logistic,
    /// Random walk clipped to `[0, 1]`
    Truncated,
    /// Two-state chain
    Discrete,
}

/// What the particle weights are computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticleEvidence {
    /// Blend of observed values, no latent state
    #[default]
    Observed,
    /// Latent vocalics carried by the particles
    Latent,
}

/// Particle filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    #[serde(rename = "num-particles")]
    pub num_particles: usize,

    pub kind: CoordinationKind,

    pub evidence: ParticleEvidence,

    /// Mean of `C_0` for the continuous kinds, `P(C_0 = 1)` for discrete
    #[serde(rename = "initial-coordination")]
    pub initial_coordination: f64,

    /// Spread of `C_0` on the unbounded scale
    #[serde(rename = "sd-initial-coordination")]
    pub sd_initial_coordination: f64,

    /// Random-walk step sd on the unbounded scale
    #[serde(rename = "sd-coordination")]
    pub sd_coordination: f64,

    /// Switch probability for the discrete kind
    #[serde(rename = "change-probability")]
    pub change_probability: f64,

    /// Stand-in for a missing own predecessor (observed evidence)
    #[serde(rename = "mean-prior")]
    pub mean_prior: Vec<f64>,

    #[serde(rename = "sd-coordinated")]
    pub sd_coordinated: Vec<f64>,

    /// Model variances for latent evidence
    pub variances: Variances,

    #[serde(rename = "fix-second-half")]
    pub fix_second_half: bool,

    #[serde(rename = "self-dependent")]
    pub self_dependent: bool,

    pub phase: PhaseTransform,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            num_particles: 1000,
            kind: CoordinationKind::Logistic,
            evidence: ParticleEvidence::Observed,
            initial_coordination: 0.5,
            sd_initial_coordination: 0.1,
            sd_coordination: 0.1,
            change_probability: 0.1,
            mean_prior: vec![0.0],
            sd_coordinated: vec![1.0],
            variances: Variances::default(),
            fix_second_half: false,
            self_dependent: true,
            phase: PhaseTransform::InPhase,
        }
    }
}

impl ParticleConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.num_particles == 0 {
            return Err(CoordinationError::InvalidParameter {
                name: "num-particles",
                reason: "at least one particle is required".to_string(),
            });
        }
        error::ensure_probability("initial-coordination", self.initial_coordination)?;
        error::ensure_probability("change-probability", self.change_probability)?;
        error::ensure_positive("sd-initial-coordination", &[self.sd_initial_coordination])?;
        error::ensure_positive("sd-coordination", &[self.sd_coordination])?;
        error::ensure_finite("mean-prior", &self.mean_prior)?;
        error::ensure_positive("sd-coordinated", &self.sd_coordinated)?;
        ensure_feature_lengths(&[
            ("mean-prior", self.mean_prior.as_slice()),
            ("sd-coordinated", self.sd_coordinated.as_slice()),
        ])?;
        self.variances.validate()
    }
}

/// Prior, transition and observation variances of the latent model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Variances {
    pub prior: f64,
    pub transition: f64,
    pub observation: f64,
}

impl Default for Variances {
    fn default() -> Self {
        Self {
            prior: 1.0,
            transition: 1.0,
            observation: 1.0,
        }
    }
}

impl Variances {
    pub fn new(prior: f64, transition: f64, observation: f64) -> Self {
        Self {
            prior,
            transition,
            observation,
        }
    }

    pub fn validate(&self) -> error::Result<()> {
        error::ensure_positive("prior variance", &[self.prior])?;
        error::ensure_positive("transition variance", &[self.transition])?;
        error::ensure_positive("observation variance", &[self.observation])
    }
}

/// `InverseGamma(shape, scale)` prior of one variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseGammaPrior {
    pub shape: f64,
    pub scale: f64,
}

impl Default for InverseGammaPrior {
    fn default() -> Self {
        Self { shape: 1.0, scale: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariancePriors {
    pub prior: InverseGammaPrior,
    pub transition: InverseGammaPrior,
    pub observation: InverseGammaPrior,
}

/// Variances held at their initial values instead of being sampled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedVariances {
    pub prior: bool,
    pub transition: bool,
    pub observation: bool,
}

/// Coordination process sampled by the Gibbs engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GibbsCoordination {
    /// Two-state chain, sampled by forward filtering backward sampling
    Discrete,
    /// Clipped Gaussian random walk, sampled site by site
    #[default]
    Truncated,
}

/// Blocked Gibbs sampler parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GibbsConfig {
    /// Burn-in sweeps; the last one is retained
    #[serde(rename = "num-sweeps")]
    pub num_sweeps: usize,

    #[serde(rename = "num-chains")]
    pub num_chains: usize,

    pub coordination: GibbsCoordination,

    #[serde(rename = "initial-coordination")]
    pub initial_coordination: f64,

    #[serde(rename = "sd-initial-coordination")]
    pub sd_initial_coordination: f64,

    #[serde(rename = "sd-coordination")]
    pub sd_coordination: f64,

    #[serde(rename = "change-probability")]
    pub change_probability: f64,

    pub priors: VariancePriors,

    #[serde(rename = "initial-variances")]
    pub initial_variances: Variances,

    #[serde(rename = "fixed-variances")]
    pub fixed_variances: FixedVariances,

    /// Sweeps of diagnostics kept per chain
    #[serde(rename = "trace-capacity")]
    pub trace_capacity: usize,

    #[serde(rename = "fix-second-half")]
    pub fix_second_half: bool,

    #[serde(rename = "self-dependent")]
    pub self_dependent: bool,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            num_sweeps: 100,
            num_chains: 1,
            coordination: GibbsCoordination::Truncated,
            initial_coordination: 0.5,
            sd_initial_coordination: 0.1,
            sd_coordination: 0.1,
            change_probability: 0.1,
            priors: VariancePriors::default(),
            initial_variances: Variances::default(),
            fixed_variances: FixedVariances::default(),
            trace_capacity: 100,
            fix_second_half: false,
            self_dependent: true,
        }
    }
}

impl GibbsConfig {
    pub fn validate(&self) -> error::Result<()> {
        if self.num_sweeps == 0 {
            return Err(CoordinationError::InvalidParameter {
                name: "num-sweeps",
                reason: "at least one sweep is required".to_string(),
            });
        }
        if self.num_chains == 0 {
            return Err(CoordinationError::InvalidParameter {
                name: "num-chains",
                reason: "at least one chain is required".to_string(),
            });
        }
        error::ensure_probability("initial-coordination", self.initial_coordination)?;
        error::ensure_probability("change-probability", self.change_probability)?;
        error::ensure_positive("sd-initial-coordination", &[self.sd_initial_coordination])?;
        error::ensure_positive("sd-coordination", &[self.sd_coordination])?;
        for (name, prior) in [
            ("prior variance shape/scale", self.priors.prior),
            ("transition variance shape/scale", self.priors.transition),
            ("observation variance shape/scale", self.priors.observation),
        ] {
            error::ensure_positive(name, &[prior.shape, prior.scale])?;
        }
        self.initial_variances.validate()
    }
}

/// Per-feature vectors longer than one entry must all have the same length;
/// single entries broadcast and empty vectors are rejected.
fn ensure_feature_lengths(vectors: &[(&'static str, &[f64])]) -> error::Result<()> {
    let expected = vectors
        .iter()
        .map(|(_, values)| values.len())
        .find(|len| *len > 1)
        .unwrap_or(1);
    for (name, values) in vectors {
        if values.len() != 1 {
            error::ensure_dimension(*name, expected, values.len())?;
        }
    }
    Ok(())
}

/// Resolve a per-feature parameter against the data dimension. A single
/// entry is broadcast to every feature.
pub fn per_feature(name: &'static str, values: &[f64], num_features: usize) -> error::Result<Vec<f64>> {
    match values.len() {
        1 => Ok(vec![values[0]; num_features]),
        n if n == num_features => Ok(values.to_vec()),
        n => Err(CoordinationError::DimensionMismatch {
            name,
            expected: num_features,
            actual: n,
        }),
    }
}
