use crate::physics::IntegratorParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Parameter '{name}' must be positive (got {value})")]
    NotPositive { name: &'static str, value: f64 },

    #[error("Integrator splitting '{0}' contains tokens other than V, R, O")]
    InvalidSplitting(String),

    #[error("Shadow-work measurement is not supported by the Langevin splitting integrator")]
    ShadowWorkUnsupported,

    #[error("Save interval {interval} does not divide the schedule length {length}; the saved protocol would be incomplete")]
    SaveIntervalMismatch { interval: usize, length: usize },

    #[error("Schedule length must be at least 2 (got {0})")]
    ScheduleTooShort(usize),
}

/// How the orchestrator treats a recoverable task failure in a gathered
/// batch. Whatever the policy, failures are always logged with their context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Drop the failed particle and proceed; the final estimate is tagged
    /// with the reduced sample count.
    #[default]
    Discard,
    /// Re-dispatch the failed particle once, then discard if it fails again.
    RetryOnce,
    /// Abort the whole batch on the first failure.
    Abort,
}

/// Trajectory persistence settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryConfig {
    pub directory: PathBuf,
    pub prefix: String,
    /// Particle indices to keep in saved frames; `None` saves everything.
    pub atom_subset: Option<Vec<usize>>,
    /// Buffered-frame byte threshold that triggers an equilibrium chunk flush.
    pub max_chunk_bytes: usize,
    /// Save every Kth annealing step; `None` disables nonequilibrium
    /// trajectory output.
    pub save_interval: Option<usize>,
}

/// Validated run configuration for the switching engine.
///
/// Construct through [`SwitchingConfigBuilder`]; a config that exists has
/// passed all range and compatibility checks.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchingConfig {
    pub temperature: f64,
    pub timestep_fs: f64,
    pub collision_rate_per_ps: f64,
    pub eq_splitting: String,
    pub neq_splitting: String,
    pub trajectory: Option<TrajectoryConfig>,
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    pub seed: Option<u64>,
}

impl SwitchingConfig {
    pub fn builder() -> SwitchingConfigBuilder {
        SwitchingConfigBuilder::new()
    }

    pub fn eq_integrator(&self) -> IntegratorParams {
        IntegratorParams::new(
            self.timestep_fs,
            self.collision_rate_per_ps,
            self.eq_splitting.clone(),
        )
    }

    pub fn neq_integrator(&self) -> IntegratorParams {
        IntegratorParams::new(
            self.timestep_fs,
            self.collision_rate_per_ps,
            self.neq_splitting.clone(),
        )
    }
}

#[derive(Default)]
pub struct SwitchingConfigBuilder {
    temperature: Option<f64>,
    timestep_fs: Option<f64>,
    collision_rate_per_ps: Option<f64>,
    eq_splitting: Option<String>,
    neq_splitting: Option<String>,
    trajectory: Option<TrajectoryConfig>,
    workers: Option<usize>,
    failure_policy: Option<FailurePolicy>,
    measure_shadow_work: bool,
    seed: Option<u64>,
}

impl SwitchingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Temperature in kelvin. Required.
    pub fn temperature(mut self, kelvin: f64) -> Self {
        self.temperature = Some(kelvin);
        self
    }
    pub fn timestep_fs(mut self, timestep: f64) -> Self {
        self.timestep_fs = Some(timestep);
        self
    }
    pub fn collision_rate_per_ps(mut self, rate: f64) -> Self {
        self.collision_rate_per_ps = Some(rate);
        self
    }
    pub fn eq_splitting(mut self, splitting: impl Into<String>) -> Self {
        self.eq_splitting = Some(splitting.into());
        self
    }
    pub fn neq_splitting(mut self, splitting: impl Into<String>) -> Self {
        self.neq_splitting = Some(splitting.into());
        self
    }
    pub fn trajectory(mut self, trajectory: TrajectoryConfig) -> Self {
        self.trajectory = Some(trajectory);
        self
    }
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }
    /// Request per-step shadow-work measurement. Unsupported; `build` fails
    /// if set.
    pub fn measure_shadow_work(mut self, measure: bool) -> Self {
        self.measure_shadow_work = measure;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SwitchingConfig, ConfigError> {
        if self.measure_shadow_work {
            return Err(ConfigError::ShadowWorkUnsupported);
        }

        let temperature = self
            .temperature
            .ok_or(ConfigError::MissingParameter("temperature"))?;
        check_positive("temperature", temperature)?;

        let timestep_fs = self.timestep_fs.unwrap_or(1.0);
        check_positive("timestep_fs", timestep_fs)?;

        let collision_rate_per_ps = self.collision_rate_per_ps.unwrap_or(1.0);
        check_positive("collision_rate_per_ps", collision_rate_per_ps)?;

        let eq_splitting = self.eq_splitting.unwrap_or_else(|| "V R O R V".to_string());
        check_splitting(&eq_splitting)?;
        let neq_splitting = self.neq_splitting.unwrap_or_else(|| "V R O R V".to_string());
        check_splitting(&neq_splitting)?;

        if let Some(trajectory) = &self.trajectory {
            if trajectory.max_chunk_bytes == 0 {
                return Err(ConfigError::NotPositive {
                    name: "max_chunk_bytes",
                    value: 0.0,
                });
            }
            if trajectory.save_interval == Some(0) {
                return Err(ConfigError::NotPositive {
                    name: "save_interval",
                    value: 0.0,
                });
            }
        }

        let workers = self.workers.unwrap_or(2).max(1);

        Ok(SwitchingConfig {
            temperature,
            timestep_fs,
            collision_rate_per_ps,
            eq_splitting,
            neq_splitting,
            trajectory: self.trajectory,
            workers,
            failure_policy: self.failure_policy.unwrap_or_default(),
            seed: self.seed,
        })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

fn check_splitting(splitting: &str) -> Result<(), ConfigError> {
    let valid = splitting
        .split_whitespace()
        .all(|token| matches!(token, "V" | "R" | "O"));
    if valid && !splitting.trim().is_empty() {
        Ok(())
    } else {
        Err(ConfigError::InvalidSplitting(splitting.to_string()))
    }
}
