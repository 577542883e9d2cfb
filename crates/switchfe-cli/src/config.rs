use crate::error::{CliError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use switchfe::core::schedule::SchedulePreset;
use switchfe::engine::config::{FailurePolicy, SwitchingConfig, TrajectoryConfig};
use switchfe::engine::ledger::Direction;

/// Run settings file, deserialized from TOML and mapped onto the core's
/// validated configuration builder.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub temperature: f64,
    #[serde(default = "default_timestep")]
    pub timestep_fs: f64,
    #[serde(default = "default_collision_rate")]
    pub collision_rate_per_ps: f64,
    #[serde(default = "default_splitting")]
    pub eq_splitting: String,
    #[serde(default = "default_splitting")]
    pub neq_splitting: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    pub seed: Option<u64>,

    #[serde(default)]
    pub schedule: ScheduleSettings,
    pub trajectory: Option<TrajectorySettings>,
    pub model: ModelSettings,
    pub equilibration: EquilibrationSettings,
    pub annealing: AnnealingSettings,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub preset: SchedulePreset,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrajectorySettings {
    pub directory: PathBuf,
    pub prefix: String,
    pub atom_subset: Option<Vec<usize>>,
    #[serde(default = "default_chunk_bytes")]
    pub max_chunk_bytes: usize,
    pub save_interval: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSettings {
    pub particles: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EquilibrationSettings {
    pub iterations: usize,
    pub steps_per_iteration: u32,
    #[serde(default = "default_true")]
    pub decorrelate: bool,
    #[serde(default)]
    pub minimize: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnealingSettings {
    pub particles: usize,
    pub schedule_length: usize,
    #[serde(default = "default_steps_per_move")]
    pub steps_per_move: u32,
    #[serde(default = "default_directions")]
    pub directions: Vec<Direction>,
}

fn default_timestep() -> f64 {
    1.0
}
fn default_collision_rate() -> f64 {
    1.0
}
fn default_splitting() -> String {
    "V R O R V".to_string()
}
fn default_workers() -> usize {
    2
}
fn default_chunk_bytes() -> usize {
    1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_steps_per_move() -> u32 {
    1
}
fn default_directions() -> Vec<Direction> {
    vec![Direction::Forward, Direction::Reverse]
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| CliError::SettingsParsing {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Maps the settings onto the core's validated builder. `workers`
    /// overrides take precedence over the file value.
    pub fn to_switching_config(&self, workers_override: Option<usize>) -> Result<SwitchingConfig> {
        let mut builder = SwitchingConfig::builder()
            .temperature(self.temperature)
            .timestep_fs(self.timestep_fs)
            .collision_rate_per_ps(self.collision_rate_per_ps)
            .eq_splitting(self.eq_splitting.clone())
            .neq_splitting(self.neq_splitting.clone())
            .workers(workers_override.unwrap_or(self.workers))
            .failure_policy(self.failure_policy);
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        if let Some(trajectory) = &self.trajectory {
            builder = builder.trajectory(TrajectoryConfig {
                directory: trajectory.directory.clone(),
                prefix: trajectory.prefix.clone(),
                atom_subset: trajectory.atom_subset.clone(),
                max_chunk_bytes: trajectory.max_chunk_bytes,
                save_interval: trajectory.save_interval,
            });
        }
        builder
            .build()
            .map_err(|e| CliError::Core(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
temperature = 300.0

[model]
particles = 4

[equilibration]
iterations = 10
steps_per_iteration = 5

[annealing]
particles = 4
schedule_length = 11
"#;

    #[test]
    fn minimal_settings_parse_with_defaults() {
        let settings: Settings = toml::from_str(MINIMAL).unwrap();
        assert_eq!(settings.timestep_fs, 1.0);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.failure_policy, FailurePolicy::Discard);
        assert_eq!(settings.schedule.preset, SchedulePreset::Default);
        assert_eq!(
            settings.annealing.directions,
            vec![Direction::Forward, Direction::Reverse]
        );
        assert!(settings.equilibration.decorrelate);
    }

    #[test]
    fn settings_map_onto_a_valid_core_config() {
        let settings: Settings = toml::from_str(MINIMAL).unwrap();
        let config = settings.to_switching_config(Some(8)).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.temperature, 300.0);
        assert!(config.trajectory.is_none());
    }

    #[test]
    fn load_reads_a_settings_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.model.particles, 4);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}\nnot_a_key = 1\n");
        assert!(toml::from_str::<Settings>(&text).is_err());
    }

    #[test]
    fn full_settings_round_trip_through_the_builder() {
        let text = r#"
temperature = 310.0
timestep_fs = 2.0
workers = 4
failure_policy = "retry-once"
seed = 42

[schedule]
preset = "namd"

[trajectory]
directory = "out"
prefix = "demo"
max_chunk_bytes = 2048
save_interval = 5

[model]
particles = 8
seed = 7

[equilibration]
iterations = 50
steps_per_iteration = 10
minimize = true

[annealing]
particles = 8
schedule_length = 25
steps_per_move = 2
directions = ["forward"]
"#;
        let settings: Settings = toml::from_str(text).unwrap();
        assert_eq!(settings.schedule.preset, SchedulePreset::Namd);
        assert_eq!(settings.failure_policy, FailurePolicy::RetryOnce);
        let config = settings.to_switching_config(None).unwrap();
        assert_eq!(config.workers, 4);
        let trajectory = config.trajectory.unwrap();
        assert_eq!(trajectory.save_interval, Some(5));
        assert_eq!(trajectory.max_chunk_bytes, 2048);
    }
}
