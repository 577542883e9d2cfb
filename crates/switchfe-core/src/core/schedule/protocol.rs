use super::functions::LambdaFn;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Number of evenly spaced grid points used for the monotonicity check.
///
/// The check is a discretized approximation, not a proof: a function that
/// dips and recovers between adjacent grid points will pass. Ten points
/// matches the contract the protocol authors validate against.
pub const VALIDATION_GRID_POINTS: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("lambda function for '{term}' must evaluate to exactly 0 at progress 0 (got {value})")]
    StartNotZero { term: &'static str, value: f64 },

    #[error("lambda function for '{term}' must evaluate to exactly 1 at progress 1 (got {value})")]
    EndNotOne { term: &'static str, value: f64 },

    #[error(
        "lambda function for '{term}' is not non-decreasing: grid point {index} steps from {previous} to {current}"
    )]
    NotMonotonic {
        term: &'static str,
        index: usize,
        previous: f64,
        current: f64,
    },

    #[error("monotonicity grid needs at least 2 points (got {0})")]
    GridTooSmall(usize),
}

/// The energy terms perturbed by an alchemical protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlchemicalTerm {
    StericsCore,
    ElectrostaticsCore,
    StericsInsert,
    StericsDelete,
    ElectrostaticsInsert,
    ElectrostaticsDelete,
    Bonds,
    Angles,
    Torsions,
}

impl AlchemicalTerm {
    pub const ALL: [AlchemicalTerm; 9] = [
        AlchemicalTerm::StericsCore,
        AlchemicalTerm::ElectrostaticsCore,
        AlchemicalTerm::StericsInsert,
        AlchemicalTerm::StericsDelete,
        AlchemicalTerm::ElectrostaticsInsert,
        AlchemicalTerm::ElectrostaticsDelete,
        AlchemicalTerm::Bonds,
        AlchemicalTerm::Angles,
        AlchemicalTerm::Torsions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AlchemicalTerm::StericsCore => "lambda_sterics_core",
            AlchemicalTerm::ElectrostaticsCore => "lambda_electrostatics_core",
            AlchemicalTerm::StericsInsert => "lambda_sterics_insert",
            AlchemicalTerm::StericsDelete => "lambda_sterics_delete",
            AlchemicalTerm::ElectrostaticsInsert => "lambda_electrostatics_insert",
            AlchemicalTerm::ElectrostaticsDelete => "lambda_electrostatics_delete",
            AlchemicalTerm::Bonds => "lambda_bonds",
            AlchemicalTerm::Angles => "lambda_angles",
            AlchemicalTerm::Torsions => "lambda_torsions",
        }
    }
}

/// One scalar per energy term, as produced by evaluating a schedule at a
/// fixed progress value. `0.0` means fully decoupled, `1.0` fully coupled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlchemicalParameters {
    pub sterics_core: f64,
    pub electrostatics_core: f64,
    pub sterics_insert: f64,
    pub sterics_delete: f64,
    pub electrostatics_insert: f64,
    pub electrostatics_delete: f64,
    pub bonds: f64,
    pub angles: f64,
    pub torsions: f64,
}

impl AlchemicalParameters {
    pub fn uniform(value: f64) -> Self {
        Self {
            sterics_core: value,
            electrostatics_core: value,
            sterics_insert: value,
            sterics_delete: value,
            electrostatics_insert: value,
            electrostatics_delete: value,
            bonds: value,
            angles: value,
            torsions: value,
        }
    }

    pub fn get(&self, term: AlchemicalTerm) -> f64 {
        match term {
            AlchemicalTerm::StericsCore => self.sterics_core,
            AlchemicalTerm::ElectrostaticsCore => self.electrostatics_core,
            AlchemicalTerm::StericsInsert => self.sterics_insert,
            AlchemicalTerm::StericsDelete => self.sterics_delete,
            AlchemicalTerm::ElectrostaticsInsert => self.electrostatics_insert,
            AlchemicalTerm::ElectrostaticsDelete => self.electrostatics_delete,
            AlchemicalTerm::Bonds => self.bonds,
            AlchemicalTerm::Angles => self.angles,
            AlchemicalTerm::Torsions => self.torsions,
        }
    }
}

/// Fixed-shape record of interpolation functions, one field per known energy
/// term. Missing-key errors are impossible by construction; partial user
/// input goes through [`ScheduleOverrides`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaFunctions {
    pub sterics_core: LambdaFn,
    pub electrostatics_core: LambdaFn,
    pub sterics_insert: LambdaFn,
    pub sterics_delete: LambdaFn,
    pub electrostatics_insert: LambdaFn,
    pub electrostatics_delete: LambdaFn,
    pub bonds: LambdaFn,
    pub angles: LambdaFn,
    pub torsions: LambdaFn,
}

impl LambdaFunctions {
    pub fn get(&self, term: AlchemicalTerm) -> &LambdaFn {
        match term {
            AlchemicalTerm::StericsCore => &self.sterics_core,
            AlchemicalTerm::ElectrostaticsCore => &self.electrostatics_core,
            AlchemicalTerm::StericsInsert => &self.sterics_insert,
            AlchemicalTerm::StericsDelete => &self.sterics_delete,
            AlchemicalTerm::ElectrostaticsInsert => &self.electrostatics_insert,
            AlchemicalTerm::ElectrostaticsDelete => &self.electrostatics_delete,
            AlchemicalTerm::Bonds => &self.bonds,
            AlchemicalTerm::Angles => &self.angles,
            AlchemicalTerm::Torsions => &self.torsions,
        }
    }

    fn set(&mut self, term: AlchemicalTerm, function: LambdaFn) {
        match term {
            AlchemicalTerm::StericsCore => self.sterics_core = function,
            AlchemicalTerm::ElectrostaticsCore => self.electrostatics_core = function,
            AlchemicalTerm::StericsInsert => self.sterics_insert = function,
            AlchemicalTerm::StericsDelete => self.sterics_delete = function,
            AlchemicalTerm::ElectrostaticsInsert => self.electrostatics_insert = function,
            AlchemicalTerm::ElectrostaticsDelete => self.electrostatics_delete = function,
            AlchemicalTerm::Bonds => self.bonds = function,
            AlchemicalTerm::Angles => self.angles = function,
            AlchemicalTerm::Torsions => self.torsions = function,
        }
    }
}

/// Named presets for the per-term staging.
///
/// All presets run core and valence terms linearly across the whole range.
/// They differ in how the insert/delete sterics and electrostatics terms are
/// staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePreset {
    /// Insert sterics and delete electrostatics in the first half, delete
    /// sterics and insert electrostatics in the second half.
    #[default]
    Default,
    /// NAMD-style staging: sterics ramps split at one third and two thirds of
    /// progress, electrostatics as in `Default`.
    Namd,
    /// Each staged term ramps over one quarter of progress, in the order
    /// electrostatics_delete, sterics_delete, sterics_insert,
    /// electrostatics_insert.
    Quarters,
}

impl SchedulePreset {
    fn functions(&self) -> LambdaFunctions {
        match self {
            SchedulePreset::Default => LambdaFunctions {
                sterics_core: LambdaFn::Identity,
                electrostatics_core: LambdaFn::Identity,
                sterics_insert: LambdaFn::front_loaded(),
                sterics_delete: LambdaFn::back_loaded(),
                electrostatics_insert: LambdaFn::back_loaded(),
                electrostatics_delete: LambdaFn::front_loaded(),
                bonds: LambdaFn::Identity,
                angles: LambdaFn::Identity,
                torsions: LambdaFn::Identity,
            },
            SchedulePreset::Namd => LambdaFunctions {
                sterics_core: LambdaFn::Identity,
                electrostatics_core: LambdaFn::Identity,
                sterics_insert: LambdaFn::Ramp {
                    start: 0.0,
                    end: 2.0 / 3.0,
                },
                sterics_delete: LambdaFn::Ramp {
                    start: 1.0 / 3.0,
                    end: 1.0,
                },
                electrostatics_insert: LambdaFn::back_loaded(),
                electrostatics_delete: LambdaFn::front_loaded(),
                bonds: LambdaFn::Identity,
                angles: LambdaFn::Identity,
                torsions: LambdaFn::Identity,
            },
            SchedulePreset::Quarters => LambdaFunctions {
                sterics_core: LambdaFn::Identity,
                electrostatics_core: LambdaFn::Identity,
                electrostatics_delete: LambdaFn::Ramp {
                    start: 0.0,
                    end: 0.25,
                },
                sterics_delete: LambdaFn::Ramp {
                    start: 0.25,
                    end: 0.5,
                },
                sterics_insert: LambdaFn::Ramp {
                    start: 0.5,
                    end: 0.75,
                },
                electrostatics_insert: LambdaFn::Ramp {
                    start: 0.75,
                    end: 1.0,
                },
                bonds: LambdaFn::Identity,
                angles: LambdaFn::Identity,
                torsions: LambdaFn::Identity,
            },
        }
    }
}

/// Partial per-term overrides layered on top of a preset. Terms left unset
/// fall back to the preset's function; the fallback is reported at warning
/// level rather than treated as an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleOverrides {
    pub sterics_core: Option<LambdaFn>,
    pub electrostatics_core: Option<LambdaFn>,
    pub sterics_insert: Option<LambdaFn>,
    pub sterics_delete: Option<LambdaFn>,
    pub electrostatics_insert: Option<LambdaFn>,
    pub electrostatics_delete: Option<LambdaFn>,
    pub bonds: Option<LambdaFn>,
    pub angles: Option<LambdaFn>,
    pub torsions: Option<LambdaFn>,
}

impl ScheduleOverrides {
    /// Parses per-term overrides from a TOML document, e.g.
    ///
    /// ```toml
    /// sterics_insert = "identity"
    /// bonds = { ramp = { start = 0.0, end = 0.25 } }
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    fn take(&mut self, term: AlchemicalTerm) -> Option<LambdaFn> {
        match term {
            AlchemicalTerm::StericsCore => self.sterics_core.take(),
            AlchemicalTerm::ElectrostaticsCore => self.electrostatics_core.take(),
            AlchemicalTerm::StericsInsert => self.sterics_insert.take(),
            AlchemicalTerm::StericsDelete => self.sterics_delete.take(),
            AlchemicalTerm::ElectrostaticsInsert => self.electrostatics_insert.take(),
            AlchemicalTerm::ElectrostaticsDelete => self.electrostatics_delete.take(),
            AlchemicalTerm::Bonds => self.bonds.take(),
            AlchemicalTerm::Angles => self.angles.take(),
            AlchemicalTerm::Torsions => self.torsions.take(),
        }
    }
}

/// A validated, immutable mapping from master progress to per-term lambda
/// values. Construction fails with [`ScheduleError`] if any term violates the
/// endpoint or monotonicity contract.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaSchedule {
    functions: LambdaFunctions,
}

impl LambdaSchedule {
    /// Builds a schedule from a named preset.
    pub fn from_preset(preset: SchedulePreset) -> Result<Self, ScheduleError> {
        Self::from_functions(preset.functions())
    }

    /// Builds a schedule from a preset with explicit per-term overrides.
    /// Unset terms keep the preset's function, with a warning per term so a
    /// protocol author notices an incomplete override set.
    pub fn with_overrides(
        preset: SchedulePreset,
        mut overrides: ScheduleOverrides,
    ) -> Result<Self, ScheduleError> {
        let mut functions = preset.functions();
        for term in AlchemicalTerm::ALL {
            match overrides.take(term) {
                Some(function) => functions.set(term, function),
                None => warn!(
                    term = term.name(),
                    "no override supplied; keeping the {:?} preset function", preset
                ),
            }
        }
        Self::from_functions(functions)
    }

    /// Builds a schedule from an explicit full function record.
    pub fn from_functions(functions: LambdaFunctions) -> Result<Self, ScheduleError> {
        validate(&functions, VALIDATION_GRID_POINTS)?;
        Ok(Self { functions })
    }

    /// Evaluates every term at master progress `progress` (clamped to
    /// `[0, 1]`).
    pub fn at(&self, progress: f64) -> AlchemicalParameters {
        let x = progress.clamp(0.0, 1.0);
        AlchemicalParameters {
            sterics_core: self.functions.sterics_core.evaluate(x),
            electrostatics_core: self.functions.electrostatics_core.evaluate(x),
            sterics_insert: self.functions.sterics_insert.evaluate(x),
            sterics_delete: self.functions.sterics_delete.evaluate(x),
            electrostatics_insert: self.functions.electrostatics_insert.evaluate(x),
            electrostatics_delete: self.functions.electrostatics_delete.evaluate(x),
            bonds: self.functions.bonds.evaluate(x),
            angles: self.functions.angles.evaluate(x),
            torsions: self.functions.torsions.evaluate(x),
        }
    }

    pub fn functions(&self) -> &LambdaFunctions {
        &self.functions
    }
}

fn validate(functions: &LambdaFunctions, grid_points: usize) -> Result<(), ScheduleError> {
    if grid_points < 2 {
        return Err(ScheduleError::GridTooSmall(grid_points));
    }

    for term in AlchemicalTerm::ALL {
        let function = functions.get(term);

        let start = function.evaluate(0.0);
        if start != 0.0 {
            return Err(ScheduleError::StartNotZero {
                term: term.name(),
                value: start,
            });
        }
        let end = function.evaluate(1.0);
        if end != 1.0 {
            return Err(ScheduleError::EndNotOne {
                term: term.name(),
                value: end,
            });
        }

        let grid = (0..grid_points)
            .map(|index| function.evaluate(index as f64 / (grid_points - 1) as f64));
        for (index, (previous, current)) in grid.tuple_windows().enumerate() {
            if current < previous {
                return Err(ScheduleError::NotMonotonic {
                    term: term.name(),
                    index: index + 1,
                    previous,
                    current,
                });
            }
        }
    }
    Ok(())
}
