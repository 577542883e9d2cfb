//! # Physics Collaborator Surface
//!
//! The abstract interface the engine needs from a simulation backend, plus a
//! cheap analytic reference implementation.
//!
//! A [`PhysicsModel`] describes a system and can mint [`ExecutionContext`]s:
//! live simulation states that hold coordinates and velocities, accept
//! alchemical parameter updates without being rebuilt, and advance under a
//! Langevin integrator. Contexts are exclusively owned by one worker at a
//! time; the engine never shares a context across workers.

mod harmonic;
mod pool;
mod state;

use crate::core::models::SamplerState;
use crate::core::schedule::AlchemicalParameters;
use thiserror::Error;

pub use harmonic::{AlchemicalHarmonicModel, AlchemicalWell};
pub use pool::ContextPool;
pub use state::ThermodynamicState;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PhysicsError {
    #[error("integration produced a non-finite coordinate for particle {index}")]
    NonFiniteCoordinate { index: usize },

    #[error("potential energy evaluated to a non-finite value")]
    NonFiniteEnergy,

    #[error("context has no configuration loaded")]
    NoConfiguration,
}

/// Langevin integrator parameters shared by equilibrium and nonequilibrium
/// moves. The splitting string uses the V (velocity), R (position), O
/// (Ornstein-Uhlenbeck) token convention.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratorParams {
    pub timestep_fs: f64,
    pub collision_rate_per_ps: f64,
    pub splitting: String,
    pub constraint_tolerance: f64,
}

impl IntegratorParams {
    pub fn new(timestep_fs: f64, collision_rate_per_ps: f64, splitting: impl Into<String>) -> Self {
        Self {
            timestep_fs,
            collision_rate_per_ps,
            splitting: splitting.into(),
            constraint_tolerance: 1.0e-6,
        }
    }
}

/// A physical system that can be simulated at any alchemical parameter set.
///
/// Implementations are shared immutably across tasks (`Arc<dyn
/// PhysicsModel>`); all mutable simulation state lives in the contexts they
/// create.
pub trait PhysicsModel: Send + Sync {
    fn num_particles(&self) -> usize;

    /// The configuration a fresh calculation starts from.
    fn reference_configuration(&self) -> SamplerState;

    /// Creates a live simulation context bound to this model and the given
    /// integrator parameters.
    fn create_context(&self, integrator: &IntegratorParams) -> Box<dyn ExecutionContext>;
}

/// A live simulation state: coordinates, velocities, and the current
/// alchemical parameters.
pub trait ExecutionContext: Send {
    /// Applies an alchemical parameter set without rebuilding the context.
    fn apply_parameters(&mut self, parameters: &AlchemicalParameters);

    /// Loads positions and box geometry from a snapshot.
    fn load_configuration(&mut self, state: &SamplerState);

    /// Extracts the current positions and box geometry.
    fn extract_configuration(&self) -> Result<SamplerState, PhysicsError>;

    /// Redraws velocities from the Maxwell-Boltzmann distribution at the
    /// given temperature (kelvin).
    fn resample_velocities(&mut self, temperature: f64);

    /// Advances the dynamics by `steps` discrete integrator steps.
    fn advance(&mut self, steps: u32) -> Result<(), PhysicsError>;

    /// Instantaneous potential energy in kJ/mol.
    fn potential_energy(&self) -> Result<f64, PhysicsError>;

    /// Local energy minimization, updating the configuration in place.
    fn minimize(&mut self, max_iterations: usize) -> Result<(), PhysicsError>;
}
