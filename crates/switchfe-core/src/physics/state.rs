use super::{ExecutionContext, PhysicsModel};
use crate::core::models::BOLTZMANN_KJ_PER_MOL_K;
use crate::core::schedule::{AlchemicalParameters, LambdaSchedule};
use std::fmt;
use std::sync::Arc;

/// The physical model plus its current alchemical parameters and temperature.
///
/// Owned by the orchestrator; every dispatched task receives its own clone so
/// concurrent tasks never observe each other's parameter changes (the model
/// itself is shared immutably behind an `Arc`). The parameters are mutated
/// only through [`ThermodynamicState::set_alchemical_parameters`].
#[derive(Clone)]
pub struct ThermodynamicState {
    model: Arc<dyn PhysicsModel>,
    parameters: AlchemicalParameters,
    temperature: f64,
}

impl ThermodynamicState {
    /// A state at the given temperature (kelvin), fully decoupled.
    pub fn new(model: Arc<dyn PhysicsModel>, temperature: f64) -> Self {
        Self {
            model,
            parameters: AlchemicalParameters::uniform(0.0),
            temperature,
        }
    }

    pub fn model(&self) -> &Arc<dyn PhysicsModel> {
        &self.model
    }

    pub fn parameters(&self) -> &AlchemicalParameters {
        &self.parameters
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Sets every alchemical parameter to the schedule's value at `progress`.
    pub fn set_alchemical_parameters(&mut self, progress: f64, schedule: &LambdaSchedule) {
        self.parameters = schedule.at(progress);
    }

    /// `1 / (kB T)` in mol/kJ.
    pub fn beta(&self) -> f64 {
        1.0 / (BOLTZMANN_KJ_PER_MOL_K * self.temperature)
    }

    /// Converts a potential energy in kJ/mol to a dimensionless reduced
    /// potential.
    pub fn reduce(&self, potential_kj_per_mol: f64) -> f64 {
        self.beta() * potential_kj_per_mol
    }

    /// Reads the context's instantaneous reduced potential.
    pub fn reduced_potential(
        &self,
        context: &dyn ExecutionContext,
    ) -> Result<f64, super::PhysicsError> {
        Ok(self.reduce(context.potential_energy()?))
    }
}

impl fmt::Debug for ThermodynamicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThermodynamicState")
            .field("num_particles", &self.model.num_particles())
            .field("parameters", &self.parameters)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::SchedulePreset;
    use crate::physics::AlchemicalHarmonicModel;

    fn state() -> ThermodynamicState {
        let model = Arc::new(AlchemicalHarmonicModel::two_state_example(4, None));
        ThermodynamicState::new(model, 300.0)
    }

    #[test]
    fn new_state_is_fully_decoupled() {
        let state = state();
        assert_eq!(*state.parameters(), AlchemicalParameters::uniform(0.0));
    }

    #[test]
    fn beta_matches_boltzmann_factor() {
        let state = state();
        let expected = 1.0 / (BOLTZMANN_KJ_PER_MOL_K * 300.0);
        assert!((state.beta() - expected).abs() < 1e-12);
        assert!((state.reduce(2.0) - 2.0 * expected).abs() < 1e-12);
    }

    #[test]
    fn setting_parameters_follows_the_schedule() {
        let mut state = state();
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        state.set_alchemical_parameters(0.25, &schedule);
        assert_eq!(state.parameters().sterics_core, 0.25);
        assert_eq!(state.parameters().sterics_insert, 0.5);
    }

    #[test]
    fn clones_do_not_share_parameter_mutations() {
        let mut original = state();
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        let copy = original.clone();
        original.set_alchemical_parameters(1.0, &schedule);
        assert_eq!(*copy.parameters(), AlchemicalParameters::uniform(0.0));
    }
}
