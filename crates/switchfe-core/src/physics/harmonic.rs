use super::{ExecutionContext, IntegratorParams, PhysicsError, PhysicsModel};
use crate::core::models::{BOLTZMANN_KJ_PER_MOL_K, BoxGeometry, SamplerState};
use crate::core::schedule::{AlchemicalParameters, AlchemicalTerm};
use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use std::sync::atomic::{AtomicU64, Ordering};

/// One harmonic restraint, optionally coupled to an alchemical term.
///
/// A well with `term: None` is always fully on; otherwise its spring constant
/// is scaled by the current value of that term's lambda parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AlchemicalWell {
    pub term: Option<AlchemicalTerm>,
    /// Spring constant in kJ/(mol·nm²).
    pub spring_constant: f64,
    pub center: Point3<f64>,
}

/// Analytic reference model: independent particles in a sum of harmonic
/// wells whose strengths scale with the alchemical parameters.
///
/// `U(x; lambda) = sum_wells lambda_w * k_w/2 * sum_i |x_i - c_w|^2`
///
/// The potential is exact and cheap, which makes the model suitable for
/// exercising the full annealing machinery in tests and demos without an
/// external simulation engine. Positions are in nm, energies in kJ/mol,
/// masses in amu, so `amu·nm²/ps² == kJ/mol` holds and no unit conversion is
/// needed between kinetic and potential terms.
pub struct AlchemicalHarmonicModel {
    num_particles: usize,
    wells: Vec<AlchemicalWell>,
    box_geometry: BoxGeometry,
    reference_positions: Vec<Point3<f64>>,
    particle_mass: f64,
    seed: Option<u64>,
    context_counter: AtomicU64,
}

impl AlchemicalHarmonicModel {
    pub fn new(
        num_particles: usize,
        wells: Vec<AlchemicalWell>,
        box_geometry: BoxGeometry,
        particle_mass: f64,
        seed: Option<u64>,
    ) -> Self {
        let reference_positions = vec![Point3::origin(); num_particles];
        Self {
            num_particles,
            wells,
            box_geometry,
            reference_positions,
            particle_mass,
            seed,
            context_counter: AtomicU64::new(0),
        }
    }

    /// A ready-made model with distinct end-states: a permanent base well at
    /// the origin plus insert/delete wells displaced from it, so annealing
    /// from progress 0 to 1 does measurable work.
    pub fn two_state_example(num_particles: usize, seed: Option<u64>) -> Self {
        let wells = vec![
            AlchemicalWell {
                term: None,
                spring_constant: 100.0,
                center: Point3::origin(),
            },
            AlchemicalWell {
                term: Some(AlchemicalTerm::StericsInsert),
                spring_constant: 60.0,
                center: Point3::new(0.4, 0.0, 0.0),
            },
            AlchemicalWell {
                term: Some(AlchemicalTerm::ElectrostaticsInsert),
                spring_constant: 30.0,
                center: Point3::new(0.0, 0.4, 0.0),
            },
            AlchemicalWell {
                term: Some(AlchemicalTerm::StericsDelete),
                spring_constant: 45.0,
                center: Point3::new(-0.3, 0.0, 0.2),
            },
        ];
        Self::new(num_particles, wells, BoxGeometry::cubic(4.0), 10.0, seed)
    }

    pub fn wells(&self) -> &[AlchemicalWell] {
        &self.wells
    }

    fn context_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => {
                let offset = self.context_counter.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(seed.wrapping_add(offset))
            }
            None => StdRng::from_entropy(),
        }
    }
}

impl PhysicsModel for AlchemicalHarmonicModel {
    fn num_particles(&self) -> usize {
        self.num_particles
    }

    fn reference_configuration(&self) -> SamplerState {
        SamplerState::new(self.reference_positions.clone(), self.box_geometry)
    }

    fn create_context(&self, integrator: &IntegratorParams) -> Box<dyn ExecutionContext> {
        Box::new(HarmonicContext {
            wells: self.wells.clone(),
            box_geometry: self.box_geometry,
            parameters: AlchemicalParameters::uniform(0.0),
            positions: None,
            velocities: Vec::new(),
            particle_mass: self.particle_mass,
            timestep_ps: integrator.timestep_fs * 1.0e-3,
            collision_rate_per_ps: integrator.collision_rate_per_ps,
            temperature: 300.0,
            rng: self.context_rng(),
        })
    }
}

struct HarmonicContext {
    wells: Vec<AlchemicalWell>,
    box_geometry: BoxGeometry,
    parameters: AlchemicalParameters,
    positions: Option<Vec<Point3<f64>>>,
    velocities: Vec<Vector3<f64>>,
    particle_mass: f64,
    timestep_ps: f64,
    collision_rate_per_ps: f64,
    temperature: f64,
    rng: StdRng,
}

impl HarmonicContext {
    fn coupling(&self, well: &AlchemicalWell) -> f64 {
        well.term.map_or(1.0, |term| self.parameters.get(term))
    }

    /// One BAOAB Langevin step over all particles.
    fn step(&mut self) -> Result<(), PhysicsError> {
        let positions = self.positions.as_mut().ok_or(PhysicsError::NoConfiguration)?;
        let dt = self.timestep_ps;
        let half_dt = 0.5 * dt;
        let mass = self.particle_mass;
        let friction = (-self.collision_rate_per_ps * dt).exp();
        let sigma = (BOLTZMANN_KJ_PER_MOL_K * self.temperature / mass).sqrt()
            * (1.0 - friction * friction).sqrt();
        let noise = Normal::new(0.0, 1.0).expect("unit normal is well-formed");

        for (index, position) in positions.iter_mut().enumerate() {
            let velocity = &mut self.velocities[index];

            // B
            let mut force = Vector3::zeros();
            for well in &self.wells {
                let strength =
                    well.term.map_or(1.0, |term| self.parameters.get(term)) * well.spring_constant;
                force -= strength * (*position - well.center);
            }
            *velocity += half_dt / mass * force;
            // A
            *position += half_dt * *velocity;
            // O
            let kick = Vector3::new(
                noise.sample(&mut self.rng),
                noise.sample(&mut self.rng),
                noise.sample(&mut self.rng),
            );
            *velocity = friction * *velocity + sigma * kick;
            // A
            *position += half_dt * *velocity;
            // B
            let mut force = Vector3::zeros();
            for well in &self.wells {
                let strength =
                    well.term.map_or(1.0, |term| self.parameters.get(term)) * well.spring_constant;
                force -= strength * (*position - well.center);
            }
            *velocity += half_dt / mass * force;

            if !position.coords.iter().all(|c| c.is_finite()) {
                return Err(PhysicsError::NonFiniteCoordinate { index });
            }
        }
        Ok(())
    }
}

impl ExecutionContext for HarmonicContext {
    fn apply_parameters(&mut self, parameters: &AlchemicalParameters) {
        self.parameters = *parameters;
    }

    fn load_configuration(&mut self, state: &SamplerState) {
        self.velocities = vec![Vector3::zeros(); state.positions.len()];
        self.positions = Some(state.positions.clone());
        self.box_geometry = state.box_geometry;
    }

    fn extract_configuration(&self) -> Result<SamplerState, PhysicsError> {
        let positions = self
            .positions
            .as_ref()
            .ok_or(PhysicsError::NoConfiguration)?;
        Ok(SamplerState::new(positions.clone(), self.box_geometry))
    }

    fn resample_velocities(&mut self, temperature: f64) {
        self.temperature = temperature;
        let sigma = (BOLTZMANN_KJ_PER_MOL_K * temperature / self.particle_mass).sqrt();
        let maxwell = Normal::new(0.0, sigma).expect("positive velocity spread");
        for velocity in &mut self.velocities {
            *velocity = Vector3::new(
                maxwell.sample(&mut self.rng),
                maxwell.sample(&mut self.rng),
                maxwell.sample(&mut self.rng),
            );
        }
    }

    fn advance(&mut self, steps: u32) -> Result<(), PhysicsError> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    fn potential_energy(&self) -> Result<f64, PhysicsError> {
        let positions = self
            .positions
            .as_ref()
            .ok_or(PhysicsError::NoConfiguration)?;
        let mut energy = 0.0;
        for well in &self.wells {
            let strength = self.coupling(well) * well.spring_constant;
            if strength == 0.0 {
                continue;
            }
            for position in positions {
                energy += 0.5 * strength * (*position - well.center).norm_squared();
            }
        }
        if !energy.is_finite() {
            return Err(PhysicsError::NonFiniteEnergy);
        }
        Ok(energy)
    }

    fn minimize(&mut self, max_iterations: usize) -> Result<(), PhysicsError> {
        let total_strength: f64 = self
            .wells
            .iter()
            .map(|well| self.coupling(well) * well.spring_constant)
            .sum();
        if total_strength <= 0.0 {
            // Flat landscape at the current parameters; nothing to descend.
            return Ok(());
        }

        let wells: Vec<(f64, Point3<f64>)> = self
            .wells
            .iter()
            .map(|well| (self.coupling(well) * well.spring_constant, well.center))
            .collect();
        let positions = self
            .positions
            .as_mut()
            .ok_or(PhysicsError::NoConfiguration)?;

        for position in positions.iter_mut() {
            for _ in 0..max_iterations {
                let mut gradient = Vector3::zeros();
                for (strength, center) in &wells {
                    gradient += *strength * (*position - *center);
                }
                if gradient.norm() < 1.0e-10 {
                    break;
                }
                *position -= gradient / total_strength;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coupled_parameters() -> AlchemicalParameters {
        AlchemicalParameters::uniform(1.0)
    }

    fn example_context() -> Box<dyn ExecutionContext> {
        let model = AlchemicalHarmonicModel::two_state_example(3, Some(42));
        let context = model.create_context(&IntegratorParams::new(1.0, 1.0, "V R O R V"));
        context
    }

    #[test]
    fn potential_without_configuration_is_an_error() {
        let context = example_context();
        assert_eq!(
            context.potential_energy().unwrap_err(),
            PhysicsError::NoConfiguration
        );
    }

    #[test]
    fn decoupled_potential_counts_only_the_base_well() {
        let model = AlchemicalHarmonicModel::two_state_example(2, Some(1));
        let mut context = model.create_context(&IntegratorParams::new(1.0, 1.0, "V R O R V"));
        let mut state = model.reference_configuration();
        state.positions[0] = Point3::new(0.1, 0.0, 0.0);
        state.positions[1] = Point3::new(0.0, 0.2, 0.0);
        context.load_configuration(&state);

        // lambda = 0 everywhere: only the permanent well contributes.
        let expected = 0.5 * 100.0 * (0.1f64.powi(2) + 0.2f64.powi(2));
        assert!((context.potential_energy().unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn switching_parameters_changes_the_potential_without_moving_particles() {
        let model = AlchemicalHarmonicModel::two_state_example(1, Some(1));
        let mut context = model.create_context(&IntegratorParams::new(1.0, 1.0, "V R O R V"));
        context.load_configuration(&model.reference_configuration());

        let decoupled = context.potential_energy().unwrap();
        context.apply_parameters(&coupled_parameters());
        let coupled = context.potential_energy().unwrap();

        assert!(coupled > decoupled);
        // The configuration itself is untouched by the switch.
        assert_eq!(
            context.extract_configuration().unwrap(),
            model.reference_configuration()
        );
    }

    #[test]
    fn dynamics_keeps_particles_near_the_well_at_low_temperature() {
        let model = AlchemicalHarmonicModel::two_state_example(4, Some(7));
        let mut context = model.create_context(&IntegratorParams::new(1.0, 5.0, "V R O R V"));
        context.load_configuration(&model.reference_configuration());
        context.resample_velocities(10.0);
        context.advance(500).unwrap();

        let state = context.extract_configuration().unwrap();
        for position in &state.positions {
            assert!(
                position.coords.norm() < 1.0,
                "particle drifted to {position:?}"
            );
        }
    }

    #[test]
    fn minimize_moves_particles_to_the_weighted_centroid() {
        let model = AlchemicalHarmonicModel::two_state_example(1, Some(3));
        let mut context = model.create_context(&IntegratorParams::new(1.0, 1.0, "V R O R V"));
        let mut state = model.reference_configuration();
        state.positions[0] = Point3::new(2.0, -1.0, 0.5);
        context.load_configuration(&state);
        context.apply_parameters(&coupled_parameters());
        context.minimize(50).unwrap();

        // Weighted centroid of all wells at full coupling.
        let wells = model.wells();
        let total: f64 = wells.iter().map(|w| w.spring_constant).sum();
        let mut expected = Vector3::zeros();
        for well in wells {
            expected += well.spring_constant * well.center.coords;
        }
        expected /= total;

        let minimized = context.extract_configuration().unwrap().positions[0];
        assert!((minimized.coords - expected).norm() < 1e-6);
    }

    #[test]
    fn seeded_contexts_reproduce_their_trajectories() {
        let run = || {
            let model = AlchemicalHarmonicModel::two_state_example(2, Some(99));
            let mut context = model.create_context(&IntegratorParams::new(1.0, 2.0, "V R O R V"));
            context.load_configuration(&model.reference_configuration());
            context.resample_velocities(300.0);
            context.advance(50).unwrap();
            context.extract_configuration().unwrap()
        };
        assert_eq!(run(), run());
    }
}
