use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Boltzmann constant in kJ/(mol·K); potential energies throughout the crate
/// are in kJ/mol, so `1.0 / (BOLTZMANN_KJ_PER_MOL_K * temperature)` converts
/// them to dimensionless reduced potentials.
pub const BOLTZMANN_KJ_PER_MOL_K: f64 = 0.008_314_462_618;

/// Periodic box described by edge lengths (nm) and angles (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxGeometry {
    pub lengths: [f64; 3],
    pub angles: [f64; 3],
}

impl BoxGeometry {
    pub fn new(lengths: [f64; 3], angles: [f64; 3]) -> Self {
        Self { lengths, angles }
    }

    /// Orthorhombic box with equal edges.
    pub fn cubic(edge: f64) -> Self {
        Self {
            lengths: [edge; 3],
            angles: [90.0; 3],
        }
    }
}

/// Positions and box geometry for one configuration.
///
/// Produced by equilibration or annealing and consumed as the starting point
/// of the next task; ownership transfers from producer to consumer, so two
/// tasks never mutate the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    pub positions: Vec<Point3<f64>>,
    pub box_geometry: BoxGeometry,
}

impl SamplerState {
    pub fn new(positions: Vec<Point3<f64>>, box_geometry: BoxGeometry) -> Self {
        Self {
            positions,
            box_geometry,
        }
    }

    pub fn num_particles(&self) -> usize {
        self.positions.len()
    }

    /// Restricts the snapshot to the given particle indices, in the order
    /// given. Indices outside the snapshot are skipped.
    pub fn subset(&self, indices: &[usize]) -> SamplerState {
        let positions = indices
            .iter()
            .filter_map(|&i| self.positions.get(i).copied())
            .collect();
        SamplerState {
            positions,
            box_geometry: self.box_geometry,
        }
    }
}
