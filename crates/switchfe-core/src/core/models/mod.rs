//! Shared data models: configuration snapshots and physical constants.

mod state;

pub use state::{BOLTZMANN_KJ_PER_MOL_K, BoxGeometry, SamplerState};
