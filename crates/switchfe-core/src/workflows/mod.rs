//! # Workflows Module
//!
//! The user-facing orchestration layer. [`switching::SwitchingSampler`] ties
//! the engine together into complete free-energy protocols: end-state
//! minimization, equilibrium sampling with decorrelation, annealed importance
//! sampling over a worker pool, and free-energy estimation.

pub mod switching;

pub use switching::{DirectionalEstimate, FreeEnergySummary, SwitchingSampler};
