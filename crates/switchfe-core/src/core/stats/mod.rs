//! Statistical routines consumed by the orchestration layer: equilibration
//! detection and decorrelation of time series, and the free-energy estimators
//! applied to collected work values.
//!
//! The rest of the crate treats these as black boxes; they take plain slices
//! and return plain numbers, with no knowledge of schedules or workers.

mod estimators;
mod timeseries;

pub use estimators::{Estimate, StatsError, bar_estimate, exp_estimate};
pub use timeseries::{
    EquilibrationAnalysis, detect_equilibration, statistical_inefficiency, subsample_independent,
};
