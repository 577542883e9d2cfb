//! # Alchemical Interpolation Schedule
//!
//! Maps a scalar progress variable in `[0, 1]` to per-energy-term
//! interpolation values. Every term's function must start at 0, end at 1, and
//! be non-decreasing; violations are construction-time errors, so a schedule
//! that exists is a schedule that is safe to anneal along.

mod functions;
mod protocol;

pub use functions::LambdaFn;
pub use protocol::{
    AlchemicalParameters, AlchemicalTerm, LambdaFunctions, LambdaSchedule, ScheduleError,
    ScheduleOverrides, SchedulePreset, VALIDATION_GRID_POINTS,
};
