//! Stateless foundations: data models, the alchemical interpolation schedule,
//! statistical routines, and trajectory I/O.

pub mod io;
pub mod models;
pub mod schedule;
pub mod stats;
