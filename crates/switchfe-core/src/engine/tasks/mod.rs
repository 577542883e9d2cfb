//! Task and result records exchanged between the orchestrator and the
//! executor, and the task implementations themselves.
//!
//! A task is a self-contained unit of work: everything it needs travels with
//! it (its own thermodynamic-state copy, its starting snapshot, its file
//! counter), so tasks in one batch share nothing mutable. Failures inside a
//! task are captured into an explicit [`TaskFailure`] marker instead of
//! crossing the executor boundary as a panic; the orchestrator decides what
//! to do with them.

pub mod decorrelate;
pub mod equilibrium;

use crate::core::io::FrameStore;
use crate::core::models::SamplerState;
use crate::engine::ledger::Direction;
use crate::physics::{IntegratorParams, ThermodynamicState};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where a task failure happened, with enough detail to reproduce it.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureContext {
    Equilibrium { endstate: usize, iteration: usize },
    Annealing {
        particle: usize,
        direction: Direction,
        step: usize,
    },
    Worker,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureContext::Equilibrium { endstate, iteration } => {
                write!(f, "equilibrium end-state {endstate}, iteration {iteration}")
            }
            FailureContext::Annealing {
                particle,
                direction,
                step,
            } => write!(
                f,
                "annealing particle {particle}, direction {direction}, schedule step {step}"
            ),
            FailureContext::Worker => write!(f, "worker"),
        }
    }
}

/// Explicit failure marker returned in place of a result, distinguishable
/// from a success in any gathered batch.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{context}: {reason}")]
pub struct TaskFailure {
    pub reason: String,
    pub context: FailureContext,
}

impl TaskFailure {
    pub fn new(reason: impl Into<String>, context: FailureContext) -> Self {
        Self {
            reason: reason.into(),
            context,
        }
    }
}

/// Tagged outcome of one task: the payload or a failure marker.
pub type TaskOutcome<T> = Result<T, TaskFailure>;

/// Trajectory sink for one equilibrium task.
#[derive(Clone)]
pub struct EquilibriumSink {
    pub store: Arc<dyn FrameStore>,
    /// Base path; chunk files append a four-digit counter and extension.
    pub filename_stem: PathBuf,
    /// First chunk number this call may use; numbering continues across
    /// calls through [`EquilibriumResult::next_file_counter`].
    pub file_counter: usize,
    pub atom_subset: Option<Vec<usize>>,
    pub max_chunk_bytes: usize,
}

/// One equilibrium sampling task at a fixed end-state.
#[derive(Clone)]
pub struct EquilibriumTask {
    pub endstate: usize,
    pub thermodynamic_state: ThermodynamicState,
    pub sampler_state: SamplerState,
    pub integrator: IntegratorParams,
    pub iterations: usize,
    pub steps_per_iteration: u32,
    pub minimize_first: bool,
    pub sink: Option<EquilibriumSink>,
    pub timing: bool,
}

/// Result of one equilibrium sampling task.
#[derive(Debug, Clone)]
pub struct EquilibriumResult {
    pub endstate: usize,
    pub sampler_state: SamplerState,
    /// Chunk files written by this call, with their snapshot counts.
    pub files: Vec<(PathBuf, usize)>,
    /// Reduced potential after each iteration's move.
    pub reduced_potentials: Vec<f64>,
    /// First chunk number available to the next call at this end-state.
    pub next_file_counter: usize,
    pub timing: Option<EquilibriumTiming>,
}

#[derive(Debug, Clone, Default)]
pub struct EquilibriumTiming {
    pub per_iteration: Vec<Duration>,
    pub write: Duration,
}

/// One annealing job handed to a worker actor.
#[derive(Clone)]
pub struct AnnealingTask {
    pub particle: usize,
    pub direction: Direction,
    pub sampler_state: SamplerState,
    /// Master-lambda values, one per schedule step.
    pub lambdas: Vec<f64>,
    pub trajectory_path: Option<PathBuf>,
    pub steps_per_move: u32,
    pub return_final_state: bool,
    pub timing: bool,
}

/// Result of one annealing job.
#[derive(Debug, Clone)]
pub struct AnnealingResult {
    /// Incremental work per parameter switch; length is schedule length - 1.
    pub incremental_work: Vec<f64>,
    pub final_state: Option<SamplerState>,
    pub timing: Option<Vec<Duration>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_the_annealing_context() {
        let failure = TaskFailure::new(
            "potential energy evaluated to a non-finite value",
            FailureContext::Annealing {
                particle: 3,
                direction: Direction::Reverse,
                step: 17,
            },
        );
        let text = failure.to_string();
        assert!(text.contains("particle 3"));
        assert!(text.contains("reverse"));
        assert!(text.contains("step 17"));
    }

    #[test]
    fn failure_display_names_the_equilibrium_context() {
        let failure = TaskFailure::new(
            "boom",
            FailureContext::Equilibrium {
                endstate: 1,
                iteration: 4,
            },
        );
        assert_eq!(failure.to_string(), "equilibrium end-state 1, iteration 4: boom");
    }
}
