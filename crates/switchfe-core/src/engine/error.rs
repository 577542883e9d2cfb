use crate::core::io::StoreError;
use crate::core::schedule::ScheduleError;
use crate::core::stats::StatsError;
use crate::engine::config::ConfigError;
use crate::engine::tasks::TaskFailure;
use crate::physics::PhysicsError;
use thiserror::Error;

/// Fatal data/programming errors that must stop the run rather than degrade
/// silently.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("end-state {value} is outside the valid set {{0, 1}}")]
    EndstateOutOfRange { value: usize },

    #[error(
        "decorrelated snapshot index {index} resolves to {matches} trajectory files; expected exactly one"
    )]
    AmbiguousSnapshot { index: usize, matches: usize },

    #[error(
        "end-state {endstate} has {snapshots} stored snapshots but {samples} recorded reduced potentials"
    )]
    SnapshotCountMismatch {
        endstate: usize,
        snapshots: usize,
        samples: usize,
    },

    #[error("no decorrelated samples available for end-state {endstate}; run equilibrate with decorrelation first")]
    NoDecorrelatedSamples { endstate: usize },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("equilibration task failed: {0}")]
    Equilibration(TaskFailure),

    #[error("annealing batch aborted: {failures} of {total} particles failed (first failure: {first})")]
    BatchAborted {
        failures: usize,
        total: usize,
        first: TaskFailure,
    },

    #[error("storage error: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("physics engine error: {source}")]
    Physics {
        #[from]
        source: PhysicsError,
    },

    #[error("statistics error: {source}")]
    Stats {
        #[from]
        source: StatsError,
    },

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(String),
}
