use crate::engine::ledger::Direction;

/// Progress events emitted by the orchestration layer.
#[derive(Debug, Clone)]
pub enum Progress {
    EquilibrationStart { endstate: usize, iterations: usize },
    EquilibrationFinish { endstate: usize },

    AnnealingBatchStart { direction: Direction, particles: usize },
    ParticleFinished { direction: Direction, particle: usize },
    AnnealingBatchFinish { direction: Direction },

    Message(String),
}

pub type ProgressCallback = Box<dyn Fn(Progress) + Send + Sync>;

/// Callback-based progress sink. A reporter without a callback is inert, so
/// library code can report unconditionally.
#[derive(Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}
