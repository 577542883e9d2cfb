use crate::core::io::{ChunkBuffer, Frame, FrameStore};
use crate::core::schedule::LambdaSchedule;
use crate::engine::error::EngineError;
use crate::engine::tasks::{
    AnnealingResult, AnnealingTask, FailureContext, TaskFailure, TaskOutcome,
};
use crate::physics::{ContextPool, ExecutionContext, IntegratorParams, ThermodynamicState};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Lifecycle of an annealing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Ready,
    Annealing,
}

struct WorkerInner {
    thermodynamic_state: ThermodynamicState,
    schedule: LambdaSchedule,
    pool: ContextPool,
    context: Box<dyn ExecutionContext>,
    save_interval: Option<usize>,
    atom_subset: Option<Vec<usize>>,
    store: Option<Arc<dyn FrameStore>>,
    buffer: ChunkBuffer,
}

/// A long-lived stateful worker that runs nonequilibrium switching
/// trajectories.
///
/// The worker owns its execution context for its whole lifetime: the context
/// is created at [`AnnealingWorker::initialize`], reused across every
/// [`AnnealingWorker::anneal`] call, and released at
/// [`AnnealingWorker::teardown`]. It is never shared; when workers are placed
/// on an actor pool each actor gets its own instance.
pub struct AnnealingWorker {
    state: WorkerState,
    inner: Option<WorkerInner>,
}

impl Default for AnnealingWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnealingWorker {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Uninitialized,
            inner: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Binds the worker to a thermodynamic-state template, schedule, and
    /// integrator, and acquires its persistent execution context.
    pub fn initialize(
        &mut self,
        thermodynamic_state: ThermodynamicState,
        schedule: LambdaSchedule,
        integrator: IntegratorParams,
        save_interval: Option<usize>,
        atom_subset: Option<Vec<usize>>,
        store: Option<Arc<dyn FrameStore>>,
    ) -> Result<(), EngineError> {
        let pool = ContextPool::new(thermodynamic_state.model().clone(), integrator);
        let context = pool.acquire();
        info!(
            num_particles = thermodynamic_state.model().num_particles(),
            save_interval, "annealing worker initialized"
        );
        self.inner = Some(WorkerInner {
            thermodynamic_state,
            schedule,
            pool,
            context,
            save_interval,
            atom_subset,
            store,
            buffer: ChunkBuffer::new(),
        });
        self.state = WorkerState::Ready;
        Ok(())
    }

    /// Releases the execution context and returns to `Uninitialized`.
    pub fn teardown(&mut self) {
        self.inner = None;
        self.state = WorkerState::Uninitialized;
    }

    /// Runs one full switching trajectory across `task.lambdas`, accumulating
    /// the incremental work of every parameter switch.
    ///
    /// The work convention: each increment is the reduced-potential jump
    /// caused by switching the parameters with the configuration held fixed,
    /// measured *before* the relaxation move at the new parameters. The
    /// priming move at the first schedule value is not charged.
    ///
    /// Failures inside the per-step loop are captured and returned as a
    /// [`TaskFailure`]; the worker stays usable for the next task.
    #[instrument(skip_all, name = "anneal", fields(particle = task.particle, direction = %task.direction))]
    pub fn anneal(&mut self, task: AnnealingTask) -> TaskOutcome<AnnealingResult> {
        if self.state != WorkerState::Ready {
            return Err(TaskFailure::new(
                format!("worker is {:?}, expected Ready", self.state),
                FailureContext::Worker,
            ));
        }
        self.state = WorkerState::Annealing;
        let inner = self.inner.as_mut().expect("Ready worker has inner state");
        let outcome = Self::run_protocol(inner, &task);
        if outcome.is_err() {
            // A failed protocol can leave non-finite state in the context;
            // the next task starts from a fresh one.
            inner.context = inner.pool.acquire();
        }
        self.state = WorkerState::Ready;
        outcome
    }

    fn run_protocol(inner: &mut WorkerInner, task: &AnnealingTask) -> TaskOutcome<AnnealingResult> {
        let failure = |reason: String, step: usize| {
            TaskFailure::new(
                reason,
                FailureContext::Annealing {
                    particle: task.particle,
                    direction: task.direction,
                    step,
                },
            )
        };

        if task.trajectory_path.is_some() && inner.save_interval.is_none() {
            return Err(failure(
                "a trajectory filename was given but no save interval is configured".to_string(),
                0,
            ));
        }
        if task.trajectory_path.is_some() && inner.store.is_none() {
            return Err(failure(
                "a trajectory filename was given but the worker has no frame store".to_string(),
                0,
            ));
        }
        if task.lambdas.len() < 2 {
            return Err(failure(
                format!("schedule has {} values; need at least 2", task.lambdas.len()),
                0,
            ));
        }

        let beta = inner.thermodynamic_state.beta();
        let temperature = inner.thermodynamic_state.temperature();

        // Prime the trajectory at the first schedule value: set parameters,
        // load the start configuration, thermalize velocities, and take one
        // uncharged move.
        inner
            .thermodynamic_state
            .set_alchemical_parameters(task.lambdas[0], &inner.schedule);
        inner
            .context
            .apply_parameters(inner.thermodynamic_state.parameters());
        inner.context.load_configuration(&task.sampler_state);
        inner.context.resample_velocities(temperature);
        if let Err(e) = inner.context.advance(task.steps_per_move) {
            inner.buffer.clear();
            return Err(failure(e.to_string(), 0));
        }

        let mut incremental_work = vec![0.0; task.lambdas.len() - 1];
        let mut timing = task
            .timing
            .then(|| Vec::with_capacity(task.lambdas.len() - 1));

        for (index, &lambda) in task.lambdas.iter().enumerate().skip(1) {
            let step_start = Instant::now();
            match Self::switching_step(inner, lambda, beta, task.steps_per_move) {
                Ok(work) => incremental_work[index - 1] = work,
                Err(reason) => {
                    // Drop whatever was buffered for this protocol; the
                    // orchestrator decides what happens to the particle.
                    inner.buffer.clear();
                    warn!(
                        particle = task.particle,
                        direction = %task.direction,
                        step = index,
                        %reason,
                        "annealing step failed"
                    );
                    return Err(failure(reason, index));
                }
            }

            if let Some(interval) = inner.save_interval {
                if task.trajectory_path.is_some() && index % interval == 0 {
                    if let Err(reason) = Self::buffer_frame(inner) {
                        inner.buffer.clear();
                        return Err(failure(reason, index));
                    }
                }
            }
            if let Some(timing) = &mut timing {
                timing.push(step_start.elapsed());
            }
        }

        // Termination: flush the buffered trajectory in a single write, then
        // optionally extract the final configuration.
        let last_step = task.lambdas.len() - 1;
        if let Some(path) = &task.trajectory_path {
            let store = inner.store.clone().expect("store presence checked above");
            let written = inner
                .buffer
                .flush_to(store.as_ref(), path)
                .map_err(|e| failure(e.to_string(), last_step))?;
            if written > 0 {
                debug!(frames = written, path = %path.display(), "wrote switching trajectory");
            }
        } else {
            inner.buffer.clear();
        }

        let final_state = if task.return_final_state {
            Some(
                inner
                    .context
                    .extract_configuration()
                    .map_err(|e| failure(e.to_string(), last_step))?,
            )
        } else {
            None
        };

        Ok(AnnealingResult {
            incremental_work,
            final_state,
            timing,
        })
    }

    /// One schedule step: switch parameters with the configuration fixed,
    /// measure the reduced-potential jump, then relax at the new parameters.
    fn switching_step(
        inner: &mut WorkerInner,
        lambda: f64,
        beta: f64,
        steps_per_move: u32,
    ) -> Result<f64, String> {
        let old_reduced = beta
            * inner
                .context
                .potential_energy()
                .map_err(|e| e.to_string())?;

        inner
            .thermodynamic_state
            .set_alchemical_parameters(lambda, &inner.schedule);
        inner
            .context
            .apply_parameters(inner.thermodynamic_state.parameters());
        let new_reduced = beta
            * inner
                .context
                .potential_energy()
                .map_err(|e| e.to_string())?;

        inner
            .context
            .advance(steps_per_move)
            .map_err(|e| e.to_string())?;

        Ok(new_reduced - old_reduced)
    }

    fn buffer_frame(inner: &mut WorkerInner) -> Result<(), String> {
        let state = inner
            .context
            .extract_configuration()
            .map_err(|e| e.to_string())?;
        let frame = match &inner.atom_subset {
            Some(indices) => Frame::from_sampler_state(&state.subset(indices)),
            None => Frame::from_sampler_state(&state),
        };
        inner.buffer.push(frame);
        Ok(())
    }
}
