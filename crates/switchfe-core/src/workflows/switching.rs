use crate::core::io::FrameStore;
use crate::core::models::SamplerState;
use crate::core::schedule::LambdaSchedule;
use crate::core::stats::{Estimate, bar_estimate, exp_estimate};
use crate::engine::annealing::AnnealingWorker;
use crate::engine::config::{ConfigError, FailurePolicy, SwitchingConfig};
use crate::engine::error::{ConsistencyError, EngineError};
use crate::engine::executor::{ActorHandle, Executor, TaskHandle};
use crate::engine::ledger::{Direction, WorkLedger};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tasks::decorrelate::EquilibriumPool;
use crate::engine::tasks::equilibrium::run_equilibrium;
use crate::engine::tasks::{
    AnnealingResult, AnnealingTask, EquilibriumResult, EquilibriumSink, EquilibriumTask,
    TaskOutcome,
};
use crate::physics::{PhysicsModel, ThermodynamicState};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

const MINIMIZE_DEFAULT_ITERATIONS: usize = 100;

/// One direction's free-energy estimate, tagged with how many particles
/// contributed and how many were lost to task failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalEstimate {
    pub estimate: Estimate,
    pub successes: usize,
    pub failures: usize,
}

/// Free-energy estimates derived from the collected work values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreeEnergySummary {
    pub forward: Option<DirectionalEstimate>,
    pub reverse: Option<DirectionalEstimate>,
    /// Lower-variance two-sided estimate, available when both directions
    /// have data.
    pub bidirectional: Option<Estimate>,
}

#[derive(Debug, Clone, Copy, Default)]
struct DirectionCounts {
    attempts: usize,
    failures: usize,
}

/// Top-level engine for a nonequilibrium switching free-energy calculation.
///
/// Owns the thermodynamic state, the per-end-state sampler states and
/// equilibrium pools, and the work ledger. All parallel dispatch goes through
/// the executor strategy; the sampler never branches on which backend is
/// active. The orchestrator's own state is mutated only between dispatch
/// phases; every task gets private copies of what it needs.
pub struct SwitchingSampler<X: Executor> {
    schedule: LambdaSchedule,
    config: SwitchingConfig,
    thermodynamic_state: ThermodynamicState,
    sampler_states: [SamplerState; 2],
    pools: [EquilibriumPool; 2],
    store: Arc<dyn FrameStore>,
    ledger: WorkLedger,
    executor: X,
    reporter: ProgressReporter,
    forward_counts: DirectionCounts,
    reverse_counts: DirectionCounts,
    file_counters: [usize; 2],
    total_jobs: usize,
    rng: StdRng,
}

impl<X: Executor> SwitchingSampler<X> {
    pub fn new(
        model: Arc<dyn PhysicsModel>,
        schedule: LambdaSchedule,
        config: SwitchingConfig,
        executor: X,
        store: Arc<dyn FrameStore>,
    ) -> Self {
        let thermodynamic_state = ThermodynamicState::new(model.clone(), config.temperature);
        let reference = model.reference_configuration();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            schedule,
            config,
            thermodynamic_state,
            sampler_states: [reference.clone(), reference],
            pools: [EquilibriumPool::new(0), EquilibriumPool::new(1)],
            store,
            ledger: WorkLedger::new(),
            executor,
            reporter: ProgressReporter::new(),
            forward_counts: DirectionCounts::default(),
            reverse_counts: DirectionCounts::default(),
            file_counters: [0, 0],
            total_jobs: 0,
            rng,
        }
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn schedule(&self) -> &LambdaSchedule {
        &self.schedule
    }

    pub fn config(&self) -> &SwitchingConfig {
        &self.config
    }

    pub fn work_ledger(&self) -> &WorkLedger {
        &self.ledger
    }

    pub fn sampler_state(&self, endstate: usize) -> Result<&SamplerState, EngineError> {
        check_endstate(endstate)?;
        Ok(&self.sampler_states[endstate])
    }

    pub fn equilibrium_pool(&self, endstate: usize) -> Result<&EquilibriumPool, EngineError> {
        check_endstate(endstate)?;
        Ok(&self.pools[endstate])
    }

    /// Applies local energy minimization to both end-state configurations.
    /// An update-in-place on the sampler states, not a sampling step.
    #[instrument(skip_all, name = "minimize_endstates")]
    pub fn minimize_endstates(&mut self) -> Result<(), EngineError> {
        for endstate in [0usize, 1] {
            let mut state = self.thermodynamic_state.clone();
            state.set_alchemical_parameters(endstate as f64, &self.schedule);
            let mut context = state.model().create_context(&self.config.eq_integrator());
            context.apply_parameters(state.parameters());
            context.load_configuration(&self.sampler_states[endstate]);
            context.minimize(MINIMIZE_DEFAULT_ITERATIONS)?;
            self.sampler_states[endstate] = context.extract_configuration()?;
            info!(endstate, "minimized end-state configuration");
        }
        Ok(())
    }

    /// Runs equilibrium sampling at the requested end-states, merging the
    /// results into the per-end-state pools (appending, never replacing), and
    /// optionally decorrelates the accumulated reduced-potential history.
    ///
    /// End-states outside `{0, 1}` fail with a [`ConsistencyError`] before
    /// any task is dispatched. Tasks for distinct end-states run concurrently
    /// under a pooled executor.
    #[instrument(skip_all, name = "equilibrate", fields(iterations, steps_per_iteration))]
    pub fn equilibrate(
        &mut self,
        endstates: &[usize],
        iterations: usize,
        steps_per_iteration: u32,
        decorrelate: bool,
    ) -> Result<(), EngineError> {
        for &endstate in endstates {
            check_endstate(endstate)?;
        }

        let mut tasks = Vec::with_capacity(endstates.len());
        for &endstate in endstates {
            let mut thermodynamic_state = self.thermodynamic_state.clone();
            thermodynamic_state.set_alchemical_parameters(endstate as f64, &self.schedule);
            let sink = self.config.trajectory.as_ref().map(|trajectory| EquilibriumSink {
                store: self.store.clone(),
                filename_stem: trajectory
                    .directory
                    .join(format!("{}.eq.lambda_{endstate}", trajectory.prefix)),
                file_counter: self.file_counters[endstate],
                atom_subset: trajectory.atom_subset.clone(),
                max_chunk_bytes: trajectory.max_chunk_bytes,
            });
            self.reporter.report(Progress::EquilibrationStart {
                endstate,
                iterations,
            });
            tasks.push(EquilibriumTask {
                endstate,
                thermodynamic_state,
                sampler_state: self.sampler_states[endstate].clone(),
                integrator: self.config.eq_integrator(),
                iterations,
                steps_per_iteration,
                minimize_first: false,
                sink,
                timing: false,
            });
        }

        let handles = self.executor.deploy(run_equilibrium, tasks.clone());
        let outcomes = self.executor.gather(handles);

        for (task, outcome) in tasks.into_iter().zip(outcomes) {
            match outcome {
                Ok(result) => self.merge_equilibrium(result),
                Err(failure) => match self.config.failure_policy {
                    FailurePolicy::Abort => {
                        return Err(EngineError::Equilibration(failure));
                    }
                    FailurePolicy::RetryOnce => {
                        warn!(%failure, "equilibration task failed; retrying once");
                        let endstate = task.endstate;
                        let retry = self.executor.deploy(run_equilibrium, vec![task]);
                        match self.executor.gather(retry).pop().unwrap() {
                            Ok(result) => self.merge_equilibrium(result),
                            Err(failure) => {
                                error!(%failure, endstate, "equilibration retry failed; end-state keeps its previous history");
                            }
                        }
                    }
                    FailurePolicy::Discard => {
                        error!(%failure, endstate = task.endstate, "equilibration task failed; end-state keeps its previous history");
                    }
                },
            }
        }

        if decorrelate {
            for &endstate in endstates {
                self.pools[endstate].decorrelate()?;
            }
        }
        Ok(())
    }

    fn merge_equilibrium(&mut self, result: EquilibriumResult) {
        let endstate = result.endstate;
        self.pools[endstate].absorb(&result);
        self.file_counters[endstate] = self.file_counters[endstate].max(result.next_file_counter);
        self.sampler_states[endstate] = result.sampler_state;
        self.reporter
            .report(Progress::EquilibrationFinish { endstate });
        info!(
            endstate,
            samples = self.pools[endstate].reduced_potentials().len(),
            files = self.pools[endstate].files().len(),
            "merged equilibration results"
        );
    }

    /// Runs annealed importance sampling: for each direction, a linearly
    /// spaced schedule of `schedule_length` lambda values is annealed by
    /// `particles` independent particles, partitioned near-evenly across the
    /// actor pool (remainder on the last actor). Forward particles start from
    /// decorrelated end-state 0 snapshots, reverse particles from end-state 1.
    ///
    /// Collected incremental work goes into the ledger in submission order,
    /// so work row `i` always corresponds to particle `i` of its batch.
    #[instrument(skip_all, name = "annealed_importance_sampling", fields(particles, schedule_length))]
    pub fn run_annealed_importance_sampling(
        &mut self,
        particles: usize,
        schedule_length: usize,
        directions: &[Direction],
        steps_per_move: u32,
    ) -> Result<(), EngineError> {
        if schedule_length < 2 {
            return Err(ConfigError::ScheduleTooShort(schedule_length).into());
        }
        if let Some(trajectory) = &self.config.trajectory {
            if let Some(interval) = trajectory.save_interval {
                if schedule_length % interval != 0 {
                    return Err(ConfigError::SaveIntervalMismatch {
                        interval,
                        length: schedule_length,
                    }
                    .into());
                }
            }
        }
        if particles == 0 {
            return Ok(());
        }

        for &direction in directions {
            self.run_direction(particles, schedule_length, direction, steps_per_move)?;
        }
        Ok(())
    }

    fn run_direction(
        &mut self,
        particles: usize,
        schedule_length: usize,
        direction: Direction,
        steps_per_move: u32,
    ) -> Result<(), EngineError> {
        let (from, to) = direction.endpoints();
        let protocol = linspace(from, to, schedule_length);
        self.reporter.report(Progress::AnnealingBatchStart {
            direction,
            particles,
        });

        // Near-even split across the pool; the remainder lands on the last
        // actor.
        let num_actors = self.config.workers.min(particles).max(1);
        let mut particles_per_actor = vec![particles / num_actors; num_actors];
        *particles_per_actor.last_mut().unwrap() += particles % num_actors;

        let actors = self.launch_annealing_actors(num_actors)?;

        let mut tasks: Vec<AnnealingTask> = Vec::with_capacity(particles);
        let mut actor_of: Vec<usize> = Vec::with_capacity(particles);
        let mut handles: Vec<TaskHandle<TaskOutcome<AnnealingResult>>> =
            Vec::with_capacity(particles);

        let mut particle = 0;
        for (actor_index, &count) in particles_per_actor.iter().enumerate() {
            for _ in 0..count {
                let start = self.pools[direction.start_endstate()]
                    .draw_snapshot(self.store.as_ref(), &mut self.rng)?;
                let task = AnnealingTask {
                    particle,
                    direction,
                    sampler_state: start,
                    lambdas: protocol.clone(),
                    trajectory_path: self.next_switching_path(direction),
                    steps_per_move,
                    return_final_state: false,
                    timing: false,
                };
                let dispatched = task.clone();
                handles.push(actors[actor_index].call(move |worker| worker.anneal(dispatched)));
                tasks.push(task);
                actor_of.push(actor_index);
                particle += 1;
            }
        }

        let outcomes = self.executor.gather(handles);
        let total = outcomes.len();
        let mut collected: Vec<Vec<f64>> = Vec::with_capacity(total);
        let mut failures = 0;
        let mut first_failure = None;

        for (index, outcome) in outcomes.into_iter().enumerate() {
            let outcome = match outcome {
                Err(failure) if self.config.failure_policy == FailurePolicy::RetryOnce => {
                    warn!(%failure, particle = index, "annealing task failed; retrying once");
                    let retry = tasks[index].clone();
                    actors[actor_of[index]]
                        .call(move |worker| worker.anneal(retry))
                        .wait()
                }
                other => other,
            };
            match outcome {
                Ok(result) => {
                    self.reporter.report(Progress::ParticleFinished {
                        direction,
                        particle: index,
                    });
                    collected.push(result.incremental_work);
                }
                Err(failure) => {
                    failures += 1;
                    error!(%failure, "annealing particle dropped");
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        if self.config.failure_policy == FailurePolicy::Abort {
            if let Some(first) = first_failure {
                return Err(EngineError::BatchAborted {
                    failures,
                    total,
                    first,
                });
            }
        }

        for incremental in collected {
            self.ledger.record(direction, incremental);
        }
        let counts = self.counts_mut(direction);
        counts.attempts += total;
        counts.failures += failures;

        self.reporter
            .report(Progress::AnnealingBatchFinish { direction });
        info!(
            %direction,
            particles = total,
            failures,
            "annealing batch complete"
        );
        Ok(())
    }

    fn launch_annealing_actors(
        &mut self,
        num_actors: usize,
    ) -> Result<Vec<ActorHandle<AnnealingWorker>>, EngineError> {
        let mut actors = Vec::with_capacity(num_actors);
        let mut initializations = Vec::with_capacity(num_actors);
        for _ in 0..num_actors {
            let actor = self.executor.launch_actor(AnnealingWorker::new);

            let thermodynamic_state = self.thermodynamic_state.clone();
            let schedule = self.schedule.clone();
            let integrator = self.config.neq_integrator();
            let (save_interval, atom_subset) = match &self.config.trajectory {
                Some(trajectory) => (trajectory.save_interval, trajectory.atom_subset.clone()),
                None => (None, None),
            };
            let store = save_interval.is_some().then(|| self.store.clone());

            initializations.push(actor.call(move |worker| {
                worker.initialize(
                    thermodynamic_state,
                    schedule,
                    integrator,
                    save_interval,
                    atom_subset,
                    store,
                )
            }));
            actors.push(actor);
        }
        for initialization in initializations {
            initialization.wait()?;
        }
        Ok(actors)
    }

    /// Filename for the next nonequilibrium trajectory, numbered by a global
    /// job counter, or `None` when switching trajectories are not saved.
    fn next_switching_path(&mut self, direction: Direction) -> Option<PathBuf> {
        let trajectory = self.config.trajectory.as_ref()?;
        trajectory.save_interval?;
        let path = trajectory.directory.join(format!(
            "{}.neq.lambda_{direction}.iteration_{:04}.csv",
            trajectory.prefix, self.total_jobs
        ));
        self.total_jobs += 1;
        Some(path)
    }

    /// Derives free-energy estimates from the work ledger: a one-sided
    /// exponential average per direction with data, and the two-sided
    /// estimate when both directions have data.
    pub fn compute_free_energy(&self) -> Result<FreeEnergySummary, EngineError> {
        let mut summary = FreeEnergySummary::default();

        for direction in [Direction::Forward, Direction::Reverse] {
            if self.ledger.is_empty(direction) {
                continue;
            }
            let final_works = self.ledger.final_works(direction);
            let estimate = exp_estimate(&final_works)?;
            let counts = self.counts(direction);
            info!(
                %direction,
                value = estimate.value,
                uncertainty = estimate.uncertainty,
                successes = counts.attempts - counts.failures,
                failures = counts.failures,
                "one-sided free-energy estimate"
            );
            let directional = DirectionalEstimate {
                estimate,
                successes: counts.attempts - counts.failures,
                failures: counts.failures,
            };
            match direction {
                Direction::Forward => summary.forward = Some(directional),
                Direction::Reverse => summary.reverse = Some(directional),
            }
        }

        if !self.ledger.is_empty(Direction::Forward) && !self.ledger.is_empty(Direction::Reverse) {
            let estimate = bar_estimate(
                &self.ledger.final_works(Direction::Forward),
                &self.ledger.final_works(Direction::Reverse),
            )?;
            info!(
                value = estimate.value,
                uncertainty = estimate.uncertainty,
                "two-sided free-energy estimate"
            );
            summary.bidirectional = Some(estimate);
        }

        Ok(summary)
    }

    fn counts(&self, direction: Direction) -> DirectionCounts {
        match direction {
            Direction::Forward => self.forward_counts,
            Direction::Reverse => self.reverse_counts,
        }
    }

    fn counts_mut(&mut self, direction: Direction) -> &mut DirectionCounts {
        match direction {
            Direction::Forward => &mut self.forward_counts,
            Direction::Reverse => &mut self.reverse_counts,
        }
    }
}

fn check_endstate(endstate: usize) -> Result<(), ConsistencyError> {
    if endstate > 1 {
        return Err(ConsistencyError::EndstateOutOfRange { value: endstate });
    }
    Ok(())
}

fn linspace(from: f64, to: f64, len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| from + (to - from) * i as f64 / (len - 1) as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::CsvFrameStore;
    use crate::core::models::SamplerState;
    use crate::core::schedule::{AlchemicalParameters, SchedulePreset};
    use crate::engine::config::TrajectoryConfig;
    use crate::engine::executor::{InlineExecutor, PooledExecutor};
    use crate::physics::{
        AlchemicalHarmonicModel, ExecutionContext, IntegratorParams, PhysicsError,
    };
    use tempfile::{TempDir, tempdir};

    fn test_config(dir: &TempDir, workers: usize) -> SwitchingConfig {
        SwitchingConfig::builder()
            .temperature(300.0)
            .workers(workers)
            .seed(1234)
            .trajectory(TrajectoryConfig {
                directory: dir.path().to_path_buf(),
                prefix: "test".into(),
                atom_subset: None,
                max_chunk_bytes: 4096,
                save_interval: None,
            })
            .build()
            .unwrap()
    }

    fn sampler<X: Executor>(
        dir: &TempDir,
        workers: usize,
        executor: X,
    ) -> SwitchingSampler<X> {
        let model = Arc::new(AlchemicalHarmonicModel::two_state_example(2, Some(7)));
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        SwitchingSampler::new(
            model,
            schedule,
            test_config(dir, workers),
            executor,
            Arc::new(CsvFrameStore::new()),
        )
    }

    #[test]
    fn equilibrate_rejects_endstate_two_before_dispatch() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 1, InlineExecutor::new());
        let error = sampler.equilibrate(&[0, 2], 3, 5, false).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Consistency(ConsistencyError::EndstateOutOfRange { value: 2 })
        ));
        // Nothing ran: the pools are untouched and no files were written.
        assert!(sampler.equilibrium_pool(0).unwrap().reduced_potentials().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn equilibrate_appends_history_across_calls() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 1, InlineExecutor::new());
        sampler.equilibrate(&[0], 5, 2, false).unwrap();
        sampler.equilibrate(&[0], 5, 2, false).unwrap();
        let pool = sampler.equilibrium_pool(0).unwrap();
        assert_eq!(pool.reduced_potentials().len(), 10);
        assert_eq!(pool.total_snapshots(), 10);
    }

    #[test]
    fn annealing_without_decorrelated_samples_is_an_error() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 1, InlineExecutor::new());
        sampler.equilibrate(&[0], 5, 2, false).unwrap();
        let error = sampler
            .run_annealed_importance_sampling(2, 5, &[Direction::Forward], 1)
            .unwrap_err();
        assert!(matches!(
            error,
            EngineError::Consistency(ConsistencyError::NoDecorrelatedSamples { endstate: 0 })
        ));
    }

    #[test]
    fn schedule_shorter_than_two_is_rejected() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 1, InlineExecutor::new());
        let error = sampler
            .run_annealed_importance_sampling(2, 1, &[Direction::Forward], 1)
            .unwrap_err();
        assert!(matches!(
            error,
            EngineError::Config(ConfigError::ScheduleTooShort(1))
        ));
    }

    #[test]
    fn save_interval_must_divide_the_schedule_length() {
        let dir = tempdir().unwrap();
        let model = Arc::new(AlchemicalHarmonicModel::two_state_example(2, Some(7)));
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        let mut config = test_config(&dir, 1);
        config.trajectory.as_mut().unwrap().save_interval = Some(2);
        let mut sampler = SwitchingSampler::new(
            model,
            schedule,
            config,
            InlineExecutor::new(),
            Arc::new(CsvFrameStore::new()),
        );
        let error = sampler
            .run_annealed_importance_sampling(2, 11, &[Direction::Forward], 1)
            .unwrap_err();
        assert!(matches!(
            error,
            EngineError::Config(ConfigError::SaveIntervalMismatch {
                interval: 2,
                length: 11
            })
        ));
    }

    #[test]
    fn four_particles_on_two_actors_fill_a_four_by_n_work_matrix() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 2, PooledExecutor::new(2).unwrap());
        sampler.equilibrate(&[0, 1], 25, 2, true).unwrap();
        sampler
            .run_annealed_importance_sampling(
                4,
                11,
                &[Direction::Forward, Direction::Reverse],
                1,
            )
            .unwrap();

        for direction in [Direction::Forward, Direction::Reverse] {
            let matrix = sampler.work_ledger().cumulative_matrix(direction);
            assert_eq!(matrix.len(), 4);
            for row in &matrix {
                assert_eq!(row.len(), 10);
            }
            let incremental = sampler.work_ledger().incremental(direction);
            assert_eq!(incremental.len(), 4);
            for (row, cumulative) in incremental.iter().zip(&matrix) {
                let total: f64 = row.iter().sum();
                assert!((cumulative.last().unwrap() - total).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn full_pipeline_produces_all_three_estimates() {
        let dir = tempdir().unwrap();
        let mut sampler = sampler(&dir, 1, InlineExecutor::new());
        sampler.minimize_endstates().unwrap();
        sampler.equilibrate(&[0, 1], 30, 2, true).unwrap();
        sampler
            .run_annealed_importance_sampling(
                3,
                9,
                &[Direction::Forward, Direction::Reverse],
                1,
            )
            .unwrap();

        let summary = sampler.compute_free_energy().unwrap();
        let forward = summary.forward.unwrap();
        let reverse = summary.reverse.unwrap();
        assert_eq!(forward.successes, 3);
        assert_eq!(forward.failures, 0);
        assert_eq!(reverse.successes, 3);
        assert!(summary.bidirectional.is_some());
        assert!(forward.estimate.value.is_finite());
        // Switching the extra wells on costs free energy, and the two
        // one-sided estimates bracket it from opposite directions.
        assert!(forward.estimate.value > 0.0);
        assert!(reverse.estimate.value < 0.0);
    }

    #[test]
    fn inline_and_pooled_backends_agree_on_a_seeded_run() {
        fn run<X: Executor>(executor: X) -> Vec<Vec<f64>> {
            let dir = tempdir().unwrap();
            let mut sampler = sampler(&dir, 1, executor);
            sampler.equilibrate(&[0], 20, 2, true).unwrap();
            sampler
                .run_annealed_importance_sampling(3, 7, &[Direction::Forward], 1)
                .unwrap();
            sampler.work_ledger().incremental(Direction::Forward).to_vec()
        }
        let inline = run(InlineExecutor::new());
        let pooled = run(PooledExecutor::new(1).unwrap());
        assert_eq!(inline, pooled);
    }

    // A model whose contexts cannot evaluate the potential once the core
    // sterics coupling crosses a threshold; equilibration at end-state 0 works
    // but forward annealing fails partway through the protocol.
    struct FlakyModel {
        inner: AlchemicalHarmonicModel,
        fail_above: f64,
    }

    struct FlakyContext {
        inner: Box<dyn ExecutionContext>,
        coupling: f64,
        fail_above: f64,
    }

    impl PhysicsModel for FlakyModel {
        fn num_particles(&self) -> usize {
            self.inner.num_particles()
        }
        fn reference_configuration(&self) -> SamplerState {
            self.inner.reference_configuration()
        }
        fn create_context(&self, integrator: &IntegratorParams) -> Box<dyn ExecutionContext> {
            Box::new(FlakyContext {
                inner: self.inner.create_context(integrator),
                coupling: 0.0,
                fail_above: self.fail_above,
            })
        }
    }

    impl ExecutionContext for FlakyContext {
        fn apply_parameters(&mut self, parameters: &AlchemicalParameters) {
            self.coupling = parameters.sterics_core;
            self.inner.apply_parameters(parameters);
        }
        fn load_configuration(&mut self, state: &SamplerState) {
            self.inner.load_configuration(state);
        }
        fn extract_configuration(&self) -> Result<SamplerState, PhysicsError> {
            self.inner.extract_configuration()
        }
        fn resample_velocities(&mut self, temperature: f64) {
            self.inner.resample_velocities(temperature);
        }
        fn advance(&mut self, steps: u32) -> Result<(), PhysicsError> {
            self.inner.advance(steps)
        }
        fn potential_energy(&self) -> Result<f64, PhysicsError> {
            if self.coupling > self.fail_above {
                return Err(PhysicsError::NonFiniteEnergy);
            }
            self.inner.potential_energy()
        }
        fn minimize(&mut self, max_iterations: usize) -> Result<(), PhysicsError> {
            self.inner.minimize(max_iterations)
        }
    }

    fn flaky_sampler(
        dir: &TempDir,
        policy: FailurePolicy,
    ) -> SwitchingSampler<InlineExecutor> {
        let model = Arc::new(FlakyModel {
            inner: AlchemicalHarmonicModel::two_state_example(2, Some(5)),
            fail_above: 0.9,
        });
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        let mut config = test_config(dir, 1);
        config.failure_policy = policy;
        SwitchingSampler::new(
            model,
            schedule,
            config,
            InlineExecutor::new(),
            Arc::new(CsvFrameStore::new()),
        )
    }

    #[test]
    fn discard_policy_drops_failed_particles_and_tags_the_counts() {
        let dir = tempdir().unwrap();
        let mut sampler = flaky_sampler(&dir, FailurePolicy::Discard);
        sampler.equilibrate(&[0], 20, 2, true).unwrap();
        sampler
            .run_annealed_importance_sampling(3, 5, &[Direction::Forward], 1)
            .unwrap();

        // Every forward particle hits the failing coupling at the last step.
        assert_eq!(sampler.work_ledger().num_particles(Direction::Forward), 0);
        let summary = sampler.compute_free_energy().unwrap();
        assert!(summary.forward.is_none());
    }

    #[test]
    fn abort_policy_turns_the_first_failure_into_a_batch_error() {
        let dir = tempdir().unwrap();
        let mut sampler = flaky_sampler(&dir, FailurePolicy::Abort);
        sampler.equilibrate(&[0], 20, 2, true).unwrap();
        let error = sampler
            .run_annealed_importance_sampling(3, 5, &[Direction::Forward], 1)
            .unwrap_err();
        assert!(matches!(
            error,
            EngineError::BatchAborted {
                failures: 3,
                total: 3,
                ..
            }
        ));
    }
}
