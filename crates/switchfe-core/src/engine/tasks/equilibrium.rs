use super::{
    EquilibriumResult, EquilibriumTask, EquilibriumTiming, FailureContext, TaskFailure,
    TaskOutcome,
};
use crate::core::io::{ChunkBuffer, Frame};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, instrument};

const MINIMIZE_MAX_ITERATIONS: usize = 100;

/// Builds the chunk filename for a given counter value:
/// `<stem>.<counter:04>.csv`.
pub fn chunk_path(stem: &Path, counter: usize) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(format!(".{counter:04}.csv"));
    PathBuf::from(name)
}

/// Runs one equilibrium sampling task: `iterations` atomic moves of
/// `steps_per_iteration` integrator steps each, recording the reduced
/// potential after every move and streaming frames through the byte-threshold
/// chunk buffer.
///
/// The task is self-contained (own state copy, own context) and any failure
/// is captured into a [`TaskFailure`] rather than propagated, so it is safe
/// to dispatch through either executor backend.
#[instrument(skip_all, name = "equilibrium_task", fields(endstate = task.endstate))]
pub fn run_equilibrium(task: EquilibriumTask) -> TaskOutcome<EquilibriumResult> {
    let EquilibriumTask {
        endstate,
        thermodynamic_state,
        sampler_state,
        integrator,
        iterations,
        steps_per_iteration,
        minimize_first,
        sink,
        timing,
    } = task;

    let failure = |reason: String, iteration: usize| {
        TaskFailure::new(reason, FailureContext::Equilibrium { endstate, iteration })
    };

    let mut context = thermodynamic_state.model().create_context(&integrator);
    context.apply_parameters(thermodynamic_state.parameters());
    context.load_configuration(&sampler_state);
    context.resample_velocities(thermodynamic_state.temperature());

    if minimize_first {
        context
            .minimize(MINIMIZE_MAX_ITERATIONS)
            .map_err(|e| failure(e.to_string(), 0))?;
    }

    let mut timers = timing.then(EquilibriumTiming::default);
    let mut buffer = ChunkBuffer::new();
    let mut files: Vec<(PathBuf, usize)> = Vec::new();
    let mut reduced_potentials = Vec::with_capacity(iterations);
    let mut file_counter = sink.as_ref().map_or(0, |s| s.file_counter);

    debug!(iterations, steps_per_iteration, "starting production");
    for iteration in 0..iterations {
        let move_start = Instant::now();

        context
            .advance(steps_per_iteration)
            .map_err(|e| failure(e.to_string(), iteration))?;
        let reduced = thermodynamic_state
            .reduced_potential(context.as_ref())
            .map_err(|e| failure(e.to_string(), iteration))?;
        reduced_potentials.push(reduced);

        if let Some(sink) = &sink {
            let state = context
                .extract_configuration()
                .map_err(|e| failure(e.to_string(), iteration))?;
            let frame = match &sink.atom_subset {
                Some(indices) => Frame::from_sampler_state(&state.subset(indices)),
                None => Frame::from_sampler_state(&state),
            };
            buffer.push(frame);

            if buffer.estimated_bytes() > sink.max_chunk_bytes {
                let path = chunk_path(&sink.filename_stem, file_counter);
                let written = buffer
                    .flush_to(sink.store.as_ref(), &path)
                    .map_err(|e| failure(e.to_string(), iteration))?;
                files.push((path, written));
                file_counter += 1;
            }
        }

        if let Some(timers) = &mut timers {
            timers.per_iteration.push(move_start.elapsed());
        }
    }

    // Whatever is still buffered becomes the last chunk of this call.
    if let Some(sink) = &sink {
        if !buffer.is_empty() {
            let write_start = Instant::now();
            let path = chunk_path(&sink.filename_stem, file_counter);
            let written = buffer
                .flush_to(sink.store.as_ref(), &path)
                .map_err(|e| failure(e.to_string(), iterations))?;
            files.push((path, written));
            file_counter += 1;
            if let Some(timers) = &mut timers {
                timers.write = write_start.elapsed();
            }
        }
    }

    let final_state = context
        .extract_configuration()
        .map_err(|e| failure(e.to_string(), iterations))?;

    Ok(EquilibriumResult {
        endstate,
        sampler_state: final_state,
        files,
        reduced_potentials,
        next_file_counter: file_counter,
        timing: timers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{CsvFrameStore, FrameStore};
    use crate::core::schedule::{LambdaSchedule, SchedulePreset};
    use crate::engine::tasks::EquilibriumSink;
    use crate::physics::{AlchemicalHarmonicModel, PhysicsModel, ThermodynamicState};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_task(
        iterations: usize,
        sink: Option<EquilibriumSink>,
    ) -> EquilibriumTask {
        let model = Arc::new(AlchemicalHarmonicModel::two_state_example(2, Some(5)));
        let schedule = LambdaSchedule::from_preset(SchedulePreset::Default).unwrap();
        let mut state = ThermodynamicState::new(model.clone(), 300.0);
        state.set_alchemical_parameters(0.0, &schedule);
        EquilibriumTask {
            endstate: 0,
            sampler_state: model.reference_configuration(),
            thermodynamic_state: state,
            integrator: crate::physics::IntegratorParams::new(1.0, 1.0, "V R O R V"),
            iterations,
            steps_per_iteration: 5,
            minimize_first: false,
            sink,
            timing: false,
        }
    }

    fn sink(stem: PathBuf, counter: usize, max_bytes: usize) -> EquilibriumSink {
        EquilibriumSink {
            store: Arc::new(CsvFrameStore::new()),
            filename_stem: stem,
            file_counter: counter,
            atom_subset: None,
            max_chunk_bytes: max_bytes,
        }
    }

    #[test]
    fn records_one_reduced_potential_per_iteration() {
        let result = run_equilibrium(test_task(4, None)).unwrap();
        assert_eq!(result.reduced_potentials.len(), 4);
        assert!(result.reduced_potentials.iter().all(|rp| rp.is_finite()));
        assert!(result.files.is_empty());
        assert_eq!(result.next_file_counter, 0);
    }

    #[test]
    fn without_a_sink_no_files_are_written() {
        let dir = tempdir().unwrap();
        let result = run_equilibrium(test_task(2, None)).unwrap();
        assert!(result.files.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn two_calls_with_mid_sequence_flushes_produce_two_files_of_six_snapshots() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("demo.eq.lambda_0");
        // Two particles -> 96 estimated bytes per frame. A 250-byte threshold
        // triggers exactly one flush per call, on the third buffered frame.
        let first = run_equilibrium(test_task(3, Some(sink(stem.clone(), 0, 250)))).unwrap();
        assert_eq!(first.files.len(), 1);
        assert_eq!(first.next_file_counter, 1);

        let second =
            run_equilibrium(test_task(3, Some(sink(stem.clone(), first.next_file_counter, 250))))
                .unwrap();
        assert_eq!(second.files.len(), 1);
        assert_eq!(second.next_file_counter, 2);

        let store = CsvFrameStore::new();
        let all_files: Vec<_> = first.files.iter().chain(second.files.iter()).collect();
        assert_eq!(all_files.len(), 2);
        let total: usize = all_files.iter().map(|(_, count)| count).sum();
        assert_eq!(total, 6);
        for (path, count) in &all_files {
            assert_eq!(store.frame_count(path).unwrap(), *count);
        }
        // Monotone file numbering across the two calls.
        assert_eq!(first.files[0].0, chunk_path(&stem, 0));
        assert_eq!(second.files[0].0, chunk_path(&stem, 1));
    }

    #[test]
    fn final_partial_buffer_is_flushed_as_its_own_chunk() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("demo.eq.lambda_0");
        // Threshold passed on the third buffered frame, so 5 iterations give
        // chunks of 3 and 2.
        let result = run_equilibrium(test_task(5, Some(sink(stem, 0, 250)))).unwrap();
        assert_eq!(result.files.len(), 2);
        assert_eq!(result.files[0].1, 3);
        assert_eq!(result.files[1].1, 2);
    }

    #[test]
    fn atom_subset_restricts_saved_frames() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("subset.eq.lambda_0");
        let mut sink = sink(stem, 0, usize::MAX);
        sink.atom_subset = Some(vec![0]);
        let result = run_equilibrium(test_task(2, Some(sink))).unwrap();

        // usize::MAX threshold defers everything to the final flush.
        assert_eq!(result.files.len(), 1);
        let store = CsvFrameStore::new();
        let frame = store.load_frame(&result.files[0].0, 0).unwrap();
        assert_eq!(frame.positions.len(), 1);
    }

    #[test]
    fn timing_is_collected_when_requested() {
        let mut task = test_task(3, None);
        task.timing = true;
        let result = run_equilibrium(task).unwrap();
        let timing = result.timing.unwrap();
        assert_eq!(timing.per_iteration.len(), 3);
    }

    #[test]
    fn chunk_path_appends_a_zero_padded_counter() {
        let path = chunk_path(Path::new("out/demo.eq.lambda_1"), 7);
        assert_eq!(path, PathBuf::from("out/demo.eq.lambda_1.0007.csv"));
    }
}
