use crate::cli::RunArgs;
use crate::config::Settings;
use crate::error::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use switchfe::core::io::CsvFrameStore;
use switchfe::core::schedule::LambdaSchedule;
use switchfe::engine::error::EngineError;
use switchfe::engine::executor::{Executor, InlineExecutor, PooledExecutor};
use switchfe::engine::progress::{Progress, ProgressReporter};
use switchfe::physics::AlchemicalHarmonicModel;
use switchfe::workflows::{FreeEnergySummary, SwitchingSampler};
use tracing::info;

pub fn run(args: RunArgs) -> Result<()> {
    let settings = Settings::load(&args.config)?;
    if let Some(trajectory) = &settings.trajectory {
        std::fs::create_dir_all(&trajectory.directory)?;
    }

    let workers_override = if args.serial { Some(1) } else { args.workers };
    let config = settings.to_switching_config(workers_override)?;
    let schedule =
        LambdaSchedule::from_preset(settings.schedule.preset).map_err(EngineError::from)?;
    let model = Arc::new(AlchemicalHarmonicModel::two_state_example(
        settings.model.particles,
        settings.model.seed,
    ));
    let store = Arc::new(CsvFrameStore::new());

    info!(
        particles = settings.model.particles,
        workers = config.workers,
        preset = ?settings.schedule.preset,
        "starting switching free-energy run"
    );

    if config.workers == 1 {
        let sampler = SwitchingSampler::new(model, schedule, config, InlineExecutor::new(), store);
        execute(sampler, &settings)
    } else {
        let executor = PooledExecutor::new(config.workers)?;
        let sampler = SwitchingSampler::new(model, schedule, config, executor, store);
        execute(sampler, &settings)
    }
}

fn execute<X: Executor>(sampler: SwitchingSampler<X>, settings: &Settings) -> Result<()> {
    let total_particles =
        (settings.annealing.particles * settings.annealing.directions.len()) as u64;
    let bar = ProgressBar::new(total_particles);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}")
            .expect("progress template is well-formed"),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let reporter_bar = bar.clone();
    let reporter = ProgressReporter::with_callback(Box::new(move |event| match event {
        Progress::EquilibrationStart { endstate, .. } => {
            reporter_bar.set_message(format!("equilibrating end-state {endstate}"));
        }
        Progress::AnnealingBatchStart { direction, .. } => {
            reporter_bar.set_message(format!("annealing {direction}"));
        }
        Progress::ParticleFinished { .. } => reporter_bar.inc(1),
        _ => {}
    }));
    let mut sampler = sampler.with_reporter(reporter);

    if settings.equilibration.minimize {
        sampler.minimize_endstates()?;
    }
    sampler.equilibrate(
        &[0, 1],
        settings.equilibration.iterations,
        settings.equilibration.steps_per_iteration,
        settings.equilibration.decorrelate,
    )?;
    sampler.run_annealed_importance_sampling(
        settings.annealing.particles,
        settings.annealing.schedule_length,
        &settings.annealing.directions,
        settings.annealing.steps_per_move,
    )?;
    bar.finish_and_clear();

    let summary = sampler.compute_free_energy()?;
    print_summary(&summary);

    if let Some(trajectory) = &settings.trajectory {
        let path = trajectory
            .directory
            .join(format!("{}.work.csv", trajectory.prefix));
        sampler
            .work_ledger()
            .export_csv(&path)
            .map_err(EngineError::from)?;
        println!("Work values written to {}", path.display());
    }
    Ok(())
}

fn print_summary(summary: &FreeEnergySummary) {
    println!("\nFree-energy estimates (reduced units, kT):");
    if let Some(forward) = &summary.forward {
        println!(
            "  forward (EXP):       {:>10.4} ± {:.4}  ({} particles, {} failed)",
            forward.estimate.value,
            forward.estimate.uncertainty,
            forward.successes,
            forward.failures
        );
    }
    if let Some(reverse) = &summary.reverse {
        println!(
            "  reverse (EXP):       {:>10.4} ± {:.4}  ({} particles, {} failed)",
            reverse.estimate.value,
            reverse.estimate.uncertainty,
            reverse.successes,
            reverse.failures
        );
    }
    if let Some(bidirectional) = &summary.bidirectional {
        println!(
            "  bidirectional (BAR): {:>10.4} ± {:.4}",
            bidirectional.value, bidirectional.uncertainty
        );
    }
    if summary.forward.is_none() && summary.reverse.is_none() {
        println!("  no work values collected; nothing to estimate");
    }
}
