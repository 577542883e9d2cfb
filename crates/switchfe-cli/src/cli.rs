use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "switchfe developers",
    version,
    about = "switchfe - free-energy differences by nonequilibrium switching and annealed importance sampling over a pool of parallel workers.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full switching free-energy calculation on the built-in
    /// reference model, driven by a TOML settings file.
    Run(RunArgs),
    /// Inspect and validate a lambda interpolation schedule.
    Schedule(ScheduleArgs),
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run settings file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Force everything to run inline in this process, ignoring the
    /// configured worker count.
    #[arg(long)]
    pub serial: bool,

    /// Override the configured worker-pool size.
    #[arg(short = 'j', long, value_name = "NUM")]
    pub workers: Option<usize>,
}

/// Arguments for the `schedule` subcommand.
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Schedule preset to inspect: default, namd, or quarters.
    #[arg(short, long, default_value = "default", value_name = "NAME")]
    pub preset: String,

    /// Number of evenly spaced progress values to tabulate.
    #[arg(short, long, default_value_t = 11, value_name = "NUM")]
    pub grid: usize,
}
