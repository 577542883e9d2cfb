use crate::cli::ScheduleArgs;
use crate::error::{CliError, Result};
use switchfe::core::schedule::{AlchemicalTerm, LambdaSchedule, SchedulePreset};
use switchfe::engine::error::EngineError;

pub fn run(args: ScheduleArgs) -> Result<()> {
    let preset = parse_preset(&args.preset)?;
    if args.grid < 2 {
        return Err(CliError::Config(format!(
            "grid must have at least 2 points (got {})",
            args.grid
        )));
    }

    let schedule = LambdaSchedule::from_preset(preset).map_err(EngineError::from)?;

    print!("{:>8}", "progress");
    for term in AlchemicalTerm::ALL {
        print!("  {:>12}", short_name(term));
    }
    println!();

    for index in 0..args.grid {
        let progress = index as f64 / (args.grid - 1) as f64;
        let parameters = schedule.at(progress);
        print!("{progress:>8.3}");
        for term in AlchemicalTerm::ALL {
            print!("  {:>12.4}", parameters.get(term));
        }
        println!();
    }

    println!("\nSchedule '{}' is valid: every term runs 0 -> 1 monotonically.", args.preset);
    Ok(())
}

fn parse_preset(name: &str) -> Result<SchedulePreset> {
    match name.to_ascii_lowercase().as_str() {
        "default" => Ok(SchedulePreset::Default),
        "namd" => Ok(SchedulePreset::Namd),
        "quarters" => Ok(SchedulePreset::Quarters),
        other => Err(CliError::Config(format!(
            "unknown schedule preset '{other}'; expected default, namd, or quarters"
        ))),
    }
}

fn short_name(term: AlchemicalTerm) -> &'static str {
    term.name()
        .strip_prefix("lambda_")
        .unwrap_or_else(|| term.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_presets_parse_case_insensitively() {
        assert_eq!(parse_preset("Default").unwrap(), SchedulePreset::Default);
        assert_eq!(parse_preset("NAMD").unwrap(), SchedulePreset::Namd);
        assert_eq!(parse_preset("quarters").unwrap(), SchedulePreset::Quarters);
    }

    #[test]
    fn unknown_preset_is_a_config_error() {
        assert!(matches!(parse_preset("cubic"), Err(CliError::Config(_))));
    }

    #[test]
    fn short_names_drop_the_lambda_prefix() {
        assert_eq!(short_name(AlchemicalTerm::StericsInsert), "sterics_insert");
    }
}
