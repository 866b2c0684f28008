use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use megprep::{run_stage, NativeLibrary, PipelineConfig, Stage};

mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const PARTIAL_FAILURE: i32 = 2;
    pub const ALL_FAILED: i32 = 3;
}

#[derive(Parser)]
#[command(name = "megprep", version, about = "Batch MEG preprocessing, one stage per invocation")]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(short, long, env = "MEGPREP_CONFIG", default_value = "megprep.toml")]
    config: PathBuf,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    stage: StageCommand,
}

#[derive(Subcommand, Clone, Copy)]
enum StageCommand {
    /// Review raw runs; optionally write annotation files
    Inspect,
    /// Spatially filter raw runs (or pass them through when disabled)
    Maxfilter,
    /// Band-pass and resample the spatial stage's output
    Filter,
}

impl From<StageCommand> for Stage {
    fn from(cmd: StageCommand) -> Self {
        match cmd {
            StageCommand::Inspect => Stage::Inspect,
            StageCommand::Maxfilter => Stage::Maxfilter,
            StageCommand::Filter => Stage::Filter,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    std::process::exit(execute(&cli));
}

fn execute(cli: &Cli) -> i32 {
    let cfg = match PipelineConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("{e}");
            return exit_codes::CONFIG_ERROR;
        }
    };

    let stage = Stage::from(cli.stage);
    let report = match run_stage(&cfg, &NativeLibrary, stage) {
        Ok(report) => report,
        Err(e) => {
            log::error!("{e}");
            return exit_codes::ALL_FAILED;
        }
    };

    for (subject, n_runs) in &report.succeeded {
        log::info!("{stage}: subject {subject} done ({n_runs} run(s))");
    }
    for failure in &report.failed {
        log::error!("{stage}: {failure}");
    }
    if !report.skipped.is_empty() {
        log::warn!(
            "{stage}: not started after failure: {}",
            report.skipped.join(", ")
        );
    }
    log::info!(
        "{stage}: {} succeeded, {} failed, {} skipped",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );

    if report.is_success() {
        exit_codes::SUCCESS
    } else if report.all_failed() {
        exit_codes::ALL_FAILED
    } else {
        exit_codes::PARTIAL_FAILURE
    }
}
