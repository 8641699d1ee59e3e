//! Flowpack CLI

use clap::{Arg, ArgAction, Command};
use flowpack_generator::{
    trace::{EndpointLoad, FlowRow},
    Config, Error, Termination,
};
use serde::Serialize;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Subcommand that generates a trace
const GENERATE_CMD: &str = "generate";

/// Summary of a run, written ahead of the trace table.
#[derive(Serialize)]
struct Summary {
    converged: bool,
    termination: String,
    flows: usize,
    volume: f64,
    last_arrival: Option<f64>,
    divergence: Option<f64>,
    iterations: usize,
    corrections: usize,
    packing_time_secs: f64,
}

#[derive(Serialize)]
struct Output {
    summary: Summary,
    loads: Vec<EndpointLoad>,
    flows: Vec<FlowRow>,
}

/// Generate a trace from the config at `config_path`, returning whether packing converged.
fn generate(config_path: &Path, output: Option<&Path>, seed: Option<u64>) -> Result<bool, Error> {
    let mut config = Config::from_file(config_path)?;
    if let Some(seed) = seed {
        config.experiment.seed = seed;
    }
    let experiment = config.experiment()?;
    let capacity = experiment.capacity.clone();
    let (trace, state) = experiment.run()?;

    let converged = state.is_converged();
    let termination = match &state.termination {
        Termination::Converged => "converged".to_string(),
        Termination::Failed(timeout) => timeout.to_string(),
    };
    let summary = Summary {
        converged,
        termination,
        flows: trace.len(),
        volume: trace.total_volume(),
        last_arrival: trace.last_arrival(),
        divergence: state.divergence,
        iterations: state.iterations,
        corrections: state.corrections,
        packing_time_secs: state.elapsed.as_secs_f64(),
    };
    info!(
        flows = summary.flows,
        volume = summary.volume,
        divergence = ?summary.divergence,
        iterations = summary.iterations,
        corrections = summary.corrections,
        packing_time = ?state.elapsed,
        "generated trace"
    );
    if !converged {
        warn!(termination = %summary.termination, "trace did not converge");
    }

    if let Some(path) = output {
        let output = Output {
            summary,
            loads: trace.load_report(&capacity),
            flows: trace.rows(),
        };
        let file = File::create(path)?;
        serde_yaml::to_writer(file, &output)?;
        info!(path = %path.display(), "wrote trace");
    }
    Ok(converged)
}

/// Entrypoint for the Flowpack CLI
fn main() -> std::process::ExitCode {
    // Define application
    let matches = Command::new("flowpack")
        .version(crate_version())
        .about("Synthesize flow-level traffic traces under capacity constraints.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new(GENERATE_CMD)
                .about("Generate a trace from a YAML configuration file.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .help("Path to write the generated trace (YAML)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .help("Override the experiment seed")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag(VERBOSE_FLAG) {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Parse subcommands
    match matches.subcommand() {
        Some((GENERATE_CMD, matches)) => {
            let Some(config_path) = matches.get_one::<PathBuf>("config") else {
                error!("missing config");
                return std::process::ExitCode::FAILURE;
            };
            let output = matches.get_one::<PathBuf>("output").map(PathBuf::as_path);
            let seed = matches.get_one::<u64>("seed").copied();
            match generate(config_path, output, seed) {
                Ok(true) => return std::process::ExitCode::SUCCESS,
                Ok(false) => {}
                Err(e) => error!(error=?e, "failed to generate trace"),
            }
        }
        Some((cmd, _)) => {
            error!(cmd, "invalid subcommand");
        }
        None => {
            error!("no subcommand provided");
        }
    }
    std::process::ExitCode::FAILURE
}
