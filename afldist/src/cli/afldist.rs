mod handler;
mod util;

use anyhow::{Context, Result};
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use afldist::constants::{
    DEFAULT_CORPUS_DIR, DEFAULT_COV_BUILD_GLOB, DEFAULT_FUZZ_BUILD_GLOB, DEFAULT_FUZZ_OUT_DIR,
    DEFAULT_REPORT_BIND_ADDR,
};
use afldist::logging::{self};

extern crate clap;
use clap::{Arg, ArgMatches, Command};

use ansi_term::Colour::Red;

fn target_arg() -> Arg<'static> {
    Arg::new("target")
        .help("Command line of the target, relative to its build directory. Use @@ for the input file")
        .value_name("TARGET")
        .takes_value(true)
        .multiple_values(true)
        .allow_hyphen_values(true)
        .last(true)
        .required(true)
}

fn src_dir_arg() -> Arg<'static> {
    Arg::new("src-dir")
        .help("Source directory of the target. The build directories are looked up next to it. Defaults to $SRC_DIR")
        .long("src-dir")
        .takes_value(true)
        .allow_invalid_utf8(true)
}

fn parse_args() -> ArgMatches {
    Command::new("afldist")
        .version("0.1.0")
        .about("Run afl-fuzz in distributed mode, one instance per CPU, and serve the afl-cov report")
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .help("Log verbosity (alternative to --verbosity)")
                .value_name("trace, debug, info, warn, error, off")
                .long("log-level")
                .conflicts_with("verbosity")
                .takes_value(true)
                .required(false)
                .global(true),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .required(false)
                .multiple_occurrences(true)
                .conflicts_with("log-level")
                .help("Sets the level of verbosity (alternative to --log-level)")
                .global(true),
        )
        .arg(
            Arg::new("log-file")
                .help("Write the log into a rotating log file in addition to stdout")
                .long("log-file")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .required(false)
                .global(true),
        )
        .subcommand(
            Command::new("fuzz")
                .about("Run a distributed afl-fuzz campaign")
                .arg(
                    Arg::new("input")
                        .help("Directory with the initial corpus")
                        .short('i')
                        .long("input")
                        .takes_value(true)
                        .allow_invalid_utf8(true)
                        .default_value(DEFAULT_CORPUS_DIR),
                )
                .arg(
                    Arg::new("output")
                        .help("Directory afl-fuzz writes its findings to")
                        .short('o')
                        .long("output")
                        .takes_value(true)
                        .allow_invalid_utf8(true)
                        .default_value(DEFAULT_FUZZ_OUT_DIR),
                )
                .arg(
                    Arg::new("jobs")
                        .help("Number of afl-fuzz instances. Defaults to half the number of CPUs")
                        .short('j')
                        .long("jobs")
                        .takes_value(true),
                )
                .arg(
                    Arg::new("fuzz-dir")
                        .help("Glob matching the instrumented build of the target, relative to the parent of the source directory")
                        .long("fuzz-dir")
                        .takes_value(true)
                        .default_value(DEFAULT_FUZZ_BUILD_GLOB),
                )
                .arg(src_dir_arg())
                .arg(
                    Arg::new("start-delay")
                        .help("Pause between starting two instances, e.g., 500ms or 2s")
                        .long("start-delay")
                        .takes_value(true)
                        .default_value("0ms"),
                )
                .arg(
                    Arg::new("engine-arg")
                        .help("Additional argument passed to every afl-fuzz instance. May be repeated")
                        .long("engine-arg")
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .multiple_occurrences(true),
                )
                .arg(
                    Arg::new("taskset")
                        .help("Path of the taskset binary")
                        .long("taskset")
                        .takes_value(true)
                        .allow_invalid_utf8(true),
                )
                .arg(
                    Arg::new("afl-fuzz")
                        .help("Path of the afl-fuzz binary")
                        .long("afl-fuzz")
                        .takes_value(true)
                        .allow_invalid_utf8(true),
                )
                .arg(target_arg()),
        )
        .subcommand(
            Command::new("cov")
                .about("Collect coverage of a campaign with afl-cov and serve the report")
                .arg(
                    Arg::new("output")
                        .help("Output directory of the afl-fuzz campaign")
                        .short('o')
                        .long("output")
                        .takes_value(true)
                        .allow_invalid_utf8(true)
                        .default_value(DEFAULT_FUZZ_OUT_DIR),
                )
                .arg(
                    Arg::new("cov-dir")
                        .help("Glob matching the coverage build of the target, relative to the parent of the source directory")
                        .long("cov-dir")
                        .takes_value(true)
                        .default_value(DEFAULT_COV_BUILD_GLOB),
                )
                .arg(src_dir_arg())
                .arg(
                    Arg::new("port")
                        .help("Port the report is served on")
                        .long("port")
                        .takes_value(true)
                        .default_value("8000"),
                )
                .arg(
                    Arg::new("bind")
                        .help("Address the report server binds to")
                        .long("bind")
                        .takes_value(true)
                        .default_value(DEFAULT_REPORT_BIND_ADDR),
                )
                .arg(
                    Arg::new("afl-cov")
                        .help("Path of the afl-cov binary")
                        .long("afl-cov")
                        .takes_value(true)
                        .allow_invalid_utf8(true),
                )
                .arg(target_arg()),
        )
        .get_matches()
}

fn setup_logging(matches: &ArgMatches) -> Result<()> {
    let level = match matches.value_of("log-level") {
        Some(level) if matches.occurrences_of("verbosity") == 0 => logging::parse_level(level)?,
        _ => logging::level_from_verbosity(matches.occurrences_of("verbosity")),
    };
    let log_file = matches.value_of_os("log-file").map(Path::new);
    logging::setup_logger(log_file, level)?;
    logging::setup_panic_logging();
    Ok(())
}

/// The first SIGINT/SIGTERM only raises the returned flag, the second one
/// terminates the process.
fn register_on_termination_flag() -> Result<Arc<AtomicBool>> {
    let termination_requested_flag = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        signal_hook::flag::register_conditional_shutdown(
            signal,
            1,
            Arc::clone(&termination_requested_flag),
        )
        .context("Failed to register shutdown handler")?;
        signal_hook::flag::register(signal, Arc::clone(&termination_requested_flag))
            .context("Failed to register termination handler")?;
    }
    Ok(termination_requested_flag)
}

fn main() {
    if let Err(err) = real_main() {
        let err_msg = format!("Error: {:#}", err);
        eprintln!("{}", Red.paint(err_msg));
        process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let matches = parse_args();
    setup_logging(&matches)?;

    match matches.subcommand() {
        Some(("fuzz", fuzz_matches)) => {
            let termination_requested_flag = register_on_termination_flag()?;
            handler::handle_cli_fuzz_subcommand(fuzz_matches, termination_requested_flag)
        }
        Some(("cov", cov_matches)) => handler::handle_cli_cov_subcommand(cov_matches),
        _ => unreachable!(),
    }
}
