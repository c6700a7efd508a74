use std::{
    env,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;

use afldist::{
    campaign::{CampaignReport, FuzzingCampaign},
    config::{CampaignConfig, CoverageConfig, FuzzArgs, Toolchain},
    constants::{AFL_NO_AFFINITY_ENV, CAMPAIGN_SCOPE, COVERAGE_SCOPE},
    coverage::CoverageCoordinator,
    events::LogSink,
    resolve::{check_input_directory, resolve_build_dir, resolve_cmdline},
};

use crate::util::{available_cpus, default_instance_count, CliDuration};

const SRC_DIR_ENV: &str = "SRC_DIR";

fn src_dir(matches: &ArgMatches) -> Result<PathBuf> {
    matches
        .value_of_os("src-dir")
        .map(PathBuf::from)
        .or_else(|| env::var_os(SRC_DIR_ENV).map(PathBuf::from))
        .ok_or_else(|| anyhow!("Source directory unknown, pass --src-dir or set {}", SRC_DIR_ENV))
}

fn target_cmdline(matches: &ArgMatches) -> Vec<String> {
    matches
        .values_of("target")
        .map(|values| values.map(str::to_owned).collect())
        .unwrap_or_default()
}

fn path_arg(matches: &ArgMatches, name: &str) -> Result<PathBuf> {
    matches
        .value_of_os(name)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Missing value for --{}", name))
}

/// AFL_* variables of our own environment that are forwarded to the workers.
fn afl_environment() -> Vec<(String, String)> {
    env::vars()
        .filter(|(k, _)| k.starts_with("AFL_") && k != AFL_NO_AFFINITY_ENV)
        .collect()
}

fn log_campaign_summary(report: &CampaignReport) {
    for outcome in &report.outcomes {
        let result = &outcome.result;
        match result.failure() {
            None => log::info!(
                target: CAMPAIGN_SCOPE,
                "{} ({}, CPU {}) terminated successfully",
                result.scope,
                outcome.spec.role().name(),
                outcome.spec.cpu_id()
            ),
            Some(err) => log::error!(target: CAMPAIGN_SCOPE, "{}", err),
        }
        if result.fatal_marker {
            log::error!(
                target: CAMPAIGN_SCOPE,
                "{} aborted during startup, see its output above",
                result.scope
            );
        }
    }

    let failed = report.failed().count();
    log::warn!(
        target: CAMPAIGN_SCOPE,
        "Campaign finished: {} of {} instances failed",
        failed,
        report.outcomes.len()
    );
}

pub(crate) fn handle_cli_fuzz_subcommand(
    fuzz_matches: &ArgMatches,
    termination_requested_flag: Arc<AtomicBool>,
) -> Result<()> {
    let src_dir = src_dir(fuzz_matches)?;
    let pattern = fuzz_matches
        .value_of("fuzz-dir")
        .context("Missing build directory pattern")?;
    let build_dir = resolve_build_dir(&src_dir, pattern)?;
    log::info!("Using fuzzing build {}", build_dir.display());
    let cmdline = resolve_cmdline(&build_dir, &target_cmdline(fuzz_matches))?;

    let input_dir = path_arg(fuzz_matches, "input")?;
    check_input_directory(&input_dir)?;
    let output_dir = path_arg(fuzz_matches, "output")?;

    let jobs = match fuzz_matches.value_of("jobs") {
        Some(jobs) => jobs
            .parse::<usize>()
            .context(format!("Invalid number of jobs: {}", jobs))?,
        None => default_instance_count(),
    };
    let cpus = available_cpus();
    if jobs > cpus {
        log::warn!(
            "Starting {} instances on {} CPUs, some instances will not be pinned to an existing CPU",
            jobs,
            cpus
        );
    }

    let start_delay = fuzz_matches
        .value_of("start-delay")
        .unwrap_or("0ms")
        .parse::<CliDuration>()
        .map_err(|err| anyhow!(err))?
        .0;

    let passthrough = fuzz_matches
        .values_of("engine-arg")
        .map(|values| values.map(str::to_owned).collect())
        .unwrap_or_default();

    let mut toolchain = Toolchain::default();
    if let Some(path) = fuzz_matches.value_of_os("taskset") {
        toolchain.affinity_tool = PathBuf::from(path);
    }
    if let Some(path) = fuzz_matches.value_of_os("afl-fuzz") {
        toolchain.afl_fuzz = PathBuf::from(path);
    }

    let mut config = CampaignConfig::new(
        jobs,
        FuzzArgs::new(input_dir, output_dir).with_passthrough(passthrough),
        cmdline,
    );
    config.toolchain = toolchain;
    config.env = afl_environment();
    config.start_delay = start_delay;

    let campaign = FuzzingCampaign::new(config, Arc::new(LogSink))?;
    let report = campaign.run(Some(termination_requested_flag));
    log_campaign_summary(&report);
    Ok(())
}

pub(crate) fn handle_cli_cov_subcommand(cov_matches: &ArgMatches) -> Result<()> {
    let src_dir = src_dir(cov_matches)?;
    let pattern = cov_matches
        .value_of("cov-dir")
        .context("Missing build directory pattern")?;
    let cov_dir = resolve_build_dir(&src_dir, pattern)?;
    log::info!("Using coverage build {}", cov_dir.display());
    let cmdline = resolve_cmdline(&cov_dir, &target_cmdline(cov_matches))?;

    let mut config = CoverageConfig::new(cmdline, path_arg(cov_matches, "output")?, cov_dir);
    if let Some(port) = cov_matches.value_of("port") {
        config.port = port
            .parse::<u16>()
            .context(format!("Invalid port: {}", port))?;
    }
    if let Some(bind) = cov_matches.value_of("bind") {
        config.bind_addr = bind.to_owned();
    }
    if let Some(path) = cov_matches.value_of_os("afl-cov") {
        config.toolchain.afl_cov = PathBuf::from(path);
    }

    let coordinator = CoverageCoordinator::new(config, Arc::new(LogSink))?;
    let report = coordinator.run()?;
    if let Some(err) = report.collector.failure() {
        log::error!(target: COVERAGE_SCOPE, "{}", err);
    }
    Ok(())
}
