use std::{
    io::Read,
    process::Child,
    sync::Arc,
    time::Duration,
};

use itertools::Itertools;
use wait_timeout::ChildExt;

use crate::{
    classifier::CoverageClassifier,
    command::WorkerCommand,
    config::CoverageConfig,
    constants::{AFL_COV_INPUT_PLACEHOLDER, AFL_INPUT_PLACEHOLDER, COVERAGE_SCOPE},
    error::{OrchestratorError, Result},
    events::{EventSink, Severity},
    supervisor::{ProcessEnv, ProcessMonitor, SupervisionResult},
};

/// Build the target invocation as understood by afl-cov's `--coverage-cmd`.
/// Targets reading from stdin get the input piped in.
pub fn compose_coverage_command(cmdline: &[String]) -> String {
    if cmdline.iter().any(|arg| arg.contains(AFL_INPUT_PLACEHOLDER)) {
        cmdline
            .iter()
            .map(|arg| arg.replace(AFL_INPUT_PLACEHOLDER, AFL_COV_INPUT_PLACEHOLDER))
            .join(" ")
    } else {
        format!("cat {} | {}", AFL_COV_INPUT_PLACEHOLDER, cmdline.join(" "))
    }
}

pub fn build_collector_command(config: &CoverageConfig) -> WorkerCommand {
    WorkerCommand::new(vec![
        config.toolchain.afl_cov.to_string_lossy().into_owned(),
        "-d".to_owned(),
        config.fuzz_out.to_string_lossy().into_owned(),
        "--live".to_owned(),
        "--overwrite".to_owned(),
        "--lcov-web-all".to_owned(),
        "--coverage-cmd".to_owned(),
        compose_coverage_command(&config.cmdline),
        "--code-dir".to_owned(),
        config.cov_dir.to_string_lossy().into_owned(),
    ])
}

/// Supervisor of the afl-cov process.
#[derive(Debug)]
pub struct CoverageCollector {
    monitor: ProcessMonitor,
    startup_grace: Duration,
}

impl CoverageCollector {
    pub fn new(config: &CoverageConfig, sink: Arc<dyn EventSink>) -> Self {
        CoverageCollector {
            monitor: ProcessMonitor::new(
                COVERAGE_SCOPE,
                "afl-cov",
                build_collector_command(config),
                sink,
            ),
            startup_grace: config.startup_grace,
        }
    }

    pub fn command(&self) -> &WorkerCommand {
        self.monitor.command()
    }

    /// Spawn afl-cov and give it `startup_grace` to fail on bad arguments.
    /// A process that terminated within that window after printing anything
    /// is a startup failure.
    fn spawn_checked(&self) -> Result<Child> {
        let mut child = self.monitor.spawn(&ProcessEnv::Inherit, true)?;
        let status = match child.wait_timeout(self.startup_grace)? {
            Some(status) => status,
            None => return Ok(child),
        };

        let mut output = String::new();
        read_all(child.stdout.as_mut(), &mut output);
        read_all(child.stderr.as_mut(), &mut output);
        let output = output.trim();

        if output.is_empty() {
            // Nothing to report, the exit status is handled by the monitor.
            return Ok(child);
        }

        self.monitor.emit(
            Severity::Critical,
            &format!("afl-cov failed to start ({}): {}", status, output),
        );
        Err(OrchestratorError::StartupAbort(format!(
            "afl-cov terminated during startup with {}. Output: {}. Command: {}",
            status,
            output,
            self.monitor.command()
        )))
    }

    /// Run afl-cov to completion. Fails only if it aborted during startup;
    /// later failures are reported through the returned result.
    pub fn run(self) -> Result<SupervisionResult> {
        log::info!(target: COVERAGE_SCOPE, "Starting: {}", self.monitor.command());
        let child = match self.spawn_checked() {
            Ok(child) => child,
            Err(OrchestratorError::Io(err)) => return Ok(self.monitor.spawn_failed(err)),
            Err(err) => return Err(err),
        };
        Ok(self.monitor.monitor(child, &mut CoverageClassifier))
    }
}

fn read_all<R: Read>(stream: Option<&mut R>, buf: &mut String) {
    if let Some(stream) = stream {
        let mut bytes = Vec::new();
        if stream.read_to_end(&mut bytes).is_ok() {
            buf.push_str(&String::from_utf8_lossy(&bytes));
        }
    }
}
