use std::fmt;

use itertools::Itertools;

use crate::{
    config::{FuzzArgs, Toolchain},
    error::{OrchestratorError, Result},
    policy::WorkerSpec,
};

/// Separates the afl-fuzz arguments from the target's command line.
pub const TARGET_SEPARATOR: &str = "--";
pub const SCHEDULE_FLAG: &str = "-p";
pub const DUMB_MODE_FLAG: &str = "-n";
const ROLE_FLAGS: [&str; 2] = ["-M", "-S"];

/// Fully assembled argument vector of one worker process. The first element
/// is the program to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    argv: Vec<String>,
}

impl WorkerCommand {
    pub fn new(argv: Vec<String>) -> Self {
        WorkerCommand { argv }
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv.iter().join(" "))
    }
}

/// Refuse caller supplied afl-fuzz arguments that would interfere with the
/// distributed setup: the role flags are assigned per worker, and dumb mode
/// can not sync with other instances.
pub fn check_reserved_flags(args: &[String]) -> Result<()> {
    for arg in args {
        if let Some(flag) = ROLE_FLAGS.iter().find(|f| arg.starts_with(*f)) {
            return Err(OrchestratorError::ReservedFlagConflict {
                flag: flag.to_string(),
                reason: "Please do not provide distributed mode options (-M, -S). We'll handle them"
                    .to_owned(),
            });
        }
        if arg == DUMB_MODE_FLAG {
            return Err(OrchestratorError::ReservedFlagConflict {
                flag: DUMB_MODE_FLAG.to_owned(),
                reason: "Dumb fuzzing is not supported in distributed mode. Use afl-fuzz directly"
                    .to_owned(),
            });
        }
    }
    Ok(())
}

/// Assemble the command running `spec` on its CPU:
/// `<affinity-tool> -c <cpu> <afl-fuzz> -M|-S <name> -p <schedule> <fuzz args> -- <target>`.
pub fn build_worker_command(
    spec: &WorkerSpec,
    fuzz_args: &FuzzArgs,
    toolchain: &Toolchain,
) -> Result<WorkerCommand> {
    let shared_args = fuzz_args.to_args();
    check_reserved_flags(&shared_args)?;

    let mut argv = vec![
        toolchain.affinity_tool.to_string_lossy().into_owned(),
        "-c".to_owned(),
        spec.cpu_id().to_string(),
        toolchain.afl_fuzz.to_string_lossy().into_owned(),
        spec.role().flag().to_owned(),
        spec.instance_name().to_owned(),
        SCHEDULE_FLAG.to_owned(),
        spec.schedule().as_str().to_owned(),
    ];
    argv.extend(shared_args);
    argv.push(TARGET_SEPARATOR.to_owned());
    argv.extend(spec.cmdline().iter().cloned());

    Ok(WorkerCommand::new(argv))
}
