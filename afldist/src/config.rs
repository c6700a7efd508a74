use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::constants::{
    COVERAGE_STARTUP_GRACE_PERIOD, COVERAGE_WEB_DIR, DEFAULT_AFFINITY_TOOL, DEFAULT_AFL_COV,
    DEFAULT_AFL_FUZZ, DEFAULT_REPORT_BIND_ADDR, DEFAULT_REPORT_PORT, REPORT_POLL_INTERVAL,
};

/// Paths of the external executables driven by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Tool used to pin a worker to a CPU (invoked as `<tool> -c <cpu> ...`).
    pub affinity_tool: PathBuf,
    pub afl_fuzz: PathBuf,
    pub afl_cov: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain {
            affinity_tool: PathBuf::from(DEFAULT_AFFINITY_TOOL),
            afl_fuzz: PathBuf::from(DEFAULT_AFL_FUZZ),
            afl_cov: PathBuf::from(DEFAULT_AFL_COV),
        }
    }
}

/// Arguments shared by every afl-fuzz worker of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzArgs {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Additional afl-fuzz flags passed through verbatim.
    pub passthrough: Vec<String>,
}

impl FuzzArgs {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        FuzzArgs {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            passthrough: Vec::new(),
        }
    }

    pub fn with_passthrough(mut self, args: Vec<String>) -> Self {
        self.passthrough = args;
        self
    }

    /// The argument vector as handed to afl-fuzz: `-i <in> -o <out> <passthrough...>`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_owned(),
            self.input_dir.to_string_lossy().into_owned(),
            "-o".to_owned(),
            self.output_dir.to_string_lossy().into_owned(),
        ];
        args.extend(self.passthrough.iter().cloned());
        args
    }
}

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub num_instances: usize,
    pub fuzz_args: FuzzArgs,
    /// Resolved command line of the target, binary path first.
    pub cmdline: Arc<[String]>,
    pub toolchain: Toolchain,
    /// Extra environment given to each worker. The environment of the
    /// orchestrator itself is never inherited.
    pub env: Vec<(String, String)>,
    /// Pause between starting two consecutive workers.
    pub start_delay: Duration,
}

impl CampaignConfig {
    pub fn new(num_instances: usize, fuzz_args: FuzzArgs, cmdline: Vec<String>) -> Self {
        CampaignConfig {
            num_instances,
            fuzz_args,
            cmdline: cmdline.into(),
            toolchain: Toolchain::default(),
            env: Vec::new(),
            start_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverageConfig {
    /// Resolved command line of the coverage build of the target.
    pub cmdline: Vec<String>,
    /// The directory afl-fuzz writes its findings to (`afl-fuzz -o`).
    pub fuzz_out: PathBuf,
    /// Project root of the coverage build.
    pub cov_dir: PathBuf,
    pub bind_addr: String,
    pub port: u16,
    pub toolchain: Toolchain,
    pub startup_grace: Duration,
    pub poll_interval: Duration,
}

impl CoverageConfig {
    pub fn new(cmdline: Vec<String>, fuzz_out: PathBuf, cov_dir: PathBuf) -> Self {
        CoverageConfig {
            cmdline,
            fuzz_out,
            cov_dir,
            bind_addr: DEFAULT_REPORT_BIND_ADDR.to_owned(),
            port: DEFAULT_REPORT_PORT,
            toolchain: Toolchain::default(),
            startup_grace: COVERAGE_STARTUP_GRACE_PERIOD,
            poll_interval: REPORT_POLL_INTERVAL,
        }
    }

    pub fn web_dir(&self) -> PathBuf {
        web_dir(&self.fuzz_out)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Directory afl-cov renders its lcov web report into.
pub fn web_dir(fuzz_out: &Path) -> PathBuf {
    fuzz_out.join(COVERAGE_WEB_DIR)
}
