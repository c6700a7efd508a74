use std::time::Duration;

/// CPU pinning tool prefixed to every afl-fuzz invocation.
pub const DEFAULT_AFFINITY_TOOL: &str = "/usr/bin/taskset";
pub const DEFAULT_AFL_FUZZ: &str = "/usr/local/bin/afl-fuzz";
pub const DEFAULT_AFL_COV: &str = "/usr/bin/afl-cov";

pub const DEFAULT_CORPUS_DIR: &str = "/corpus";
pub const DEFAULT_FUZZ_OUT_DIR: &str = "/fuzz_out";
pub const DEFAULT_FUZZ_BUILD_GLOB: &str = "/*-fuzz";
pub const DEFAULT_COV_BUILD_GLOB: &str = "/*-cov";

pub const DEFAULT_REPORT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_REPORT_PORT: u16 = 8000;

/// Environment variable forced on every worker. Affinity is already pinned
/// through the affinity tool, so afl-fuzz must not try to bind a core itself.
pub const AFL_NO_AFFINITY_ENV: &str = "AFL_NO_AFFINITY";

/// Placeholder afl-fuzz substitutes with the path of the current input.
pub const AFL_INPUT_PLACEHOLDER: &str = "@@";
/// The same placeholder as understood by afl-cov.
pub const AFL_COV_INPUT_PLACEHOLDER: &str = "AFL_FILE";
/// Input directory that makes afl-fuzz resume from its existing output.
pub const AFL_RESUME_INPUT: &str = "-";

/// Time afl-cov gets to die on bad arguments before we consider it started.
pub const COVERAGE_STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(3);
/// Interval between checks for the coverage web report.
pub const REPORT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Interval between liveness checks while joining the campaign's workers.
pub const WORKER_JOIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub const COVERAGE_WEB_DIR: &str = "cov/web";
pub const REPORT_ARTIFACT: &str = "index.html";

pub const CAMPAIGN_SCOPE: &str = "AFL-DIST";
pub const COVERAGE_SCOPE: &str = "AFL-COV";
pub const REPORT_SERVER_SCOPE: &str = "WEB-SRV";
