use crate::{
    events::Severity,
    status_line::{self, StatusLine},
};

/// Assigns a severity to each line a supervised process writes to stdout.
/// The returned text is the part of the line worth logging.
pub trait Classifier {
    fn classify<'l>(&mut self, line: &'l str) -> (Severity, &'l str);

    /// Whether the process reported a fatal startup error so far.
    fn fatal_marker(&self) -> bool {
        false
    }
}

/// Counters of a single afl-fuzz worker, used to log periodic status lines
/// only if something changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifierState {
    pub crash_count: u64,
    pub testcase_count: u64,
    pub fatal_marker: bool,
}

#[derive(Debug, Default)]
pub struct AflClassifier {
    state: ClassifierState,
}

impl AflClassifier {
    pub fn new() -> Self {
        AflClassifier::default()
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }
}

impl Classifier for AflClassifier {
    fn classify<'l>(&mut self, line: &'l str) -> (Severity, &'l str) {
        let severity = match status_line::parse_line(line) {
            StatusLine::CrashSummary(Ok(summary)) => {
                // A changed crash counter takes precedence over a changed
                // testcase counter, even if both moved. Both counters are
                // recorded so that a repeated line is not reported again.
                if summary.crashes != self.state.crash_count {
                    self.state.crash_count = summary.crashes;
                    self.state.testcase_count = summary.testcases;
                    Severity::Critical
                } else if summary.testcases != self.state.testcase_count {
                    self.state.testcase_count = summary.testcases;
                    Severity::Info
                } else {
                    Severity::Debug
                }
            }
            StatusLine::CrashSummary(Err(err)) => {
                log::trace!("Ignoring counters of status line: {}", err);
                Severity::Debug
            }
            StatusLine::NewCycle => Severity::Info,
            StatusLine::FatalAbort => {
                self.state.fatal_marker = true;
                Severity::Critical
            }
            StatusLine::Other => Severity::Debug,
        };
        (severity, line)
    }

    fn fatal_marker(&self) -> bool {
        self.state.fatal_marker
    }
}

/// Classifies the output of afl-cov. Its messages are prefixed with
/// `[-]` (details) or `[*]` (progress).
#[derive(Debug, Default, Clone, Copy)]
pub struct CoverageClassifier;

const DETAIL_PREFIX: &str = "[-]";
const PROGRESS_PREFIX: &str = "[*]";

impl Classifier for CoverageClassifier {
    fn classify<'l>(&mut self, line: &'l str) -> (Severity, &'l str) {
        if line.contains(DETAIL_PREFIX) {
            (Severity::Debug, strip_marker(line, DETAIL_PREFIX))
        } else if line.contains(PROGRESS_PREFIX) {
            (Severity::Warning, strip_marker(line, PROGRESS_PREFIX))
        } else if line.contains("coverage") {
            // Per-line coverage results are too verbose for the info level.
            if line.contains("'line'") {
                (Severity::Debug, line)
            } else {
                (Severity::Info, line)
            }
        } else {
            (Severity::Debug, line)
        }
    }
}

fn strip_marker<'l>(line: &'l str, marker: &str) -> &'l str {
    line.strip_prefix(marker).map(str::trim_start).unwrap_or(line)
}
