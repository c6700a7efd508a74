//! Grammar of the status lines afl-fuzz prints when it is not attached to a
//! terminal. Only a handful of anchor phrases are recognized; everything else
//! is treated as opaque text.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{OrchestratorError, Result};

pub const CRASH_SUMMARY_ANCHOR: &str = "uniq crashes found";
pub const TESTCASE_ANCHOR: &str = "total";
pub const NEW_CYCLE_ANCHOR: &str = "Entering queue cycle";
/// Phrases printed by afl-fuzz when it aborts during startup
/// (`PROGRAM ABORT : ...` followed by `Location : ...`).
pub const FATAL_ANCHORS: [&str; 2] = ["PROGRAM ABORT", "Location"];

lazy_static! {
    static ref CRASHES_RE: Regex = Regex::new(r"\b(\d+)\s+uniq crashes found").unwrap();
    static ref TESTCASES_RE: Regex = Regex::new(r"\b(\d+)\s+total\b").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrashSummary {
    pub crashes: u64,
    pub testcases: u64,
}

#[derive(Debug)]
pub enum StatusLine {
    /// Periodic statistics line. Carries the parse error if the numbers
    /// could not be extracted.
    CrashSummary(Result<CrashSummary>),
    NewCycle,
    FatalAbort,
    Other,
}

/// Classify `line` by the first matching anchor phrase. The anchors are
/// checked in priority order: summary, new cycle, fatal abort.
pub fn parse_line(line: &str) -> StatusLine {
    if line.contains(CRASH_SUMMARY_ANCHOR) {
        StatusLine::CrashSummary(parse_crash_summary(line))
    } else if line.contains(NEW_CYCLE_ANCHOR) {
        StatusLine::NewCycle
    } else if FATAL_ANCHORS.iter().any(|anchor| line.contains(anchor)) {
        StatusLine::FatalAbort
    } else {
        StatusLine::Other
    }
}

/// Extract the crash and testcase counters, i.e., the digit tokens directly
/// preceding `uniq crashes found` and `total`.
pub fn parse_crash_summary(line: &str) -> Result<CrashSummary> {
    let crashes = extract_counter(&CRASHES_RE, line, CRASH_SUMMARY_ANCHOR)?;
    let testcases = extract_counter(&TESTCASES_RE, line, TESTCASE_ANCHOR)?;
    Ok(CrashSummary { crashes, testcases })
}

fn extract_counter(re: &Regex, line: &str, anchor: &str) -> Result<u64> {
    let token = re
        .captures(line)
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            OrchestratorError::MalformedTelemetry(format!(
                "No numeric token in front of '{}'",
                anchor
            ))
        })?
        .as_str();
    token.parse::<u64>().map_err(|err| {
        OrchestratorError::MalformedTelemetry(format!(
            "Counter '{}' in front of '{}' is not a valid number: {}",
            token, anchor, err
        ))
    })
}
