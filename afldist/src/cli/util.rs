use std::{num::NonZeroUsize, str::FromStr, thread, time};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DURATION_RE: Regex = Regex::new("^([0-9]+)(ms|s|m|h|d)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CliDuration(pub time::Duration);

impl FromStr for CliDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let matches = DURATION_RE.captures(s).ok_or(format!(
            "Invalid duration format ({})! Supported are <amount>(ms|s|m|h|d)",
            s
        ))?;

        let (amount, suffix) = match (matches.get(1), matches.get(2)) {
            (Some(amount), Some(suffix)) => (amount.as_str(), suffix.as_str()),
            _ => return Err("Failed to match components".to_owned()),
        };
        let amount = u64::from_str(amount).map_err(|err| format!("{}: {}", amount, err))?;

        let factor = match suffix {
            "ms" => 1,
            "s" => 1000,
            "m" => 60 * 1000,
            "h" => 3600 * 1000,
            "d" => 3600 * 24 * 1000,
            _ => unreachable!(),
        };
        let millis = amount
            .checked_mul(factor)
            .ok_or(format!("Duration {} is too large", s))?;
        Ok(CliDuration(time::Duration::from_millis(millis)))
    }
}

/// Number of CPUs available to this process.
pub fn available_cpus() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Default number of afl-fuzz instances: half of the available CPUs.
pub fn default_instance_count() -> usize {
    (available_cpus() / 2).max(1)
}
