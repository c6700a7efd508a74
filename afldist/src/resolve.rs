//! Resolution of build directories and target binaries. All functions get the
//! values they depend on passed in and never consult the process environment.

use std::{
    fs,
    path::{Path, PathBuf},
};

use glob::glob;
use itertools::Itertools;

use crate::{
    constants::AFL_RESUME_INPUT,
    error::{OrchestratorError, Result},
};

/// Locate the build directory matching `pattern`. Build directories are
/// siblings of the source directory, thus relative patterns are resolved
/// against its parent. An absolute pattern is used as is.
pub fn resolve_build_dir(src_dir: &Path, pattern: &str) -> Result<PathBuf> {
    let base = src_dir.parent().unwrap_or(src_dir);
    let search_path = base.join(pattern);
    let search_str = search_path.to_str().ok_or_else(|| {
        OrchestratorError::InvalidConfig(format!("Search path {:?} is not valid UTF-8", search_path))
    })?;

    let paths = glob(search_str)
        .map_err(|err| {
            OrchestratorError::InvalidConfig(format!("Invalid glob pattern {search_str}: {err}"))
        })?
        .flatten()
        .collect_vec();

    match paths.len() {
        0 => Err(OrchestratorError::MissingCollaborator(format!(
            "Glob search for build dir failed ({})",
            search_str
        ))),
        1 => Ok(paths.into_iter().next().unwrap_or_default()),
        _ => Err(OrchestratorError::InvalidConfig(format!(
            "Glob search returned multiple results: {:?}",
            paths
        ))),
    }
}

/// Turn the user supplied target command line into one whose first element
/// is the canonical path of the target binary inside `root_dir`.
pub fn resolve_cmdline(root_dir: &Path, cmdline: &[String]) -> Result<Vec<String>> {
    if !root_dir.exists() {
        return Err(OrchestratorError::MissingCollaborator(format!(
            "Directory {} does not exist!",
            root_dir.display()
        )));
    }

    let (bin, args) = cmdline.split_first().ok_or_else(|| {
        OrchestratorError::InvalidConfig("No target command line provided".to_owned())
    })?;

    if Path::new(bin).is_absolute() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "Path to the target binary must be relative to the project root {} (got {})",
            root_dir.display(),
            bin
        )));
    }

    let joined = root_dir.join(bin);
    let bin_path = fs::canonicalize(&joined).map_err(|_| {
        OrchestratorError::MissingCollaborator(format!(
            "Could not find binary at {}! The path must be relative to {}",
            joined.display(),
            root_dir.display()
        ))
    })?;

    let mut resolved = vec![bin_path.to_string_lossy().into_owned()];
    resolved.extend(args.iter().cloned());
    Ok(resolved)
}

/// Check whether the seed corpus exists and is not empty. The resume
/// marker `-` is passed through to afl-fuzz unchecked.
pub fn check_input_directory(input_dir: &Path) -> Result<()> {
    if input_dir == Path::new(AFL_RESUME_INPUT) {
        return Ok(());
    }
    let mut entries = fs::read_dir(input_dir).map_err(|err| {
        OrchestratorError::MissingCollaborator(format!(
            "Failed to access input directory {}: {}",
            input_dir.display(),
            err
        ))
    })?;
    if entries.next().is_none() {
        return Err(OrchestratorError::MissingCollaborator(format!(
            "No inputs found in input directory {}",
            input_dir.display()
        )));
    }
    Ok(())
}

pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        return Err(OrchestratorError::MissingCollaborator(format!(
            "{} not found at {}",
            what,
            path.display()
        )));
    }
    Ok(())
}
