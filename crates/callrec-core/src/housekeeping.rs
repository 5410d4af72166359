//! Cleanup helpers for log bases and coverage data.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::CallrecResult;
use crate::store::catalog::ERROR_LOG_NAME;

const COVERAGE_DATA_PREFIX: &str = ".coverage";
const COVERAGE_CONFIG_NAME: &str = ".coveragerc";

fn is_coverage_data(name: &str) -> bool {
    name.starts_with(COVERAGE_DATA_PREFIX) && name != COVERAGE_CONFIG_NAME
}

/// Delete coverage data files (`.coverage`, `.coverage.*`) anywhere below
/// `dir`, leaving `.coveragerc` alone. Returns the removed paths.
pub fn clear_coverage_data(dir: &Path) -> CallrecResult<Vec<PathBuf>> {
    let targets: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().map(is_coverage_data).unwrap_or(false))
        .map(|e| e.into_path())
        .collect();

    let mut removed = Vec::with_capacity(targets.len());
    for path in targets {
        fs::remove_file(&path)?;
        removed.push(path);
    }
    removed.sort();
    debug!(dir = %dir.display(), removed = removed.len(), "cleared coverage data");
    Ok(removed)
}

fn run_is_empty(run_dir: &Path) -> CallrecResult<bool> {
    for entry in fs::read_dir(run_dir)? {
        if entry?.file_name() != ERROR_LOG_NAME {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Remove run directories under `log_base` that captured nothing: empty, or
/// holding only the error log.
pub fn prune_empty_runs(log_base: &Path) -> CallrecResult<Vec<PathBuf>> {
    if !log_base.is_dir() {
        return Ok(Vec::new());
    }
    let mut pruned = Vec::new();
    for entry in fs::read_dir(log_base)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let run_dir = entry.path();
        if run_is_empty(&run_dir)? {
            fs::remove_dir_all(&run_dir)?;
            pruned.push(run_dir);
        }
    }
    pruned.sort();
    if !pruned.is_empty() {
        info!(log_base = %log_base.display(), pruned = pruned.len(), "pruned empty capture runs");
    }
    Ok(pruned)
}
