//! Running one synthesized test as an isolated child process.
//!
//! Only the exit status matters; output is discarded. A test that outlives
//! the configured timeout is killed and reported as its own outcome.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use tracing::warn;
use wait_timeout::ChildExt;

use crate::config::{CoverageMode, RunnerConfig};
use crate::errors::{CallrecError, CallrecResult};
use crate::store::ledger::LedgerKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { exit_code: Option<i32> },
    TimedOut,
    LaunchError(String),
}

impl TestOutcome {
    pub fn ledger_kind(&self) -> LedgerKind {
        match self {
            TestOutcome::Passed => LedgerKind::Success,
            TestOutcome::Failed { .. } | TestOutcome::LaunchError(_) => LedgerKind::Failure,
            TestOutcome::TimedOut => LedgerKind::Timeout,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TestOutcome::Passed => Some(0),
            TestOutcome::Failed { exit_code } => *exit_code,
            TestOutcome::TimedOut | TestOutcome::LaunchError(_) => None,
        }
    }
}

fn classify(status: ExitStatus) -> TestOutcome {
    match status.code() {
        Some(0) => TestOutcome::Passed,
        code => TestOutcome::Failed { exit_code: code },
    }
}

fn python_path_env(config: &RunnerConfig) -> Option<OsString> {
    if config.python_path.is_empty() {
        return None;
    }
    let mut paths = config.python_path.clone();
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(paths).ok()
}

fn base_command(config: &RunnerConfig) -> Command {
    let mut command = Command::new(&config.interpreter);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(python_path) = python_path_env(config) {
        command.env("PYTHONPATH", python_path);
    }
    if let Some(dir) = &config.working_dir {
        command.current_dir(dir);
    }
    if config.coverage != CoverageMode::Off {
        if let Some(data) = &config.coverage_data {
            command.env("COVERAGE_FILE", data);
        }
    }
    command
}

/// The command that executes `test_path` under the configured mode.
pub fn build_command(test_path: &Path, config: &RunnerConfig) -> Command {
    let mut command = base_command(config);
    match config.coverage {
        CoverageMode::Off => {}
        CoverageMode::Append => {
            command.args(["-m", "coverage", "run", "--append"]);
        }
        CoverageMode::Parallel => {
            command.args(["-m", "coverage", "run", "--parallel-mode"]);
        }
    }
    command.arg(test_path);
    command
}

/// Execute one test. Never panics and never returns an error: launch
/// problems are an outcome like any other.
pub fn run_test(test_path: &Path, config: &RunnerConfig) -> TestOutcome {
    let mut child = match build_command(test_path, config).spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(test = %test_path.display(), error = %e, "cannot launch test");
            return TestOutcome::LaunchError(e.to_string());
        }
    };

    let Some(timeout) = config.timeout else {
        return match child.wait() {
            Ok(status) => classify(status),
            Err(e) => TestOutcome::LaunchError(e.to_string()),
        };
    };

    match child.wait_timeout(timeout) {
        Ok(Some(status)) => classify(status),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            TestOutcome::TimedOut
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            TestOutcome::LaunchError(e.to_string())
        }
    }
}

/// Merge parallel-mode coverage data files with the coverage tool's
/// `combine` step, run next to the configured data file.
pub fn combine_coverage(config: &RunnerConfig) -> CallrecResult<()> {
    let mut command = base_command(config);
    command.args(["-m", "coverage", "combine"]);
    if let Some(dir) = config
        .coverage_data
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        command.current_dir(dir);
    }
    if let Some(data) = &config.coverage_data {
        command.env("COVERAGE_FILE", data);
    }
    let status = command
        .status()
        .map_err(|e| CallrecError::Process(format!("cannot launch coverage combine: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(CallrecError::Process(format!(
            "coverage combine exited with {status}"
        )))
    }
}
