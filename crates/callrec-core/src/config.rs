//! Runtime configuration and shared guard constants.
//!
//! Every knob has a compiled default and may be overridden through a
//! `CALLREC_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

// Recorder guards
pub const DEFAULT_CAPTURE_LIMIT: u32 = 1000;
pub const MAX_CAPTURE_LIMIT: u32 = 1_000_000;
pub const ZERO_PAD_WIDTH: usize = 6;
pub const DEFAULT_LOG_BASE: &str = "callrec-logs";

// Runner guards
pub const DEFAULT_WORKERS: usize = 8;
pub const MAX_WORKERS: usize = 256;
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_INTERPRETER: &str = "python3";

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

fn env_int(key: &str) -> Option<i64> {
    env_string(key).and_then(|v| v.parse::<i64>().ok())
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// How the target prefix is matched against a callable's defining file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PathMatch {
    /// Plain substring containment, no normalization.
    #[default]
    Substring,
    /// Lexically normalized, component-wise prefix match. Opt-in.
    Prefix,
}

impl PathMatch {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "substring" => Some(PathMatch::Substring),
            "prefix" => Some(PathMatch::Prefix),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub log_base: PathBuf,
    pub target_prefix: String,
    pub capture_limit: u32,
    pub match_mode: PathMatch,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_base: PathBuf::from(DEFAULT_LOG_BASE),
            target_prefix: String::new(),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            match_mode: PathMatch::Substring,
        }
    }
}

impl RecorderConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = env_string("CALLREC_LOG_BASE") {
            config.log_base = PathBuf::from(base);
        }
        if let Some(target) = env_string("CALLREC_TARGET_PATH") {
            config.target_prefix = target;
        }
        if let Some(limit) = env_int("CALLREC_CAPTURE_LIMIT") {
            config = config.with_capture_limit(limit);
        }
        if let Some(mode) = env_string("CALLREC_PATH_MATCH").and_then(|m| PathMatch::parse(&m)) {
            config.match_mode = mode;
        }
        config
    }

    pub fn with_capture_limit(mut self, limit: i64) -> Self {
        self.capture_limit = clamp_int(limit, 1, i64::from(MAX_CAPTURE_LIMIT)) as u32;
        self
    }
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug)]
pub struct SynthesisPolicy {
    /// Reject captures with neither positional nor keyword arguments.
    pub skip_no_arg_calls: bool,
    /// Bind an unused positional tuple / keyword mapping to `()` / `{}`
    /// instead of reading it from the args blob.
    pub placeholder_for_empty: bool,
}

impl Default for SynthesisPolicy {
    fn default() -> Self {
        Self {
            skip_no_arg_calls: true,
            placeholder_for_empty: true,
        }
    }
}

impl SynthesisPolicy {
    pub fn from_env() -> Self {
        Self {
            skip_no_arg_calls: env_flag("CALLREC_SKIP_NO_ARG", true),
            placeholder_for_empty: env_flag("CALLREC_PLACEHOLDER_EMPTY", true),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Coverage collection around a test process. Append and parallel modes are
/// mutually exclusive by construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoverageMode {
    #[default]
    Off,
    /// Accumulate every run into one data file.
    Append,
    /// One uniquely named data file per run, combined afterwards.
    Parallel,
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub interpreter: String,
    pub workers: usize,
    pub batch_size: usize,
    pub timeout: Option<Duration>,
    pub coverage: CoverageMode,
    /// Exported as `COVERAGE_FILE` when coverage is on.
    pub coverage_data: Option<PathBuf>,
    /// Capture root used to map test files back to their catalog records.
    pub log_base: PathBuf,
    pub ledger_dir: PathBuf,
    /// Prepended to the test process's `PYTHONPATH` so the target is importable.
    pub python_path: Vec<PathBuf>,
    pub working_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_WORKERS,
            timeout: Some(Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS)),
            coverage: CoverageMode::Off,
            coverage_data: None,
            log_base: PathBuf::from(DEFAULT_LOG_BASE),
            ledger_dir: PathBuf::from("."),
            python_path: Vec::new(),
            working_dir: None,
        }
    }
}

impl RunnerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(python) = env_string("CALLREC_PYTHON") {
            config.interpreter = python;
        }
        if let Some(base) = env_string("CALLREC_LOG_BASE") {
            config.log_base = PathBuf::from(base);
        }
        if let Some(workers) = env_int("CALLREC_WORKERS") {
            config = config.with_workers(workers);
        }
        if let Some(secs) = env_int("CALLREC_TEST_TIMEOUT_SECS") {
            config.timeout = (secs > 0).then(|| Duration::from_secs(secs as u64));
        }
        if let Some(paths) = std::env::var_os("CALLREC_PYTHONPATH") {
            config.python_path = std::env::split_paths(&paths).collect();
        }
        if let Some(dir) = env_string("CALLREC_WORKDIR") {
            config.working_dir = Some(PathBuf::from(dir));
        }
        config
    }

    /// Sets the pool width; the batch size follows it.
    pub fn with_workers(mut self, workers: i64) -> Self {
        self.workers = clamp_int(workers, 1, MAX_WORKERS as i64) as usize;
        self.batch_size = self.workers;
        self
    }
}
