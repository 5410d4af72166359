//! Batched, bounded-parallel execution of synthesized tests.
//!
//! Tests are submitted in batches of `batch_size` to a pool of `workers`
//! threads, each running one child process. The stop predicate is polled
//! between batches and before a finished batch is written to the ledger, so
//! an interrupted batch leaves no partial ledger lines behind.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RunnerConfig;
use crate::errors::{CallrecError, CallrecResult};
use crate::runner::process::{run_test, TestOutcome};
use crate::store::catalog::{symbol_for_test, TEST_FILE_PREFIX, TEST_FILE_SUFFIX};
use crate::store::ledger::{read_ledger, Ledger, LedgerCounts, LedgerKind, UNKNOWN_SYMBOL};

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub submitted: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub counts: LedgerCounts,
    pub counts_path: Option<PathBuf>,
}

impl RunSummary {
    fn tally(&mut self, kind: LedgerKind) {
        match kind {
            LedgerKind::Success => self.passed += 1,
            LedgerKind::Failure => self.failed += 1,
            LedgerKind::Timeout => self.timed_out += 1,
        }
    }
}

fn is_test_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEST_FILE_PREFIX) && n.ends_with(TEST_FILE_SUFFIX))
        .unwrap_or(false)
}

/// Every `test_*.py` below `dir`, sorted.
pub fn discover_tests(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_test_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    found.sort();
    found
}

fn execute_chunk(
    pool: Option<&ThreadPool>,
    chunk: &[PathBuf],
    config: &RunnerConfig,
) -> Vec<TestOutcome> {
    match pool {
        Some(pool) => {
            pool.install(|| chunk.par_iter().map(|path| run_test(path, config)).collect())
        }
        None => chunk.iter().map(|path| run_test(path, config)).collect(),
    }
}

/// Run `paths` and append one ledger line per completed test.
///
/// Returns [`CallrecError::Interrupted`] as soon as `should_stop` reports
/// true; batches already written stay in the ledger.
pub fn run_batch<F>(
    paths: &[PathBuf],
    config: &RunnerConfig,
    should_stop: F,
) -> CallrecResult<RunSummary>
where
    F: Fn() -> bool,
{
    let ledger = Ledger::open(&config.ledger_dir)?;
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
    {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!(error = %e, "cannot build worker pool, running tests sequentially");
            None
        }
    };

    let mut summary = RunSummary::default();
    for (index, chunk) in paths.chunks(config.batch_size.max(1)).enumerate() {
        if should_stop() {
            info!(completed = summary.submitted, "test run interrupted");
            return Err(CallrecError::Interrupted);
        }
        debug!(batch = index, size = chunk.len(), "submitting batch");
        let outcomes = execute_chunk(pool.as_ref(), chunk, config);
        if should_stop() {
            info!(completed = summary.submitted, "test run interrupted");
            return Err(CallrecError::Interrupted);
        }

        for (path, outcome) in chunk.iter().zip(outcomes) {
            let symbol = symbol_for_test(path, &config.log_base)
                .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());
            let kind = outcome.ledger_kind();
            ledger.record(kind, path, &symbol)?;
            summary.tally(kind);
            summary.submitted += 1;
        }
    }

    summary.counts_path = Some(ledger.persist_counts()?);
    summary.counts = ledger.counts();
    info!(
        submitted = summary.submitted,
        passed = summary.passed,
        failed = summary.failed,
        timed_out = summary.timed_out,
        "test run finished"
    );
    Ok(summary)
}

/// Test paths listed in a success ledger, first occurrence order, no repeats.
pub fn ledger_test_paths(success_ledger: &Path) -> CallrecResult<Vec<PathBuf>> {
    let unique: IndexSet<PathBuf> = read_ledger(success_ledger)?
        .into_iter()
        .map(|entry| entry.test_path)
        .collect();
    Ok(unique.into_iter().collect())
}

/// Re-run exactly the tests a previous run recorded as successes.
pub fn rerun_successes<F>(
    success_ledger: &Path,
    config: &RunnerConfig,
    should_stop: F,
) -> CallrecResult<RunSummary>
where
    F: Fn() -> bool,
{
    let paths = ledger_test_paths(success_ledger)?;
    info!(
        ledger = %success_ledger.display(),
        tests = paths.len(),
        "re-running recorded successes"
    );
    run_batch(&paths, config, should_stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs;
    use std::process::Command;
    use std::time::Duration;

    use crate::config::{PathMatch, RecorderConfig, SynthesisPolicy};
    use crate::models::{CallSite, Callable, ObjectValue, Origin, Value};
    use crate::recorder::hook::Recorder;
    use crate::store::ledger::read_ledger;
    use crate::synth::generator::generate_tests;

    fn sh_config(root: &Path, workers: i64) -> RunnerConfig {
        RunnerConfig {
            interpreter: "sh".to_string(),
            timeout: Some(Duration::from_secs(20)),
            log_base: root.join("logs"),
            ledger_dir: root.join("ledger"),
            ..RunnerConfig::default()
        }
        .with_workers(workers)
    }

    fn write_tests(dir: &Path, bodies: &[&str]) -> Vec<PathBuf> {
        fs::create_dir_all(dir).unwrap();
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| {
                let path = dir.join(format!("test_{i:06}_000001.py"));
                fs::write(&path, body).unwrap();
                path
            })
            .collect()
    }

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_discover_tests_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("20240101_000000_000");
        write_tests(&run, &["exit 0\n", "exit 0\n"]);
        fs::write(run.join("helper.py"), "").unwrap();
        fs::write(run.join("test_notes.txt"), "").unwrap();

        let found = discover_tests(dir.path());
        assert_eq!(
            found,
            vec![run.join("test_000000_000001.py"), run.join("test_000001_000001.py")]
        );
    }

    #[test]
    fn test_every_test_lands_in_exactly_one_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let tests = write_tests(
            &dir.path().join("out/run"),
            &["exit 0\n", "exit 1\n", "exit 0\n", "exit 2\n", "exit 0\n"],
        );
        let config = sh_config(dir.path(), 2);

        let summary = run_batch(&tests, &config, || false).unwrap();
        assert_eq!(summary.submitted, 5);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 2);

        let successes = read_ledger(&config.ledger_dir.join("success.txt")).unwrap();
        let failures = read_ledger(&config.ledger_dir.join("failure.txt")).unwrap();
        assert_eq!(successes.len() + failures.len(), 5);
        let mut seen: Vec<_> = successes
            .iter()
            .chain(failures.iter())
            .map(|e| e.test_path.clone())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
        assert!(successes.iter().all(|e| e.symbol_name == UNKNOWN_SYMBOL));
        assert!(config.ledger_dir.join("counts.json").is_file());
        assert_eq!(summary.counts.total(LedgerKind::Success), 3);
    }

    #[test]
    fn test_timeouts_have_their_own_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let tests = write_tests(&dir.path().join("out/run"), &["sleep 30\n", "exit 0\n"]);
        let config = RunnerConfig {
            timeout: Some(Duration::from_millis(200)),
            ..sh_config(dir.path(), 2)
        };
        let summary = run_batch(&tests, &config, || false).unwrap();
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.passed, 1);
        let timeouts = read_ledger(&config.ledger_dir.join("timeout.txt")).unwrap();
        assert_eq!(timeouts[0].test_path, tests[0]);
    }

    #[test]
    fn test_interrupt_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let tests = write_tests(&dir.path().join("out/run"), &["exit 0\n"]);
        let config = sh_config(dir.path(), 1);
        let err = run_batch(&tests, &config, || true).unwrap_err();
        assert!(matches!(err, CallrecError::Interrupted));
        assert!(!config.ledger_dir.join("success.txt").exists());
    }

    #[test]
    fn test_interrupt_keeps_finished_batches_only() {
        let dir = tempfile::tempdir().unwrap();
        let tests = write_tests(&dir.path().join("out/run"), &["exit 0\n", "exit 0\n", "exit 0\n"]);
        let config = sh_config(dir.path(), 1);
        let polls = Cell::new(0);
        let err = run_batch(&tests, &config, || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        })
        .unwrap_err();
        assert!(matches!(err, CallrecError::Interrupted));
        let successes = read_ledger(&config.ledger_dir.join("success.txt")).unwrap();
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].test_path, tests[0]);
    }

    #[test]
    fn test_ledger_test_paths_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join("success.txt");
        fs::write(&ledger, "/t/test_b.py add\n/t/test_a.py add\n/t/test_b.py add\n").unwrap();
        assert_eq!(
            ledger_test_paths(&ledger).unwrap(),
            vec![PathBuf::from("/t/test_b.py"), PathBuf::from("/t/test_a.py")]
        );
    }

    #[test]
    fn test_record_generate_run_rerun() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let pkg = root.join("pkg");
        fs::create_dir_all(pkg.join("calc")).unwrap();
        fs::write(pkg.join("calc/__init__.py"), "").unwrap();
        fs::write(pkg.join("calc/ops.py"), "def add(a, b):\n    return a + b\n").unwrap();

        let logs = root.join("logs");
        let ops = pkg.join("calc/ops.py");
        let mut recorder = Recorder::with_run_dir(
            RecorderConfig {
                log_base: logs.clone(),
                target_prefix: pkg.join("calc").display().to_string(),
                capture_limit: 100,
                match_mode: PathMatch::Substring,
            },
            logs.join("20240101_000000_000"),
        );
        let origin = Origin::new("calc.ops", ops.display().to_string());
        let add = Callable::function("add", "add", origin);
        let site = CallSite::new("main.py", 1);
        let kw = indexmap::IndexMap::new();
        recorder.record(&site, &add, &[Value::Int(3), Value::Int(4)], &kw, &Value::Int(7));
        // Recorded result that no longer matches the implementation.
        recorder.record(&site, &add, &[Value::Int(1), Value::Int(1)], &kw, &Value::Int(3));

        let out = root.join("generated");
        let report = generate_tests(&logs, &out, &SynthesisPolicy::default(), 2).unwrap();
        assert_eq!(report.generated.len(), 2);

        let config = RunnerConfig {
            interpreter: "python3".to_string(),
            log_base: logs.clone(),
            ledger_dir: root.join("ledger"),
            python_path: vec![pkg.clone()],
            ..RunnerConfig::default()
        }
        .with_workers(2);
        let summary = run_batch(&discover_tests(&out), &config, || false).unwrap();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);

        let successes = read_ledger(&config.ledger_dir.join("success.txt")).unwrap();
        assert_eq!(successes[0].test_path, report.generated[0]);
        assert_eq!(successes[0].symbol_name, "add");

        let rerun_config = RunnerConfig {
            ledger_dir: root.join("rerun"),
            ..config.clone()
        };
        let rerun = rerun_successes(&config.ledger_dir.join("success.txt"), &rerun_config, || false)
            .unwrap();
        assert_eq!(rerun.submitted, 1);
        assert_eq!(rerun.passed, 1);
    }

    const SHAPES_PY: &str = "\
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y


def translate(p, delta):
    return Point(p.x + delta['dx'], p.y + delta['dy'])


def tagset(tags):
    return tags | {'seen'}


def checksum(blob):
    return bytes(reversed(blob))


def square(n):
    return n * n


def scale(x):
    return x * 2
";

    const FMT_PY: &str = "\
from calc.shapes import Point


def json(x):
    return x * 2


def vars(p):
    return Point(p.y, p.x)
";

    fn point(x: i64, y: i64) -> Value {
        Value::Object(
            ObjectValue::new("calc.shapes", "Point")
                .with_field("x", Value::Int(x))
                .with_field("y", Value::Int(y)),
        )
    }

    #[test]
    fn test_recorded_payload_kinds_replay() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let pkg = root.join("pkg");
        fs::create_dir_all(pkg.join("calc")).unwrap();
        fs::write(pkg.join("calc/__init__.py"), "").unwrap();
        fs::write(pkg.join("calc/shapes.py"), SHAPES_PY).unwrap();
        fs::write(pkg.join("calc/fmt.py"), FMT_PY).unwrap();

        let logs = root.join("logs");
        let mut recorder = Recorder::with_run_dir(
            RecorderConfig {
                log_base: logs.clone(),
                target_prefix: pkg.join("calc").display().to_string(),
                capture_limit: 100,
                match_mode: PathMatch::Substring,
            },
            logs.join("20240101_000000_000"),
        );
        let function = |module: &str, name: &str| {
            let file = pkg.join(format!("{}.py", module.replace('.', "/")));
            Callable::function(name, name, Origin::new(module, file.display().to_string()))
        };
        let site = CallSite::new("main.py", 1);
        let no_kw = indexmap::IndexMap::new();
        let delta = indexmap::IndexMap::from([(
            "delta".to_string(),
            Value::Dict(vec![
                (Value::str("dx"), Value::Int(3)),
                (Value::str("dy"), Value::Int(4)),
            ]),
        )]);

        let calls = [
            ("calc.shapes", "translate", vec![point(1, 2)], &delta, point(4, 6)),
            (
                "calc.shapes",
                "tagset",
                vec![Value::Set(vec![Value::str("a")])],
                &no_kw,
                Value::Set(vec![Value::str("seen"), Value::str("a")]),
            ),
            (
                "calc.shapes",
                "checksum",
                vec![Value::Bytes(vec![1, 2, 0xff])],
                &no_kw,
                Value::Bytes(vec![0xff, 2, 1]),
            ),
            (
                "calc.shapes",
                "square",
                vec![Value::BigInt("1180591620717411303424".to_string())],
                &no_kw,
                Value::BigInt("1393796574908163946345982392040522594123776".to_string()),
            ),
            (
                "calc.shapes",
                "scale",
                vec![Value::Float(f64::INFINITY)],
                &no_kw,
                Value::Float(f64::INFINITY),
            ),
            ("calc.fmt", "json", vec![Value::Int(3)], &no_kw, Value::Int(6)),
            ("calc.fmt", "vars", vec![point(1, 2)], &no_kw, point(2, 1)),
        ];
        for &(module, name, ref pos, kw, ref result) in &calls {
            let captured = recorder.record(&site, &function(module, name), pos, kw, result);
            assert!(captured.is_some(), "{module}.{name} was not captured");
        }

        let out = root.join("generated");
        let report = generate_tests(&logs, &out, &SynthesisPolicy::default(), 2).unwrap();
        assert_eq!(report.generated.len(), calls.len());

        let config = RunnerConfig {
            interpreter: "python3".to_string(),
            log_base: logs.clone(),
            ledger_dir: root.join("ledger"),
            python_path: vec![pkg.clone()],
            ..RunnerConfig::default()
        }
        .with_workers(2);
        let summary = run_batch(&discover_tests(&out), &config, || false).unwrap();
        let failures = read_ledger(&config.ledger_dir.join("failure.txt")).unwrap_or_default();
        assert_eq!(summary.passed, calls.len(), "failed: {failures:?}");
    }
}
