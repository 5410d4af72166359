//! Append-only execution ledgers.
//!
//! Each outcome kind has a text log with one `<test_file_path> <symbol_name>`
//! line per event, plus an in-memory per-symbol counter that is persisted as
//! `counts.json` when a run finishes. Counters resume from the `counts.json`
//! left in the same directory, so they total every run the logs hold. Lines
//! are written whole with a single append so several writers can share a log.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{CallrecError, CallrecResult};

pub const COUNTS_FILE_NAME: &str = "counts.json";

/// Symbol recorded when a test cannot be mapped back to its catalog record.
pub const UNKNOWN_SYMBOL: &str = "<unknown>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    Success,
    Failure,
    Timeout,
}

impl LedgerKind {
    pub fn file_name(self) -> &'static str {
        match self {
            LedgerKind::Success => "success.txt",
            LedgerKind::Failure => "failure.txt",
            LedgerKind::Timeout => "timeout.txt",
        }
    }
}

/// Per-symbol occurrence counts, in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub success: IndexMap<String, u64>,
    pub failure: IndexMap<String, u64>,
    pub timeout: IndexMap<String, u64>,
}

impl LedgerCounts {
    fn bucket_mut(&mut self, kind: LedgerKind) -> &mut IndexMap<String, u64> {
        match kind {
            LedgerKind::Success => &mut self.success,
            LedgerKind::Failure => &mut self.failure,
            LedgerKind::Timeout => &mut self.timeout,
        }
    }

    pub fn bucket(&self, kind: LedgerKind) -> &IndexMap<String, u64> {
        match kind {
            LedgerKind::Success => &self.success,
            LedgerKind::Failure => &self.failure,
            LedgerKind::Timeout => &self.timeout,
        }
    }

    pub fn total(&self, kind: LedgerKind) -> u64 {
        self.bucket(kind).values().sum()
    }
}

/// One parsed ledger line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub test_path: PathBuf,
    pub symbol_name: String,
}

pub struct Ledger {
    dir: PathBuf,
    counts: Mutex<LedgerCounts>,
}

/// Counters persisted by earlier runs in `dir`; empty when there are none.
fn load_counts(dir: &Path) -> LedgerCounts {
    let path = dir.join(COUNTS_FILE_NAME);
    let Ok(bytes) = fs::read(&path) else {
        return LedgerCounts::default();
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring unreadable counts file");
        LedgerCounts::default()
    })
}

impl Ledger {
    pub fn open(dir: &Path) -> CallrecResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            counts: Mutex::new(load_counts(dir)),
        })
    }

    pub fn path(&self, kind: LedgerKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn record(
        &self,
        kind: LedgerKind,
        test_path: &Path,
        symbol_name: &str,
    ) -> CallrecResult<()> {
        let line = format!("{} {}\n", test_path.display(), symbol_name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(kind))?;
        file.write_all(line.as_bytes())?;

        let mut counts = self.counts.lock();
        *counts
            .bucket_mut(kind)
            .entry(symbol_name.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    pub fn counts(&self) -> LedgerCounts {
        self.counts.lock().clone()
    }

    pub fn persist_counts(&self) -> CallrecResult<PathBuf> {
        let path = self.dir.join(COUNTS_FILE_NAME);
        let json = serde_json::to_vec_pretty(&*self.counts.lock())?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

pub fn parse_ledger_line(line: &str) -> CallrecResult<LedgerEntry> {
    let (path, symbol) = line
        .trim_end()
        .rsplit_once(' ')
        .ok_or_else(|| CallrecError::Catalog(format!("malformed ledger line {line:?}")))?;
    if path.is_empty() || symbol.is_empty() {
        return Err(CallrecError::Catalog(format!("malformed ledger line {line:?}")));
    }
    Ok(LedgerEntry {
        test_path: PathBuf::from(path),
        symbol_name: symbol.to_string(),
    })
}

/// Parse a ledger log. Blank lines are skipped.
pub fn read_ledger(path: &Path) -> CallrecResult<Vec<LedgerEntry>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_ledger_line)
        .collect()
}
