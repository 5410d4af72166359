//! The call recorder plugged into the instrumentation host.
//!
//! For every in-scope call that returns, the recorder resolves the callee's
//! identity, writes the argument and result blobs, and finally writes the
//! catalog record that makes the capture visible. Nothing escapes the hook:
//! failures become a line in the run's error log or a silent skip.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::RecorderConfig;
use crate::models::{CallSite, Callable, CapturedCall, Value};
use crate::recorder::filter::in_scope;
use crate::recorder::identity::resolve;
use crate::store::blob::{encode_args, encode_result};
use crate::store::catalog::{CaptureKey, CatalogRecord, ERROR_LOG_NAME};

/// Hooks the instrumentation host calls synchronously around each call.
///
/// A returned value would override the call's result in the host; the
/// recorder never overrides.
pub trait CallHook {
    fn on_call(
        &mut self,
        _site: &CallSite,
        _callable: &Callable,
        _pos_args: &[Value],
        _kw_args: &IndexMap<String, Value>,
    ) -> Option<Value> {
        None
    }

    fn on_return(
        &mut self,
        site: &CallSite,
        result: &Value,
        callable: &Callable,
        pos_args: &[Value],
        kw_args: &IndexMap<String, Value>,
    ) -> Option<Value>;
}

// ---------------------------------------------------------------------------
// Run naming
// ---------------------------------------------------------------------------

/// Run directory name for a capture run started at `at`:
/// `YYYYMMDD_HHMMSS_mmm` in UTC.
pub fn run_id_for(at: SystemTime) -> String {
    DateTime::<Utc>::from(at)
        .format("%Y%m%d_%H%M%S_%3f")
        .to_string()
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

pub struct Recorder {
    config: RecorderConfig,
    run_dir: PathBuf,
    sequence: u64,
    site_counts: HashMap<CallSite, u32>,
}

impl Recorder {
    /// A recorder writing into a fresh timestamped run under the log base.
    pub fn new(config: RecorderConfig) -> Self {
        let run_dir = config.log_base.join(run_id_for(SystemTime::now()));
        Self::with_run_dir(config, run_dir)
    }

    /// Relative run directories are anchored at the current directory, so
    /// catalog records stay valid from any working directory.
    pub fn with_run_dir(config: RecorderConfig, run_dir: PathBuf) -> Self {
        let run_dir = std::path::absolute(&run_dir).unwrap_or(run_dir);
        Self {
            config,
            run_dir,
            sequence: 0,
            site_counts: HashMap::new(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.run_dir.join(ERROR_LOG_NAME)
    }

    /// Sequence number the next capture will receive.
    pub fn next_sequence(&self) -> u64 {
        self.sequence
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Capture one returned call. `None` when the call was skipped or its
    /// capture failed.
    pub fn record(
        &mut self,
        site: &CallSite,
        callable: &Callable,
        pos_args: &[Value],
        kw_args: &IndexMap<String, Value>,
        result: &Value,
    ) -> Option<CapturedCall> {
        if !in_scope(callable, &self.config.target_prefix, self.config.match_mode) {
            return None;
        }

        let captured_at_site = self.site_counts.get(site).copied().unwrap_or(0);
        if captured_at_site >= self.config.capture_limit {
            return None;
        }

        let identity = resolve(callable);
        if identity.symbol_name.is_none() || identity.import_expression.is_none() {
            debug!(
                unit = %site.unit,
                site_id = site.site_id,
                "callee identity unresolved, skipping"
            );
            return None;
        }

        self.site_counts.insert(site.clone(), captured_at_site + 1);
        let key = CaptureKey::new(self.sequence, site.site_id);
        self.sequence += 1;

        if let Err(e) = fs::create_dir_all(&self.run_dir) {
            warn!(run_dir = %self.run_dir.display(), error = %e, "cannot create run directory");
            return None;
        }

        let call_path = self.run_dir.join(key.call_blob_name());
        let return_path = self.run_dir.join(key.return_blob_name());
        let meta_path = self.run_dir.join(key.meta_file_name());

        let written = encode_args(pos_args, kw_args)
            .and_then(|bytes| fs::write(&call_path, bytes).map_err(Into::into));
        if let Err(e) = written {
            debug!(error = %e, "args capture failed");
            self.log_error(&format!("Failed to dump call: {}", call_path.display()));
            return None;
        }

        let written = encode_result(result)
            .and_then(|bytes| fs::write(&return_path, bytes).map_err(Into::into));
        if let Err(e) = written {
            debug!(error = %e, "result capture failed");
            self.log_error(&format!("Failed to dump return: {}", return_path.display()));
            return None;
        }

        let record =
            CatalogRecord::from_identity(&identity, call_path.clone(), return_path.clone())?;
        if let Err(e) = record.write_to(&meta_path) {
            debug!(error = %e, "catalog write failed");
            self.log_error(&format!("Failed to write meta: {}", meta_path.display()));
            return None;
        }

        Some(CapturedCall {
            sequence: key.sequence,
            call_site: site.clone(),
            identity,
            args_blob_path: call_path,
            result_blob_path: return_path,
            meta_path,
        })
    }

    fn log_error(&self, line: &str) {
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.error_log_path())
            .and_then(|mut f| f.write_all(format!("{line}\n").as_bytes()));
        if let Err(e) = appended {
            warn!(error = %e, "cannot append to recorder error log: {line}");
        }
    }
}

impl CallHook for Recorder {
    fn on_return(
        &mut self,
        site: &CallSite,
        result: &Value,
        callable: &Callable,
        pos_args: &[Value],
        kw_args: &IndexMap<String, Value>,
    ) -> Option<Value> {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.record(site, callable, pos_args, kw_args, result)
        }));
        if outcome.is_err() {
            warn!(unit = %site.unit, site_id = site.site_id, "recorder panicked, capture dropped");
        }
        None
    }
}
