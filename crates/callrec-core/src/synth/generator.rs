//! Batch synthesis over every capture run below a log base.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::SynthesisPolicy;
use crate::errors::CallrecResult;
use crate::store::catalog::{discover_meta_files, MetaFile};
use crate::synth::emitter::{synthesize, SkipReason, Synthesis};

#[derive(Clone, Debug, Default)]
pub struct GenerationReport {
    /// Written test files, in capture order.
    pub generated: Vec<PathBuf>,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Meta files that could not be parsed.
    pub malformed: usize,
}

impl GenerationReport {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

enum Generated {
    Written(PathBuf),
    Skipped(SkipReason),
    Malformed,
}

fn generate_one(
    meta_path: &Path,
    out_base: &Path,
    policy: &SynthesisPolicy,
) -> CallrecResult<Generated> {
    let meta = match MetaFile::load(meta_path) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(meta = %meta_path.display(), error = %e, "malformed catalog record");
            return Ok(Generated::Malformed);
        }
    };
    match synthesize(&meta, out_base, policy) {
        Synthesis::Test(test) => {
            if let Some(parent) = test.file_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&test.file_path, test.source_text)?;
            Ok(Generated::Written(test.file_path))
        }
        Synthesis::Skipped(reason) => Ok(Generated::Skipped(reason)),
    }
}

/// Synthesize a test for every catalog record under `log_base`, writing them
/// to `<out_base>/<run>/test_<seq>_<site>.py`.
///
/// Records that cannot be synthesized are counted, not fatal. Only failing to
/// write a synthesized test aborts the batch.
pub fn generate_tests(
    log_base: &Path,
    out_base: &Path,
    policy: &SynthesisPolicy,
    workers: usize,
) -> CallrecResult<GenerationReport> {
    let meta_paths = discover_meta_files(log_base);
    if meta_paths.is_empty() {
        info!(log_base = %log_base.display(), "no catalog records found");
        return Ok(GenerationReport::default());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();
    let outcomes: Vec<CallrecResult<Generated>> = match pool {
        Ok(pool) => pool.install(|| {
            meta_paths
                .par_iter()
                .map(|path| generate_one(path, out_base, policy))
                .collect()
        }),
        Err(_) => meta_paths
            .iter()
            .map(|path| generate_one(path, out_base, policy))
            .collect(),
    };

    let mut report = GenerationReport::default();
    for outcome in outcomes {
        match outcome? {
            Generated::Written(path) => report.generated.push(path),
            Generated::Skipped(reason) => *report.skipped.entry(reason).or_insert(0) += 1,
            Generated::Malformed => report.malformed += 1,
        }
    }
    info!(
        generated = report.generated.len(),
        skipped = report.skipped_total(),
        malformed = report.malformed,
        "test synthesis finished"
    );
    Ok(report)
}
